//! Vector Source Library - Tiled, simplified and clustered vector data sources
//!
//! This library provides the geometry plumbing between a raw vector source
//! (a database, a file reader, an in-memory list) and a map renderer. Raw
//! sources are wrapped in decorators that each rewrite the element collection
//! returned for an envelope and zoom level.
//!
//! # Architecture
//!
//! - **[`VectorDataSource`]**: The source abstraction every decorator wraps and implements
//! - **[`TilingDataSource`]**: Splits queries into a tile grid and caches per-tile results
//! - **[`SimplifyingDataSource`]**: Zoom-dependent point thinning and line/ring simplification
//! - **[`ClusteringDataSource`]**: Greedy merging of nearby points into cluster elements
//! - **[`wkb`] / [`wkt`]**: Binary geometry decoding and text output
//! - **[`tile_math`]**: Web Mercator tile pyramid arithmetic
//!
//! A typical chain is `Clustering(Simplifying(Tiling(raw)))`; each stage only
//! sees the stage below it through [`VectorDataSource`].

pub mod clustering;
mod geometry;
pub mod projection;
pub mod simplifier;
mod source;
pub mod tile_math;
pub mod tiling;
pub mod wkb;
pub mod wkt;

// Public API exports
pub use clustering::{
    CentroidMerger, ClusterConfig, ClusterMerger, Clusterer, ClusteringDataSource,
    GreedyClusterer,
};
pub use geometry::{
    Attributes, Element, ElementMap, Envelope, EnvelopeBuilder, Geometry, GeometryType, MapPos,
    convex_hull_of,
};
pub use projection::{EPSG3857, PlanarProjection, Projection};
pub use simplifier::{SimplifierConfig, SimplifyAlgorithm, SimplifyingDataSource};
pub use source::{MemoryDataSource, VectorDataSource};
pub use tiling::{LastRequestCache, LruTileCache, TileCache, TileKey, TilingDataSource};

/// Error types for the data module
#[derive(Debug, thiserror::Error)]
pub enum DataError {
    #[error("Unsupported WKB geometry type: {0}")]
    UnsupportedGeometryType(u32),

    #[error("Truncated WKB data while reading {context}")]
    Truncated { context: &'static str },

    #[error("Invalid geometry: {0}")]
    InvalidGeometry(String),

    #[error("Source error: {0}")]
    Source(Box<dyn std::error::Error + Send + Sync>),
}

pub type Result<T> = std::result::Result<T, DataError>;
