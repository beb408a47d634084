//! Vector Source Tool - command-line access to the vector source pipeline
//!
//! Reads hex-encoded WKB files into an in-memory source, wraps it in the
//! tiling, simplifying and clustering decorators from [`vector_source_lib`]
//! and prints the result of a single query.

pub mod pipeline;
pub mod settings;

pub use settings::Settings;

use std::path::PathBuf;
use vector_source_lib::DataError;

/// Error types for the command-line tool
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error(transparent)]
    Data(#[from] DataError),

    #[error("Failed to read {path}: {source}")]
    ReadFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid hex in {name} at line {line}: {source}")]
    InvalidHex {
        name: String,
        line: usize,
        source: hex::FromHexError,
    },

    #[error("Invalid bounding box '{0}', expected min_lon,min_lat,max_lon,max_lat")]
    InvalidBbox(String),

    #[error("JSON output error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
