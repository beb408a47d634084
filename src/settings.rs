use crate::ToolError;
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use vector_source_lib::{ClusterConfig, Envelope, SimplifierConfig, SimplifyAlgorithm};

#[derive(Parser, Debug, Clone)]
#[clap(author, version, about, long_about = None)]
/// Vector Source Tool - Query hex-encoded WKB files through the tiling, simplifying and clustering pipeline
pub struct Settings {
    /// Files with one hex-encoded WKB geometry per line
    #[clap(value_name = "FILE", required = true, env = "VECTOR_SOURCE_FILES", value_delimiter = ',')]
    pub files: Vec<PathBuf>,

    /// Query bounding box in WGS84 degrees: min_lon,min_lat,max_lon,max_lat
    #[clap(
        long,
        value_name = "BBOX",
        allow_hyphen_values = true,
        env = "VECTOR_SOURCE_BBOX",
        default_value = "-180,-85.05112878,180,85.05112878"
    )]
    pub bbox: String,

    /// Zoom level of the query
    #[clap(short, long, env = "VECTOR_SOURCE_ZOOM", default_value = "0")]
    pub zoom: u32,

    /// Simplification tolerance as a fraction of the world size (0 disables)
    #[clap(short, long, env = "VECTOR_SOURCE_TOLERANCE", default_value = "0.0")]
    pub tolerance: f64,

    /// Simplification algorithm for lines
    #[clap(long, env = "VECTOR_SOURCE_LINE_ALGORITHM", default_value = "douglas-peucker")]
    pub line_algorithm: SimplifyAlgorithm,

    /// Simplification algorithm for polygon rings
    #[clap(long, env = "VECTOR_SOURCE_POLYGON_ALGORITHM", default_value = "vertex-snap")]
    pub polygon_algorithm: SimplifyAlgorithm,

    /// Cluster points closer than this fraction of the world size (at zoom 0)
    #[clap(long, env = "VECTOR_SOURCE_CLUSTER_DISTANCE")]
    pub cluster_distance: Option<f64>,

    /// Minimum number of points in a merged cluster
    #[clap(long, env = "VECTOR_SOURCE_CLUSTER_THRESHOLD", default_value = "2")]
    pub cluster_threshold: usize,

    /// Query the raw source directly instead of tile by tile
    #[clap(long, env = "VECTOR_SOURCE_NO_TILING", default_value = "false")]
    pub no_tiling: bool,

    /// Keep this many tiles in an LRU cache instead of only the last request's tiles
    #[clap(long, env = "VECTOR_SOURCE_TILE_CACHE")]
    pub tile_cache: Option<usize>,

    /// Output format
    #[clap(long, env = "VECTOR_SOURCE_FORMAT", value_enum, default_value_t = OutputFormat::Tsv)]
    pub format: OutputFormat,
}

/// How query results are printed
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// `id<TAB>WKT` per element
    Tsv,
    /// One JSON object per element
    Json,
}

impl Settings {
    /// Parse the query bounding box
    pub fn bbox_wgs84(&self) -> Result<Envelope, ToolError> {
        let values = self
            .bbox
            .split(',')
            .map(|part| part.trim().parse::<f64>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| ToolError::InvalidBbox(self.bbox.clone()))?;
        match values.as_slice() {
            &[min_lon, min_lat, max_lon, max_lat] if values.iter().all(|v| v.is_finite()) => {
                Ok(Envelope::new(min_lon, min_lat, max_lon, max_lat))
            }
            _ => Err(ToolError::InvalidBbox(self.bbox.clone())),
        }
    }

    pub fn simplifier_config(&self) -> SimplifierConfig {
        SimplifierConfig {
            tolerance: self.tolerance,
            line_algorithm: self.line_algorithm,
            polygon_algorithm: self.polygon_algorithm,
        }
    }

    /// Clustering configuration, `None` when clustering is off
    pub fn cluster_config(&self) -> Option<ClusterConfig> {
        self.cluster_distance.map(|distance| ClusterConfig {
            distance,
            threshold: self.cluster_threshold,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Settings {
        Settings::try_parse_from(std::iter::once("vector-source-tool").chain(args.iter().copied()))
            .unwrap()
    }

    #[test]
    fn test_defaults() {
        let settings = parse(&["points.hex"]);
        assert_eq!(settings.files, vec![PathBuf::from("points.hex")]);
        assert_eq!(settings.zoom, 0);
        assert_eq!(settings.line_algorithm, SimplifyAlgorithm::DouglasPeucker);
        assert_eq!(settings.polygon_algorithm, SimplifyAlgorithm::VertexSnap);
        assert!(settings.cluster_config().is_none());
        assert!(!settings.no_tiling);
        assert_eq!(settings.format, OutputFormat::Tsv);
    }

    #[test]
    fn test_cluster_and_simplifier_options() {
        let settings = parse(&[
            "a.hex",
            "b.hex",
            "--zoom",
            "12",
            "--tolerance",
            "0.001",
            "--line-algorithm",
            "vertex-snap",
            "--cluster-distance",
            "0.02",
            "--cluster-threshold",
            "5",
        ]);
        assert_eq!(settings.files.len(), 2);
        assert_eq!(settings.simplifier_config().tolerance, 0.001);
        assert_eq!(
            settings.simplifier_config().line_algorithm,
            SimplifyAlgorithm::VertexSnap
        );
        let cluster = settings.cluster_config().unwrap();
        assert_eq!(cluster.distance, 0.02);
        assert_eq!(cluster.threshold, 5);
    }

    #[test]
    fn test_bbox_parsing() {
        let settings = parse(&["a.hex", "--bbox", "10, 50 ,-5,40"]);
        assert_eq!(
            settings.bbox_wgs84().unwrap(),
            Envelope::new(-5.0, 40.0, 10.0, 50.0)
        );

        let settings = parse(&["a.hex", "--bbox", "1,2,3"]);
        assert!(matches!(settings.bbox_wgs84(), Err(ToolError::InvalidBbox(_))));
        let settings = parse(&["a.hex", "--bbox", "1,2,x,4"]);
        assert!(settings.bbox_wgs84().is_err());
    }

    #[test]
    fn test_unknown_algorithm_is_rejected() {
        let result = Settings::try_parse_from(["vector-source-tool", "a.hex", "--line-algorithm", "magic"]);
        assert!(result.is_err());
    }
}
