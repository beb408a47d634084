//! Loading hex-WKB files and running one query through the decorator chain

use crate::{Settings, ToolError, settings::OutputFormat};
use rayon::prelude::*;
use serde::Serialize;
use std::io::Write;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use vector_source_lib::{
    Attributes, CentroidMerger, ClusteringDataSource, EPSG3857, Element, ElementMap, Envelope,
    GeometryType, LruTileCache, MapPos, MemoryDataSource, Projection, SimplifyingDataSource,
    TilingDataSource, VectorDataSource, wkb, wkt,
};

/// Attribute naming the file an element was read from
pub const FILE_ATTRIBUTE: &str = "file";
/// Attribute holding the 1-based line an element was read from
pub const LINE_ATTRIBUTE: &str = "line";

/// Decode hex-encoded WKB, one geometry per line
///
/// Blank lines and lines starting with `#` are skipped. Multi-geometries and
/// collections yield one element per member, all tagged with the same line.
/// Lines that are valid hex but not valid WKB are logged and skipped.
pub fn parse_hex_lines(name: &str, content: &str) -> Result<Vec<Element>, ToolError> {
    #[cfg(feature = "profiling")]
    profiling::scope!("pipeline::parse_hex_lines");

    let mut elements = Vec::new();
    for (index, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let bytes = hex::decode(line).map_err(|source| ToolError::InvalidHex {
            name: name.to_string(),
            line: index + 1,
            source,
        })?;

        let mut attributes = Attributes::new();
        attributes.insert(FILE_ATTRIBUTE.to_string(), name.to_string());
        attributes.insert(LINE_ATTRIBUTE.to_string(), (index + 1).to_string());
        let decoded = wkb::decode_elements(&bytes, &attributes);
        if decoded.is_empty() {
            tracing::warn!(name, line = index + 1, "Skipping line without geometry");
        }
        elements.extend(decoded);
    }
    Ok(elements)
}

fn load_file(path: &Path) -> Result<Vec<Element>, ToolError> {
    let content = std::fs::read_to_string(path).map_err(|source| ToolError::ReadFile {
        path: path.to_path_buf(),
        source,
    })?;
    parse_hex_lines(&path.display().to_string(), &content)
}

/// Load all files in parallel into one in-memory source in Web Mercator
///
/// Ids are assigned in file order, then line order.
pub fn load_files(paths: &[PathBuf]) -> Result<MemoryDataSource, ToolError> {
    #[cfg(feature = "profiling")]
    profiling::scope!("pipeline::load_files");

    let per_file: Vec<Vec<Element>> = paths
        .par_iter()
        .map(|path| load_file(path))
        .collect::<Result<_, _>>()?;

    let source = MemoryDataSource::from_elements(Arc::new(EPSG3857), per_file.into_iter().flatten());
    tracing::info!(files = paths.len(), elements = source.len(), "Loaded input");
    Ok(source)
}

/// Wrap the raw source in the decorators selected by `settings`
///
/// The chain is `Clustering(Simplifying(Tiling(raw)))`; tiling and clustering
/// are optional, simplification is a passthrough at zero tolerance.
pub fn build_source<S>(settings: &Settings, raw: S) -> Box<dyn VectorDataSource>
where
    S: VectorDataSource + 'static,
{
    let mut source: Box<dyn VectorDataSource> = Box::new(raw);

    if !settings.no_tiling {
        source = match settings.tile_cache.and_then(NonZeroUsize::new) {
            Some(capacity) => Box::new(TilingDataSource::with_cache(
                source,
                LruTileCache::new(capacity),
            )),
            None => Box::new(TilingDataSource::new(source)),
        };
    }

    source = Box::new(SimplifyingDataSource::new(
        source,
        settings.simplifier_config(),
    ));

    if let Some(config) = settings.cluster_config() {
        source = Box::new(ClusteringDataSource::new(source, config, CentroidMerger));
    }
    source
}

/// Query envelope in the source projection for a WGS84 bounding box
pub fn query_envelope(projection: &dyn Projection, bbox: &Envelope) -> Envelope {
    let min = projection.from_wgs84(MapPos::new(bbox.min_x, bbox.min_y));
    let max = projection.from_wgs84(MapPos::new(bbox.max_x, bbox.max_y));
    Envelope::new(min.x, min.y, max.x, max.y)
}

/// Run the configured query against `source`
pub fn run_query(
    settings: &Settings,
    source: &dyn VectorDataSource,
) -> Result<ElementMap, ToolError> {
    let envelope = query_envelope(source.projection().as_ref(), &settings.bbox_wgs84()?);
    let elements = source.load_elements(&envelope, settings.zoom)?;
    tracing::info!(zoom = settings.zoom, elements = elements.len(), "Query finished");
    Ok(elements)
}

#[derive(Serialize)]
struct OutputRecord<'a> {
    id: u64,
    kind: GeometryType,
    wkt: String,
    envelope: Option<Envelope>,
    attributes: &'a Attributes,
}

/// Print query results in the selected format
pub fn write_output<W: Write>(
    out: &mut W,
    elements: &ElementMap,
    format: OutputFormat,
) -> Result<(), ToolError> {
    for (&id, element) in elements {
        match format {
            OutputFormat::Tsv => writeln!(out, "{}\t{}", id, wkt::element_to_wkt(element, None))?,
            OutputFormat::Json => {
                let record = OutputRecord {
                    id,
                    kind: element.geometry.kind(),
                    wkt: wkt::element_to_wkt(element, None),
                    envelope: element.geometry.envelope(),
                    attributes: &element.attributes,
                };
                serde_json::to_writer(&mut *out, &record)?;
                writeln!(out)?;
            }
        }
    }
    Ok(())
}

/// Load, query and print
pub fn run(settings: &Settings) -> Result<(), ToolError> {
    let raw = load_files(&settings.files)?;
    let source = build_source(settings, raw);
    let elements = run_query(settings, source.as_ref())?;

    let stdout = std::io::stdout();
    let mut out = std::io::BufWriter::new(stdout.lock());
    write_output(&mut out, &elements, settings.format)?;
    out.flush()?;
    Ok(())
}
