//! Performance benchmarks for vector-source-lib
//!
//! Run with: cargo bench --package vector-source-lib

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use std::sync::Arc;
use vector_source_lib::{
    Attributes, CentroidMerger, ClusterConfig, ClusteringDataSource, EPSG3857, Element, Envelope,
    Geometry, MapPos, MemoryDataSource, Projection, SimplifierConfig, SimplifyingDataSource,
    TilingDataSource, VectorDataSource, wkb,
};

/// Generate a wiggly line with the specified number of vertices around (lon, lat)
fn generate_line(num_points: usize, base_lon: f64, base_lat: f64) -> Vec<MapPos> {
    (0..num_points)
        .map(|i| {
            let t = i as f64 / num_points as f64;
            let lat = base_lat + t * 0.1 + (t * 50.0).sin() * 0.001;
            let lon = base_lon + t * 0.1 + (t * 30.0).cos() * 0.001;
            EPSG3857.from_wgs84(MapPos::new(lon, lat))
        })
        .collect()
}

/// Scatter points deterministically over a small area
fn generate_points(num_points: usize) -> Vec<Element<Attributes>> {
    (0..num_points)
        .map(|i| {
            let lon = -0.1 + ((i * 7919) % 1000) as f64 * 0.0005;
            let lat = 51.5 + ((i * 104_729) % 1000) as f64 * 0.0003;
            Element::new(
                Geometry::Point(EPSG3857.from_wgs84(MapPos::new(lon, lat))),
                Attributes::new(),
            )
        })
        .collect()
}

/// Web Mercator envelope from WGS84 corners
fn create_viewport(min_lon: f64, min_lat: f64, max_lon: f64, max_lat: f64) -> Envelope {
    let min = EPSG3857.from_wgs84(MapPos::new(min_lon, min_lat));
    let max = EPSG3857.from_wgs84(MapPos::new(max_lon, max_lat));
    Envelope::new(min.x, min.y, max.x, max.y)
}

fn line_source(lines: usize, points_per_line: usize) -> MemoryDataSource {
    let elements = (0..lines).map(|i| {
        let lon_offset = (i % 10) as f64 * 0.1;
        let lat_offset = (i / 10) as f64 * 0.1;
        Element::new(
            Geometry::Line(generate_line(points_per_line, -0.1 + lon_offset, 51.5 + lat_offset)),
            Attributes::new(),
        )
    });
    MemoryDataSource::from_elements(Arc::new(EPSG3857), elements)
}

// ============================================================================
// Core Benchmarks - Key performance indicators
// ============================================================================

fn bench_tiling(c: &mut Criterion) {
    let mut group = c.benchmark_group("tiling");

    let viewport = create_viewport(-0.2, 51.4, 0.9, 52.5);
    for zoom in [8u32, 12] {
        let tiling = TilingDataSource::new(line_source(100, 1_000));
        group.bench_with_input(BenchmarkId::new("cached", zoom), &zoom, |b, &zoom| {
            b.iter(|| tiling.load_elements(&viewport, zoom).unwrap());
        });
    }

    group.finish();
}

fn bench_simplification(c: &mut Criterion) {
    let mut group = c.benchmark_group("simplification");
    group.sample_size(20);

    let viewport = create_viewport(-0.2, 51.4, 0.9, 52.5);
    let total_points = 100 * 1_000;
    group.throughput(Throughput::Elements(total_points as u64));

    for (name, config) in [
        ("douglas_peucker", SimplifierConfig::with_tolerance(0.0001)),
        (
            "vertex_snap",
            SimplifierConfig {
                line_algorithm: vector_source_lib::SimplifyAlgorithm::VertexSnap,
                ..SimplifierConfig::with_tolerance(0.0001)
            },
        ),
    ] {
        let simplifier = SimplifyingDataSource::new(line_source(100, 1_000), config);
        group.bench_function(name, |b| {
            b.iter(|| simplifier.load_elements(&viewport, 10).unwrap());
        });
    }

    group.finish();
}

fn bench_clustering(c: &mut Criterion) {
    let mut group = c.benchmark_group("clustering");
    group.sample_size(20);

    let source = MemoryDataSource::from_elements(Arc::new(EPSG3857), generate_points(5_000));
    let clustering = ClusteringDataSource::new(source, ClusterConfig::default(), CentroidMerger);
    let viewport = create_viewport(-0.1, 51.5, 0.4, 51.8);

    group.throughput(Throughput::Elements(5_000));
    for zoom in [10u32, 14] {
        group.bench_with_input(BenchmarkId::new("points_5k", zoom), &zoom, |b, &zoom| {
            b.iter(|| clustering.load_elements(&viewport, zoom).unwrap());
        });
    }

    group.finish();
}

fn bench_wkb_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("wkb");

    let line = Geometry::Line(generate_line(50_000, -0.1, 51.5));
    let bytes = wkb::write_wkb(&line, true);
    group.throughput(Throughput::Bytes(bytes.len() as u64));
    group.bench_function("decode_line_50k", |b| {
        b.iter(|| wkb::read_wkb(&bytes).unwrap());
    });

    group.finish();
}

// ============================================================================
// Criterion Configuration
// ============================================================================

criterion_group!(
    benches,
    bench_tiling,
    bench_simplification,
    bench_clustering,
    bench_wkb_decode,
);

criterion_main!(benches);
