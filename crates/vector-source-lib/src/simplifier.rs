//! Zoom-dependent geometry simplification decorator
//!
//! The tolerance is given relative to the world size at zoom 0 and halves with
//! every zoom level, so the amount of detail removed stays roughly constant in
//! screen space.
//!
//! - Points are thinned by bucketing them into a grid of tolerance-sized cells;
//!   one point survives per cell.
//! - Lines and polygon rings run through Douglas-Peucker or vertex snapping.
//!
//! Ids and attributes of surviving elements pass through unchanged.

use crate::projection::Projection;
use crate::source::VectorDataSource;
use crate::{DataError, Element, ElementMap, Envelope, Geometry, MapPos, Result};
use rayon::prelude::*;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Algorithm used for a vertex sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum SimplifyAlgorithm {
    DouglasPeucker,
    VertexSnap,
}

impl fmt::Display for SimplifyAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DouglasPeucker => f.write_str("douglas-peucker"),
            Self::VertexSnap => f.write_str("vertex-snap"),
        }
    }
}

impl FromStr for SimplifyAlgorithm {
    type Err = DataError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "douglas-peucker" | "dp" => Ok(Self::DouglasPeucker),
            "vertex-snap" | "snap" => Ok(Self::VertexSnap),
            _ => Err(DataError::InvalidGeometry(format!(
                "Unknown simplification algorithm: {s}"
            ))),
        }
    }
}

/// Configuration for [`SimplifyingDataSource`]
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SimplifierConfig {
    /// Tolerance as a fraction of the world size at zoom 0.
    /// Zero or negative disables simplification entirely.
    pub tolerance: f64,
    /// Algorithm for line strings (default Douglas-Peucker)
    pub line_algorithm: SimplifyAlgorithm,
    /// Algorithm for polygon rings (default vertex snap)
    pub polygon_algorithm: SimplifyAlgorithm,
}

impl Default for SimplifierConfig {
    fn default() -> Self {
        Self {
            tolerance: 0.0,
            line_algorithm: SimplifyAlgorithm::DouglasPeucker,
            polygon_algorithm: SimplifyAlgorithm::VertexSnap,
        }
    }
}

impl SimplifierConfig {
    pub fn with_tolerance(tolerance: f64) -> Self {
        Self {
            tolerance,
            ..Self::default()
        }
    }
}

/// Squared distance from `p` to the segment `a`-`b`, clamped to the segment
#[inline]
fn segment_distance_sq(p: &MapPos, a: &MapPos, b: &MapPos) -> f64 {
    let dx = b.x - a.x;
    let dy = b.y - a.y;
    let len_sq = dx * dx + dy * dy;
    if len_sq == 0.0 {
        return p.distance_sq(a);
    }
    let t = (((p.x - a.x) * dx + (p.y - a.y) * dy) / len_sq).clamp(0.0, 1.0);
    let proj = MapPos::new(a.x + t * dx, a.y + t * dy);
    p.distance_sq(&proj)
}

/// Douglas-Peucker over index ranges of one backing slice
///
/// Runs whose farthest vertex is closer than `tolerance` to the chord collapse
/// to their endpoints. Works on an explicit stack of `(first, last)` ranges, so
/// no sub-slices are copied and deep inputs cannot overflow the call stack.
pub fn douglas_peucker(vertices: &[MapPos], tolerance: f64) -> Vec<MapPos> {
    if vertices.len() < 3 {
        return vertices.to_vec();
    }

    let tolerance_sq = tolerance * tolerance;
    let mut keep = vec![false; vertices.len()];
    keep[0] = true;
    keep[vertices.len() - 1] = true;

    let mut ranges = vec![(0usize, vertices.len() - 1)];
    while let Some((first, last)) = ranges.pop() {
        if last <= first + 1 {
            continue;
        }

        let (a, b) = (&vertices[first], &vertices[last]);
        let mut max_dist = 0.0;
        let mut split = first;
        for (i, p) in vertices.iter().enumerate().take(last).skip(first + 1) {
            let dist = segment_distance_sq(p, a, b);
            if dist > max_dist {
                max_dist = dist;
                split = i;
            }
        }

        if split == first || max_dist < tolerance_sq {
            continue;
        }
        keep[split] = true;
        ranges.push((split, last));
        ranges.push((first, split));
    }

    vertices
        .iter()
        .zip(keep)
        .filter_map(|(p, kept)| kept.then_some(*p))
        .collect()
}

/// Round every vertex to the nearest multiple of `tolerance`
///
/// Consecutive vertices landing on the same grid point are collapsed into the
/// first of them. z is carried through unsnapped.
pub fn vertex_snap(vertices: &[MapPos], tolerance: f64) -> Vec<MapPos> {
    let mut snapped: Vec<MapPos> = Vec::with_capacity(vertices.len());
    for p in vertices {
        let q = MapPos::new_3d(
            (p.x / tolerance).round() * tolerance,
            (p.y / tolerance).round() * tolerance,
            p.z,
        );
        match snapped.last() {
            Some(prev) if prev.x == q.x && prev.y == q.y => {}
            _ => snapped.push(q),
        }
    }
    snapped
}

/// Simplify a vertex sequence with the chosen algorithm
pub fn simplify_vertices(
    vertices: &[MapPos],
    tolerance: f64,
    algorithm: SimplifyAlgorithm,
) -> Vec<MapPos> {
    match algorithm {
        SimplifyAlgorithm::DouglasPeucker => douglas_peucker(vertices, tolerance),
        SimplifyAlgorithm::VertexSnap => vertex_snap(vertices, tolerance),
    }
}

/// Grid cell key used to thin out points
///
/// Cell coordinates are combined as `x ^ (y << 32)`; distinct cells can share
/// a key when their coordinates alias after the shift.
#[inline]
pub fn point_bucket(pos: &MapPos, tolerance: f64) -> u64 {
    let cx = (pos.x / tolerance).floor() as i64 as u64;
    let cy = (pos.y / tolerance).floor() as i64 as u64;
    cx ^ (cy << 32)
}

/// Decorator simplifying the geometries of a wrapped source
pub struct SimplifyingDataSource<S> {
    inner: S,
    config: SimplifierConfig,
}

#[cfg_attr(feature = "profiling", profiling::all_functions)]
impl<S> SimplifyingDataSource<S> {
    pub fn new(inner: S, config: SimplifierConfig) -> Self {
        Self { inner, config }
    }

    pub fn config(&self) -> &SimplifierConfig {
        &self.config
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Line and polygon simplification; `None` when the result is degenerate
    fn simplify_geometry(&self, geometry: Geometry, tolerance: f64) -> Option<Geometry> {
        match geometry {
            Geometry::Point(pos) => Some(Geometry::Point(pos)),
            Geometry::Line(vertices) => {
                let simplified =
                    simplify_vertices(&vertices, tolerance, self.config.line_algorithm);
                (simplified.len() >= 2).then_some(Geometry::Line(simplified))
            }
            Geometry::Polygon {
                exterior,
                interiors,
            } => {
                let algorithm = self.config.polygon_algorithm;
                let exterior = simplify_vertices(&exterior, tolerance, algorithm);
                if exterior.len() < 3 {
                    return None;
                }
                let interiors = interiors
                    .iter()
                    .map(|ring| simplify_vertices(ring, tolerance, algorithm))
                    .filter(|ring| ring.len() >= 3)
                    .collect();
                Some(Geometry::Polygon {
                    exterior,
                    interiors,
                })
            }
        }
    }
}

impl<A, S> VectorDataSource<A> for SimplifyingDataSource<S>
where
    A: Send + Sync,
    S: VectorDataSource<A>,
{
    fn projection(&self) -> Arc<dyn Projection> {
        self.inner.projection()
    }

    fn data_extent(&self) -> Option<Envelope> {
        self.inner.data_extent()
    }

    fn load_elements(&self, envelope: &Envelope, zoom: u32) -> Result<ElementMap<A>> {
        #[cfg(feature = "profiling")]
        profiling::scope!("simplifier::load_elements");

        let elements = self.inner.load_elements(envelope, zoom)?;
        if self.config.tolerance <= 0.0 {
            return Ok(elements);
        }

        let tolerance =
            self.inner.projection().world_size() * self.config.tolerance / 2f64.powi(zoom as i32);
        if !(tolerance.is_finite() && tolerance > 0.0) {
            return Ok(elements);
        }

        let input_count = elements.len();
        // Ascending id order, so the largest id in a cell wins
        let mut buckets: HashMap<u64, (u64, Element<A>)> = HashMap::new();
        let mut shapes = Vec::new();
        for (id, element) in elements {
            match element.geometry {
                Geometry::Point(pos) => {
                    buckets.insert(point_bucket(&pos, tolerance), (id, element));
                }
                _ => shapes.push((id, element)),
            }
        }

        let simplified: Vec<(u64, Element<A>)> = shapes
            .into_par_iter()
            .filter_map(|(id, element)| {
                let Element {
                    id: element_id,
                    geometry,
                    attributes,
                } = element;
                self.simplify_geometry(geometry, tolerance).map(|geometry| {
                    (
                        id,
                        Element {
                            id: element_id,
                            geometry,
                            attributes,
                        },
                    )
                })
            })
            .collect();

        let mut result: ElementMap<A> = buckets.into_values().collect();
        result.extend(simplified);

        tracing::debug!(
            zoom,
            tolerance,
            input = input_count,
            output = result.len(),
            "Simplified elements"
        );
        Ok(result)
    }
}
