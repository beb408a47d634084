//! Core data model: positions, envelopes, geometries and elements
//!
//! Everything here is an immutable value. Decorators never mutate an element in
//! place; they build a new one from the old one's id and attributes.

use crate::DataError;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Attribute bag carried by elements for styling and labeling
pub type Attributes = HashMap<String, String>;

/// Elements keyed by id. Iteration follows ascending id.
pub type ElementMap<A = Attributes> = BTreeMap<u64, Element<A>>;

/// A coordinate in a projection's working units
#[derive(Clone, Copy, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct MapPos {
    pub x: f64,
    pub y: f64,
    /// Zero when the position is 2D
    pub z: f64,
}

impl MapPos {
    #[inline]
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y, z: 0.0 }
    }

    #[inline]
    pub const fn new_3d(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Squared planar distance (z is ignored)
    #[inline]
    pub fn distance_sq(&self, other: &MapPos) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        dx * dx + dy * dy
    }

    /// Planar distance (z is ignored)
    #[inline]
    pub fn distance(&self, other: &MapPos) -> f64 {
        self.distance_sq(other).sqrt()
    }
}

impl From<MapPos> for geo::Coord<f64> {
    fn from(pos: MapPos) -> Self {
        geo::Coord { x: pos.x, y: pos.y }
    }
}

impl From<geo::Coord<f64>> for MapPos {
    fn from(coord: geo::Coord<f64>) -> Self {
        MapPos::new(coord.x, coord.y)
    }
}

/// Axis-aligned bounding rectangle
///
/// `min <= max` on both axes always holds; degenerate envelopes (min == max)
/// are valid and represent a single point or segment.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Envelope {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl Envelope {
    /// Create an envelope from two opposite corners given in any order
    pub fn new(x1: f64, y1: f64, x2: f64, y2: f64) -> Self {
        Self {
            min_x: x1.min(x2),
            min_y: y1.min(y2),
            max_x: x1.max(x2),
            max_y: y1.max(y2),
        }
    }

    /// Degenerate envelope covering a single position
    pub fn from_pos(pos: &MapPos) -> Self {
        Self::new(pos.x, pos.y, pos.x, pos.y)
    }

    /// Bounding envelope of a set of positions, `None` when empty
    pub fn from_positions<'a, I>(positions: I) -> Option<Self>
    where
        I: IntoIterator<Item = &'a MapPos>,
    {
        let mut builder = EnvelopeBuilder::new();
        for pos in positions {
            builder.add(pos);
        }
        builder.build()
    }

    #[inline]
    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    #[inline]
    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    #[inline]
    pub fn center(&self) -> MapPos {
        MapPos::new(
            (self.min_x + self.max_x) / 2.0,
            (self.min_y + self.max_y) / 2.0,
        )
    }

    /// Inclusive containment test for a position
    #[inline]
    pub fn contains_pos(&self, pos: &MapPos) -> bool {
        pos.x >= self.min_x && pos.x <= self.max_x && pos.y >= self.min_y && pos.y <= self.max_y
    }

    /// True when `other` lies entirely inside this envelope
    #[inline]
    pub fn contains(&self, other: &Envelope) -> bool {
        other.min_x >= self.min_x
            && other.max_x <= self.max_x
            && other.min_y >= self.min_y
            && other.max_y <= self.max_y
    }

    /// Inclusive intersection test; envelopes sharing only an edge intersect
    #[inline]
    pub fn intersects(&self, other: &Envelope) -> bool {
        !(other.max_x < self.min_x
            || other.min_x > self.max_x
            || other.max_y < self.min_y
            || other.min_y > self.max_y)
    }

    /// Smallest envelope covering both
    pub fn union(&self, other: &Envelope) -> Envelope {
        Envelope {
            min_x: self.min_x.min(other.min_x),
            min_y: self.min_y.min(other.min_y),
            max_x: self.max_x.max(other.max_x),
            max_y: self.max_y.max(other.max_y),
        }
    }

    /// Grow the envelope by `distance` on every side (`distance >= 0`)
    pub fn enlarged(&self, distance: f64) -> Envelope {
        Envelope {
            min_x: self.min_x - distance,
            min_y: self.min_y - distance,
            max_x: self.max_x + distance,
            max_y: self.max_y + distance,
        }
    }

    /// Corners in counter-clockwise order starting at (min_x, min_y)
    ///
    /// Degenerate envelopes yield fewer corners (a point yields one).
    pub fn convex_hull(&self) -> Vec<MapPos> {
        let corners = [
            MapPos::new(self.min_x, self.min_y),
            MapPos::new(self.max_x, self.min_y),
            MapPos::new(self.max_x, self.max_y),
            MapPos::new(self.min_x, self.max_y),
        ];
        let mut hull: Vec<MapPos> = Vec::with_capacity(4);
        for corner in corners {
            if !hull.contains(&corner) {
                hull.push(corner);
            }
        }
        hull
    }
}

impl From<Envelope> for geo::Rect<f64> {
    fn from(env: Envelope) -> Self {
        geo::Rect::new(
            geo::Coord {
                x: env.min_x,
                y: env.min_y,
            },
            geo::Coord {
                x: env.max_x,
                y: env.max_y,
            },
        )
    }
}

impl From<geo::Rect<f64>> for Envelope {
    fn from(rect: geo::Rect<f64>) -> Self {
        let min = rect.min();
        let max = rect.max();
        Envelope::new(min.x, min.y, max.x, max.y)
    }
}

/// Convex hull of an arbitrary point set, e.g. the corners of a rotated viewport
///
/// The returned ring is open (first vertex not repeated) and may have any
/// number of vertices. Use [`Envelope::from_positions`] on it to get the
/// axis-aligned bounds.
pub fn convex_hull_of(points: &[MapPos]) -> Vec<MapPos> {
    use geo::ConvexHull;

    let multi: geo::MultiPoint<f64> = points
        .iter()
        .map(|p| geo::Point::new(p.x, p.y))
        .collect();
    let hull = multi.convex_hull();
    let mut ring: Vec<MapPos> = hull.exterior().coords().map(|c| MapPos::from(*c)).collect();
    if ring.len() > 1 && ring.first() == ring.last() {
        ring.pop();
    }
    ring
}

/// Accumulating envelope, for building bounds one position at a time
#[derive(Clone, Copy, Debug, Default)]
pub struct EnvelopeBuilder {
    bounds: Option<Envelope>,
}

impl EnvelopeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, pos: &MapPos) {
        let point = Envelope::from_pos(pos);
        self.add_envelope(&point);
    }

    pub fn add_envelope(&mut self, env: &Envelope) {
        self.bounds = Some(match self.bounds {
            Some(bounds) => bounds.union(env),
            None => *env,
        });
    }

    pub fn build(&self) -> Option<Envelope> {
        self.bounds
    }
}

/// Geometry kinds as numbered by the WKB format
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum GeometryType {
    Point = 1,
    LineString = 2,
    Polygon = 3,
    MultiPoint = 4,
    MultiLineString = 5,
    MultiPolygon = 6,
    GeometryCollection = 7,
}

impl GeometryType {
    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            1 => Some(Self::Point),
            2 => Some(Self::LineString),
            3 => Some(Self::Polygon),
            4 => Some(Self::MultiPoint),
            5 => Some(Self::MultiLineString),
            6 => Some(Self::MultiPolygon),
            7 => Some(Self::GeometryCollection),
            _ => None,
        }
    }

    #[inline]
    pub fn code(self) -> u32 {
        self as u32
    }

    pub fn wkt_name(self) -> &'static str {
        match self {
            Self::Point => "POINT",
            Self::LineString => "LINESTRING",
            Self::Polygon => "POLYGON",
            Self::MultiPoint => "MULTIPOINT",
            Self::MultiLineString => "MULTILINESTRING",
            Self::MultiPolygon => "MULTIPOLYGON",
            Self::GeometryCollection => "GEOMETRYCOLLECTION",
        }
    }

    /// The multi-geometry kind wrapping this single kind, if any
    pub fn multi(self) -> Option<Self> {
        match self {
            Self::Point => Some(Self::MultiPoint),
            Self::LineString => Some(Self::MultiLineString),
            Self::Polygon => Some(Self::MultiPolygon),
            _ => None,
        }
    }
}

impl fmt::Display for GeometryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wkt_name())
    }
}

impl FromStr for GeometryType {
    type Err = DataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase();
        [
            Self::Point,
            Self::LineString,
            Self::Polygon,
            Self::MultiPoint,
            Self::MultiLineString,
            Self::MultiPolygon,
            Self::GeometryCollection,
        ]
        .into_iter()
        .find(|kind| kind.wkt_name() == upper)
        .ok_or_else(|| DataError::InvalidGeometry(format!("Unknown geometry type name: {s}")))
    }
}

/// Point, line string or polygon with holes
///
/// Polygon rings may be stored closed (first == last) or open; both are
/// accepted everywhere.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Geometry {
    Point(MapPos),
    Line(Vec<MapPos>),
    Polygon {
        exterior: Vec<MapPos>,
        interiors: Vec<Vec<MapPos>>,
    },
}

impl Geometry {
    pub fn kind(&self) -> GeometryType {
        match self {
            Geometry::Point(_) => GeometryType::Point,
            Geometry::Line(_) => GeometryType::LineString,
            Geometry::Polygon { .. } => GeometryType::Polygon,
        }
    }

    /// Bounding envelope (holes lie inside the exterior, so only it counts)
    pub fn envelope(&self) -> Option<Envelope> {
        match self {
            Geometry::Point(pos) => Some(Envelope::from_pos(pos)),
            Geometry::Line(vertices) => Envelope::from_positions(vertices),
            Geometry::Polygon { exterior, .. } => Envelope::from_positions(exterior),
        }
    }

    pub fn vertex_count(&self) -> usize {
        match self {
            Geometry::Point(_) => 1,
            Geometry::Line(vertices) => vertices.len(),
            Geometry::Polygon {
                exterior,
                interiors,
            } => exterior.len() + interiors.iter().map(Vec::len).sum::<usize>(),
        }
    }

    /// Minimum vertex counts: lines need 2, polygon exteriors need 3
    pub fn is_valid(&self) -> bool {
        match self {
            Geometry::Point(_) => true,
            Geometry::Line(vertices) => vertices.len() >= 2,
            Geometry::Polygon { exterior, .. } => exterior.len() >= 3,
        }
    }

    pub fn has_z(&self) -> bool {
        match self {
            Geometry::Point(pos) => pos.z != 0.0,
            Geometry::Line(vertices) => vertices.iter().any(|p| p.z != 0.0),
            Geometry::Polygon {
                exterior,
                interiors,
            } => exterior
                .iter()
                .chain(interiors.iter().flatten())
                .any(|p| p.z != 0.0),
        }
    }
}

fn to_line_string(vertices: &[MapPos]) -> geo::LineString<f64> {
    vertices.iter().map(|p| geo::Coord::from(*p)).collect()
}

impl From<&Geometry> for geo::Geometry<f64> {
    fn from(geometry: &Geometry) -> Self {
        match geometry {
            Geometry::Point(pos) => geo::Geometry::Point(geo::Point::new(pos.x, pos.y)),
            Geometry::Line(vertices) => geo::Geometry::LineString(to_line_string(vertices)),
            Geometry::Polygon {
                exterior,
                interiors,
            } => geo::Geometry::Polygon(geo::Polygon::new(
                to_line_string(exterior),
                interiors.iter().map(|ring| to_line_string(ring)).collect(),
            )),
        }
    }
}

/// A geometry with an optional source id and an attribute bag
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Element<A = Attributes> {
    /// Stable key within the originating source
    pub id: Option<u64>,
    pub geometry: Geometry,
    pub attributes: A,
}

impl<A> Element<A> {
    pub fn new(geometry: Geometry, attributes: A) -> Self {
        Self {
            id: None,
            geometry,
            attributes,
        }
    }

    pub fn with_id(mut self, id: u64) -> Self {
        self.id = Some(id);
        self
    }

    /// New element with the same id and attributes but another geometry
    pub fn with_geometry(&self, geometry: Geometry) -> Self
    where
        A: Clone,
    {
        Self {
            id: self.id,
            geometry,
            attributes: self.attributes.clone(),
        }
    }

    /// Representative position: the point itself, otherwise the envelope center
    pub fn position(&self) -> Option<MapPos> {
        match &self.geometry {
            Geometry::Point(pos) => Some(*pos),
            other => other.envelope().map(|env| env.center()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square(size: f64) -> Vec<MapPos> {
        vec![
            MapPos::new(0.0, 0.0),
            MapPos::new(size, 0.0),
            MapPos::new(size, size),
            MapPos::new(0.0, size),
            MapPos::new(0.0, 0.0),
        ]
    }

    #[test]
    fn test_envelope_normalizes_corners() {
        let env = Envelope::new(5.0, -1.0, -3.0, 4.0);
        assert_eq!(env.min_x, -3.0);
        assert_eq!(env.max_x, 5.0);
        assert_eq!(env.min_y, -1.0);
        assert_eq!(env.max_y, 4.0);
        assert_eq!(env.width(), 8.0);
        assert_eq!(env.height(), 5.0);
    }

    #[test]
    fn test_envelope_intersects_on_shared_edge() {
        let a = Envelope::new(0.0, 0.0, 1.0, 1.0);
        let b = Envelope::new(1.0, 0.0, 2.0, 1.0);
        let c = Envelope::new(1.5, 0.0, 2.0, 1.0);
        assert!(a.intersects(&b));
        assert!(b.intersects(&a));
        assert!(!a.intersects(&c));
    }

    #[test]
    fn test_envelope_contains() {
        let outer = Envelope::new(0.0, 0.0, 10.0, 10.0);
        assert!(outer.contains(&Envelope::new(1.0, 1.0, 9.0, 9.0)));
        assert!(outer.contains(&outer));
        assert!(!outer.contains(&Envelope::new(-1.0, 1.0, 9.0, 9.0)));
        assert!(outer.contains_pos(&MapPos::new(10.0, 0.0)));
        assert!(!outer.contains_pos(&MapPos::new(10.1, 0.0)));
    }

    #[test]
    fn test_envelope_union_and_enlarge() {
        let a = Envelope::new(0.0, 0.0, 1.0, 1.0);
        let b = Envelope::new(3.0, -2.0, 4.0, 0.5);
        assert_eq!(a.union(&b), Envelope::new(0.0, -2.0, 4.0, 1.0));
        assert_eq!(a.enlarged(2.0), Envelope::new(-2.0, -2.0, 3.0, 3.0));
    }

    #[test]
    fn test_degenerate_envelope_hull() {
        let point = Envelope::from_pos(&MapPos::new(2.0, 3.0));
        assert_eq!(point.convex_hull(), vec![MapPos::new(2.0, 3.0)]);

        let full = Envelope::new(0.0, 0.0, 1.0, 2.0);
        assert_eq!(full.convex_hull().len(), 4);
    }

    #[test]
    fn test_convex_hull_of_rotated_viewport() {
        // Octagon-like cloud: hull keeps more than four vertices
        let points = vec![
            MapPos::new(1.0, 0.0),
            MapPos::new(2.0, 0.0),
            MapPos::new(3.0, 1.0),
            MapPos::new(3.0, 2.0),
            MapPos::new(2.0, 3.0),
            MapPos::new(1.0, 3.0),
            MapPos::new(0.0, 2.0),
            MapPos::new(0.0, 1.0),
            MapPos::new(1.5, 1.5),
        ];
        let hull = convex_hull_of(&points);
        assert_eq!(hull.len(), 8);
        assert!(!hull.contains(&MapPos::new(1.5, 1.5)));

        let bounds = Envelope::from_positions(&hull).unwrap();
        assert_eq!(bounds, Envelope::new(0.0, 0.0, 3.0, 3.0));
    }

    #[test]
    fn test_envelope_builder() {
        let mut builder = EnvelopeBuilder::new();
        assert!(builder.build().is_none());
        builder.add(&MapPos::new(1.0, 1.0));
        builder.add(&MapPos::new(-1.0, 5.0));
        assert_eq!(builder.build(), Some(Envelope::new(-1.0, 1.0, 1.0, 5.0)));
    }

    #[test]
    fn test_geometry_type_names() {
        assert_eq!("multipoint".parse::<GeometryType>().unwrap(), GeometryType::MultiPoint);
        assert_eq!(" POLYGON ".parse::<GeometryType>().unwrap(), GeometryType::Polygon);
        assert!("CIRCLE".parse::<GeometryType>().is_err());
        assert_eq!(GeometryType::from_code(6), Some(GeometryType::MultiPolygon));
        assert_eq!(GeometryType::from_code(8), None);
        assert_eq!(GeometryType::LineString.multi(), Some(GeometryType::MultiLineString));
    }

    #[test]
    fn test_geometry_validity() {
        assert!(Geometry::Point(MapPos::new(0.0, 0.0)).is_valid());
        assert!(!Geometry::Line(vec![MapPos::new(0.0, 0.0)]).is_valid());
        assert!(
            Geometry::Polygon {
                exterior: square(1.0),
                interiors: vec![],
            }
            .is_valid()
        );
    }

    #[test]
    fn test_polygon_envelope_ignores_holes() {
        let polygon = Geometry::Polygon {
            exterior: square(4.0),
            interiors: vec![vec![
                MapPos::new(1.0, 1.0),
                MapPos::new(2.0, 1.0),
                MapPos::new(2.0, 2.0),
            ]],
        };
        assert_eq!(polygon.envelope(), Some(Envelope::new(0.0, 0.0, 4.0, 4.0)));
        assert_eq!(polygon.vertex_count(), 8);
    }

    #[test]
    fn test_element_with_geometry_keeps_identity() {
        let mut attributes = Attributes::new();
        attributes.insert("name".to_string(), "river".to_string());
        let element = Element::new(
            Geometry::Line(vec![MapPos::new(0.0, 0.0), MapPos::new(2.0, 2.0)]),
            attributes,
        )
        .with_id(42);

        let replaced = element.with_geometry(Geometry::Point(MapPos::new(1.0, 1.0)));
        assert_eq!(replaced.id, Some(42));
        assert_eq!(replaced.attributes.get("name").map(String::as_str), Some("river"));
        assert_eq!(element.position(), Some(MapPos::new(1.0, 1.0)));
    }

    #[test]
    fn test_geo_conversion() {
        let polygon = Geometry::Polygon {
            exterior: square(1.0),
            interiors: vec![],
        };
        match geo::Geometry::from(&polygon) {
            geo::Geometry::Polygon(p) => assert_eq!(p.exterior().0.len(), 5),
            other => panic!("Expected polygon, got {:?}", other),
        }
    }
}
