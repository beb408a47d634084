//! Map projections: world bounds and coordinate conversions
//!
//! Decorators only need the world bounds to lay out tile grids and scale
//! zoom-dependent distances. The WGS84 and internal conversions are used by
//! callers that take queries in degrees or talk to a renderer.

use crate::{Envelope, MapPos};
use std::fmt::Debug;

/// Equatorial radius of the reference sphere in meters
pub const EARTH_RADIUS: f64 = 6_378_137.0;

/// Web Mercator bounds in meters (EPSG:3857)
pub const EARTH_MERCATOR_MAX: f64 = std::f64::consts::PI * EARTH_RADIUS;
pub const EARTH_MERCATOR_MIN: f64 = -EARTH_MERCATOR_MAX;

/// Maximum latitude that can be represented in Web Mercator
pub const MAX_LATITUDE: f64 = 85.05112878;

/// Precomputed constant: EARTH_MERCATOR_MAX / 180.0
const LON_TO_X_FACTOR: f64 = EARTH_MERCATOR_MAX / 180.0;

/// Precomputed constant: 180.0 / EARTH_MERCATOR_MAX
const X_TO_LON_FACTOR: f64 = 180.0 / EARTH_MERCATOR_MAX;

/// A projection the data sources work in
///
/// WGS84 positions use `x` = longitude and `y` = latitude, in degrees.
/// Internal coordinates are the world bounds normalised to the unit square.
pub trait Projection: Send + Sync + Debug {
    /// World bounds in projected units
    fn bounds(&self) -> Envelope;

    fn from_wgs84(&self, pos: MapPos) -> MapPos;

    fn to_wgs84(&self, pos: MapPos) -> MapPos;

    fn to_internal(&self, pos: MapPos) -> MapPos {
        let bounds = self.bounds();
        MapPos::new_3d(
            (pos.x - bounds.min_x) / bounds.width(),
            (pos.y - bounds.min_y) / bounds.height(),
            pos.z,
        )
    }

    fn from_internal(&self, pos: MapPos) -> MapPos {
        let bounds = self.bounds();
        MapPos::new_3d(
            bounds.min_x + pos.x * bounds.width(),
            bounds.min_y + pos.y * bounds.height(),
            pos.z,
        )
    }

    /// The larger side of the world bounds
    fn world_size(&self) -> f64 {
        let bounds = self.bounds();
        bounds.width().max(bounds.height())
    }
}

/// Spherical Web Mercator
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct EPSG3857;

impl Projection for EPSG3857 {
    fn bounds(&self) -> Envelope {
        Envelope::new(
            EARTH_MERCATOR_MIN,
            EARTH_MERCATOR_MIN,
            EARTH_MERCATOR_MAX,
            EARTH_MERCATOR_MAX,
        )
    }

    /// Latitude is clamped to the valid Web Mercator range
    fn from_wgs84(&self, pos: MapPos) -> MapPos {
        let lat = pos.y.clamp(-MAX_LATITUDE, MAX_LATITUDE);
        let lat_rad = lat.to_radians();
        let x = pos.x * LON_TO_X_FACTOR;
        let y = (lat_rad.tan() + (1.0 / lat_rad.cos())).ln() * EARTH_RADIUS;
        MapPos::new_3d(x, y, pos.z)
    }

    fn to_wgs84(&self, pos: MapPos) -> MapPos {
        let lon = pos.x * X_TO_LON_FACTOR;
        let lat = (std::f64::consts::FRAC_PI_2 - 2.0 * (-pos.y / EARTH_RADIUS).exp().atan())
            .to_degrees();
        MapPos::new_3d(lon, lat, pos.z)
    }
}

/// Identity projection over arbitrary bounds
///
/// Useful for regional tile pyramids and for data that is already projected.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PlanarProjection {
    bounds: Envelope,
}

impl PlanarProjection {
    pub fn new(bounds: Envelope) -> Self {
        Self { bounds }
    }
}

impl Projection for PlanarProjection {
    fn bounds(&self) -> Envelope {
        self.bounds
    }

    fn from_wgs84(&self, pos: MapPos) -> MapPos {
        pos
    }

    fn to_wgs84(&self, pos: MapPos) -> MapPos {
        pos
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wgs84_to_mercator_origin() {
        let point = EPSG3857.from_wgs84(MapPos::new(0.0, 0.0));
        assert!(point.x.abs() < 0.01);
        assert!(point.y.abs() < 0.01);
    }

    #[test]
    fn test_wgs84_to_mercator_bounds() {
        let west = EPSG3857.from_wgs84(MapPos::new(-180.0, 0.0));
        assert!((west.x - EARTH_MERCATOR_MIN).abs() < 1.0);

        let east = EPSG3857.from_wgs84(MapPos::new(180.0, 0.0));
        assert!((east.x - EARTH_MERCATOR_MAX).abs() < 1.0);

        let north = EPSG3857.from_wgs84(MapPos::new(0.0, 90.0));
        assert!((north.y - EARTH_MERCATOR_MAX).abs() < 1.0);
    }

    #[test]
    fn test_mercator_to_wgs84_roundtrip() {
        let london = MapPos::new(-0.1278, 51.5074);
        let back = EPSG3857.to_wgs84(EPSG3857.from_wgs84(london));
        assert!((london.x - back.x).abs() < 1e-6);
        assert!((london.y - back.y).abs() < 1e-6);
    }

    #[test]
    fn test_internal_roundtrip() {
        let pos = MapPos::new(1_234_567.0, -7_654_321.0);
        let internal = EPSG3857.to_internal(pos);
        assert!(internal.x > 0.5 && internal.x < 1.0);
        assert!(internal.y > 0.0 && internal.y < 0.5);

        let back = EPSG3857.from_internal(internal);
        assert!((back.x - pos.x).abs() < 1e-6);
        assert!((back.y - pos.y).abs() < 1e-6);
    }

    #[test]
    fn test_planar_projection_is_identity() {
        let projection = PlanarProjection::new(Envelope::new(0.0, 0.0, 100.0, 50.0));
        let pos = MapPos::new(12.0, 34.0);
        assert_eq!(projection.from_wgs84(pos), pos);
        assert_eq!(projection.to_wgs84(pos), pos);
        assert_eq!(projection.world_size(), 100.0);
        assert_eq!(projection.to_internal(pos), MapPos::new(0.12, 0.68));
    }
}
