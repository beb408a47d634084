//! Tile pyramid math for spherical-Mercator style pyramids
//!
//! Pixel space has its origin at the south-west corner of the world; tile
//! indices follow the slippy-map convention with row 0 at the north. All
//! functions are pure. Zoom is unsigned, so the negative zoom case cannot occur.

use crate::projection::{EARTH_MERCATOR_MAX, EARTH_RADIUS};
use crate::Envelope;

/// Tile side in pixels
pub const TILE_SIZE: f64 = 256.0;

/// Meters per pixel at zoom 0
pub const INITIAL_RESOLUTION: f64 = 2.0 * std::f64::consts::PI * EARTH_RADIUS / TILE_SIZE;

/// Half the world width in meters
pub const ORIGIN_SHIFT: f64 = EARTH_MERCATOR_MAX;

/// Number of tiles along one axis at `zoom`
///
/// Saturates at `i64::MAX` from zoom 63 on.
#[inline]
pub fn tile_count(zoom: u32) -> i64 {
    1i64.checked_shl(zoom).filter(|n| *n > 0).unwrap_or(i64::MAX)
}

#[inline]
fn zoom_scale(zoom: u32) -> f64 {
    f64::from(zoom).exp2()
}

/// Meters per pixel at `zoom`
#[inline]
pub fn resolution(zoom: u32) -> f64 {
    INITIAL_RESOLUTION / zoom_scale(zoom)
}

/// Projected meters to pixel coordinates, origin at (-ORIGIN_SHIFT, -ORIGIN_SHIFT)
pub fn meters_to_pixels(x: f64, y: f64, zoom: u32) -> (f64, f64) {
    let res = resolution(zoom);
    ((x + ORIGIN_SHIFT) / res, (y + ORIGIN_SHIFT) / res)
}

/// Pixel coordinates to slippy-map tile indices
///
/// Uses `ceil(p / 256) - 1`, so a pixel lying exactly on a tile border belongs
/// to the tile whose far edge it is. Rows are flipped to count from the north.
pub fn pixels_to_tile(px: f64, py: f64, zoom: u32) -> (i64, i64) {
    let tx = (px / TILE_SIZE).ceil() as i64 - 1;
    let ty = (py / TILE_SIZE).ceil() as i64 - 1;
    (tx, tile_count(zoom) - 1 - ty)
}

/// Projected meters straight to tile indices
pub fn meters_to_tile(x: f64, y: f64, zoom: u32) -> (i64, i64) {
    let (px, py) = meters_to_pixels(x, y, zoom);
    pixels_to_tile(px, py, zoom)
}

/// Center of the top-left pixel of tile (tx, ty), in south-origin pixel space
pub fn tile_top_left_pixel(tx: i64, ty: i64, zoom: u32) -> (f64, f64) {
    let south_row = tile_count(zoom) - 1 - ty;
    let px = tx as f64 * TILE_SIZE + 0.5;
    let py = (south_row + 1) as f64 * TILE_SIZE - 0.5;
    (px, py)
}

/// Envelope of tile (tx, ty) at `zoom` within the given world bounds
///
/// Each edge is computed from its own index, so neighbouring tiles share
/// bit-identical borders and the outermost tiles end exactly on the bounds.
pub fn tile_bounds(tx: i64, ty: i64, zoom: u32, bounds: &Envelope) -> Envelope {
    let n = tile_count(zoom);
    let width = bounds.width() / zoom_scale(zoom);
    let height = bounds.height() / zoom_scale(zoom);

    let x_edge = |i: i64| {
        if i >= n {
            bounds.max_x
        } else {
            bounds.min_x + i as f64 * width
        }
    };
    // Rows count from the top, so the edge for row i sits i rows below max_y
    let y_edge = |i: i64| {
        if i >= n {
            bounds.min_y
        } else {
            bounds.max_y - i as f64 * height
        }
    };

    Envelope::new(x_edge(tx), y_edge(ty + 1), x_edge(tx + 1), y_edge(ty))
}
