//! Tile-grid partitioning decorator
//!
//! Splits every query into the uniform tile grid implied by the wrapped
//! source's projection bounds at the requested zoom, loads each tile on its
//! own and merges the results. Tiles used by a request are handed to a
//! [`TileCache`]; the default [`LastRequestCache`] keeps exactly the previous
//! request's tiles, so memory is bounded by one request's footprint.

use crate::source::VectorDataSource;
use crate::tile_math::{tile_bounds, tile_count};
use crate::projection::Projection;
use crate::{ElementMap, Envelope, Result};
use lru::LruCache;
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, PoisonError};

/// Highest zoom level of the tile grid; larger zooms reuse this grid
pub const MAX_ZOOM: u32 = 24;

/// Key of a tile, unique over all (zoom, x, y) with zoom <= [`MAX_ZOOM`]
#[inline]
pub fn tile_id(zoom: u32, x: i64, y: i64) -> u64 {
    let n = tile_count(zoom) as u64;
    zoom as u64 + (MAX_ZOOM as u64 + 1) * (y as u64 * n + x as u64)
}

/// Cache key of one tile load
///
/// `zoom` is the zoom the wrapped source was asked for. Above [`MAX_ZOOM`] it
/// differs from the zoom encoded in `tile`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TileKey {
    pub zoom: u32,
    pub tile: u64,
}

/// Storage for per-tile load results between requests
pub trait TileCache<A>: Send {
    fn get(&mut self, key: TileKey) -> Option<Arc<ElementMap<A>>>;

    /// Receive every tile used by the request that just finished
    fn swap(&mut self, tiles: HashMap<TileKey, Arc<ElementMap<A>>>);
}

/// Keeps only the tiles of the previous request
#[derive(Debug)]
pub struct LastRequestCache<A> {
    tiles: HashMap<TileKey, Arc<ElementMap<A>>>,
}

impl<A> Default for LastRequestCache<A> {
    fn default() -> Self {
        Self {
            tiles: HashMap::new(),
        }
    }
}

impl<A: Send + Sync> TileCache<A> for LastRequestCache<A> {
    fn get(&mut self, key: TileKey) -> Option<Arc<ElementMap<A>>> {
        self.tiles.get(&key).cloned()
    }

    fn swap(&mut self, tiles: HashMap<TileKey, Arc<ElementMap<A>>>) {
        self.tiles = tiles;
    }
}

/// Keeps the most recently used tiles across requests, up to a capacity
#[derive(Debug)]
pub struct LruTileCache<A> {
    tiles: LruCache<TileKey, Arc<ElementMap<A>>>,
}

impl<A> LruTileCache<A> {
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            tiles: LruCache::new(capacity),
        }
    }
}

impl<A: Send + Sync> TileCache<A> for LruTileCache<A> {
    fn get(&mut self, key: TileKey) -> Option<Arc<ElementMap<A>>> {
        self.tiles.get(&key).cloned()
    }

    fn swap(&mut self, tiles: HashMap<TileKey, Arc<ElementMap<A>>>) {
        for (key, tile) in tiles {
            self.tiles.put(key, tile);
        }
    }
}

/// Decorator loading a query tile by tile from the wrapped source
///
/// Calls are serialised on the cache lock: a second `load_elements` on the same
/// instance waits until the first one has swapped its tiles in.
pub struct TilingDataSource<A, S> {
    inner: S,
    cache: Mutex<Box<dyn TileCache<A>>>,
}

/// Inclusive-exclusive range of grid cells covering `[min, max]`
///
/// The range is clamped to the grid and never empty, so a degenerate envelope
/// lying on a grid line still gets the cell to its upper side.
fn cell_range(min: f64, max: f64, cell: f64, n: i64) -> (i64, i64) {
    let start = ((min / cell).floor() as i64).clamp(0, n - 1);
    let end = ((max / cell).ceil() as i64).clamp(start + 1, n);
    (start, end)
}

#[cfg_attr(feature = "profiling", profiling::all_functions)]
impl<A, S> TilingDataSource<A, S>
where
    A: Clone + Send + Sync + 'static,
    S: VectorDataSource<A>,
{
    pub fn new(inner: S) -> Self {
        Self::with_cache(inner, LastRequestCache::default())
    }

    pub fn with_cache<C: TileCache<A> + 'static>(inner: S, cache: C) -> Self {
        Self {
            inner,
            cache: Mutex::new(Box::new(cache)),
        }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }
}

impl<A, S> VectorDataSource<A> for TilingDataSource<A, S>
where
    A: Clone + Send + Sync + 'static,
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
        profiling::scope!("tiling::load_elements");

        // Only the grid is capped, the wrapped source still sees the requested zoom
        let grid_zoom = if zoom > MAX_ZOOM {
            tracing::debug!(zoom, max = MAX_ZOOM, "Clamping tile grid zoom");
            MAX_ZOOM
        } else {
            zoom
        };

        let bounds = self.inner.projection().bounds();
        let n = tile_count(grid_zoom);
        let tile_width = bounds.width() / n as f64;
        let tile_height = bounds.height() / n as f64;
        let (x0, x1) = cell_range(
            envelope.min_x - bounds.min_x,
            envelope.max_x - bounds.min_x,
            tile_width,
            n,
        );
        // Grid rows here count from the south edge of the bounds
        let (y0, y1) = cell_range(
            envelope.min_y - bounds.min_y,
            envelope.max_y - bounds.min_y,
            tile_height,
            n,
        );

        let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        let mut used_tiles = HashMap::new();
        let mut result = ElementMap::new();
        let (mut hits, mut misses) = (0usize, 0usize);

        for y in y0..y1 {
            for x in x0..x1 {
                let tile_envelope = tile_bounds(x, n - 1 - y, grid_zoom, &bounds);
                if !tile_envelope.intersects(envelope) {
                    continue;
                }

                let key = TileKey {
                    zoom,
                    tile: tile_id(grid_zoom, x, y),
                };
                let tile = match cache.get(key) {
                    Some(tile) => {
                        hits += 1;
                        tile
                    }
                    None => {
                        misses += 1;
                        Arc::new(self.inner.load_elements(&tile_envelope, zoom)?)
                    }
                };

                result.extend(tile.iter().map(|(&id, element)| (id, element.clone())));
                used_tiles.insert(key, tile);
            }
        }

        cache.swap(used_tiles);
        tracing::debug!(
            zoom,
            hits,
            misses,
            elements = result.len(),
            "Loaded tiled elements"
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::projection::PlanarProjection;
    use crate::source::MemoryDataSource;
    use crate::{DataError, Element, Geometry, MapPos};
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

    /// Counts calls and forwards to an in-memory source
    struct CountingSource {
        inner: MemoryDataSource<()>,
        calls: AtomicUsize,
        last_zoom: AtomicU32,
    }

    impl CountingSource {
        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn last_zoom(&self) -> u32 {
            self.last_zoom.load(Ordering::SeqCst)
        }
    }

    impl VectorDataSource<()> for CountingSource {
        fn projection(&self) -> Arc<dyn Projection> {
            self.inner.projection()
        }

        fn load_elements(&self, envelope: &Envelope, zoom: u32) -> Result<ElementMap<()>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.last_zoom.store(zoom, Ordering::SeqCst);
            self.inner.load_elements(envelope, zoom)
        }
    }

    struct FailingSource;

    impl VectorDataSource<()> for FailingSource {
        fn projection(&self) -> Arc<dyn Projection> {
            Arc::new(PlanarProjection::new(Envelope::new(0.0, 0.0, 16.0, 16.0)))
        }

        fn load_elements(&self, _envelope: &Envelope, _zoom: u32) -> Result<ElementMap<()>> {
            Err(DataError::Source("storage offline".into()))
        }
    }

    /// 16x16 world with one point at the center of every unit tile at zoom 4
    fn unit_grid_source() -> Arc<CountingSource> {
        let projection = Arc::new(PlanarProjection::new(Envelope::new(0.0, 0.0, 16.0, 16.0)));
        let points = (0..16).flat_map(|y| {
            (0..16).map(move |x| {
                Element::new(
                    Geometry::Point(MapPos::new(x as f64 + 0.5, y as f64 + 0.5)),
                    (),
                )
            })
        });
        Arc::new(CountingSource {
            inner: MemoryDataSource::from_elements(projection, points),
            calls: AtomicUsize::new(0),
            last_zoom: AtomicU32::new(0),
        })
    }

    #[test]
    fn test_tile_ids_are_unique() {
        let mut seen = HashSet::new();
        for zoom in 0..=6u32 {
            let n = tile_count(zoom);
            for y in 0..n {
                for x in 0..n {
                    assert!(seen.insert(tile_id(zoom, x, y)));
                }
            }
        }
    }

    #[test]
    fn test_four_tiles_merge_without_duplicates() {
        let counting = unit_grid_source();
        let mut inner = counting.inner.clone();
        // A line touching all four tiles must come back once
        let line_id = inner.add(Element::new(
            Geometry::Line(vec![MapPos::new(2.5, 2.5), MapPos::new(3.5, 3.5)]),
            (),
        ));
        let source = TilingDataSource::new(inner);

        let loaded = source
            .load_elements(&Envelope::new(2.0, 2.0, 4.0, 4.0), 4)
            .unwrap();
        assert_eq!(loaded.len(), 5);
        assert!(loaded.contains_key(&line_id));
        for element in loaded.values() {
            if let Geometry::Point(pos) = element.geometry {
                assert!(pos.x > 2.0 && pos.x < 4.0 && pos.y > 2.0 && pos.y < 4.0);
            }
        }
    }

    #[test]
    fn test_one_call_per_tile() {
        let counting = unit_grid_source();
        let source = TilingDataSource::new(counting.clone());

        source
            .load_elements(&Envelope::new(2.2, 2.2, 3.8, 3.8), 4)
            .unwrap();
        assert_eq!(counting.calls(), 4);
    }

    #[test]
    fn test_cache_keeps_only_previous_request() {
        let counting = unit_grid_source();
        let source = TilingDataSource::new(counting.clone());
        let first = Envelope::new(2.0, 2.0, 4.0, 4.0);
        let shifted = Envelope::new(3.0, 2.0, 5.0, 4.0);

        source.load_elements(&first, 4).unwrap();
        assert_eq!(counting.calls(), 4);

        // Same request again is served from cache
        source.load_elements(&first, 4).unwrap();
        assert_eq!(counting.calls(), 4);

        // Shifted by one tile: column 3 is reused, column 4 is new
        let loaded = source.load_elements(&shifted, 4).unwrap();
        assert_eq!(counting.calls(), 6);
        assert_eq!(loaded.len(), 4);

        // Column 2 was dropped with the previous generation
        source.load_elements(&first, 4).unwrap();
        assert_eq!(counting.calls(), 8);
    }

    #[test]
    fn test_lru_cache_survives_disjoint_requests() {
        let counting = unit_grid_source();
        let capacity = NonZeroUsize::new(16).unwrap();
        let source = TilingDataSource::with_cache(counting.clone(), LruTileCache::new(capacity));
        let a = Envelope::new(0.0, 0.0, 2.0, 2.0);
        let b = Envelope::new(10.0, 10.0, 12.0, 12.0);

        source.load_elements(&a, 4).unwrap();
        source.load_elements(&b, 4).unwrap();
        assert_eq!(counting.calls(), 8);
        source.load_elements(&a, 4).unwrap();
        assert_eq!(counting.calls(), 8);
    }

    #[test]
    fn test_zoom_changes_grid() {
        let counting = unit_grid_source();
        let source = TilingDataSource::new(counting.clone());

        let loaded = source
            .load_elements(&Envelope::new(0.0, 0.0, 16.0, 16.0), 0)
            .unwrap();
        assert_eq!(loaded.len(), 256);
        assert_eq!(counting.calls(), 1);
    }

    #[test]
    fn test_degenerate_envelope_hits_one_tile() {
        let counting = unit_grid_source();
        let source = TilingDataSource::new(counting.clone());

        let loaded = source
            .load_elements(&Envelope::from_pos(&MapPos::new(3.0, 3.0)), 4)
            .unwrap();
        assert_eq!(counting.calls(), 1);
        assert_eq!(loaded.len(), 1);
    }

    #[test]
    fn test_envelope_outside_world_is_empty() {
        let counting = unit_grid_source();
        let source = TilingDataSource::new(counting.clone());

        let loaded = source
            .load_elements(&Envelope::new(100.0, 100.0, 120.0, 120.0), 4)
            .unwrap();
        assert!(loaded.is_empty());
        assert_eq!(counting.calls(), 0);
    }

    #[test]
    fn test_large_zoom_is_clamped() {
        let counting = unit_grid_source();
        let source = TilingDataSource::new(counting.clone());
        let loaded = source
            .load_elements(&Envelope::from_pos(&MapPos::new(7.5, 7.5)), 40)
            .unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(counting.calls(), 1);
    }

    #[test]
    fn test_inner_source_gets_requested_zoom() {
        let counting = unit_grid_source();
        let source = TilingDataSource::new(counting.clone());
        let point = Envelope::from_pos(&MapPos::new(7.5, 7.5));

        source.load_elements(&point, 10).unwrap();
        assert_eq!(counting.last_zoom(), 10);

        source.load_elements(&point, 28).unwrap();
        assert_eq!(counting.last_zoom(), 28);
        assert_eq!(counting.calls(), 2);

        // Same grid tile at another zoom above the cap is a separate load
        source.load_elements(&point, 30).unwrap();
        assert_eq!(counting.last_zoom(), 30);
        assert_eq!(counting.calls(), 3);

        source.load_elements(&point, 30).unwrap();
        assert_eq!(counting.calls(), 3);
    }

    #[test]
    fn test_source_errors_propagate() {
        let source = TilingDataSource::new(FailingSource);
        let result = source.load_elements(&Envelope::new(0.0, 0.0, 1.0, 1.0), 4);
        assert!(matches!(result, Err(DataError::Source(_))));
    }
}
