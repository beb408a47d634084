//! Point clustering decorator
//!
//! Nearby point-like elements are merged into synthetic cluster elements. The
//! merge distance is a fraction of the world size at zoom 0 and halves with
//! every zoom level.
//!
//! Clusters are only emitted when all of their members lie within the query
//! envelope enlarged by one merge distance. Context for that is fetched with a
//! two-distance enlargement; clusters reaching past the inner margin may be
//! missing members from outside it and are dropped, which keeps cluster
//! output stable across neighbouring queries.

use crate::projection::Projection;
use crate::source::VectorDataSource;
use crate::{Attributes, Element, ElementMap, Envelope, Geometry, MapPos, Result};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::sync::Arc;

/// Bit set on every id produced by [`CentroidMerger`]
///
/// Source ids must keep this bit clear for cluster ids to stay unique.
pub const CLUSTER_ID_FLAG: u64 = 1 << 63;

/// Attribute holding the member count of a merged cluster
pub const CLUSTER_SIZE_ATTRIBUTE: &str = "cluster_size";

/// Configuration for [`ClusteringDataSource`]
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ClusterConfig {
    /// Merge distance as a fraction of the world size, at zoom 0
    pub distance: f64,
    /// Minimum member count for a merged element; smaller clusters are emitted
    /// as their members. Values below 2 behave as 2.
    pub threshold: usize,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            distance: 0.05,
            threshold: 2,
        }
    }
}

/// Position extractor and merge function for clustered elements
pub trait ClusterMerger<A>: Send + Sync {
    /// Position used for clustering; `None` keeps the element out of clustering
    fn position(&self, element: &Element<A>) -> Option<MapPos>;

    /// Build one synthetic element for a cluster of at least two members
    ///
    /// The returned id must not collide with any source id.
    fn merge(&self, members: &[(u64, Element<A>)], centroid: MapPos) -> (u64, Element<A>);
}

/// Merges attribute-map points into a point at the cluster centroid
///
/// The merged element gets the id `CLUSTER_ID_FLAG | smallest member id` and a
/// single [`CLUSTER_SIZE_ATTRIBUTE`] attribute. Lines and polygons are not
/// clustered.
#[derive(Debug, Clone, Copy, Default)]
pub struct CentroidMerger;

impl ClusterMerger<Attributes> for CentroidMerger {
    fn position(&self, element: &Element<Attributes>) -> Option<MapPos> {
        match element.geometry {
            Geometry::Point(pos) => Some(pos),
            _ => None,
        }
    }

    fn merge(
        &self,
        members: &[(u64, Element<Attributes>)],
        centroid: MapPos,
    ) -> (u64, Element<Attributes>) {
        let smallest = members.iter().map(|(id, _)| *id).min().unwrap_or(0);
        let id = CLUSTER_ID_FLAG | smallest;

        let mut attributes = Attributes::new();
        attributes.insert(CLUSTER_SIZE_ATTRIBUTE.to_string(), members.len().to_string());
        (
            id,
            Element::new(Geometry::Point(centroid), attributes).with_id(id),
        )
    }
}

/// Members gathered around a running-mean centroid
#[derive(Debug, Clone)]
pub struct Cluster<A> {
    centroid: MapPos,
    members: SmallVec<[(u64, Element<A>); 4]>,
    positions: SmallVec<[MapPos; 4]>,
}

impl<A> Cluster<A> {
    pub fn new(id: u64, element: Element<A>, pos: MapPos) -> Self {
        let mut members = SmallVec::new();
        members.push((id, element));
        let mut positions = SmallVec::new();
        positions.push(pos);
        Self {
            centroid: pos,
            members,
            positions,
        }
    }

    /// Add a member, moving the centroid to the mean of all member positions
    pub fn absorb(&mut self, id: u64, element: Element<A>, pos: MapPos) {
        let n = self.members.len() as f64;
        self.centroid = MapPos::new(
            (self.centroid.x * n + pos.x) / (n + 1.0),
            (self.centroid.y * n + pos.y) / (n + 1.0),
        );
        self.members.push((id, element));
        self.positions.push(pos);
    }

    pub fn centroid(&self) -> MapPos {
        self.centroid
    }

    pub fn members(&self) -> &[(u64, Element<A>)] {
        &self.members
    }

    pub fn positions(&self) -> &[MapPos] {
        &self.positions
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn into_members(self) -> impl Iterator<Item = (u64, Element<A>)> {
        self.members.into_iter()
    }
}

/// Groups positioned elements into clusters
pub trait Clusterer<A>: Send + Sync {
    /// `items` arrive in ascending id order
    fn cluster(&self, items: Vec<(u64, Element<A>, MapPos)>, max_distance: f64)
    -> Vec<Cluster<A>>;
}

/// Single-pass first-fit clustering
///
/// Each element joins the first existing cluster whose centroid is within
/// `max_distance`, not the nearest one, and otherwise starts a new cluster.
/// The result depends only on the input order. Cost is O(elements x clusters).
#[derive(Debug, Clone, Copy, Default)]
pub struct GreedyClusterer;

impl<A: Send + Sync> Clusterer<A> for GreedyClusterer {
    fn cluster(
        &self,
        items: Vec<(u64, Element<A>, MapPos)>,
        max_distance: f64,
    ) -> Vec<Cluster<A>> {
        let max_distance_sq = max_distance * max_distance;
        let mut clusters: Vec<Cluster<A>> = Vec::new();

        for (id, element, pos) in items {
            match clusters
                .iter_mut()
                .find(|cluster| cluster.centroid.distance_sq(&pos) <= max_distance_sq)
            {
                Some(cluster) => cluster.absorb(id, element, pos),
                None => clusters.push(Cluster::new(id, element, pos)),
            }
        }
        clusters
    }
}

/// Decorator merging nearby points of a wrapped source
pub struct ClusteringDataSource<A, S> {
    inner: S,
    config: ClusterConfig,
    merger: Box<dyn ClusterMerger<A>>,
    clusterer: Box<dyn Clusterer<A>>,
}

#[cfg_attr(feature = "profiling", profiling::all_functions)]
impl<A, S> ClusteringDataSource<A, S>
where
    A: Send + Sync + 'static,
    S: VectorDataSource<A>,
{
    pub fn new<M: ClusterMerger<A> + 'static>(inner: S, config: ClusterConfig, merger: M) -> Self {
        Self::with_clusterer(inner, config, merger, GreedyClusterer)
    }

    pub fn with_clusterer<M, C>(inner: S, config: ClusterConfig, merger: M, clusterer: C) -> Self
    where
        M: ClusterMerger<A> + 'static,
        C: Clusterer<A> + 'static,
    {
        Self {
            inner,
            config,
            merger: Box::new(merger),
            clusterer: Box::new(clusterer),
        }
    }

    pub fn config(&self) -> &ClusterConfig {
        &self.config
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Merge distance in projected units at `zoom`
    pub fn max_distance(&self, zoom: u32) -> f64 {
        let scale = 0.5 * 2f64.powi(zoom as i32);
        // NaN turns into zero as well
        (self.config.distance * self.inner.projection().world_size() / scale).max(0.0)
    }
}

impl<A, S> VectorDataSource<A> for ClusteringDataSource<A, S>
where
    A: Send + Sync + 'static,
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
        profiling::scope!("clustering::load_elements");

        let max_distance = self.max_distance(zoom);
        let threshold = self.config.threshold.max(2);
        let fetched = self
            .inner
            .load_elements(&envelope.enlarged(2.0 * max_distance), zoom)?;
        let cluster_envelope = envelope.enlarged(max_distance);

        let mut result = ElementMap::new();
        let mut items = Vec::with_capacity(fetched.len());
        for (id, element) in fetched {
            match self.merger.position(&element) {
                Some(pos) => items.push((id, element, pos)),
                None => {
                    result.insert(id, element);
                }
            }
        }

        let clusters = self.clusterer.cluster(items, max_distance);
        let cluster_count = clusters.len();
        let (mut merged, mut discarded) = (0usize, 0usize);
        for cluster in clusters {
            if cluster
                .positions()
                .iter()
                .any(|pos| !cluster_envelope.contains_pos(pos))
            {
                tracing::trace!(
                    size = cluster.len(),
                    x = cluster.centroid().x,
                    y = cluster.centroid().y,
                    "Discarding cluster crossing the context margin"
                );
                discarded += 1;
                continue;
            }

            if cluster.len() >= threshold {
                let (id, element) = self.merger.merge(cluster.members(), cluster.centroid());
                result.insert(id, element);
                merged += 1;
            } else {
                result.extend(cluster.into_members());
            }
        }

        tracing::debug!(
            zoom,
            max_distance,
            clusters = cluster_count,
            merged,
            discarded,
            elements = result.len(),
            "Clustered elements"
        );
        Ok(result)
    }
}
