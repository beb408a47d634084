//! The vector data source abstraction and an in-memory source
//!
//! Decorators wrap any [`VectorDataSource`] and only rely on this trait: they
//! cannot tell a database-backed source from a file reader or another
//! decorator. Implementations should expect one `load_elements` call at a time
//! per instance; the renderer is responsible for serialising calls.

use crate::projection::Projection;
use crate::{Attributes, Element, ElementMap, Envelope, EnvelopeBuilder, Result};
use std::sync::Arc;

/// A source of map elements, queried by envelope and zoom
pub trait VectorDataSource<A = Attributes>: Send + Sync {
    /// Projection the source's coordinates are expressed in
    fn projection(&self) -> Arc<dyn Projection>;

    /// Bounds of all data, when known up front
    fn data_extent(&self) -> Option<Envelope> {
        None
    }

    /// Elements relevant to `envelope` at `zoom`, keyed by element id
    ///
    /// Failures of the underlying storage are returned as-is; decorators never
    /// retry or wrap them.
    fn load_elements(&self, envelope: &Envelope, zoom: u32) -> Result<ElementMap<A>>;
}

impl<A, S> VectorDataSource<A> for Box<S>
where
    S: VectorDataSource<A> + ?Sized,
{
    fn projection(&self) -> Arc<dyn Projection> {
        (**self).projection()
    }

    fn data_extent(&self) -> Option<Envelope> {
        (**self).data_extent()
    }

    fn load_elements(&self, envelope: &Envelope, zoom: u32) -> Result<ElementMap<A>> {
        (**self).load_elements(envelope, zoom)
    }
}

impl<A, S> VectorDataSource<A> for Arc<S>
where
    S: VectorDataSource<A> + ?Sized,
{
    fn projection(&self) -> Arc<dyn Projection> {
        (**self).projection()
    }

    fn data_extent(&self) -> Option<Envelope> {
        (**self).data_extent()
    }

    fn load_elements(&self, envelope: &Envelope, zoom: u32) -> Result<ElementMap<A>> {
        (**self).load_elements(envelope, zoom)
    }
}

/// Elements held in memory, returned when their bounds touch the query
#[derive(Debug, Clone)]
pub struct MemoryDataSource<A = Attributes> {
    projection: Arc<dyn Projection>,
    elements: ElementMap<A>,
    extent: EnvelopeBuilder,
}

#[cfg_attr(feature = "profiling", profiling::all_functions)]
impl<A: Clone + Send + Sync> MemoryDataSource<A> {
    pub fn new(projection: Arc<dyn Projection>) -> Self {
        Self {
            projection,
            elements: ElementMap::new(),
            extent: EnvelopeBuilder::new(),
        }
    }

    pub fn from_elements<I>(projection: Arc<dyn Projection>, elements: I) -> Self
    where
        I: IntoIterator<Item = Element<A>>,
    {
        let mut source = Self::new(projection);
        for element in elements {
            source.add(element);
        }
        source
    }

    /// Insert an element and return its id
    ///
    /// Elements without an id get the next id after the current largest one.
    /// An element with an id already present replaces the old one.
    pub fn add(&mut self, mut element: Element<A>) -> u64 {
        let id = element.id.unwrap_or_else(|| {
            self.elements
                .last_key_value()
                .map_or(0, |(&last, _)| last.saturating_add(1))
        });
        element.id = Some(id);
        if let Some(env) = element.geometry.envelope() {
            self.extent.add_envelope(&env);
        }
        self.elements.insert(id, element);
        id
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }
}

impl<A: Clone + Send + Sync> VectorDataSource<A> for MemoryDataSource<A> {
    fn projection(&self) -> Arc<dyn Projection> {
        self.projection.clone()
    }

    fn data_extent(&self) -> Option<Envelope> {
        self.extent.build()
    }

    fn load_elements(&self, envelope: &Envelope, _zoom: u32) -> Result<ElementMap<A>> {
        #[cfg(feature = "profiling")]
        profiling::scope!("memory::load_elements");

        Ok(self
            .elements
            .iter()
            .filter(|(_, element)| {
                element
                    .geometry
                    .envelope()
                    .is_some_and(|env| env.intersects(envelope))
            })
            .map(|(&id, element)| (id, element.clone()))
            .collect())
    }
}
