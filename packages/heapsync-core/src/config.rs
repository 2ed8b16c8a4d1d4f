use std::cell::RefCell;
use std::rc::Rc;

use crate::error::{Error, Result};
use crate::heap::{Heap, HeapMode, SharedHeap, SourceBinding};
use crate::listener::Conflater;

/// Construction options for a [`Heap`].
///
/// A heap built with a [`source`](HeapBuilder::source) is a dependent replica: it is registered
/// as a listener of the source and can later be detached with
/// [`Heap::disconnect_from_source`].
pub struct HeapBuilder {
    uri: String,
    mode: HeapMode,
    conflater: Option<Box<dyn Conflater>>,
    source: Option<(SharedHeap, bool)>,
}

impl HeapBuilder {
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            mode: HeapMode::Mutable,
            conflater: None,
            source: None,
        }
    }

    pub fn mode(mut self, mode: HeapMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn immutable(self) -> Self {
        self.mode(HeapMode::Immutable)
    }

    /// Keep a conflated catch-up block for listeners added later with `populate`.
    pub fn conflater(mut self, conflater: Box<dyn Conflater>) -> Self {
        self.conflater = Some(conflater);
        self
    }

    /// Mirror `source`, optionally starting from its current state.
    pub fn source(mut self, source: &SharedHeap, populate: bool) -> Self {
        self.source = Some((Rc::clone(source), populate));
        self
    }

    /// Build a standalone heap. Fails when a source was configured, since subscribing needs a
    /// shared handle; use [`build_shared`](HeapBuilder::build_shared) for replicas.
    pub fn build(self) -> Result<Heap> {
        if self.source.is_some() {
            return Err(Error::state(format!(
                "heap {} has a source and must be built shared",
                self.uri
            )));
        }
        Ok(self.into_heap())
    }

    pub fn build_shared(mut self) -> Result<SharedHeap> {
        let source = self.source.take();
        let heap = Rc::new(RefCell::new(self.into_heap()));
        if let Some((source, populate)) = source {
            let listener = Heap::subscribe(&source, &heap, populate)?;
            let mut replica = heap
                .try_borrow_mut()
                .map_err(|_| Error::state("replica heap is busy after subscribing"))?;
            tracing::debug!(
                heap = %replica.uri(),
                source = %source.borrow().uri(),
                populate,
                "replica subscribed to source"
            );
            replica.source = Some(SourceBinding {
                heap: Rc::downgrade(&source),
                listener,
            });
        }
        Ok(heap)
    }

    fn into_heap(self) -> Heap {
        let mut heap = Heap::with_mode(self.uri, self.mode);
        if let Some(conflater) = self.conflater {
            heap.set_conflater(conflater);
        }
        heap
    }
}
