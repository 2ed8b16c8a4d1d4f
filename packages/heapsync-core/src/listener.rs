use std::cell::RefCell;
use std::rc::{Rc, Weak};

use crate::error::{Error, Result};
use crate::heap::{Heap, SharedHeap};
use crate::update::UpdateBlock;

/// Receiver of the blocks a heap publishes when a transaction closes.
pub trait HeapListener {
    fn apply_update(&self, block: &UpdateBlock) -> Result<()>;

    /// True once the listener can never receive another block. Detached listeners are dropped
    /// by the publishing heap at its next commit.
    fn is_detached(&self) -> bool {
        false
    }
}

/// Handle returned by [`Heap::add_listener`], used to unregister.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct ListenerId(pub u64);

/// Strategy that folds each committed block into a running catch-up block for new listeners.
///
/// The result must, replayed on an empty heap, rebuild the same tree as the full history.
pub trait Conflater {
    fn conflate(&self, state: &UpdateBlock, block: &UpdateBlock) -> UpdateBlock;
}

/// Keeps the whole history as the catch-up state.
#[derive(Clone, Copy, Debug, Default)]
pub struct ConcatConflater;

impl Conflater for ConcatConflater {
    fn conflate(&self, state: &UpdateBlock, block: &UpdateBlock) -> UpdateBlock {
        UpdateBlock::merge([state, block])
    }
}

/// Replays every block it receives into the heap it wraps, which in turn notifies its own
/// listeners. Obtained through [`Heap::as_listener`].
pub struct HeapAdapter {
    heap: Weak<RefCell<Heap>>,
    uri: String,
}

impl HeapListener for HeapAdapter {
    fn apply_update(&self, block: &UpdateBlock) -> Result<()> {
        let Some(heap) = self.heap.upgrade() else {
            tracing::debug!(heap = %self.uri, "listening heap dropped, ignoring block");
            return Ok(());
        };
        let mut heap = heap.try_borrow_mut().map_err(|_| {
            Error::state(format!(
                "heap {} is already being updated and cannot replay a block into itself",
                self.uri
            ))
        })?;
        heap.apply_update_block(block)
    }

    fn is_detached(&self) -> bool {
        self.heap.strong_count() == 0
    }
}

impl Heap {
    /// The stable listener view of `this`, for chaining heaps.
    pub fn as_listener(this: &SharedHeap) -> Result<Rc<dyn HeapListener>> {
        let mut heap = this
            .try_borrow_mut()
            .map_err(|_| Error::state("heap is busy and cannot hand out its listener"))?;
        let uri = heap.uri().to_owned();
        let adapter = heap.adapter.get_or_insert_with(|| {
            Rc::new(HeapAdapter {
                heap: Rc::downgrade(this),
                uri,
            })
        });
        Ok(Rc::clone(adapter) as Rc<dyn HeapListener>)
    }

    /// Register `target` as a mirror of `source`.
    pub fn subscribe(
        source: &SharedHeap,
        target: &SharedHeap,
        populate: bool,
    ) -> Result<ListenerId> {
        let listener = Heap::as_listener(target)?;
        let mut source = source
            .try_borrow_mut()
            .map_err(|_| Error::state("source heap is busy and cannot accept listeners"))?;
        source.add_listener(listener, populate)
    }
}
