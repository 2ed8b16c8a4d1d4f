#![forbid(unsafe_code)]
//! In-memory tree heap whose mutations are captured as ordered delta blocks.
//!
//! A [`Heap`] owns a strict tree of list, map, object and scalar nodes. Every structural edit
//! happens inside a transaction and is recorded as an [`Update`]; closing the transaction
//! publishes the resulting [`UpdateBlock`] to listeners, which typically are other heaps
//! replaying the same edits with the same node ids. [`HeapDiff`] computes the block that turns
//! one heap into another without replaying its history.

pub mod config;
pub mod diff;
pub mod error;
pub mod heap;
pub mod ids;
pub mod listener;
pub mod node;
pub mod projection;
mod snapshot;
pub mod update;

pub use config::HeapBuilder;
pub use diff::HeapDiff;
pub use error::{Error, Result};
pub use heap::{Heap, HeapMode, SharedHeap};
pub use ids::{IdPool, NodeId, MAX_ID_GAP};
pub use listener::{ConcatConflater, Conflater, HeapAdapter, HeapListener, ListenerId};
pub use node::{
    Fields, ListMut, MapMut, Node, NodeKind, NodeType, Placement, ScalarMut, ScalarValue,
};
pub use projection::Projector;
pub use update::{Update, UpdateBlock};
