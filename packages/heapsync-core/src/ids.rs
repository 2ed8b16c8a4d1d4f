use std::collections::VecDeque;
use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// How far past the next unused id an upstream heap may place a node.
pub const MAX_ID_GAP: u64 = 1 << 20;

/// Identifier of a node, unique among the live nodes of its owning heap.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(transparent))]
pub struct NodeId(pub u64);

impl NodeId {
    pub fn as_usize(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl From<u64> for NodeId {
    fn from(value: u64) -> Self {
        NodeId(value)
    }
}

/// Id generator plus a FIFO pool of freed ids.
///
/// Freed ids are handed out again, first-freed-first-reused, before any new id is minted.
#[derive(Clone, Debug, Default)]
pub struct IdPool {
    next: u64,
    free: VecDeque<NodeId>,
}

impl IdPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allocate(&mut self) -> NodeId {
        if let Some(id) = self.free.pop_front() {
            return id;
        }
        let id = NodeId(self.next);
        self.next += 1;
        id
    }

    pub fn release(&mut self, id: NodeId) {
        self.free.push_back(id);
    }

    /// Record that `id` is now live even though it was not handed out by [`IdPool::allocate`].
    ///
    /// Used when an upstream heap dictates the id: the id leaves the free pool and the
    /// generator moves past it so a later local allocation cannot collide. Ids more than
    /// [`MAX_ID_GAP`] past [`IdPool::next_unused`] are rejected, since the arena is dense.
    pub fn claim(&mut self, id: NodeId) -> Result<()> {
        if id.0 >= self.next.saturating_add(MAX_ID_GAP) {
            return Err(Error::Bounds(format!(
                "id {id} is too far past the next unused id #{}",
                self.next
            )));
        }
        if let Some(pos) = self.free.iter().position(|free| *free == id) {
            self.free.remove(pos);
        }
        if id.0 >= self.next {
            self.next = id.0 + 1;
        }
        Ok(())
    }

    pub fn is_free(&self, id: NodeId) -> bool {
        self.free.contains(&id)
    }

    pub fn free_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.free.iter().copied()
    }

    /// The id the generator will mint once the free pool is exhausted.
    pub fn next_unused(&self) -> NodeId {
        NodeId(self.next)
    }
}
