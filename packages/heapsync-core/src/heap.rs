use std::cell::RefCell;
use std::collections::BTreeSet;
use std::fmt;
use std::rc::{Rc, Weak};

use crate::error::{Error, Result};
use crate::ids::{IdPool, NodeId};
use crate::listener::{Conflater, HeapAdapter, HeapListener, ListenerId};
use crate::node::{
    clear_children, wrong_kind, ListMut, MapMut, Node, NodeKind, NodeType, Placement, ScalarMut,
    ScalarValue,
};
use crate::snapshot;
use crate::update::{Update, UpdateBlock};

/// A heap shared between its owner and the heaps or adapters that replicate it.
pub type SharedHeap = Rc<RefCell<Heap>>;

/// Whether locally-originated mutations are accepted.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum HeapMode {
    #[default]
    Mutable,
    /// Only replays from an upstream heap may change the tree.
    Immutable,
}

#[derive(Debug, Default)]
enum TxState {
    #[default]
    Idle,
    InTransaction {
        updates: Vec<Update>,
    },
}

pub(crate) struct SourceBinding {
    pub(crate) heap: Weak<RefCell<Heap>>,
    pub(crate) listener: ListenerId,
}

/// In-memory tree document store.
///
/// The heap owns every node in an id-indexed arena, hands out and recycles ids, brackets
/// mutations in transactions and publishes each closed transaction as an [`UpdateBlock`] to
/// its listeners.
pub struct Heap {
    uri: String,
    mode: HeapMode,
    nodes: Vec<Option<Node>>,
    live: usize,
    ids: IdPool,
    root: Option<NodeId>,
    terminated: bool,
    tx: TxState,
    listeners: Vec<(ListenerId, Rc<dyn HeapListener>)>,
    next_listener: u64,
    conflater: Option<Box<dyn Conflater>>,
    new_listener_state: UpdateBlock,
    pub(crate) adapter: Option<Rc<HeapAdapter>>,
    pub(crate) source: Option<SourceBinding>,
}

impl Heap {
    pub fn new(uri: impl Into<String>) -> Self {
        Self::with_mode(uri, HeapMode::Mutable)
    }

    pub fn with_mode(uri: impl Into<String>, mode: HeapMode) -> Self {
        Self {
            uri: uri.into(),
            mode,
            nodes: Vec::new(),
            live: 0,
            ids: IdPool::new(),
            root: None,
            terminated: false,
            tx: TxState::Idle,
            listeners: Vec::new(),
            next_listener: 0,
            conflater: None,
            new_listener_state: UpdateBlock::default(),
            adapter: None,
            source: None,
        }
    }

    pub fn immutable(uri: impl Into<String>) -> Self {
        Self::with_mode(uri, HeapMode::Immutable)
    }

    pub(crate) fn set_conflater(&mut self, conflater: Box<dyn Conflater>) {
        self.conflater = Some(conflater);
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn mode(&self) -> HeapMode {
        self.mode
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    pub fn in_transaction(&self) -> bool {
        matches!(self.tx, TxState::InTransaction { .. })
    }

    /// Number of live nodes.
    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    pub fn ids(&self) -> &IdPool {
        &self.ids
    }

    /// Ids of every live node, ascending.
    pub fn live_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_ref().map(|_| NodeId(i as u64)))
    }

    // ---- transactions

    pub fn begin_update(&mut self) -> Result<()> {
        if self.in_transaction() {
            return Err(Error::state(format!(
                "heap {} already has an open transaction; finish the previous update first",
                self.uri
            )));
        }
        self.tx = TxState::InTransaction {
            updates: Vec::new(),
        };
        Ok(())
    }

    /// Close the open transaction and notify listeners with the resulting block.
    ///
    /// Empty blocks are not delivered. When a listener fails the remaining listeners are still
    /// notified and the first failure is returned.
    pub fn end_update(&mut self) -> Result<UpdateBlock> {
        let updates = match std::mem::take(&mut self.tx) {
            TxState::InTransaction { updates } => updates,
            TxState::Idle => {
                return Err(Error::state(format!(
                    "heap {} has no open transaction",
                    self.uri
                )))
            }
        };
        let block = UpdateBlock::new(updates);
        if block.is_empty() {
            return Ok(block);
        }

        if let Some(conflater) = &self.conflater {
            self.new_listener_state = conflater.conflate(&self.new_listener_state, &block);
        }

        let before = self.listeners.len();
        self.listeners.retain(|(_, listener)| !listener.is_detached());
        if self.listeners.len() != before {
            tracing::debug!(
                heap = %self.uri,
                pruned = before - self.listeners.len(),
                "dropped detached listeners"
            );
        }

        tracing::debug!(
            heap = %self.uri,
            updates = block.len(),
            listeners = self.listeners.len(),
            "committing update block"
        );
        let listeners: Vec<Rc<dyn HeapListener>> =
            self.listeners.iter().map(|(_, l)| Rc::clone(l)).collect();
        let mut first_error = None;
        for listener in listeners {
            if let Err(err) = listener.apply_update(&block) {
                tracing::warn!(heap = %self.uri, "listener failed to apply update block: {err}");
                first_error.get_or_insert(err);
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(block),
        }
    }

    /// Run `f` inside a transaction that is closed on every exit path.
    ///
    /// There is no rollback: when `f` fails, the deltas it already emitted are still published
    /// so listeners stay in step with this heap, and `f`'s error is returned.
    pub fn update<T>(&mut self, f: impl FnOnce(&mut Heap) -> Result<T>) -> Result<T> {
        self.begin_update()?;
        match f(self) {
            Ok(value) => {
                self.end_update()?;
                Ok(value)
            }
            Err(err) => {
                tracing::warn!(
                    heap = %self.uri,
                    "transaction failed, publishing applied deltas: {err}"
                );
                if self.in_transaction() {
                    if let Err(end_err) = self.end_update() {
                        tracing::warn!(heap = %self.uri, "closing failed transaction: {end_err}");
                    }
                }
                Err(err)
            }
        }
    }

    /// Replay a block produced by another heap, as upstream, inside a transaction of this heap.
    pub fn apply_update_block(&mut self, block: &UpdateBlock) -> Result<()> {
        self.update(|heap| {
            for update in block {
                heap.replay(update)?;
            }
            Ok(())
        })
    }

    fn replay(&mut self, update: &Update) -> Result<()> {
        tracing::trace!(heap = %self.uri, %update, "replaying delta");
        match update {
            Update::InstallRoot { id, node_type } => self.install_root(true, *id, *node_type),
            Update::InstallField {
                parent_id,
                id,
                name,
                node_type,
            } => self.install_field(true, *parent_id, *id, name, *node_type),
            Update::InstallIndex {
                parent_id,
                id,
                index,
                node_type,
            } => self.install_index(true, *parent_id, *id, *index, *node_type),
            Update::RemoveField {
                parent_id,
                id,
                deallocated_ids,
                ..
            } => self
                .map_mut(*parent_id)?
                .remove_child(true, *id, Some(deallocated_ids)),
            Update::RemoveIndex {
                parent_id,
                id,
                deallocated_ids,
                ..
            } => self
                .list_mut(*parent_id)?
                .remove_child(true, *id, Some(deallocated_ids)),
            Update::RemoveChildren {
                id,
                deallocated_ids,
            } => clear_children(self, true, *id, Some(deallocated_ids)),
            Update::SetScalar { id, value } => self.set_scalar(true, *id, value.clone()),
            Update::TerminateHeap => self.terminate(true),
        }
    }

    // ---- guards and emission

    /// The single gate every mutation passes before touching the tree.
    pub(crate) fn guard(&self, from_listener: bool) -> Result<()> {
        if from_listener {
            return self.ensure_transaction();
        }
        self.before_mutation()
    }

    /// Checks for a locally-originated mutation: mutable heap, open transaction, not terminated.
    pub fn before_mutation(&self) -> Result<()> {
        if self.mode == HeapMode::Immutable {
            return Err(Error::immutable(format!(
                "can't mutate immutable heap {}",
                self.uri
            )));
        }
        self.ensure_transaction()?;
        if self.terminated {
            return Err(Error::state(format!(
                "heap {} has been terminated and can't take further updates",
                self.uri
            )));
        }
        Ok(())
    }

    fn ensure_transaction(&self) -> Result<()> {
        if !self.in_transaction() {
            return Err(Error::state(format!(
                "heap {} has no open transaction",
                self.uri
            )));
        }
        Ok(())
    }

    fn reject_if_immutable(&self, from_listener: bool, what: &str) -> Result<()> {
        if !from_listener && self.mode == HeapMode::Immutable {
            return Err(Error::immutable(format!(
                "can't {what} on immutable heap {}",
                self.uri
            )));
        }
        Ok(())
    }

    pub(crate) fn emit(&mut self, update: Update) -> Result<()> {
        match &mut self.tx {
            TxState::InTransaction { updates } => {
                updates.push(update);
                Ok(())
            }
            TxState::Idle => Err(Error::state(format!(
                "heap {} asked to emit {} without an open transaction",
                self.uri,
                update.kind_name()
            ))),
        }
    }

    // ---- id and arena lifecycle

    pub fn allocate_id(&mut self) -> NodeId {
        self.ids.allocate()
    }

    pub(crate) fn allocate_node(
        &mut self,
        id: NodeId,
        node_type: NodeType,
        placement: Placement,
    ) -> Result<()> {
        let slot = id.as_usize();
        if self.nodes.get(slot).is_some_and(Option::is_some) {
            return Err(Error::state(format!(
                "heap {} cannot allocate {node_type} node {id}: id is already live",
                self.uri
            )));
        }
        self.ids.claim(id)?;
        if self.nodes.len() <= slot {
            self.nodes.resize_with(slot + 1, || None);
        }
        self.nodes[slot] = Some(Node::new(id, node_type, placement));
        self.live += 1;
        Ok(())
    }

    /// Destroy `id` and its whole subtree, recording every freed id in `deallocated`.
    ///
    /// Freed ids only return to the pool for local mutations; replicas take their ids from
    /// upstream.
    pub(crate) fn deallocate_node(
        &mut self,
        from_listener: bool,
        id: NodeId,
        deallocated: &mut BTreeSet<NodeId>,
    ) -> Result<()> {
        let mut stack = vec![id];
        while let Some(next) = stack.pop() {
            let node = self.take_node(next)?;
            let mut children = node.child_ids();
            children.reverse();
            stack.extend(children);
            deallocated.insert(next);
            if !from_listener {
                self.ids.release(next);
            }
        }
        Ok(())
    }

    /// Free the subtree under `id`, trusting an upstream-computed id set when one is carried.
    pub(crate) fn release_subtree(
        &mut self,
        from_listener: bool,
        id: NodeId,
        carried: Option<&BTreeSet<NodeId>>,
    ) -> Result<BTreeSet<NodeId>> {
        match carried.filter(|ids| !ids.is_empty()) {
            Some(ids) => {
                self.release_carried(ids)?;
                Ok(ids.clone())
            }
            None => {
                let mut freed = BTreeSet::new();
                self.deallocate_node(from_listener, id, &mut freed)?;
                Ok(freed)
            }
        }
    }

    pub(crate) fn release_carried(&mut self, ids: &BTreeSet<NodeId>) -> Result<()> {
        for id in ids {
            self.take_node(*id)?;
        }
        Ok(())
    }

    fn take_node(&mut self, id: NodeId) -> Result<Node> {
        let node = self
            .nodes
            .get_mut(id.as_usize())
            .and_then(Option::take)
            .ok_or_else(|| {
                Error::state(format!(
                    "heap {} cannot deallocate node {id}: id is not live",
                    self.uri
                ))
            })?;
        self.live -= 1;
        Ok(node)
    }

    // ---- lookup

    pub fn get_node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.as_usize()).and_then(Option::as_ref)
    }

    pub fn node(&self, id: NodeId) -> Result<&Node> {
        self.get_node(id).ok_or_else(|| {
            Error::state(format!("heap {} has no node with id {id}", self.uri))
        })
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> Result<&mut Node> {
        let uri = &self.uri;
        self.nodes
            .get_mut(id.as_usize())
            .and_then(Option::as_mut)
            .ok_or_else(|| Error::state(format!("heap {uri} has no node with id {id}")))
    }

    pub fn root(&self) -> Option<&Node> {
        self.root.and_then(|id| self.get_node(id))
    }

    pub fn root_id(&self) -> Option<NodeId> {
        self.root
    }

    pub fn is_root_installed(&self) -> bool {
        self.root.is_some()
    }

    /// Field `name` of map or object `id`, if present.
    pub fn field(&self, id: NodeId, name: &str) -> Result<Option<&Node>> {
        let node = self.node(id)?;
        let fields = node
            .as_fields()
            .ok_or_else(|| wrong_kind(id, NodeType::Map, node.node_type()))?;
        fields.get(name).map(|child| self.node(*child)).transpose()
    }

    /// Child at `index` of list `id`.
    pub fn child_at(&self, id: NodeId, index: usize) -> Result<&Node> {
        let node = self.node(id)?;
        let children = node
            .as_list()
            .ok_or_else(|| wrong_kind(id, NodeType::List, node.node_type()))?;
        let child = children.get(index).ok_or_else(|| {
            Error::Bounds(format!(
                "index {index} out of range for list {id} of size {}",
                children.len()
            ))
        })?;
        self.node(*child)
    }

    pub fn scalar(&self, id: NodeId) -> Result<&ScalarValue> {
        let node = self.node(id)?;
        node.as_scalar()
            .ok_or_else(|| wrong_kind(id, NodeType::Scalar, node.node_type()))
    }

    // ---- typed mutation handles

    pub fn list_mut(&mut self, id: NodeId) -> Result<ListMut<'_>> {
        let actual = self.node(id)?.node_type();
        if actual != NodeType::List {
            return Err(Error::state(format!(
                "can't use node {id} of type {actual} as a LIST"
            )));
        }
        Ok(ListMut::new(self, id))
    }

    pub fn map_mut(&mut self, id: NodeId) -> Result<MapMut<'_>> {
        let actual = self.node(id)?.node_type();
        if !matches!(actual, NodeType::Map | NodeType::Object) {
            return Err(Error::state(format!(
                "can't use node {id} of type {actual} as a MAP or OBJECT"
            )));
        }
        Ok(MapMut::new(self, id))
    }

    pub fn scalar_mut(&mut self, id: NodeId) -> Result<ScalarMut<'_>> {
        let actual = self.node(id)?.node_type();
        if actual != NodeType::Scalar {
            return Err(Error::state(format!(
                "can't use node {id} of type {actual} as a SCALAR"
            )));
        }
        Ok(ScalarMut::new(self, id))
    }

    // ---- root

    /// Return the root, installing it when absent. An existing root must have `node_type`.
    pub fn ensure_root(&mut self, node_type: NodeType) -> Result<NodeId> {
        if let Some(root) = self.root() {
            if root.node_type() != node_type {
                return Err(Error::state(format!(
                    "can't change type of root {} of heap {} from {} to {node_type}",
                    root.id(),
                    self.uri,
                    root.node_type()
                )));
            }
            return Ok(root.id());
        }
        self.reject_if_immutable(false, "install root")?;
        self.before_mutation()?;
        let id = self.allocate_id();
        self.install_root(false, id, node_type)?;
        Ok(id)
    }

    // ---- dispatch by id

    pub fn install_root(
        &mut self,
        from_listener: bool,
        id: NodeId,
        node_type: NodeType,
    ) -> Result<()> {
        self.reject_if_immutable(from_listener, "install root")?;
        self.guard(from_listener)?;
        if let Some(root) = self.root {
            return Err(Error::state(format!(
                "heap {} already has root {root}",
                self.uri
            )));
        }
        self.allocate_node(id, node_type, Placement::Root)?;
        self.root = Some(id);
        self.emit(Update::InstallRoot { id, node_type })
    }

    pub fn install_field(
        &mut self,
        from_listener: bool,
        parent_id: NodeId,
        id: NodeId,
        name: &str,
        node_type: NodeType,
    ) -> Result<()> {
        self.reject_if_immutable(from_listener, "install field")?;
        self.map_mut(parent_id)?
            .install_field(from_listener, id, name, node_type)
            .map(|_| ())
    }

    pub fn install_index(
        &mut self,
        from_listener: bool,
        parent_id: NodeId,
        id: NodeId,
        index: usize,
        node_type: NodeType,
    ) -> Result<()> {
        self.reject_if_immutable(from_listener, "install index")?;
        self.list_mut(parent_id)?
            .install_index(from_listener, id, index, node_type)
            .map(|_| ())
    }

    pub fn set_scalar(
        &mut self,
        from_listener: bool,
        id: NodeId,
        value: ScalarValue,
    ) -> Result<()> {
        self.reject_if_immutable(from_listener, "set scalar")?;
        self.scalar_mut(id)?
            .set_value(from_listener, value)
            .map(|_| ())
    }

    pub fn remove_field(
        &mut self,
        from_listener: bool,
        parent_id: NodeId,
        id: NodeId,
    ) -> Result<()> {
        self.reject_if_immutable(from_listener, "remove field")?;
        self.map_mut(parent_id)?.remove_field_by_id(from_listener, id)
    }

    pub fn remove_index(
        &mut self,
        from_listener: bool,
        parent_id: NodeId,
        id: NodeId,
    ) -> Result<()> {
        self.reject_if_immutable(from_listener, "remove index")?;
        self.list_mut(parent_id)?.remove_by_id(from_listener, id)
    }

    pub fn remove_children(&mut self, from_listener: bool, id: NodeId) -> Result<()> {
        self.reject_if_immutable(from_listener, "remove children")?;
        clear_children(self, from_listener, id, None)
    }

    /// Permanently stop local mutation. The root and tree stay in place.
    pub fn terminate_heap(&mut self) -> Result<()> {
        self.terminate(false)
    }

    fn terminate(&mut self, from_listener: bool) -> Result<()> {
        self.reject_if_immutable(from_listener, "terminate")?;
        self.ensure_transaction()?;
        if !from_listener && self.terminated {
            return Err(Error::state(format!(
                "heap {} has already been terminated",
                self.uri
            )));
        }
        self.terminated = true;
        self.emit(Update::TerminateHeap)
    }

    // ---- listeners

    /// Register a listener, first handing it the current state when `populate` is set.
    pub fn add_listener(
        &mut self,
        listener: Rc<dyn HeapListener>,
        populate: bool,
    ) -> Result<ListenerId> {
        if self.in_transaction() {
            return Err(Error::state(format!(
                "listeners cannot be added to heap {} while a transaction is open",
                self.uri
            )));
        }
        if populate {
            self.traverse(&listener)?;
        }
        let id = ListenerId(self.next_listener);
        self.next_listener += 1;
        self.listeners.push((id, listener));
        tracing::debug!(heap = %self.uri, listener = id.0, populate, "listener added");
        Ok(id)
    }

    pub fn remove_listener(&mut self, id: ListenerId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(existing, _)| *existing != id);
        let removed = self.listeners.len() != before;
        if removed {
            tracing::debug!(heap = %self.uri, listener = id.0, "listener removed");
        }
        removed
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    /// Hand the current state of this heap to a listener that is not yet registered.
    pub fn traverse(&self, listener: &Rc<dyn HeapListener>) -> Result<()> {
        let already = self
            .listeners
            .iter()
            .any(|(_, existing)| std::ptr::addr_eq(Rc::as_ptr(existing), Rc::as_ptr(listener)));
        if already {
            return Err(Error::state(format!(
                "listener is already listening to heap {}",
                self.uri
            )));
        }
        if self.conflater.is_some() {
            return listener.apply_update(&self.new_listener_state);
        }
        listener.apply_update(&UpdateBlock::new(self.copy_updates()))
    }

    /// Deltas that rebuild the current tree on an empty heap.
    pub fn copy_updates(&self) -> Vec<Update> {
        let mut updates = Vec::new();
        if let Some(root) = self.root() {
            updates.push(Update::InstallRoot {
                id: root.id(),
                node_type: root.node_type(),
            });
            snapshot::deep_add(self, root, &mut updates);
        }
        if self.terminated {
            updates.push(Update::TerminateHeap);
        }
        updates
    }

    /// Unregister from the heap this one was built to mirror.
    pub fn disconnect_from_source(&mut self) -> Result<bool> {
        let Some(binding) = self.source.take() else {
            return Ok(false);
        };
        let Some(source) = binding.heap.upgrade() else {
            return Ok(false);
        };
        let mut source = source.try_borrow_mut().map_err(|_| {
            Error::state(format!(
                "source of heap {} is busy and cannot be disconnected",
                self.uri
            ))
        })?;
        Ok(source.remove_listener(binding.listener))
    }

    pub fn has_source(&self) -> bool {
        self.source.is_some()
    }

    // ---- display

    pub fn pretty_print(&self) -> String {
        let Some(root) = self.root() else {
            return "null".to_owned();
        };
        let mut out = String::new();
        let mut pending = vec![Piece::Node(root, 0)];
        while let Some(piece) = pending.pop() {
            let (node, depth) = match piece {
                Piece::Text(text) => {
                    out.push_str(&text);
                    continue;
                }
                Piece::Node(node, depth) => (node, depth),
            };
            let mut pieces = Vec::new();
            match node.kind() {
                NodeKind::Scalar(value) => out.push_str(&value.to_string()),
                NodeKind::List(children) => {
                    out.push('[');
                    for (i, child) in children.iter().enumerate() {
                        if i > 0 {
                            pieces.push(Piece::Text(", ".to_owned()));
                        }
                        if let Some(child) = self.get_node(*child) {
                            pieces.push(Piece::Node(child, depth + 1));
                        }
                    }
                    pieces.push(Piece::Text("]".to_owned()));
                }
                NodeKind::Map(fields) | NodeKind::Object(fields) => {
                    out.push('{');
                    let pad = "  ".repeat(depth + 1);
                    for (name, child) in fields {
                        pieces.push(Piece::Text(format!("\n{pad}{name}: ")));
                        if let Some(child) = self.get_node(*child) {
                            pieces.push(Piece::Node(child, depth + 1));
                        }
                    }
                    if !fields.is_empty() {
                        pieces.push(Piece::Text(format!("\n{}", "  ".repeat(depth))));
                    }
                    pieces.push(Piece::Text("}".to_owned()));
                }
            }
            pending.extend(pieces.into_iter().rev());
        }
        out
    }
}

/// Pending output of [`Heap::pretty_print`]: literal text, or a node still to render.
enum Piece<'a> {
    Text(String),
    Node(&'a Node, usize),
}

impl fmt::Debug for Heap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Heap")
            .field("uri", &self.uri)
            .field("mode", &self.mode)
            .field("live", &self.live)
            .field("root", &self.root)
            .field("terminated", &self.terminated)
            .field("in_transaction", &self.in_transaction())
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

impl fmt::Display for Heap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.uri, self.pretty_print())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn double_begin_is_rejected() {
        let mut heap = Heap::new("h");
        heap.begin_update().unwrap();
        assert!(matches!(heap.begin_update(), Err(Error::State(_))));
    }

    #[test]
    fn end_without_begin_is_rejected() {
        let mut heap = Heap::new("h");
        assert!(matches!(heap.end_update(), Err(Error::State(_))));
    }

    #[test]
    fn mutation_outside_transaction_is_rejected() {
        let mut heap = Heap::new("h");
        assert!(matches!(heap.ensure_root(NodeType::Object), Err(Error::State(_))));
        assert!(!heap.is_root_installed());
        assert_eq!(heap.ids().next_unused(), NodeId(0));
    }

    #[test]
    fn emit_requires_open_transaction() {
        let mut heap = Heap::new("h");
        assert!(heap.emit(Update::TerminateHeap).is_err());
    }

    #[test]
    fn ensure_root_is_idempotent_and_type_checked() {
        let mut heap = Heap::new("h");
        heap.begin_update().unwrap();
        let root = heap.ensure_root(NodeType::Object).unwrap();
        assert_eq!(heap.ensure_root(NodeType::Object).unwrap(), root);
        assert!(matches!(heap.ensure_root(NodeType::List), Err(Error::State(_))));
        let block = heap.end_update().unwrap();
        assert_eq!(block.len(), 1);
    }

    #[test]
    fn root_cannot_be_reinstalled() {
        let mut heap = Heap::new("h");
        heap.begin_update().unwrap();
        heap.ensure_root(NodeType::Map).unwrap();
        let err = heap.install_root(false, NodeId(9), NodeType::Map).unwrap_err();
        assert!(matches!(err, Error::State(_)));
    }

    #[test]
    fn terminated_heap_rejects_local_mutation() {
        let mut heap = Heap::new("h");
        heap.begin_update().unwrap();
        let root = heap.ensure_root(NodeType::Object).unwrap();
        heap.terminate_heap().unwrap();
        let err = heap.map_mut(root).unwrap().ensure_field("x", NodeType::Scalar).unwrap_err();
        assert!(err.to_string().contains("terminated"));
        let block = heap.end_update().unwrap();
        assert_eq!(block.updates().last(), Some(&Update::TerminateHeap));
        assert!(heap.is_terminated());
        assert!(heap.is_root_installed());
    }

    #[test]
    fn wrong_kind_parent_is_a_state_error() {
        let mut heap = Heap::new("h");
        heap.begin_update().unwrap();
        let root = heap.ensure_root(NodeType::Object).unwrap();
        let err = heap
            .install_index(false, root, NodeId(5), 0, NodeType::Scalar)
            .unwrap_err();
        assert!(matches!(err, Error::State(_)));
        let err = heap.remove_index(false, NodeId(42), NodeId(1)).unwrap_err();
        assert!(matches!(err, Error::State(_)));
    }

    #[test]
    fn list_bounds_are_checked() {
        let mut heap = Heap::new("h");
        heap.begin_update().unwrap();
        let root = heap.ensure_root(NodeType::List).unwrap();
        let err = heap.list_mut(root).unwrap().insert_at(1, NodeType::Scalar).unwrap_err();
        assert!(matches!(err, Error::Bounds(_)));
        assert!(matches!(heap.child_at(root, 0), Err(Error::Bounds(_))));
        // the rejected insert must not consume an id
        assert_eq!(heap.allocate_id(), NodeId(1));
    }

    #[test]
    fn list_children_are_renumbered() {
        let mut heap = Heap::new("h");
        heap.begin_update().unwrap();
        let root = heap.ensure_root(NodeType::List).unwrap();
        let mut list = heap.list_mut(root).unwrap();
        let a = list.push(NodeType::Scalar).unwrap();
        let b = list.push(NodeType::Scalar).unwrap();
        let c = list.insert_at(0, NodeType::Scalar).unwrap();
        assert_eq!(heap.node(c).unwrap().index(), Some(0));
        assert_eq!(heap.node(a).unwrap().index(), Some(1));
        assert_eq!(heap.node(b).unwrap().index(), Some(2));

        heap.list_mut(root).unwrap().remove_index(1).unwrap();
        assert_eq!(heap.node(b).unwrap().index(), Some(1));
        assert!(heap.get_node(a).is_none());
        heap.end_update().unwrap();
    }

    #[test]
    fn scoped_update_closes_on_error() {
        let mut heap = Heap::new("h");
        let result: Result<()> = heap.update(|heap| {
            heap.ensure_root(NodeType::Object)?;
            Err(Error::state("boom"))
        });
        assert!(result.is_err());
        assert!(!heap.in_transaction());
        assert!(heap.is_root_installed());
        heap.begin_update().unwrap();
        heap.end_update().unwrap();
    }

    #[test]
    fn replay_into_live_id_is_rejected() {
        let mut heap = Heap::new("h");
        heap.begin_update().unwrap();
        let root = heap.ensure_root(NodeType::Object).unwrap();
        let err = heap
            .install_field(true, root, root, "self", NodeType::Scalar)
            .unwrap_err();
        assert!(err.to_string().contains("already live"));
    }

    #[test]
    fn pretty_print_renders_tree() {
        let mut heap = Heap::new("h");
        heap.update(|heap| {
            let root = heap.ensure_root(NodeType::Object)?;
            let home = heap.map_mut(root)?.ensure_field("home", NodeType::Scalar)?;
            heap.scalar_mut(home)?.set(1)?;
            let goals = heap.map_mut(root)?.ensure_field("goals", NodeType::List)?;
            let goal = heap.list_mut(goals)?.push(NodeType::Scalar)?;
            heap.scalar_mut(goal)?.set("Rooney")?;
            Ok(())
        })
        .unwrap();
        assert_eq!(
            heap.pretty_print(),
            "{\n  goals: [\"Rooney\"]\n  home: 1\n}"
        );
    }

    #[test]
    fn pretty_print_handles_deep_nesting() {
        const DEPTH: usize = 100_000;
        let mut heap = Heap::new("h");
        heap.update(|heap| {
            let mut list = heap.ensure_root(NodeType::List)?;
            for _ in 0..DEPTH {
                list = heap.list_mut(list)?.push(NodeType::List)?;
            }
            Ok(())
        })
        .unwrap();
        let expected = format!("{}{}", "[".repeat(DEPTH + 1), "]".repeat(DEPTH + 1));
        assert_eq!(heap.pretty_print(), expected);
        assert_eq!(heap.to_string(), format!("h: {expected}"));
    }
}
