use std::any::Any;
use std::cell::OnceCell;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::heap::Heap;
use crate::ids::NodeId;
use crate::update::Update;

/// Kind tag of a node. `Map` and `Object` share the same name-keyed layout.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(rename_all = "SCREAMING_SNAKE_CASE")
)]
pub enum NodeType {
    List,
    Map,
    Object,
    Scalar,
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NodeType::List => "LIST",
            NodeType::Map => "MAP",
            NodeType::Object => "OBJECT",
            NodeType::Scalar => "SCALAR",
        };
        f.write_str(name)
    }
}

/// Opaque scalar payload.
///
/// Floats compare by bit pattern so that equality, hashing and the no-op check on
/// [`ScalarMut::set`] agree with each other.
#[derive(Clone, Debug, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(untagged))]
pub enum ScalarValue {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

impl ScalarValue {
    pub fn is_null(&self) -> bool {
        matches!(self, ScalarValue::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ScalarValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ScalarValue::Int(v) => Some(*v),
            _ => None,
        }
    }
}

impl PartialEq for ScalarValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (ScalarValue::Null, ScalarValue::Null) => true,
            (ScalarValue::Bool(a), ScalarValue::Bool(b)) => a == b,
            (ScalarValue::Int(a), ScalarValue::Int(b)) => a == b,
            (ScalarValue::Float(a), ScalarValue::Float(b)) => a.to_bits() == b.to_bits(),
            (ScalarValue::String(a), ScalarValue::String(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for ScalarValue {}

impl Hash for ScalarValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            ScalarValue::Null => {}
            ScalarValue::Bool(v) => v.hash(state),
            ScalarValue::Int(v) => v.hash(state),
            ScalarValue::Float(v) => v.to_bits().hash(state),
            ScalarValue::String(v) => v.hash(state),
        }
    }
}

impl fmt::Display for ScalarValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScalarValue::Null => f.write_str("null"),
            ScalarValue::Bool(v) => write!(f, "{v}"),
            ScalarValue::Int(v) => write!(f, "{v}"),
            ScalarValue::Float(v) => write!(f, "{v}"),
            ScalarValue::String(v) => write!(f, "{v:?}"),
        }
    }
}

impl From<bool> for ScalarValue {
    fn from(value: bool) -> Self {
        ScalarValue::Bool(value)
    }
}

impl From<i64> for ScalarValue {
    fn from(value: i64) -> Self {
        ScalarValue::Int(value)
    }
}

impl From<i32> for ScalarValue {
    fn from(value: i32) -> Self {
        ScalarValue::Int(value.into())
    }
}

impl From<f64> for ScalarValue {
    fn from(value: f64) -> Self {
        ScalarValue::Float(value)
    }
}

impl From<&str> for ScalarValue {
    fn from(value: &str) -> Self {
        ScalarValue::String(value.to_owned())
    }
}

impl From<String> for ScalarValue {
    fn from(value: String) -> Self {
        ScalarValue::String(value)
    }
}

impl<T: Into<ScalarValue>> From<Option<T>> for ScalarValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or_default()
    }
}

/// Where a node hangs in its parent.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub enum Placement {
    Root,
    Field(String),
    Index(usize),
}

/// Name-keyed children of a map or object node.
pub type Fields = BTreeMap<String, NodeId>;

/// Per-kind payload of a node.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum NodeKind {
    List(Vec<NodeId>),
    Map(Fields),
    Object(Fields),
    Scalar(ScalarValue),
}

impl NodeKind {
    fn empty(node_type: NodeType) -> Self {
        match node_type {
            NodeType::List => NodeKind::List(Vec::new()),
            NodeType::Map => NodeKind::Map(Fields::new()),
            NodeType::Object => NodeKind::Object(Fields::new()),
            NodeType::Scalar => NodeKind::Scalar(ScalarValue::Null),
        }
    }
}

/// A vertex of the heap tree. Nodes are only created and destroyed by their owning [`Heap`].
#[derive(Debug)]
pub struct Node {
    id: NodeId,
    placement: Placement,
    kind: NodeKind,
    projection: OnceCell<Rc<dyn Any>>,
}

impl Node {
    pub(crate) fn new(id: NodeId, node_type: NodeType, placement: Placement) -> Self {
        Self {
            id,
            placement,
            kind: NodeKind::empty(node_type),
            projection: OnceCell::new(),
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn node_type(&self) -> NodeType {
        match self.kind {
            NodeKind::List(_) => NodeType::List,
            NodeKind::Map(_) => NodeType::Map,
            NodeKind::Object(_) => NodeType::Object,
            NodeKind::Scalar(_) => NodeType::Scalar,
        }
    }

    pub fn placement(&self) -> &Placement {
        &self.placement
    }

    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    /// Field name when held by a map or object.
    pub fn name(&self) -> Option<&str> {
        match &self.placement {
            Placement::Field(name) => Some(name),
            _ => None,
        }
    }

    /// Position when held by a list.
    pub fn index(&self) -> Option<usize> {
        match self.placement {
            Placement::Index(index) => Some(index),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[NodeId]> {
        match &self.kind {
            NodeKind::List(children) => Some(children),
            _ => None,
        }
    }

    pub fn as_fields(&self) -> Option<&Fields> {
        match &self.kind {
            NodeKind::Map(fields) | NodeKind::Object(fields) => Some(fields),
            _ => None,
        }
    }

    pub fn as_scalar(&self) -> Option<&ScalarValue> {
        match &self.kind {
            NodeKind::Scalar(value) => Some(value),
            _ => None,
        }
    }

    /// Number of direct children; scalars have none.
    pub fn size(&self) -> usize {
        match &self.kind {
            NodeKind::List(children) => children.len(),
            NodeKind::Map(fields) | NodeKind::Object(fields) => fields.len(),
            NodeKind::Scalar(_) => 0,
        }
    }

    /// Direct children in list order, or field-name order for maps and objects.
    pub fn child_ids(&self) -> Vec<NodeId> {
        match &self.kind {
            NodeKind::List(children) => children.clone(),
            NodeKind::Map(fields) | NodeKind::Object(fields) => fields.values().copied().collect(),
            NodeKind::Scalar(_) => Vec::new(),
        }
    }

    /// Type, id and field name agree. Position is ignored.
    pub fn equals_excluding_index(&self, other: &Node) -> bool {
        self.node_type() == other.node_type() && self.id == other.id && self.name() == other.name()
    }

    pub(crate) fn kind_mut(&mut self) -> &mut NodeKind {
        &mut self.kind
    }

    pub(crate) fn set_placement(&mut self, placement: Placement) {
        self.placement = placement;
    }

    pub(crate) fn projection(&self) -> &OnceCell<Rc<dyn Any>> {
        &self.projection
    }
}

/// Mutable handle over a list node.
pub struct ListMut<'a> {
    heap: &'a mut Heap,
    id: NodeId,
}

impl<'a> ListMut<'a> {
    pub(crate) fn new(heap: &'a mut Heap, id: NodeId) -> Self {
        Self { heap, id }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn size(&self) -> Result<usize> {
        Ok(self.children()?.len())
    }

    pub fn child_at(&self, index: usize) -> Result<NodeId> {
        let children = self.children()?;
        children.get(index).copied().ok_or_else(|| {
            Error::Bounds(format!(
                "index {index} out of range for list {} of size {}",
                self.id,
                children.len()
            ))
        })
    }

    /// Allocate and attach a child with a caller-chosen id at `index`, shifting later siblings.
    pub fn install_index(
        &mut self,
        from_listener: bool,
        id: NodeId,
        index: usize,
        node_type: NodeType,
    ) -> Result<NodeId> {
        self.heap.guard(from_listener)?;
        self.check_insert_bounds(index)?;
        self.heap
            .allocate_node(id, node_type, Placement::Index(index))?;
        let children = self.children_mut()?;
        children.insert(index, id);
        let shifted: Vec<NodeId> = children[index + 1..].to_vec();
        self.renumber(index + 1, &shifted)?;
        self.heap.emit(Update::InstallIndex {
            parent_id: self.id,
            id,
            index,
            node_type,
        })?;
        Ok(id)
    }

    /// Insert a fresh child at `index` using the next id from the heap's pool.
    pub fn insert_at(&mut self, index: usize, node_type: NodeType) -> Result<NodeId> {
        self.heap.guard(false)?;
        self.check_insert_bounds(index)?;
        let id = self.heap.allocate_id();
        self.install_index(false, id, index, node_type)
    }

    pub fn push(&mut self, node_type: NodeType) -> Result<NodeId> {
        let len = self.size()?;
        self.insert_at(len, node_type)
    }

    /// Detach the child with `id`, renumber the rest and free its whole subtree.
    pub fn remove_by_id(&mut self, from_listener: bool, id: NodeId) -> Result<()> {
        self.remove_child(from_listener, id, None)
    }

    pub fn remove_index(&mut self, index: usize) -> Result<()> {
        self.heap.guard(false)?;
        let id = self.child_at(index)?;
        self.remove_by_id(false, id)
    }

    /// Remove every child in one step, emitting a single `RemoveChildren`.
    pub fn clear(&mut self, from_listener: bool) -> Result<()> {
        clear_children(self.heap, from_listener, self.id, None)
    }

    pub(crate) fn remove_child(
        &mut self,
        from_listener: bool,
        id: NodeId,
        carried: Option<&BTreeSet<NodeId>>,
    ) -> Result<()> {
        self.heap.guard(from_listener)?;
        let list_id = self.id;
        let children = self.children_mut()?;
        let index = children.iter().position(|child| *child == id).ok_or_else(|| {
            Error::state(format!("node {id} is not a child of list {list_id}"))
        })?;
        children.remove(index);
        let shifted: Vec<NodeId> = children[index..].to_vec();
        self.renumber(index, &shifted)?;

        let deallocated_ids = self.heap.release_subtree(from_listener, id, carried)?;
        self.heap.emit(Update::RemoveIndex {
            parent_id: self.id,
            id,
            index,
            deallocated_ids,
        })
    }

    fn check_insert_bounds(&self, index: usize) -> Result<()> {
        let size = self.size()?;
        if index > size {
            return Err(Error::Bounds(format!(
                "cannot insert at index {index} into list {} of size {size}",
                self.id
            )));
        }
        Ok(())
    }

    fn renumber(&mut self, start: usize, shifted: &[NodeId]) -> Result<()> {
        for (offset, child) in shifted.iter().enumerate() {
            self.heap
                .node_mut(*child)?
                .set_placement(Placement::Index(start + offset));
        }
        Ok(())
    }

    fn children(&self) -> Result<&[NodeId]> {
        let node = self.heap.node(self.id)?;
        node.as_list()
            .ok_or_else(|| wrong_kind(self.id, NodeType::List, node.node_type()))
    }

    fn children_mut(&mut self) -> Result<&mut Vec<NodeId>> {
        let id = self.id;
        let node = self.heap.node_mut(id)?;
        let actual = node.node_type();
        match node.kind_mut() {
            NodeKind::List(children) => Ok(children),
            _ => Err(wrong_kind(id, NodeType::List, actual)),
        }
    }
}

/// Mutable handle over a map or object node.
pub struct MapMut<'a> {
    heap: &'a mut Heap,
    id: NodeId,
}

impl<'a> MapMut<'a> {
    pub(crate) fn new(heap: &'a mut Heap, id: NodeId) -> Self {
        Self { heap, id }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn size(&self) -> Result<usize> {
        Ok(self.fields()?.len())
    }

    pub fn field(&self, name: &str) -> Result<Option<NodeId>> {
        Ok(self.fields()?.get(name).copied())
    }

    pub fn install_field(
        &mut self,
        from_listener: bool,
        id: NodeId,
        name: &str,
        node_type: NodeType,
    ) -> Result<NodeId> {
        self.heap.guard(from_listener)?;
        if let Some(existing) = self.field(name)? {
            return Err(Error::state(format!(
                "field {name:?} of node {} is already held by node {existing}",
                self.id
            )));
        }
        self.heap
            .allocate_node(id, node_type, Placement::Field(name.to_owned()))?;
        self.fields_mut()?.insert(name.to_owned(), id);
        self.heap.emit(Update::InstallField {
            parent_id: self.id,
            id,
            name: name.to_owned(),
            node_type,
        })?;
        Ok(id)
    }

    /// Return the existing field, or install a fresh one.
    ///
    /// The type of an existing field is not checked against `node_type`.
    pub fn ensure_field(&mut self, name: &str, node_type: NodeType) -> Result<NodeId> {
        if let Some(existing) = self.field(name)? {
            return Ok(existing);
        }
        self.heap.guard(false)?;
        let id = self.heap.allocate_id();
        self.install_field(false, id, name, node_type)
    }

    /// Remove the named field. Returns `false` when there was no such field.
    pub fn remove_field(&mut self, name: &str) -> Result<bool> {
        self.heap.guard(false)?;
        match self.field(name)? {
            Some(id) => {
                self.remove_child(false, id, None)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn remove_field_by_id(&mut self, from_listener: bool, id: NodeId) -> Result<()> {
        self.remove_child(from_listener, id, None)
    }

    pub fn clear(&mut self, from_listener: bool) -> Result<()> {
        clear_children(self.heap, from_listener, self.id, None)
    }

    pub(crate) fn remove_child(
        &mut self,
        from_listener: bool,
        id: NodeId,
        carried: Option<&BTreeSet<NodeId>>,
    ) -> Result<()> {
        self.heap.guard(from_listener)?;
        let map_id = self.id;
        let fields = self.fields_mut()?;
        let name = fields
            .iter()
            .find_map(|(name, child)| (*child == id).then(|| name.clone()))
            .ok_or_else(|| Error::state(format!("node {id} is not a field of node {map_id}")))?;
        fields.remove(&name);

        let deallocated_ids = self.heap.release_subtree(from_listener, id, carried)?;
        self.heap.emit(Update::RemoveField {
            parent_id: self.id,
            id,
            name,
            deallocated_ids,
        })
    }

    fn fields(&self) -> Result<&Fields> {
        let node = self.heap.node(self.id)?;
        node.as_fields()
            .ok_or_else(|| wrong_kind(self.id, NodeType::Map, node.node_type()))
    }

    fn fields_mut(&mut self) -> Result<&mut Fields> {
        let id = self.id;
        let node = self.heap.node_mut(id)?;
        let actual = node.node_type();
        match node.kind_mut() {
            NodeKind::Map(fields) | NodeKind::Object(fields) => Ok(fields),
            _ => Err(wrong_kind(id, NodeType::Map, actual)),
        }
    }
}

/// Mutable handle over a scalar node.
pub struct ScalarMut<'a> {
    heap: &'a mut Heap,
    id: NodeId,
}

impl<'a> ScalarMut<'a> {
    pub(crate) fn new(heap: &'a mut Heap, id: NodeId) -> Self {
        Self { heap, id }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn get(&self) -> Result<&ScalarValue> {
        let node = self.heap.node(self.id)?;
        node.as_scalar()
            .ok_or_else(|| wrong_kind(self.id, NodeType::Scalar, node.node_type()))
    }

    /// Set the value locally. Returns `false` (and emits nothing) when the value is unchanged.
    pub fn set(&mut self, value: impl Into<ScalarValue>) -> Result<bool> {
        self.set_value(false, value.into())
    }

    pub fn set_value(&mut self, from_listener: bool, value: ScalarValue) -> Result<bool> {
        self.heap.guard(from_listener)?;
        let id = self.id;
        let node = self.heap.node_mut(id)?;
        let actual = node.node_type();
        let NodeKind::Scalar(current) = node.kind_mut() else {
            return Err(wrong_kind(id, NodeType::Scalar, actual));
        };
        if *current == value {
            return Ok(false);
        }
        *current = value.clone();
        self.heap.emit(Update::SetScalar { id, value })?;
        Ok(true)
    }
}

pub(crate) fn clear_children(
    heap: &mut Heap,
    from_listener: bool,
    id: NodeId,
    carried: Option<&BTreeSet<NodeId>>,
) -> Result<()> {
    heap.guard(from_listener)?;
    let node = heap.node_mut(id)?;
    let children: Vec<NodeId> = match node.kind_mut() {
        NodeKind::List(children) => std::mem::take(children),
        NodeKind::Map(fields) | NodeKind::Object(fields) => {
            std::mem::take(fields).into_values().collect()
        }
        NodeKind::Scalar(_) => {
            return Err(Error::state(format!(
                "cannot remove children of scalar node {id}"
            )))
        }
    };
    if children.is_empty() {
        return Ok(());
    }

    let deallocated_ids = match carried.filter(|ids| !ids.is_empty()) {
        Some(ids) => {
            heap.release_carried(ids)?;
            ids.clone()
        }
        None => {
            let mut freed = BTreeSet::new();
            for child in children {
                heap.deallocate_node(from_listener, child, &mut freed)?;
            }
            freed
        }
    };
    heap.emit(Update::RemoveChildren {
        id,
        deallocated_ids,
    })
}

pub(crate) fn wrong_kind(id: NodeId, expected: NodeType, actual: NodeType) -> Error {
    Error::state(format!("node {id} is a {actual}, expected {expected}"))
}
