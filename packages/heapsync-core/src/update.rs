use std::collections::BTreeSet;
use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::ids::NodeId;
use crate::node::{NodeType, ScalarValue};

/// A single structural state transition of a heap.
///
/// Each delta is self-sufficient to replay its edit; only the parent lookup by id consults the
/// target tree. Removals carry the complete set of ids they freed so replicas release exactly
/// the same ids without walking the subtree themselves.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(tag = "update", rename_all_fields = "camelCase")
)]
pub enum Update {
    InstallRoot {
        id: NodeId,
        #[cfg_attr(feature = "serde", serde(rename = "type"))]
        node_type: NodeType,
    },
    InstallField {
        parent_id: NodeId,
        id: NodeId,
        name: String,
        #[cfg_attr(feature = "serde", serde(rename = "type"))]
        node_type: NodeType,
    },
    InstallIndex {
        parent_id: NodeId,
        id: NodeId,
        index: usize,
        #[cfg_attr(feature = "serde", serde(rename = "type"))]
        node_type: NodeType,
    },
    RemoveField {
        parent_id: NodeId,
        id: NodeId,
        name: String,
        deallocated_ids: BTreeSet<NodeId>,
    },
    RemoveIndex {
        parent_id: NodeId,
        id: NodeId,
        index: usize,
        deallocated_ids: BTreeSet<NodeId>,
    },
    RemoveChildren {
        id: NodeId,
        deallocated_ids: BTreeSet<NodeId>,
    },
    SetScalar {
        id: NodeId,
        value: ScalarValue,
    },
    TerminateHeap,
}

impl Update {
    /// Id of the node the delta installs, removes or sets. `None` for `TerminateHeap`.
    pub fn node_id(&self) -> Option<NodeId> {
        match self {
            Update::InstallRoot { id, .. }
            | Update::InstallField { id, .. }
            | Update::InstallIndex { id, .. }
            | Update::RemoveField { id, .. }
            | Update::RemoveIndex { id, .. }
            | Update::RemoveChildren { id, .. }
            | Update::SetScalar { id, .. } => Some(*id),
            Update::TerminateHeap => None,
        }
    }

    pub fn deallocated_ids(&self) -> Option<&BTreeSet<NodeId>> {
        match self {
            Update::RemoveField {
                deallocated_ids, ..
            }
            | Update::RemoveIndex {
                deallocated_ids, ..
            }
            | Update::RemoveChildren {
                deallocated_ids, ..
            } => Some(deallocated_ids),
            _ => None,
        }
    }

    pub fn is_removal(&self) -> bool {
        self.deallocated_ids().is_some()
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Update::InstallRoot { .. } => "InstallRoot",
            Update::InstallField { .. } => "InstallField",
            Update::InstallIndex { .. } => "InstallIndex",
            Update::RemoveField { .. } => "RemoveField",
            Update::RemoveIndex { .. } => "RemoveIndex",
            Update::RemoveChildren { .. } => "RemoveChildren",
            Update::SetScalar { .. } => "SetScalar",
            Update::TerminateHeap => "TerminateHeap",
        }
    }
}

impl fmt::Display for Update {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Update::InstallRoot { id, node_type } => write!(f, "InstallRoot({id}, {node_type})"),
            Update::InstallField {
                parent_id,
                id,
                name,
                node_type,
            } => write!(f, "InstallField({parent_id}, {id}, {name:?}, {node_type})"),
            Update::InstallIndex {
                parent_id,
                id,
                index,
                node_type,
            } => write!(f, "InstallIndex({parent_id}, {id}, {index}, {node_type})"),
            Update::RemoveField {
                parent_id,
                id,
                name,
                deallocated_ids,
            } => write!(
                f,
                "RemoveField({parent_id}, {id}, {name:?}, {} freed)",
                deallocated_ids.len()
            ),
            Update::RemoveIndex {
                parent_id,
                id,
                index,
                deallocated_ids,
            } => write!(
                f,
                "RemoveIndex({parent_id}, {id}, {index}, {} freed)",
                deallocated_ids.len()
            ),
            Update::RemoveChildren {
                id,
                deallocated_ids,
            } => write!(f, "RemoveChildren({id}, {} freed)", deallocated_ids.len()),
            Update::SetScalar { id, value } => write!(f, "SetScalar({id}, {value})"),
            Update::TerminateHeap => f.write_str("TerminateHeap"),
        }
    }
}

/// Ordered, immutable batch of deltas produced by one transaction.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(transparent))]
pub struct UpdateBlock {
    updates: Vec<Update>,
}

impl UpdateBlock {
    pub fn new(updates: Vec<Update>) -> Self {
        Self { updates }
    }

    /// Concatenate blocks in order.
    pub fn merge<'a>(blocks: impl IntoIterator<Item = &'a UpdateBlock>) -> Self {
        let merged: Vec<Update> = blocks
            .into_iter()
            .flat_map(|block| block.updates.iter().cloned())
            .collect();
        Self::new(merged)
    }

    pub fn updates(&self) -> &[Update] {
        &self.updates
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Update> {
        self.updates.iter()
    }

    pub fn len(&self) -> usize {
        self.updates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.updates.is_empty()
    }
}

impl From<Vec<Update>> for UpdateBlock {
    fn from(updates: Vec<Update>) -> Self {
        Self::new(updates)
    }
}

impl<'a> IntoIterator for &'a UpdateBlock {
    type Item = &'a Update;
    type IntoIter = std::slice::Iter<'a, Update>;

    fn into_iter(self) -> Self::IntoIter {
        self.updates.iter()
    }
}

impl fmt::Display for UpdateBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (i, update) in self.updates.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{update}")?;
        }
        f.write_str("]")
    }
}

#[cfg(feature = "serde")]
impl UpdateBlock {
    /// Encode as a JSON array of tagged delta records.
    pub fn to_json(&self) -> crate::Result<String> {
        serde_json::to_string(self).map_err(|e| crate::Error::State(format!("encode block: {e}")))
    }

    /// Decode a JSON delta stream. Unknown update or node types are reported as corruption.
    pub fn from_json(json: &str) -> crate::Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| crate::Error::TypeMismatch(format!("corrupt delta stream: {e}")))
    }
}
