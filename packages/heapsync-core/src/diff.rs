//! Minimal delta computation between two heap snapshots.
//!
//! The block returned by [`HeapDiff::between`] turns `from` into a tree structurally equal to
//! `to` when replayed onto `from`. Lists are reconciled through a longest common subsequence
//! of their children, so children present on both sides keep their identity and are diffed in
//! place instead of being removed and reinstalled.

use std::collections::BTreeSet;

use crate::error::{Error, Result};
use crate::heap::Heap;
use crate::ids::NodeId;
use crate::node::{Fields, Node, NodeKind};
use crate::snapshot::deep_add;
use crate::update::{Update, UpdateBlock};

/// Stateless diff engine over two heaps.
pub struct HeapDiff<'a> {
    from: &'a Heap,
}

impl<'a> HeapDiff<'a> {
    /// Start a diff whose result will be applied to `from`.
    #[allow(clippy::should_implement_trait)]
    pub fn from(from: &'a Heap) -> Self {
        Self { from }
    }

    pub fn to(&self, to: &Heap) -> Result<UpdateBlock> {
        Self::between(to, self.from)
    }

    /// Deltas transforming `from` into `to`: every removal, then every install and set.
    pub fn between(to: &Heap, from: &Heap) -> Result<UpdateBlock> {
        let mut diff = Collector {
            to,
            from,
            installs: Vec::new(),
            removes: Vec::new(),
        };

        match (to.root(), from.root()) {
            (None, None) => {}
            (Some(to_root), None) => {
                diff.installs.push(Update::InstallRoot {
                    id: to_root.id(),
                    node_type: to_root.node_type(),
                });
                deep_add(to, to_root, &mut diff.installs);
            }
            (None, Some(_)) => {
                return Err(Error::state(format!(
                    "cannot diff populated heap {} down to empty heap {}: \
                     root nodes cannot be uninstalled",
                    from.uri(),
                    to.uri()
                )));
            }
            (Some(to_root), Some(from_root)) => {
                if to_root.id() != from_root.id() {
                    return Err(Error::state(format!(
                        "root {} of heap {} cannot become root {} of heap {}: \
                         root nodes cannot be reinstalled",
                        from_root.id(),
                        from.uri(),
                        to_root.id(),
                        to.uri()
                    )));
                }
                diff.walk(to_root, from_root)?;
            }
        }

        tracing::debug!(
            to = to.uri(),
            from = from.uri(),
            removes = diff.removes.len(),
            installs = diff.installs.len(),
            "computed heap diff"
        );
        let mut updates = diff.removes;
        updates.extend(diff.installs);
        Ok(UpdateBlock::new(updates))
    }
}

/// Pair of nodes, one per heap, that hold the same place in both trees.
type Matched<'h> = (&'h Node, &'h Node);

struct Collector<'h> {
    to: &'h Heap,
    from: &'h Heap,
    installs: Vec<Update>,
    removes: Vec<Update>,
}

impl<'h> Collector<'h> {
    /// Diff every matched pair below the roots, depth first, from an explicit work stack.
    fn walk(&mut self, to_root: &'h Node, from_root: &'h Node) -> Result<()> {
        let mut pending: Vec<Matched<'h>> = vec![(to_root, from_root)];
        while let Some((to_node, from_node)) = pending.pop() {
            let matched = self.node(to_node, from_node)?;
            pending.extend(matched.into_iter().rev());
        }
        Ok(())
    }

    /// Emit the deltas local to one matched pair and return its matched children.
    fn node(&mut self, to_node: &'h Node, from_node: &'h Node) -> Result<Vec<Matched<'h>>> {
        if to_node.node_type() != from_node.node_type() {
            return Err(Error::TypeMismatch(format!(
                "node {} is a {} in {} but node {} is a {} in {}",
                to_node.id(),
                to_node.node_type(),
                self.to.uri(),
                from_node.id(),
                from_node.node_type(),
                self.from.uri()
            )));
        }
        match (to_node.kind(), from_node.kind()) {
            (NodeKind::Map(to_fields), NodeKind::Map(from_fields))
            | (NodeKind::Object(to_fields), NodeKind::Object(from_fields)) => {
                self.fields(from_node.id(), to_fields, from_fields)
            }
            (NodeKind::List(to_children), NodeKind::List(from_children)) => {
                self.list(from_node.id(), to_children, from_children)
            }
            (NodeKind::Scalar(to_value), NodeKind::Scalar(from_value)) => {
                if to_value != from_value {
                    self.installs.push(Update::SetScalar {
                        id: from_node.id(),
                        value: to_value.clone(),
                    });
                }
                Ok(Vec::new())
            }
            _ => Err(Error::TypeMismatch(format!(
                "node {} has inconsistent kind data",
                to_node.id()
            ))),
        }
    }

    fn fields(
        &mut self,
        parent_id: NodeId,
        to_fields: &'h Fields,
        from_fields: &'h Fields,
    ) -> Result<Vec<Matched<'h>>> {
        let (to, from) = (self.to, self.from);

        for (name, from_child) in from_fields {
            let from_child = from.node(*from_child)?;
            let keep = match to_fields.get(name) {
                Some(to_child) => to.node(*to_child)?.equals_excluding_index(from_child),
                None => false,
            };
            if !keep {
                self.removes.push(Update::RemoveField {
                    parent_id,
                    id: from_child.id(),
                    name: name.clone(),
                    deallocated_ids: subtree_ids(from, from_child),
                });
            }
        }

        let mut matched = Vec::new();
        for (name, to_child) in to_fields {
            let to_child = to.node(*to_child)?;
            let same = match from_fields.get(name) {
                Some(from_child) => {
                    let from_child = from.node(*from_child)?;
                    to_child
                        .equals_excluding_index(from_child)
                        .then_some(from_child)
                }
                None => None,
            };
            match same {
                Some(from_child) => matched.push((to_child, from_child)),
                None => {
                    self.installs.push(Update::InstallField {
                        parent_id,
                        id: to_child.id(),
                        name: name.clone(),
                        node_type: to_child.node_type(),
                    });
                    deep_add(to, to_child, &mut self.installs);
                }
            }
        }
        Ok(matched)
    }

    fn list(
        &mut self,
        parent_id: NodeId,
        to_children: &'h [NodeId],
        from_children: &'h [NodeId],
    ) -> Result<Vec<Matched<'h>>> {
        let (to, from) = (self.to, self.from);
        let to_nodes = to_children
            .iter()
            .map(|id| to.node(*id))
            .collect::<Result<Vec<_>>>()?;
        let from_nodes = from_children
            .iter()
            .map(|id| from.node(*id))
            .collect::<Result<Vec<_>>>()?;

        let pairs = lcs(&to_nodes, &from_nodes);
        let mut in_to = vec![false; to_nodes.len()];
        let mut in_from = vec![false; from_nodes.len()];
        for &(i, j) in &pairs {
            in_to[i] = true;
            in_from[j] = true;
        }

        for (index, child) in from_nodes.iter().enumerate() {
            if !in_from[index] {
                self.removes.push(Update::RemoveIndex {
                    parent_id,
                    id: child.id(),
                    index,
                    deallocated_ids: subtree_ids(from, child),
                });
            }
        }

        for (index, child) in to_nodes.iter().enumerate() {
            if !in_to[index] {
                self.installs.push(Update::InstallIndex {
                    parent_id,
                    id: child.id(),
                    index,
                    node_type: child.node_type(),
                });
                deep_add(to, child, &mut self.installs);
            }
        }

        Ok(pairs
            .into_iter()
            .map(|(i, j)| (to_nodes[i], from_nodes[j]))
            .collect())
    }
}

/// Matched `(to_index, from_index)` pairs of a longest common subsequence, in ascending order.
///
/// Elements match when they are equal excluding index. The table is walked backwards so the
/// reconstruction does not recurse.
pub(crate) fn lcs(to: &[&Node], from: &[&Node]) -> Vec<(usize, usize)> {
    let (m, n) = (to.len(), from.len());
    let width = n + 1;
    let mut table = vec![0usize; (m + 1) * width];
    for i in 1..=m {
        for j in 1..=n {
            table[i * width + j] = if to[i - 1].equals_excluding_index(from[j - 1]) {
                table[(i - 1) * width + (j - 1)] + 1
            } else {
                table[(i - 1) * width + j].max(table[i * width + (j - 1)])
            };
        }
    }

    let mut pairs = Vec::with_capacity(table[m * width + n]);
    let (mut i, mut j) = (m, n);
    while i > 0 && j > 0 {
        if to[i - 1].equals_excluding_index(from[j - 1]) {
            pairs.push((i - 1, j - 1));
            i -= 1;
            j -= 1;
        } else if table[(i - 1) * width + j] >= table[i * width + (j - 1)] {
            i -= 1;
        } else {
            j -= 1;
        }
    }
    pairs.reverse();
    pairs
}

fn subtree_ids(heap: &Heap, node: &Node) -> BTreeSet<NodeId> {
    let mut ids = BTreeSet::new();
    let mut stack = vec![node.id()];
    while let Some(id) = stack.pop() {
        ids.insert(id);
        if let Some(node) = heap.get_node(id) {
            stack.extend(node.child_ids());
        }
    }
    ids
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{NodeType, Placement};
    use proptest::prelude::*;

    fn scalars(ids: &[u64]) -> Vec<Node> {
        ids.iter()
            .enumerate()
            .map(|(i, id)| Node::new(NodeId(*id), NodeType::Scalar, Placement::Index(i)))
            .collect()
    }

    #[test]
    fn lcs_matches_longest_subsequence() {
        let to = scalars(&[1, 2, 3, 4, 5]);
        let from = scalars(&[2, 9, 4, 5, 1]);
        let to_refs: Vec<&Node> = to.iter().collect();
        let from_refs: Vec<&Node> = from.iter().collect();
        let pairs = lcs(&to_refs, &from_refs);
        let matched: Vec<u64> = pairs.iter().map(|(i, _)| to[*i].id().0).collect();
        assert_eq!(matched, vec![2, 4, 5]);
        for (i, j) in pairs {
            assert_eq!(to[i].id(), from[j].id());
        }
    }

    fn reference_len(to: &[u64], from: &[u64]) -> usize {
        match (to.split_first(), from.split_first()) {
            (Some((a, to_rest)), Some((b, from_rest))) => {
                if a == b {
                    1 + reference_len(to_rest, from_rest)
                } else {
                    reference_len(to_rest, from).max(reference_len(to, from_rest))
                }
            }
            _ => 0,
        }
    }

    proptest! {
        #[test]
        fn lcs_is_a_longest_ordered_match(
            to in prop::sample::subsequence((0u64..9).collect::<Vec<_>>(), 0..=7)
                .prop_shuffle(),
            from in prop::sample::subsequence((0u64..9).collect::<Vec<_>>(), 0..=7)
                .prop_shuffle(),
        ) {
            let to_nodes = scalars(&to);
            let from_nodes = scalars(&from);
            let to_refs: Vec<&Node> = to_nodes.iter().collect();
            let from_refs: Vec<&Node> = from_nodes.iter().collect();
            let pairs = lcs(&to_refs, &from_refs);

            prop_assert_eq!(pairs.len(), reference_len(&to, &from));
            for window in pairs.windows(2) {
                prop_assert!(window[0].0 < window[1].0 && window[0].1 < window[1].1);
            }
            for (i, j) in pairs {
                prop_assert_eq!(to[i], from[j]);
            }
        }
    }

    #[test]
    fn lcs_of_disjoint_lists_is_empty() {
        let to = scalars(&[1, 2]);
        let from = scalars(&[3]);
        let to_refs: Vec<&Node> = to.iter().collect();
        let from_refs: Vec<&Node> = from.iter().collect();
        assert!(lcs(&to_refs, &from_refs).is_empty());
        assert!(lcs(&[], &from_refs).is_empty());
    }
}
