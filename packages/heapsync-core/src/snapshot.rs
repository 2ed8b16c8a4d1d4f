use crate::heap::Heap;
use crate::node::{Node, NodeKind};
use crate::update::Update;

/// Emit the deltas that recreate everything below `node` (its own value, then each child's
/// install followed by that child's contents, depth first).
///
/// `node` itself is assumed to be installed already. Scalars holding null emit nothing.
pub(crate) fn deep_add(heap: &Heap, node: &Node, out: &mut Vec<Update>) {
    let mut stack: Vec<(&Node, Option<Update>)> = vec![(node, None)];
    while let Some((next, install)) = stack.pop() {
        if let Some(install) = install {
            out.push(install);
        }
        let mut pending = Vec::new();
        match next.kind() {
            NodeKind::Scalar(value) => {
                if !value.is_null() {
                    out.push(Update::SetScalar {
                        id: next.id(),
                        value: value.clone(),
                    });
                }
            }
            NodeKind::List(children) => {
                for (index, child) in children.iter().enumerate() {
                    if let Some(child) = heap.get_node(*child) {
                        pending.push((
                            child,
                            Some(Update::InstallIndex {
                                parent_id: next.id(),
                                id: child.id(),
                                index,
                                node_type: child.node_type(),
                            }),
                        ));
                    }
                }
            }
            NodeKind::Map(fields) | NodeKind::Object(fields) => {
                for (name, child) in fields {
                    if let Some(child) = heap.get_node(*child) {
                        pending.push((
                            child,
                            Some(Update::InstallField {
                                parent_id: next.id(),
                                id: child.id(),
                                name: name.clone(),
                                node_type: child.node_type(),
                            }),
                        ));
                    }
                }
            }
        }
        stack.extend(pending.into_iter().rev());
    }
}
