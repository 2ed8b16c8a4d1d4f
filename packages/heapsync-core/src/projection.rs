use std::any::Any;
use std::rc::Rc;

use crate::error::{Error, Result};
use crate::heap::Heap;
use crate::ids::NodeId;
use crate::node::{Node, NodeType};

/// Maps a generic node to a typed view.
///
/// Views are computed once per node and cached until the node is deallocated, so they should
/// be handles that read through the heap (an id, a typed wrapper around one) rather than copies
/// of the node's current contents.
pub trait Projector {
    type View: 'static;

    /// Node type this projector accepts.
    fn node_type(&self) -> NodeType;

    fn project(&self, node: &Node) -> Self::View;
}

impl Heap {
    /// Typed view of node `id`, memoized on the node.
    ///
    /// Asking for a view of a different Rust type than the cached one is a type mismatch, as is
    /// projecting a node whose type the projector does not accept.
    pub fn project<P: Projector>(&self, id: NodeId, projector: &P) -> Result<Rc<P::View>> {
        let node = self.node(id)?;
        if node.node_type() != projector.node_type() {
            return Err(Error::TypeMismatch(format!(
                "projector for {} cannot view node {id} of type {}",
                projector.node_type(),
                node.node_type()
            )));
        }
        let cached = node
            .projection()
            .get_or_init(|| Rc::new(projector.project(node)) as Rc<dyn Any>);
        Rc::clone(cached).downcast::<P::View>().map_err(|_| {
            Error::TypeMismatch(format!(
                "node {id} is already projected as a different view type"
            ))
        })
    }
}
