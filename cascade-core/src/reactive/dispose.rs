//! Disposal
//!
//! Tears a node down together with every reaction it owns and returns its
//! storage to the arena. Handles to a disposed node stay safe to hold: every
//! lookup through them fails with [`ReactiveError::Destroyed`] or reports
//! [`Status::Destroyed`].
//!
//! Teardown of a reaction runs in this order:
//!
//! 1. The children list is taken (left empty) and each child is disposed
//!    according to its kind.
//! 2. The node is removed from the reverse subscriber list of every
//!    dependency.
//! 3. The node is removed from its parent's children list.
//! 4. The node is marked `Destroyed`, its fields are cleared and its slot is
//!    released.
//!
//! [`ReactiveError::Destroyed`]: super::ReactiveError::Destroyed

use tracing::debug;

use super::node::{Kind, Node, NodeId, NodeKind, Status};
use super::runtime::Runtime;

impl Runtime {
    /// Dispose a source, derived or effect.
    ///
    /// Reactions it owns are disposed with it. Disposing a stale handle does
    /// nothing.
    pub fn dispose(&self, node: impl Into<NodeId>) {
        let id = node.into();
        match self.with_node(id, Node::tag) {
            Some(Kind::Derived) => self.destroy_derived(id),
            Some(Kind::Effect) => self.destroy_effect(id),
            Some(Kind::Source) => self.destroy_source(id),
            None => {}
        }
    }

    /// Dispose every child of a reaction, leaving its children list empty.
    pub(crate) fn dispose_children(&self, id: NodeId) {
        let children = self
            .with_node_mut(id, |node| {
                node.reaction_mut()
                    .map(|reaction| std::mem::take(&mut reaction.children))
            })
            .flatten()
            .unwrap_or_default();

        if !children.is_empty() {
            debug!(node = %id, count = children.len(), "disposing children");
        }
        for child in children {
            self.dispose(child);
        }
    }

    fn destroy_derived(&self, id: NodeId) {
        debug!(node = %id, "disposing derived");
        self.destroy_reaction(id);
    }

    fn destroy_effect(&self, id: NodeId) {
        debug!(node = %id, "disposing effect");
        self.pending.borrow_mut().shift_remove(&id);
        self.destroy_reaction(id);
    }

    fn destroy_source(&self, id: NodeId) {
        debug!(node = %id, "disposing source");
        self.mark_reactions(id);
        self.clear(id);
        self.release(id);
    }

    fn destroy_reaction(&self, id: NodeId) {
        self.dispose_children(id);
        self.unlink(id, 0);
        self.detach_from_parent(id);
        self.clear(id);
        self.release(id);
    }

    /// Remove `id` from the children list of the reaction holding it.
    fn detach_from_parent(&self, id: NodeId) {
        let Some(parent) = self
            .with_node(id, |node| node.reaction().and_then(|r| r.parent))
            .flatten()
        else {
            return;
        };
        self.with_node_mut(parent, |node| {
            if let Some(reaction) = node.reaction_mut() {
                reaction.children.retain(|child| *child != id);
            }
        });
    }

    /// Mark a node `Destroyed` and drop everything it retains.
    fn clear(&self, id: NodeId) {
        let retained = self.with_node_mut(id, |node| {
            node.status = Status::Destroyed;
            node.reactions.clear();
            if let Some(reaction) = node.reaction_mut() {
                reaction.deps.clear();
                reaction.children.clear();
                reaction.owner = None;
                reaction.parent = None;
            }
            let run = match &mut node.kind {
                NodeKind::Effect(effect) => effect.run.take(),
                _ => None,
            };
            (node.value.take(), run)
        });
        drop(retained);
    }
}
