//! Graph Nodes
//!
//! Every reactive value lives in a single slab arena owned by the
//! [`Runtime`](super::Runtime): sources, deriveds and effects alike. Handles
//! are generational, so a handle to a disposed node can never alias a node
//! that later reuses the same slot.

use std::any::Any;
use std::fmt;
use std::rc::Rc;

use indexmap::IndexSet;
use slab::Slab;
use smallvec::SmallVec;

use super::equality::Equality;
use super::error::{ReactiveError, Result};
use super::runtime::Runtime;

/// Unique identifier for a node in the arena.
///
/// `index` addresses the slab slot, `stamp` is unique per inserted node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId {
    index: u32,
    stamp: u64,
}

impl NodeId {
    pub(crate) fn from_parts(index: u32, stamp: u64) -> Self {
        Self { index, stamp }
    }

    /// The slab slot of this node.
    pub fn index(&self) -> usize {
        self.index as usize
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node#{}v{}", self.index, self.stamp)
    }
}

/// Lifecycle state of a node's cached value relative to its dependencies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    /// The node has never been evaluated, or is known to be stale.
    Dirty,

    /// A dependency might have changed, or freshness could not be fully
    /// trusted after the last evaluation. Re-validate before use.
    MaybeDirty,

    /// The cached value is up-to-date and its dependencies are tracked.
    Clean,

    /// Terminal. The node has been disposed.
    Destroyed,
}

/// Type-erased compute function of a derived.
pub(crate) type ComputeFn = dyn Fn(&Runtime) -> Result<Rc<dyn Any>>;

/// Effect callback. Taken out of the arena while it runs.
pub(crate) type EffectFn = Box<dyn FnMut(&Runtime) -> Result<()>>;

/// Ownership bookkeeping shared by both reaction kinds.
#[derive(Default)]
pub(crate) struct Reaction {
    /// Nodes read during the last successful evaluation, in read order.
    pub(crate) deps: IndexSet<NodeId>,

    /// Reactions created during this node's evaluation (or, for effects,
    /// while the effect was the owner).
    pub(crate) children: SmallVec<[NodeId; 4]>,

    /// The reaction whose `children` list holds this node.
    pub(crate) parent: Option<NodeId>,

    /// Owning effect active when this node was constructed.
    pub(crate) owner: Option<NodeId>,

    /// Clock value at the end of the last evaluation.
    pub(crate) verified_at: u64,
}

/// State specific to a derived.
pub(crate) struct DerivedState {
    pub(crate) reaction: Reaction,
    pub(crate) compute: Rc<ComputeFn>,
    pub(crate) equality: Equality,
    pub(crate) unowned: bool,
    /// Number of times the value actually changed.
    pub(crate) version: u64,
}

/// State specific to an effect.
pub(crate) struct EffectState {
    pub(crate) reaction: Reaction,
    pub(crate) run: Option<EffectFn>,
    pub(crate) has_derived: bool,
    pub(crate) run_count: usize,
}

/// State specific to a source.
pub(crate) struct SourceState {
    pub(crate) equality: Equality,
}

/// What kind of node this is.
pub(crate) enum NodeKind {
    Source(SourceState),
    Derived(DerivedState),
    Effect(EffectState),
}

/// Discriminant of [`NodeKind`], for dispatch outside an arena borrow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Kind {
    Source,
    Derived,
    Effect,
}

/// A node in the arena.
pub(crate) struct Node {
    pub(crate) stamp: u64,
    pub(crate) status: Status,
    /// Cached value. `None` for effects and for deriveds never evaluated.
    pub(crate) value: Option<Rc<dyn Any>>,
    /// Clock stamp of the last value change.
    pub(crate) changed_at: u64,
    /// Reactions that read this node (reverse subscriber list).
    pub(crate) reactions: IndexSet<NodeId>,
    pub(crate) kind: NodeKind,
}

impl Node {
    pub(crate) fn new(kind: NodeKind, status: Status, value: Option<Rc<dyn Any>>) -> Self {
        Self {
            stamp: 0,
            status,
            value,
            changed_at: 0,
            reactions: IndexSet::new(),
            kind,
        }
    }

    pub(crate) fn reaction(&self) -> Option<&Reaction> {
        match &self.kind {
            NodeKind::Derived(derived) => Some(&derived.reaction),
            NodeKind::Effect(effect) => Some(&effect.reaction),
            NodeKind::Source(_) => None,
        }
    }

    pub(crate) fn reaction_mut(&mut self) -> Option<&mut Reaction> {
        match &mut self.kind {
            NodeKind::Derived(derived) => Some(&mut derived.reaction),
            NodeKind::Effect(effect) => Some(&mut effect.reaction),
            NodeKind::Source(_) => None,
        }
    }

    pub(crate) fn tag(&self) -> Kind {
        match self.kind {
            NodeKind::Source(_) => Kind::Source,
            NodeKind::Derived(_) => Kind::Derived,
            NodeKind::Effect(_) => Kind::Effect,
        }
    }

    pub(crate) fn is_derived(&self) -> bool {
        matches!(self.kind, NodeKind::Derived(_))
    }
}

/// Slab storage with generational lookups.
pub(crate) struct Arena {
    slots: Slab<Node>,
    next_stamp: u64,
}

impl Arena {
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: Slab::with_capacity(capacity),
            next_stamp: 1,
        }
    }

    pub(crate) fn insert(&mut self, mut node: Node) -> NodeId {
        let stamp = self.next_stamp;
        self.next_stamp += 1;
        node.stamp = stamp;
        let index = self.slots.insert(node);
        NodeId::from_parts(index as u32, stamp)
    }

    pub(crate) fn get(&self, id: NodeId) -> Option<&Node> {
        self.slots
            .get(id.index())
            .filter(|node| node.stamp == id.stamp)
    }

    pub(crate) fn get_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.slots
            .get_mut(id.index())
            .filter(|node| node.stamp == id.stamp)
    }

    /// Look up a node, failing with [`ReactiveError::Destroyed`] for stale
    /// handles.
    pub(crate) fn try_get(&self, id: NodeId) -> Result<&Node> {
        self.get(id).ok_or(ReactiveError::Destroyed { node: id })
    }

    pub(crate) fn contains(&self, id: NodeId) -> bool {
        self.get(id).is_some()
    }

    /// Return a slot to the arena.
    pub(crate) fn remove(&mut self, id: NodeId) -> Option<Node> {
        if self.contains(id) {
            Some(self.slots.remove(id.index()))
        } else {
            None
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }
}
