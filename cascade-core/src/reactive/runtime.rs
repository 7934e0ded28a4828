//! Reactive Runtime
//!
//! The runtime is the central coordinator that connects sources, deriveds and
//! effects. It owns, as private state:
//!
//! - the node arena,
//! - the version clock,
//! - the evaluation context (tracking frames, evaluation stack, owner slot),
//! - the queue of effects waiting to be flushed.
//!
//! # How It Works
//!
//! 1. When a reaction reads a node through [`Runtime::get`] or
//!    [`Runtime::read`], the read is recorded in the reaction's tracking frame.
//!
//! 2. When the reaction's evaluation completes, the recorded set replaces its
//!    previous dependencies and the reverse subscriber lists are updated.
//!
//! 3. When a source changes, [`Runtime::mark_reactions`] marks direct readers
//!    `Dirty`, everything further downstream `MaybeDirty`, and queues reached
//!    effects. Deriveds are lazy: they recompute on their next read.
//!
//! # Thread Safety
//!
//! None. A runtime is a single-threaded object (`!Send`, `!Sync`); all
//! recomputation happens synchronously inside the call that demanded a value.

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::collections::{HashSet, VecDeque};
use std::rc::Rc;

use indexmap::IndexSet;
use tracing::trace;

use super::context::ReactiveContext;
use super::error::{ReactiveError, Result};
use super::node::{Arena, Node, NodeId, NodeKind, Status};

/// Default limit for the evaluation stack.
pub const DEFAULT_MAX_DEPTH: usize = 1024;

/// Default limit for effect runs within one flush.
pub const DEFAULT_MAX_EFFECT_RUNS: usize = 10_000;

/// A typed handle whose current value can be read.
pub trait Readable<T> {
    /// The underlying arena handle.
    fn node_id(&self) -> NodeId;
}

/// The reactive runtime.
///
/// Every source, derived and effect belongs to exactly one runtime, and all
/// operations on them go through it.
///
/// # Example
///
/// ```rust
/// use cascade_core::reactive::Runtime;
///
/// let rt = Runtime::new();
/// let count = rt.source(2);
/// let doubled = rt.derived(move |rt| Ok(rt.get(&count)? * 2));
///
/// assert_eq!(rt.get(&doubled).unwrap(), 4);
/// rt.set(&count, 5).unwrap();
/// assert_eq!(rt.get(&doubled).unwrap(), 10);
/// ```
pub struct Runtime {
    arena: RefCell<Arena>,
    clock: Cell<u64>,
    pub(crate) context: ReactiveContext,
    pub(crate) pending: RefCell<IndexSet<NodeId>>,
    pub(crate) max_effect_runs: usize,
}

impl Runtime {
    /// Create a runtime with default settings.
    pub fn new() -> Self {
        RuntimeBuilder::new().build()
    }

    /// Start configuring a runtime.
    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::new()
    }

    // ------------------------------------------------------------------------
    // Arena access
    // ------------------------------------------------------------------------

    pub(crate) fn insert(&self, node: Node) -> NodeId {
        self.arena.borrow_mut().insert(node)
    }

    pub(crate) fn with_node<R>(&self, id: NodeId, f: impl FnOnce(&Node) -> R) -> Option<R> {
        self.arena.borrow().get(id).map(f)
    }

    pub(crate) fn with_node_mut<R>(&self, id: NodeId, f: impl FnOnce(&mut Node) -> R) -> Option<R> {
        self.arena.borrow_mut().get_mut(id).map(f)
    }

    /// Release a node's storage. The node is dropped after the arena borrow
    /// ends, so values with non-trivial `Drop` impls never observe it held.
    pub(crate) fn release(&self, id: NodeId) {
        let removed = self.arena.borrow_mut().remove(id);
        drop(removed);
    }

    pub(crate) fn contains(&self, id: NodeId) -> bool {
        self.arena.borrow().contains(id)
    }

    // ------------------------------------------------------------------------
    // Version clock
    // ------------------------------------------------------------------------

    /// Current value of the version clock.
    pub fn clock(&self) -> u64 {
        self.clock.get()
    }

    /// Advance the version clock and return the new value.
    pub fn advance_version(&self) -> u64 {
        let next = self.clock.get() + 1;
        self.clock.set(next);
        next
    }

    // ------------------------------------------------------------------------
    // Reading
    // ------------------------------------------------------------------------

    /// Read a source or derived, recomputing the derived if needed.
    ///
    /// Inside a reaction the read is recorded as a dependency.
    pub fn read<T: 'static>(&self, handle: &impl Readable<T>) -> Result<Rc<T>> {
        let id = handle.node_id();
        let is_derived = self.arena.borrow().try_get(id)?.is_derived();

        self.context.track(id);
        if is_derived {
            self.update_derived(id)?;
        }

        let value: Rc<dyn Any> = self
            .with_node(id, |node| node.value.clone())
            .flatten()
            .ok_or(ReactiveError::Destroyed { node: id })?;
        value.downcast::<T>().map_err(|_| ReactiveError::TypeMismatch {
            node: id,
            expected: std::any::type_name::<T>(),
        })
    }

    /// Read and clone the current value. See [`Runtime::read`].
    pub fn get<T: Clone + 'static>(&self, handle: &impl Readable<T>) -> Result<T> {
        self.read(handle).map(|value| T::clone(&value))
    }

    /// Run `f` without recording any reads as dependencies.
    pub fn untracked<R>(&self, f: impl FnOnce(&Runtime) -> R) -> R {
        let _untracked = self.context.untrack();
        f(self)
    }

    // ------------------------------------------------------------------------
    // Dependency bookkeeping
    // ------------------------------------------------------------------------

    /// Run `f` while recording every node it reads on behalf of `reaction`.
    ///
    /// Returns the result together with the recorded reads in first-read
    /// order. A failure inside `f` is returned unchanged.
    pub fn run_tracked<R>(
        &self,
        reaction: NodeId,
        f: impl FnOnce(&Runtime) -> R,
    ) -> (R, IndexSet<NodeId>) {
        let frame = self.context.enter_frame(reaction);
        let result = f(self);
        (result, frame.finish())
    }

    /// Remove `node` from the reverse subscriber list of each of its
    /// dependencies, starting at `from_index`.
    pub fn unlink(&self, node: NodeId, from_index: usize) {
        let mut arena = self.arena.borrow_mut();
        let deps: Vec<NodeId> = arena
            .get(node)
            .and_then(Node::reaction)
            .map(|reaction| reaction.deps.iter().skip(from_index).copied().collect())
            .unwrap_or_default();
        for dep in deps {
            if let Some(dep_node) = arena.get_mut(dep) {
                dep_node.reactions.shift_remove(&node);
            }
        }
    }

    /// Install `deps` as the dependency set of `node`, replacing the old set.
    ///
    /// Links to dependencies no longer read are removed; every new
    /// dependency lists `node` among its reactions.
    pub(crate) fn replace_dependencies(&self, node: NodeId, deps: IndexSet<NodeId>) {
        let mut arena = self.arena.borrow_mut();
        let Some(old) = arena
            .get_mut(node)
            .and_then(Node::reaction_mut)
            .map(|reaction| std::mem::take(&mut reaction.deps))
        else {
            return;
        };

        for stale in old.iter().filter(|dep| !deps.contains(*dep)) {
            if let Some(dep_node) = arena.get_mut(*stale) {
                dep_node.reactions.shift_remove(&node);
            }
        }
        for dep in &deps {
            if let Some(dep_node) = arena.get_mut(*dep) {
                dep_node.reactions.insert(node);
            }
        }
        if let Some(reaction) = arena.get_mut(node).and_then(Node::reaction_mut) {
            reaction.deps = deps;
        }
    }

    /// Assign a node's status without side effects. Stale handles are
    /// ignored.
    pub fn set_status(&self, node: impl Into<NodeId>, status: Status) {
        let id = node.into();
        self.with_node_mut(id, |node| node.status = status);
    }

    /// Whether the current evaluation is not eligible for trustworthy
    /// dependency tracking.
    pub fn is_skipping_tracking(&self) -> bool {
        self.context.is_skipping()
    }

    // ------------------------------------------------------------------------
    // Invalidation
    // ------------------------------------------------------------------------

    /// Mark everything downstream of `origin` as possibly stale.
    ///
    /// Direct readers become `Dirty`, transitive readers `MaybeDirty` (a
    /// `Dirty` node is never downgraded). Every effect reached is queued for
    /// the next [`flush_effects`](Runtime::flush_effects).
    pub fn mark_reactions(&self, origin: NodeId) {
        let mut queue: VecDeque<(NodeId, Status)> = self
            .with_node(origin, |node| {
                node.reactions
                    .iter()
                    .map(|reaction| (*reaction, Status::Dirty))
                    .collect()
            })
            .unwrap_or_default();
        let mut visited = HashSet::new();
        let mut arena = self.arena.borrow_mut();
        let mut pending = self.pending.borrow_mut();

        while let Some((id, status)) = queue.pop_front() {
            if !visited.insert(id) {
                continue;
            }
            let Some(node) = arena.get_mut(id) else {
                continue;
            };
            node.status = match (node.status, status) {
                (Status::Destroyed, _) => continue,
                (Status::Dirty, _) | (_, Status::Dirty) => Status::Dirty,
                _ => Status::MaybeDirty,
            };
            trace!(node = %id, status = ?node.status, "marked");

            match &node.kind {
                NodeKind::Derived(_) => {
                    queue.extend(
                        node.reactions
                            .iter()
                            .map(|reaction| (*reaction, Status::MaybeDirty)),
                    );
                }
                NodeKind::Effect(_) => {
                    pending.insert(id);
                }
                NodeKind::Source(_) => {}
            }
        }
    }

    // ------------------------------------------------------------------------
    // Inspection
    // ------------------------------------------------------------------------

    /// Lifecycle state of a node. Disposed handles report `Destroyed`.
    pub fn status(&self, node: impl Into<NodeId>) -> Status {
        let id = node.into();
        self.with_node(id, |node| node.status)
            .unwrap_or(Status::Destroyed)
    }

    /// Clock stamp of the node's last value change.
    pub fn changed_at(&self, node: impl Into<NodeId>) -> Option<u64> {
        self.with_node(node.into(), |node| node.changed_at)
    }

    /// Dependencies recorded during the node's last successful evaluation.
    pub fn dependencies(&self, node: impl Into<NodeId>) -> Vec<NodeId> {
        self.with_node(node.into(), |node| {
            node.reaction()
                .map(|reaction| reaction.deps.iter().copied().collect())
                .unwrap_or_default()
        })
        .unwrap_or_default()
    }

    /// Reactions created during the node's evaluation and owned by it.
    pub fn children(&self, node: impl Into<NodeId>) -> Vec<NodeId> {
        self.with_node(node.into(), |node| {
            node.reaction()
                .map(|reaction| reaction.children.to_vec())
                .unwrap_or_default()
        })
        .unwrap_or_default()
    }

    /// Owning effect recorded at construction.
    pub fn owner(&self, node: impl Into<NodeId>) -> Option<NodeId> {
        self.with_node(node.into(), |node| node.reaction().and_then(|r| r.owner))
            .flatten()
    }

    /// Number of reactions currently subscribed to the node.
    pub fn subscriber_count(&self, node: impl Into<NodeId>) -> usize {
        self.with_node(node.into(), |node| node.reactions.len())
            .unwrap_or(0)
    }

    /// Number of live nodes.
    pub fn node_count(&self) -> usize {
        self.arena.borrow().len()
    }

    /// Number of deriveds currently mid-evaluation.
    pub fn evaluation_depth(&self) -> usize {
        self.context.depth()
    }

    /// Whether the node is currently mid-evaluation.
    pub fn is_evaluating(&self, node: impl Into<NodeId>) -> bool {
        self.context.is_evaluating(node.into())
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Builder
// ============================================================================

/// Builder for [`Runtime`] with customizable limits.
///
/// # Example
///
/// ```rust
/// use cascade_core::reactive::Runtime;
///
/// let rt = Runtime::builder()
///     .max_depth(64)
///     .capacity(256)
///     .build();
/// assert_eq!(rt.node_count(), 0);
/// ```
#[derive(Debug, Clone)]
pub struct RuntimeBuilder {
    max_depth: usize,
    max_effect_runs: usize,
    capacity: usize,
}

impl Default for RuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RuntimeBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
            max_effect_runs: DEFAULT_MAX_EFFECT_RUNS,
            capacity: 0,
        }
    }

    /// Maximum number of deriveds that may be mid-evaluation at once.
    ///
    /// Deeper chains fail with [`ReactiveError::DepthExceeded`].
    pub fn max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth;
        self
    }

    /// Maximum number of effect runs within one flush.
    ///
    /// Flushes that do not settle fail with [`ReactiveError::EffectLoop`].
    pub fn max_effect_runs(mut self, runs: usize) -> Self {
        self.max_effect_runs = runs;
        self
    }

    /// Pre-allocate room for this many nodes.
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Build the runtime with the configured settings.
    pub fn build(self) -> Runtime {
        Runtime {
            arena: RefCell::new(Arena::with_capacity(self.capacity)),
            clock: Cell::new(0),
            context: ReactiveContext::new(self.max_depth),
            pending: RefCell::new(IndexSet::new()),
            max_effect_runs: self.max_effect_runs,
        }
    }
}
