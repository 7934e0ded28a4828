//! Derived Implementation
//!
//! A derived is a cached value computed from other reactive values. It
//! re-evaluates only when one of its dependencies has actually changed, and
//! only when something reads it.
//!
//! # How Deriveds Work
//!
//! 1. A new derived starts `Dirty` with no value. Nothing runs until the
//!    first read.
//!
//! 2. A read of a `Dirty` derived runs [`Runtime::execute_derived`]: the
//!    owner context is switched in, the node is pushed on the evaluation
//!    stack, children from the previous run are disposed, and the compute
//!    function runs while its reads are tracked.
//!
//! 3. The fresh value is compared against the cached one with the node's
//!    [`Equality`]. Only an unequal value is stored, advancing the version
//!    clock. Equal values leave the cache and version untouched.
//!
//! 4. A read of a `MaybeDirty` derived first brings its derived dependencies
//!    up to date and recomputes only if one of them changed after this node
//!    was last verified.
//!
//! # Ownership
//!
//! A derived records the owning effect active at construction. While it
//! evaluates, that owner (not the derived itself) is installed as the owner of
//! anything created, because the derived may be torn down and rebuilt on every
//! recomputation. Reactions created during evaluation are also listed as the
//! derived's children, so they are disposed before the next evaluation.
//!
//! A derived created with no owning effect is *unowned*; after evaluation it
//! settles in `MaybeDirty` instead of `Clean` whenever it has dependencies,
//! and is re-validated on each read.

use std::any::Any;
use std::fmt;
use std::marker::PhantomData;
use std::rc::Rc;

use tracing::{debug, trace};

use super::equality::Equality;
use super::error::{ReactiveError, Result};
use super::node::{ComputeFn, DerivedState, Node, NodeId, NodeKind, Reaction, Status};
use super::runtime::{Readable, Runtime};

/// Handle to a derived value of type `T`.
///
/// Handles are plain identifiers: copying one does not copy the node, and
/// dropping one does not dispose it.
pub struct Derived<T> {
    id: NodeId,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Derived<T> {
    /// The underlying arena handle.
    pub fn id(&self) -> NodeId {
        self.id
    }
}

impl<T> Clone for Derived<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Derived<T> {}

impl<T> PartialEq for Derived<T> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<T> Eq for Derived<T> {}

impl<T> fmt::Debug for Derived<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Derived").field(&self.id).finish()
    }
}

impl<T> Readable<T> for Derived<T> {
    fn node_id(&self) -> NodeId {
        self.id
    }
}

impl<T> From<Derived<T>> for NodeId {
    fn from(derived: Derived<T>) -> Self {
        derived.id
    }
}

impl<T> From<&Derived<T>> for NodeId {
    fn from(derived: &Derived<T>) -> Self {
        derived.id
    }
}

/// A `MaybeDirty` reaction whose dependencies are being checked.
struct Revalidation {
    node: NodeId,
    deps: Vec<NodeId>,
    verified_at: u64,
    next: usize,
    /// Whether `deps[next]` has already been brought up to date.
    descended: bool,
}

impl Runtime {
    /// Create a derived compared with `PartialEq`.
    ///
    /// The computation is not run immediately. It runs on first read.
    pub fn derived<T, F>(&self, compute: F) -> Derived<T>
    where
        T: PartialEq + 'static,
        F: Fn(&Runtime) -> Result<T> + 'static,
    {
        self.derived_with(compute, Equality::partial_eq::<T>())
    }

    /// Create a derived with the conservative identity strategy.
    ///
    /// `compute` hands out an `Rc`; a recomputation counts as unchanged only
    /// when it returns the very same allocation as before.
    pub fn derived_safe<T, F>(&self, compute: F) -> Derived<T>
    where
        T: 'static,
        F: Fn(&Runtime) -> Result<Rc<T>> + 'static,
    {
        let compute: Rc<ComputeFn> =
            Rc::new(move |rt: &Runtime| compute(rt).map(|value| value as Rc<dyn Any>));
        self.create_derived(compute, Equality::identity())
    }

    /// Create a derived with an explicit equality strategy.
    pub fn derived_with<T, F>(&self, compute: F, equality: Equality) -> Derived<T>
    where
        T: 'static,
        F: Fn(&Runtime) -> Result<T> + 'static,
    {
        let compute: Rc<ComputeFn> =
            Rc::new(move |rt: &Runtime| compute(rt).map(|value| Rc::new(value) as Rc<dyn Any>));
        self.create_derived(compute, equality)
    }

    fn create_derived<T>(&self, compute: Rc<ComputeFn>, equality: Equality) -> Derived<T> {
        let owner = self.context.owner();
        let parent = self.active_derived().or(owner);

        let node = Node::new(
            NodeKind::Derived(DerivedState {
                reaction: Reaction {
                    parent,
                    owner,
                    ..Reaction::default()
                },
                compute,
                unowned: owner.is_none(),
                equality,
                version: 0,
            }),
            Status::Dirty,
            None,
        );
        let id = self.insert(node);

        if let Some(owner) = owner {
            self.mark_has_derived(owner);
        }
        if let Some(parent) = parent {
            self.adopt(parent, id);
        }
        trace!(node = %id, ?owner, ?parent, "derived created");

        Derived {
            id,
            _marker: PhantomData,
        }
    }

    /// The derived whose evaluation is currently collecting reads, if any.
    pub(crate) fn active_derived(&self) -> Option<NodeId> {
        self.context
            .current_reaction()
            .filter(|reaction| self.with_node(*reaction, Node::is_derived).unwrap_or(false))
    }

    /// Append `child` to the children of `parent`.
    pub(crate) fn adopt(&self, parent: NodeId, child: NodeId) {
        self.with_node_mut(parent, |node| {
            if let Some(reaction) = node.reaction_mut() {
                reaction.children.push(child);
            }
        });
    }

    // ------------------------------------------------------------------------
    // Recomputation
    // ------------------------------------------------------------------------

    /// Bring a derived up to date, recomputing it only if needed.
    pub(crate) fn update_derived(&self, id: NodeId) -> Result<()> {
        if self.is_stale(id)? {
            self.execute_derived(id)
        } else {
            self.mark_verified(id);
            Ok(())
        }
    }

    /// Settle a `MaybeDirty` derived whose dependencies were found unchanged.
    /// Unowned nodes and nodes checked while skip-tracking stay `MaybeDirty`.
    fn mark_verified(&self, id: NodeId) {
        let skipping = self.context.is_skipping();
        self.with_node_mut(id, |node| {
            let unowned = matches!(&node.kind, NodeKind::Derived(d) if d.unowned);
            if node.status == Status::MaybeDirty && !unowned && !skipping {
                node.status = Status::Clean;
            }
        });
    }

    /// Whether a reaction must re-run.
    ///
    /// `Dirty` always must. `MaybeDirty` must if a dependency changed after
    /// the reaction was last verified; derived dependencies are brought up to
    /// date first so their change stamps are current. A dependency that has
    /// been disposed counts as changed.
    ///
    /// `MaybeDirty` chains are walked with an explicit stack, so their length
    /// is not bounded by the native stack or by the evaluation depth limit.
    pub(crate) fn is_stale(&self, id: NodeId) -> Result<bool> {
        match self.with_node(id, |node| node.status) {
            Some(Status::Dirty) => return Ok(true),
            Some(Status::MaybeDirty) => {}
            _ => return Ok(false),
        }

        let mut stack = vec![self.revalidation(id)];
        loop {
            let Some(frame) = stack.last_mut() else {
                return Ok(false);
            };
            let node = frame.node;
            let verified_at = frame.verified_at;
            let Some(&dep) = frame.deps.get(frame.next) else {
                stack.pop();
                if stack.is_empty() {
                    return Ok(false);
                }
                self.mark_verified(node);
                continue;
            };

            if !std::mem::replace(&mut frame.descended, true) {
                match self.with_node(dep, |n| (n.is_derived(), n.status)) {
                    Some((true, Status::Dirty)) => self.execute_derived(dep)?,
                    Some((true, Status::MaybeDirty)) if stack.iter().all(|f| f.node != dep) => {
                        stack.push(self.revalidation(dep));
                        continue;
                    }
                    _ => {}
                }
            }

            let changed = self.changed_at(dep).map_or(true, |at| at > verified_at);
            if changed {
                trace!(%node, %dep, "dependency changed");
                stack.pop();
                if stack.is_empty() {
                    return Ok(true);
                }
                if self.with_node(node, Node::is_derived).unwrap_or(false) {
                    self.execute_derived(node)?;
                }
            } else if let Some(frame) = stack.last_mut() {
                frame.next += 1;
                frame.descended = false;
            }
        }
    }

    fn revalidation(&self, id: NodeId) -> Revalidation {
        let (deps, verified_at): (Vec<NodeId>, u64) = self
            .with_node(id, |node| {
                node.reaction()
                    .map(|r| (r.deps.iter().copied().collect(), r.verified_at))
            })
            .flatten()
            .unwrap_or_default();
        Revalidation {
            node: id,
            deps,
            verified_at,
            next: 0,
            descended: false,
        }
    }

    /// Run one recomputation cycle of a derived.
    ///
    /// The owner context and evaluation stack entry are held by guards, so
    /// they are restored on every exit path. A failing computation leaves the
    /// cached value, version and dependencies untouched and the node `Dirty`.
    pub(crate) fn execute_derived(&self, id: NodeId) -> Result<()> {
        let (compute, owner, unowned) = self
            .with_node(id, |node| match &node.kind {
                NodeKind::Derived(derived) => Some((
                    Rc::clone(&derived.compute),
                    derived.reaction.owner,
                    derived.unowned,
                )),
                _ => None,
            })
            .flatten()
            .ok_or(ReactiveError::Destroyed { node: id })?;

        trace!(node = %id, unowned, "recomputing derived");
        let _context = self.context.switch(owner, self.context.is_skipping() || unowned);
        let _evaluation = self.context.begin_evaluation(id)?;

        self.dispose_children(id);

        let skipping = self.context.is_skipping();
        let (result, deps) = self.run_tracked(id, |rt| (*compute)(rt));
        let value = match result {
            Ok(value) => value,
            Err(err) => {
                debug!(node = %id, error = %err, "derived computation failed");
                self.set_status(id, Status::Dirty);
                return Err(err);
            }
        };

        let status = if skipping && !deps.is_empty() {
            Status::MaybeDirty
        } else {
            Status::Clean
        };
        self.replace_dependencies(id, deps);

        let Some((previous, equality)) = self.with_node(id, |node| match &node.kind {
            NodeKind::Derived(derived) => Some((node.value.clone(), derived.equality.clone())),
            _ => None,
        })
        .flatten() else {
            return Err(ReactiveError::Destroyed { node: id });
        };

        let changed = match &previous {
            Some(previous) => !equality.equals(previous, &value),
            None => true,
        };
        drop(previous);
        let stamp = changed.then(|| self.advance_version());
        let fresh = if changed {
            Some(value)
        } else {
            drop(value);
            None
        };
        let verified_at = self.clock();

        let replaced = self.with_node_mut(id, |node| {
            node.status = status;
            let mut replaced = None;
            if let (Some(stamp), Some(fresh)) = (stamp, fresh) {
                replaced = node.value.replace(fresh);
                node.changed_at = stamp;
            }
            if let NodeKind::Derived(derived) = &mut node.kind {
                if stamp.is_some() {
                    derived.version += 1;
                }
                derived.reaction.verified_at = verified_at;
            }
            replaced
        });
        drop(replaced);
        trace!(node = %id, changed, ?status, "derived recomputed");
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Inspection
    // ------------------------------------------------------------------------

    /// Number of times the derived's value actually changed.
    pub fn version<T>(&self, derived: &Derived<T>) -> u64 {
        self.with_node(derived.id, |node| match &node.kind {
            NodeKind::Derived(derived) => derived.version,
            _ => 0,
        })
        .unwrap_or(0)
    }

    /// Whether the derived was created with no owning effect.
    pub fn is_unowned<T>(&self, derived: &Derived<T>) -> bool {
        self.with_node(derived.id, |node| {
            matches!(&node.kind, NodeKind::Derived(d) if d.unowned)
        })
        .unwrap_or(false)
    }
}
