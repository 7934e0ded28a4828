//! Effect Implementation
//!
//! An effect is a side-effecting reaction. It reads reactive values but
//! produces none of its own, and it owns the reactions created while it runs.
//!
//! # How Effects Work
//!
//! 1. When created, the effect runs immediately to establish its initial
//!    dependencies.
//!
//! 2. When a dependency changes, [`Runtime::mark_reactions`] queues the
//!    effect. Nothing runs until [`Runtime::flush_effects`] is called.
//!
//! 3. A queued effect that was only marked `MaybeDirty` first checks whether
//!    any of its derived dependencies actually changed. If none did, it is
//!    marked `Clean` without running.
//!
//! 4. Before re-running, the effect disposes the reactions it created during
//!    its previous run, then tracks a fresh dependency set.
//!
//! # Roots
//!
//! [`Runtime::root`] creates an effect with no callback. It exists purely as
//! an owner: everything created inside the closure belongs to it and is torn
//! down when the root is disposed.

use std::fmt;

use tracing::{debug, trace};

use super::error::{ReactiveError, Result};
use super::node::{EffectFn, EffectState, Node, NodeId, NodeKind, Reaction, Status};
use super::runtime::Runtime;

/// Handle to an effect or root.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Effect {
    id: NodeId,
}

impl Effect {
    /// The underlying arena handle.
    pub fn id(&self) -> NodeId {
        self.id
    }
}

impl fmt::Debug for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Effect").field(&self.id).finish()
    }
}

impl From<Effect> for NodeId {
    fn from(effect: Effect) -> Self {
        effect.id
    }
}

impl From<&Effect> for NodeId {
    fn from(effect: &Effect) -> Self {
        effect.id
    }
}

/// Holds an effect's callback while it runs and puts it back afterwards.
///
/// The callback is taken out of the arena so the arena is not borrowed while
/// user code runs. If the effect was disposed during its own run, the
/// callback is simply dropped.
struct CallbackGuard<'rt> {
    runtime: &'rt Runtime,
    effect: NodeId,
    callback: Option<EffectFn>,
}

impl CallbackGuard<'_> {
    fn run(&mut self, rt: &Runtime) -> Result<()> {
        match self.callback.as_mut() {
            Some(callback) => callback(rt),
            None => Ok(()),
        }
    }
}

impl Drop for CallbackGuard<'_> {
    fn drop(&mut self) {
        let mut callback = self.callback.take();
        if callback.is_none() {
            return;
        }
        self.runtime.with_node_mut(self.effect, |node| {
            if let NodeKind::Effect(effect) = &mut node.kind {
                effect.run = callback.take();
            }
        });
        drop(callback);
    }
}

impl Runtime {
    /// Create an effect and run it once.
    ///
    /// If the first run fails the effect is disposed and the failure is
    /// returned.
    pub fn effect<F>(&self, run: F) -> Result<Effect>
    where
        F: FnMut(&Runtime) -> Result<()> + 'static,
    {
        let run: EffectFn = Box::new(run);
        let id = self.create_effect(Some(run), Status::Dirty);
        if let Err(err) = self.execute_effect(id) {
            debug!(node = %id, error = %err, "initial effect run failed");
            self.dispose(id);
            return Err(err);
        }
        Ok(Effect { id })
    }

    /// Run `f` inside a new owner scope.
    ///
    /// Reactions created by `f` belong to the returned root. Reads inside `f`
    /// are not tracked by any enclosing reaction.
    pub fn root<R>(&self, f: impl FnOnce(&Runtime) -> R) -> (Effect, R) {
        let id = self.create_effect(None, Status::Clean);
        let _context = self.context.switch(Some(id), false);
        let (result, _) = self.run_tracked(id, f);
        (Effect { id }, result)
    }

    fn create_effect(&self, run: Option<EffectFn>, status: Status) -> NodeId {
        let owner = self.context.owner();
        let parent = self.active_derived().or(owner);

        let node = Node::new(
            NodeKind::Effect(EffectState {
                reaction: Reaction {
                    parent,
                    owner,
                    ..Reaction::default()
                },
                run,
                has_derived: false,
                run_count: 0,
            }),
            status,
            None,
        );
        let id = self.insert(node);
        if let Some(parent) = parent {
            self.adopt(parent, id);
        }
        trace!(node = %id, ?owner, ?parent, "effect created");
        id
    }

    /// Run every queued effect whose dependencies actually changed.
    ///
    /// Effects queued while flushing run in the same flush. Returns the
    /// number of effect runs. Fails with [`ReactiveError::EffectLoop`] if the
    /// queue does not drain within the configured number of runs; the queue
    /// is cleared in that case.
    pub fn flush_effects(&self) -> Result<usize> {
        let mut runs = 0;
        loop {
            let next = self.pending.borrow_mut().shift_remove_index(0);
            let Some(id) = next else {
                break;
            };
            if !self.contains(id) {
                continue;
            }
            if !self.is_stale(id)? {
                self.set_status(id, Status::Clean);
                continue;
            }
            if runs >= self.max_effect_runs {
                self.pending.borrow_mut().clear();
                return Err(ReactiveError::EffectLoop { runs });
            }
            runs += 1;
            self.execute_effect(id)?;
        }
        if runs > 0 {
            debug!(runs, "effects flushed");
        }
        Ok(runs)
    }

    /// Number of effects waiting for the next flush.
    pub fn pending_effects(&self) -> usize {
        self.pending.borrow().len()
    }

    /// Run an effect once, replacing its children and dependencies.
    ///
    /// The effect is marked `Clean` before its callback runs, so a write that
    /// invalidates the effect from inside its own run leaves it queued.
    fn execute_effect(&self, id: NodeId) -> Result<()> {
        let _context = self.context.switch(Some(id), false);
        self.dispose_children(id);

        let callback = self
            .with_node_mut(id, |node| {
                node.status = Status::Clean;
                match &mut node.kind {
                    NodeKind::Effect(effect) => {
                        effect.run_count += 1;
                        effect.run.take()
                    }
                    _ => None,
                }
            })
            .ok_or(ReactiveError::Destroyed { node: id })?;

        trace!(node = %id, "running effect");
        let mut guard = CallbackGuard {
            runtime: self,
            effect: id,
            callback,
        };
        let (result, deps) = self.run_tracked(id, |rt| guard.run(rt));
        drop(guard);

        match result {
            Ok(()) => {
                self.replace_dependencies(id, deps);
                let verified_at = self.clock();
                self.with_node_mut(id, |node| {
                    if let Some(reaction) = node.reaction_mut() {
                        reaction.verified_at = verified_at;
                    }
                });
                Ok(())
            }
            Err(err) => {
                debug!(node = %id, error = %err, "effect failed");
                self.set_status(id, Status::Dirty);
                Err(err)
            }
        }
    }

    /// Record that a derived was created under `owner`.
    pub(crate) fn mark_has_derived(&self, owner: NodeId) {
        self.with_node_mut(owner, |node| {
            if let NodeKind::Effect(effect) = &mut node.kind {
                effect.has_derived = true;
            }
        });
    }

    /// Whether a derived has been created while this effect was the owner.
    pub fn has_derived_child(&self, effect: impl Into<NodeId>) -> bool {
        self.with_node(effect.into(), |node| {
            matches!(&node.kind, NodeKind::Effect(e) if e.has_derived)
        })
        .unwrap_or(false)
    }

    /// Number of times the effect's callback has run.
    pub fn run_count(&self, effect: &Effect) -> usize {
        self.with_node(effect.id, |node| match &node.kind {
            NodeKind::Effect(effect) => effect.run_count,
            _ => 0,
        })
        .unwrap_or(0)
    }
}
