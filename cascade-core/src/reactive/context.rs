//! Reactive Context
//!
//! The reactive context tracks which computation is currently running and
//! on whose behalf. It holds four pieces of state:
//!
//! - a stack of tracking frames, one per running reaction, collecting the
//!   nodes read during that reaction's evaluation;
//! - the stack of deriveds currently mid-evaluation, used to reject
//!   self-referential computations;
//! - the owner slot: the effect that side effects created right now attach to;
//! - the skip-tracking and untracking flags.
//!
//! # Implementation
//!
//! Every change to this state is made through a guard that restores the
//! previous state when dropped. Evaluation failures and panics therefore
//! unwind the context correctly without any explicit cleanup at call sites.

use std::cell::{Cell, RefCell};

use indexmap::IndexSet;
use smallvec::SmallVec;
use tracing::warn;

use super::error::{ReactiveError, Result};
use super::node::NodeId;

/// An entry in the tracking stack.
#[derive(Debug)]
struct Frame {
    /// The reaction whose reads are being collected.
    reaction: NodeId,
    /// Nodes read so far, in first-read order.
    deps: IndexSet<NodeId>,
}

/// Per-runtime evaluation context.
#[derive(Debug)]
pub(crate) struct ReactiveContext {
    frames: RefCell<Vec<Frame>>,
    evaluating: RefCell<SmallVec<[NodeId; 16]>>,
    owner: Cell<Option<NodeId>>,
    skip_tracking: Cell<bool>,
    untracking: Cell<bool>,
    max_depth: usize,
}

impl ReactiveContext {
    pub(crate) fn new(max_depth: usize) -> Self {
        Self {
            frames: RefCell::new(Vec::new()),
            evaluating: RefCell::new(SmallVec::new()),
            owner: Cell::new(None),
            skip_tracking: Cell::new(false),
            untracking: Cell::new(false),
            max_depth,
        }
    }

    /// The reaction whose reads are currently being collected, if any.
    pub(crate) fn current_reaction(&self) -> Option<NodeId> {
        self.frames.borrow().last().map(|frame| frame.reaction)
    }

    /// The owning effect that newly created reactions attach to.
    pub(crate) fn owner(&self) -> Option<NodeId> {
        self.owner.get()
    }

    /// Whether the current evaluation is not eligible for trustworthy
    /// dependency tracking.
    pub(crate) fn is_skipping(&self) -> bool {
        self.skip_tracking.get()
    }

    /// Whether reads are currently excluded from tracking.
    pub(crate) fn is_untracking(&self) -> bool {
        self.untracking.get()
    }

    /// Record a read of `node` in the innermost frame.
    ///
    /// Reads are ignored outside any frame, while untracking, and when a
    /// reaction reads itself.
    pub(crate) fn track(&self, node: NodeId) {
        if self.is_untracking() {
            return;
        }
        if let Some(frame) = self.frames.borrow_mut().last_mut() {
            if frame.reaction != node {
                frame.deps.insert(node);
            }
        }
    }

    /// Start collecting reads for `reaction`.
    pub(crate) fn enter_frame(&self, reaction: NodeId) -> TrackingFrame<'_> {
        self.frames.borrow_mut().push(Frame {
            reaction,
            deps: IndexSet::new(),
        });
        TrackingFrame {
            context: self,
            reaction,
            finished: false,
        }
    }

    /// Install `owner` and the skip-tracking flag until the guard drops.
    ///
    /// Untracking is lifted for the duration: a reaction evaluated from inside
    /// an untracked scope still tracks its own reads.
    pub(crate) fn switch(&self, owner: Option<NodeId>, skip_tracking: bool) -> ContextGuard<'_> {
        ContextGuard {
            context: self,
            owner: self.owner.replace(owner),
            skip_tracking: self.skip_tracking.replace(skip_tracking),
            untracking: self.untracking.replace(false),
        }
    }

    /// Exclude reads from tracking until the guard drops.
    pub(crate) fn untrack(&self) -> UntrackGuard<'_> {
        UntrackGuard {
            context: self,
            previous: self.untracking.replace(true),
        }
    }

    /// Push `node` onto the evaluation stack.
    ///
    /// Fails if `node` is already being evaluated further up the stack, or if
    /// the stack is at its configured limit.
    pub(crate) fn begin_evaluation(&self, node: NodeId) -> Result<EvaluationGuard<'_>> {
        let mut stack = self.evaluating.borrow_mut();
        if stack.contains(&node) {
            let mut path: Vec<NodeId> = stack.iter().copied().collect();
            path.push(node);
            warn!(%node, depth = stack.len(), "self-referential computation detected");
            return Err(ReactiveError::SelfReference { node, path });
        }
        if stack.len() >= self.max_depth {
            return Err(ReactiveError::DepthExceeded {
                depth: self.max_depth,
            });
        }
        stack.push(node);
        Ok(EvaluationGuard {
            context: self,
            node,
        })
    }

    /// The innermost derived currently mid-evaluation, if any.
    pub(crate) fn evaluating_top(&self) -> Option<NodeId> {
        self.evaluating.borrow().last().copied()
    }

    /// Whether `node` is currently mid-evaluation.
    pub(crate) fn is_evaluating(&self, node: NodeId) -> bool {
        self.evaluating.borrow().contains(&node)
    }

    /// Number of deriveds currently mid-evaluation.
    pub(crate) fn depth(&self) -> usize {
        self.evaluating.borrow().len()
    }
}

/// Guard returned by [`ReactiveContext::enter_frame`].
///
/// Call [`finish`](TrackingFrame::finish) to obtain the collected reads. If the
/// guard is dropped without finishing (the computation failed or panicked),
/// the frame is discarded.
pub(crate) struct TrackingFrame<'ctx> {
    context: &'ctx ReactiveContext,
    reaction: NodeId,
    finished: bool,
}

impl TrackingFrame<'_> {
    pub(crate) fn finish(mut self) -> IndexSet<NodeId> {
        self.finished = true;
        self.pop().map(|frame| frame.deps).unwrap_or_default()
    }

    fn pop(&self) -> Option<Frame> {
        let popped = self.context.frames.borrow_mut().pop();
        if let Some(frame) = &popped {
            debug_assert_eq!(
                frame.reaction, self.reaction,
                "tracking frame mismatch: expected {}, got {}",
                self.reaction, frame.reaction
            );
        }
        popped
    }
}

impl Drop for TrackingFrame<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.pop();
        }
    }
}

/// Guard returned by [`ReactiveContext::switch`].
pub(crate) struct ContextGuard<'ctx> {
    context: &'ctx ReactiveContext,
    owner: Option<NodeId>,
    skip_tracking: bool,
    untracking: bool,
}

impl Drop for ContextGuard<'_> {
    fn drop(&mut self) {
        self.context.owner.set(self.owner);
        self.context.skip_tracking.set(self.skip_tracking);
        self.context.untracking.set(self.untracking);
    }
}

/// Guard returned by [`ReactiveContext::untrack`].
pub(crate) struct UntrackGuard<'ctx> {
    context: &'ctx ReactiveContext,
    previous: bool,
}

impl Drop for UntrackGuard<'_> {
    fn drop(&mut self) {
        self.context.untracking.set(self.previous);
    }
}

/// Guard returned by [`ReactiveContext::begin_evaluation`].
pub(crate) struct EvaluationGuard<'ctx> {
    context: &'ctx ReactiveContext,
    node: NodeId,
}

impl Drop for EvaluationGuard<'_> {
    fn drop(&mut self) {
        let popped = self.context.evaluating.borrow_mut().pop();
        debug_assert_eq!(popped, Some(self.node), "evaluation stack mismatch");
    }
}
