//! Error types for the reactive runtime.

use std::error::Error as StdError;
use std::fmt;
use std::rc::Rc;

use thiserror::Error;

use super::node::NodeId;

/// Convenience alias used throughout the crate.
pub type Result<T, E = ReactiveError> = std::result::Result<T, E>;

/// Errors surfaced by reads, writes and recomputations.
///
/// All variants propagate synchronously to the call site that demanded the
/// value. Nothing is retried or swallowed by the runtime.
#[derive(Error, Debug, Clone)]
pub enum ReactiveError {
    /// A derived read itself, directly or through other deriveds, before its
    /// evaluation completed.
    ///
    /// `path` is the evaluation stack at the moment of detection, outermost
    /// first, ending with the node that was re-entered.
    #[error("self-referential computation at {node} (evaluation path: {})", format_path(.path))]
    SelfReference {
        /// The derived that was re-entered.
        node: NodeId,
        /// Evaluation stack at detection time.
        path: Vec<NodeId>,
    },

    /// The user-supplied function failed.
    ///
    /// The payload is shared so the same failure can travel unchanged through
    /// several nested deriveds.
    #[error("computation failed: {0}")]
    Compute(Rc<dyn StdError>),

    /// The handle refers to a node that has been disposed.
    #[error("{node} has been destroyed")]
    Destroyed {
        /// The stale handle.
        node: NodeId,
    },

    /// A handle's value type does not match the node it refers to.
    #[error("{node} does not hold a value of type {expected}")]
    TypeMismatch {
        /// The node that was read.
        node: NodeId,
        /// Type name the handle asked for.
        expected: &'static str,
    },

    /// A source was written while a derived was evaluating.
    #[error("cannot write {node} while derived {reaction} is evaluating")]
    UnsafeMutation {
        /// The source being written.
        node: NodeId,
        /// The derived on top of the evaluation stack.
        reaction: NodeId,
    },

    /// The evaluation stack grew beyond the configured limit.
    #[error("evaluation depth limit of {depth} exceeded")]
    DepthExceeded {
        /// The configured limit.
        depth: usize,
    },

    /// Effects kept re-scheduling each other during a single flush.
    #[error("effect flush did not settle after {runs} runs")]
    EffectLoop {
        /// Number of effect runs performed before giving up.
        runs: usize,
    },
}

impl ReactiveError {
    /// Wrap an arbitrary error as a compute failure.
    pub fn compute<E>(err: E) -> Self
    where
        E: StdError + 'static,
    {
        ReactiveError::Compute(Rc::new(err))
    }

    /// Build a compute failure from a plain message.
    pub fn msg(message: impl Into<String>) -> Self {
        ReactiveError::Compute(Rc::new(Message(message.into())))
    }

    /// Whether this is a self-reference failure.
    pub fn is_self_reference(&self) -> bool {
        matches!(self, ReactiveError::SelfReference { .. })
    }
}

/// A string-only error used by [`ReactiveError::msg`].
#[derive(Debug)]
struct Message(String);

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl StdError for Message {}

fn format_path(path: &[NodeId]) -> String {
    path.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" -> ")
}
