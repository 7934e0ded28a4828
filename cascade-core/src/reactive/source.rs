//! Source Implementation
//!
//! A source is a mutable reactive cell. It holds a value directly and is the
//! only kind of node the outside world writes to.
//!
//! # How Sources Work
//!
//! 1. When a source is read inside a reaction, the read is recorded as a
//!    dependency of that reaction.
//!
//! 2. When a source is written with a value its equality strategy considers
//!    different, the version clock advances and every reaction downstream is
//!    marked stale through [`Runtime::mark_reactions`].
//!
//! 3. Writing an equal value is a no-op: nothing is marked and the clock does
//!    not move.
//!
//! Sources may not be written while a derived is evaluating. A derived is a
//! pure function of its inputs; letting it write would make its result depend
//! on evaluation order.

use std::any::Any;
use std::fmt;
use std::marker::PhantomData;
use std::rc::Rc;

use tracing::trace;

use super::equality::Equality;
use super::error::{ReactiveError, Result};
use super::node::{Node, NodeId, NodeKind, SourceState, Status};
use super::runtime::{Readable, Runtime};

/// Handle to a source holding a value of type `T`.
pub struct Source<T> {
    id: NodeId,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Source<T> {
    /// The underlying arena handle.
    pub fn id(&self) -> NodeId {
        self.id
    }
}

impl<T> Clone for Source<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Source<T> {}

impl<T> PartialEq for Source<T> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<T> Eq for Source<T> {}

impl<T> fmt::Debug for Source<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Source").field(&self.id).finish()
    }
}

impl<T> Readable<T> for Source<T> {
    fn node_id(&self) -> NodeId {
        self.id
    }
}

impl<T> From<Source<T>> for NodeId {
    fn from(source: Source<T>) -> Self {
        source.id
    }
}

impl<T> From<&Source<T>> for NodeId {
    fn from(source: &Source<T>) -> Self {
        source.id
    }
}

impl Runtime {
    /// Create a source compared with `PartialEq`.
    pub fn source<T: PartialEq + 'static>(&self, value: T) -> Source<T> {
        self.source_with(value, Equality::partial_eq::<T>())
    }

    /// Create a source with an explicit equality strategy.
    pub fn source_with<T: 'static>(&self, value: T, equality: Equality) -> Source<T> {
        let node = Node::new(
            NodeKind::Source(SourceState { equality }),
            Status::Clean,
            Some(Rc::new(value)),
        );
        let id = self.insert(node);
        trace!(node = %id, "source created");

        Source {
            id,
            _marker: PhantomData,
        }
    }

    /// Write a new value.
    ///
    /// Returns `Ok(true)` if the value changed and downstream reactions were
    /// marked, `Ok(false)` if the new value equals the current one. Queued
    /// effects run on the next [`flush_effects`](Runtime::flush_effects).
    ///
    /// Fails with [`ReactiveError::UnsafeMutation`] while any derived is
    /// evaluating, including from effects or roots created by its compute.
    pub fn set<T: 'static>(&self, source: &Source<T>, value: T) -> Result<bool> {
        let id = source.id;
        if let Some(reaction) = self.context.evaluating_top() {
            return Err(ReactiveError::UnsafeMutation { node: id, reaction });
        }

        let (previous, equality) = self
            .with_node(id, |node| match &node.kind {
                NodeKind::Source(state) => Some((node.value.clone(), state.equality.clone())),
                _ => None,
            })
            .flatten()
            .ok_or(ReactiveError::Destroyed { node: id })?;

        let value: Rc<dyn Any> = Rc::new(value);
        if let Some(previous) = &previous {
            if equality.equals(previous, &value) {
                trace!(node = %id, "source write skipped, value unchanged");
                return Ok(false);
            }
        }

        let stamp = self.advance_version();
        let previous = self.with_node_mut(id, |node| {
            node.changed_at = stamp;
            node.value.replace(value)
        });
        drop(previous);

        trace!(node = %id, version = stamp, "source changed");
        self.mark_reactions(id);
        Ok(true)
    }

    /// Write a value computed from the current one. See [`Runtime::set`].
    pub fn update<T: 'static>(&self, source: &Source<T>, f: impl FnOnce(&T) -> T) -> Result<bool> {
        let current = self
            .with_node(source.id, |node| node.value.clone())
            .flatten()
            .ok_or(ReactiveError::Destroyed { node: source.id })?
            .downcast::<T>()
            .map_err(|_| ReactiveError::TypeMismatch {
                node: source.id,
                expected: std::any::type_name::<T>(),
            })?;
        self.set(source, f(&current))
    }
}
