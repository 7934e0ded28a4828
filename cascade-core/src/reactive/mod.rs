//! Reactive Primitives
//!
//! This module implements a pull-based reactive graph: sources, deriveds and
//! effects, all owned by a single [`Runtime`].
//!
//! # Concepts
//!
//! ## Sources
//!
//! A source is a mutable cell. Writing a different value marks everything
//! downstream as possibly stale.
//!
//! ## Deriveds
//!
//! A derived is a memoized function of other reactive values. It is lazy: it
//! recomputes only when read, and only if a dependency actually changed. When
//! a recomputation produces a value equal to the cached one (per its
//! [`Equality`] strategy), downstream observers see no change.
//!
//! ## Effects
//!
//! An effect is a side-effecting reaction. Effects run once on creation, are
//! queued when their dependencies change, and run again on
//! [`Runtime::flush_effects`].
//!
//! # Implementation Notes
//!
//! All nodes live in one slab arena addressed by generational [`NodeId`]s.
//! Dependencies are discovered automatically: while a reaction evaluates, the
//! runtime records every node it reads. Every piece of evaluation state (the
//! active owner, the evaluation stack, the version clock) is owned by the
//! runtime and restored through guards, so failures unwind it correctly.

mod context;
mod derived;
mod dispose;
mod effect;
mod equality;
mod error;
mod node;
mod runtime;
mod source;

pub use derived::Derived;
pub use effect::Effect;
pub use equality::{Equality, SameValue};
pub use error::{ReactiveError, Result};
pub use node::{NodeId, Status};
pub use runtime::{Readable, Runtime, RuntimeBuilder, DEFAULT_MAX_DEPTH, DEFAULT_MAX_EFFECT_RUNS};
pub use source::Source;
