//! Cascade Core
//!
//! This crate provides the core of the Cascade reactive graph: a lazy,
//! memoizing recomputation engine for derived values. It implements:
//!
//! - Sources: mutable reactive cells
//! - Deriveds: cached computations that recompute only when an input changed
//! - Effects: side-effecting reactions, queued and flushed on demand
//! - Ownership: reactions created during an evaluation are disposed with it
//!
//! # Architecture
//!
//! - `reactive`: the runtime, node arena and every primitive built on it
//!
//! # Example
//!
//! ```rust
//! use cascade_core::reactive::{Runtime, Status};
//!
//! let rt = Runtime::new();
//! let count = rt.source(1);
//! let doubled = rt.derived(move |rt| Ok(rt.get(&count)? * 2));
//!
//! assert_eq!(rt.get(&doubled).unwrap(), 2);
//! assert_eq!(rt.version(&doubled), 1);
//!
//! // Writing an equal value is not a change.
//! rt.set(&count, 1).unwrap();
//! assert_eq!(rt.get(&doubled).unwrap(), 2);
//! assert_eq!(rt.version(&doubled), 1);
//!
//! rt.set(&count, 5).unwrap();
//! assert_eq!(rt.status(doubled), Status::Dirty);
//! assert_eq!(rt.get(&doubled).unwrap(), 10);
//! assert_eq!(rt.version(&doubled), 2);
//! ```

pub mod reactive;

pub use reactive::{
    Derived, Effect, Equality, NodeId, ReactiveError, Readable, Runtime, RuntimeBuilder, SameValue,
    Source, Status,
};
