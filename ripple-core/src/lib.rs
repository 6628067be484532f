//! Ripple Core
//!
//! This crate provides a fine-grained reactive engine: mutable signals,
//! derived memos and effects, connected by a dependency graph that is
//! discovered automatically at run time. When a signal changes, only the
//! computations that read it (directly or through memos) run again, each
//! at most once, in dependency order.
//!
//! It implements:
//!
//! - Reactive primitives (signals, memos, effects)
//! - Batched, transactional writes
//! - Resources bridging to async producers
//! - Epoch-stamped propagation over the dependency graph
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `reactive`: Reactive primitives, the runtime and dependency tracking
//! - `graph`: Dependency graph and propagation ordering
//! - `config`: Runtime settings
//! - `error`: Error types
//!
//! # Example
//!
//! ```rust
//! use ripple_core::reactive::{create_effect, create_memo, create_signal};
//! use std::cell::RefCell;
//! use std::rc::Rc;
//!
//! // Create a signal
//! let (count, set_count) = create_signal(1);
//!
//! // Create a derived value
//! let doubled = {
//!     let count = count.clone();
//!     create_memo(move || count.get() * 2)
//! };
//!
//! // Create an effect
//! let seen = Rc::new(RefCell::new(Vec::new()));
//! let _effect = {
//!     let seen = seen.clone();
//!     create_effect(move || seen.borrow_mut().push((count.get(), doubled.get())))
//! };
//!
//! // Update the signal; the effect runs once more
//! set_count.set(5).unwrap();
//! assert_eq!(*seen.borrow(), vec![(1, 2), (5, 10)]);
//! ```

pub mod config;
pub mod error;
pub mod graph;
pub mod reactive;

pub use config::RuntimeConfig;
pub use error::{BoxError, ReactiveError, Result};
pub use reactive::{
    batch, create_effect, create_memo, create_resource, create_resource_sync, create_signal,
    untrack, Effect, Memo, ReadSignal, Resource, ResourceState, Runtime, Signal, WriteSignal,
};
