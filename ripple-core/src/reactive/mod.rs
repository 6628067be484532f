//! Reactive Primitives
//!
//! This module implements the reactive system: signals, memos, effects,
//! batches and resources, all coordinated by a [`Runtime`].
//!
//! # Concepts
//!
//! ## Signals
//!
//! A Signal is a container for mutable state. When a signal's value is read
//! within a tracking context (a memo or effect), the signal records that
//! context as a dependent. When the signal's value changes, the dependents
//! are re-run.
//!
//! ## Memos
//!
//! A Memo is a derived value that caches its result. It re-evaluates only when
//! one of its dependencies changes, and stops propagation when the new value
//! equals the old one.
//!
//! ## Effects
//!
//! An Effect is a side-effecting computation that runs whenever its
//! dependencies change. Effects synchronize reactive state with the outside
//! world.
//!
//! ## Batches
//!
//! A batch defers writes until it closes, then propagates all of them in one
//! pass.
//!
//! ## Resources
//!
//! A Resource feeds a source value to an external producer and exposes the
//! outcome as `Pending`, `Ready` or `Failed`.
//!
//! # Implementation Notes
//!
//! Dependencies are discovered automatically. The runtime keeps a stack of
//! running computations; a read registers a dependency of whichever
//! computation is on top. Every run rebuilds the dependency set from scratch.

mod batch;
mod context;
mod effect;
mod memo;
mod resource;
mod runtime;
mod signal;
mod subscriber;

pub use batch::{batch, untrack};
pub use effect::{create_effect, try_create_effect, Effect};
pub use memo::{create_memo, create_memo_with, Memo};
pub use resource::{create_resource, create_resource_sync, Resource, ResourceState};
pub use runtime::Runtime;
pub use signal::{create_signal, create_signal_with, Get, ReadSignal, Signal, WriteSignal};
