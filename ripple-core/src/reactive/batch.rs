//! Batching
//!
//! A batch is a transaction over signal writes. Writes issued inside it are
//! queued rather than propagated; when the outermost batch closes, the
//! queue is flushed once, so every affected computation runs at most once
//! no matter how many signals changed.
//!
//! Writes are deferred, not just their propagation: until the batch
//! closes, reads keep returning the committed value.
//!
//! ```rust
//! use ripple_core::reactive::{batch, create_signal};
//!
//! let (a, set_a) = create_signal("a");
//! batch(|| {
//!     set_a.set("aa").unwrap();
//!     assert_eq!(a.get(), "a");
//! })
//! .unwrap();
//! assert_eq!(a.get(), "aa");
//! ```

use std::cell::Cell;

use super::runtime::Runtime;
use crate::error::Result;

/// Keeps the batch depth balanced even if the batch body panics.
struct BatchGuard<'a> {
    depth: &'a Cell<usize>,
}

impl<'a> BatchGuard<'a> {
    fn enter(depth: &'a Cell<usize>) -> Self {
        depth.set(depth.get() + 1);
        Self { depth }
    }
}

impl Drop for BatchGuard<'_> {
    fn drop(&mut self) {
        self.depth.set(self.depth.get().saturating_sub(1));
    }
}

impl Runtime {
    /// Run `f` as a transaction. Nested batches coalesce into the outermost
    /// one, which flushes when it closes.
    ///
    /// Returns `f`'s result, or the failures of computations re-run by the
    /// flush.
    pub fn batch<R>(&self, f: impl FnOnce() -> R) -> Result<R> {
        let result = {
            let _guard = BatchGuard::enter(&self.inner.batch_depth);
            f()
        };

        if self.inner.batch_depth.get() == 0 {
            self.flush()?;
        }
        Ok(result)
    }

    /// Run `f` without recording any reads as dependencies of the running
    /// computation.
    pub fn untrack<R>(&self, f: impl FnOnce() -> R) -> R {
        let _ctx = self.inner.context.enter(None);
        f()
    }
}

/// Run `f` as a transaction on the current thread's runtime.
///
/// See [`Runtime::batch`].
pub fn batch<R>(f: impl FnOnce() -> R) -> Result<R> {
    Runtime::current().batch(f)
}

/// Run `f` without tracking reads, on the current thread's runtime.
pub fn untrack<R>(f: impl FnOnce() -> R) -> R {
    Runtime::current().untrack(f)
}
