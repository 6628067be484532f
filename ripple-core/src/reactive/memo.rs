//! Memo Implementation
//!
//! A Memo is a cached derived value that re-evaluates only when its
//! dependencies change.
//!
//! # How Memos Work
//!
//! 1. On creation, the memo runs its computation and caches the result.
//!
//! 2. When accessed again, if no dependencies have changed, it returns the
//!    cached value.
//!
//! 3. When a dependency changes, the runtime marks the memo for checking
//!    and brings it up to date during propagation, before anything that
//!    reads it. A read of a memo that is still waiting for its turn pulls
//!    it up to date on the spot.
//!
//! 4. If the recomputed value equals the cached one, the memo absorbs the
//!    change: its own dependents are not re-run.
//!
//! # Why This Matters
//!
//! The absorption step is what keeps propagation narrow. In
//! `a -> is_even(a) -> render`, changing `a` from 2 to 4 recomputes
//! `is_even` but never re-runs `render`.

use std::cell::{Cell, RefCell};
use std::fmt::Debug;
use std::rc::{Rc, Weak};

use super::runtime::{Runtime, WeakRuntime};
use super::signal::{EqualsFn, Get};
use super::subscriber::{Reactive, Subscriber};
use crate::error::BoxError;
use crate::graph::{Node, NodeId, NodeKind};

struct MemoInner<T: 'static> {
    id: NodeId,
    runtime: WeakRuntime,

    /// The computation function.
    compute: Box<dyn Fn() -> T>,

    /// The cached value. Filled by the first run at creation.
    value: RefCell<Option<T>>,

    equals: EqualsFn<T>,

    /// Number of times the computation has run.
    run_count: Cell<usize>,
}

impl<T: 'static> Reactive for MemoInner<T> {
    fn node_id(&self) -> NodeId {
        self.id
    }

    fn kind(&self) -> NodeKind {
        NodeKind::Memo
    }

    fn execute(&self) -> Result<bool, BoxError> {
        let next = (self.compute)();
        self.run_count.set(self.run_count.get() + 1);

        let mut value = self.value.borrow_mut();
        let changed = match value.as_ref() {
            Some(previous) => !(self.equals)(previous, &next),
            None => true,
        };
        if changed {
            *value = Some(next);
        }
        Ok(changed)
    }
}

impl<T: 'static> Drop for MemoInner<T> {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.upgrade() {
            runtime.unregister(self.id);
        }
    }
}

/// A cached derived value that recomputes only when dependencies change.
///
/// # Example
///
/// ```rust
/// use ripple_core::reactive::{create_memo, create_signal};
///
/// let (a, set_a) = create_signal("a".to_string());
/// let c = {
///     let a = a.clone();
///     create_memo(move || format!("{}x", a.get()))
/// };
/// assert_eq!(c.get(), "ax");
///
/// set_a.set("z".to_string()).unwrap();
/// assert_eq!(c.get(), "zx");
/// ```
pub struct Memo<T: 'static> {
    inner: Rc<MemoInner<T>>,
}

impl<T: PartialEq + 'static> Memo<T> {
    /// Create a memo on the current thread's runtime.
    pub fn new(compute: impl Fn() -> T + 'static) -> Self {
        Runtime::current().memo(compute)
    }
}

impl<T: 'static> Memo<T> {
    /// Create a memo on the current thread's runtime with a custom equality
    /// predicate for its value.
    pub fn new_with(
        compute: impl Fn() -> T + 'static,
        equals: impl Fn(&T, &T) -> bool + 'static,
    ) -> Self {
        Runtime::current().memo_with(compute, equals)
    }

    pub fn id(&self) -> NodeId {
        self.inner.id
    }

    /// Call `f` with a borrow of the up-to-date value, tracking the read.
    ///
    /// # Panics
    ///
    /// Panics if called from inside this memo's own computation.
    ///
    /// The value stays borrowed while `f` runs. If `f` writes one of the
    /// memo's dependencies outside a batch, the write flushes immediately,
    /// the memo recomputes while still borrowed, and the `RefCell` borrow
    /// check panics. Wrap the call in [`Runtime::batch`] to defer the write
    /// until `f` has returned.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        if let Some(runtime) = self.inner.runtime.upgrade() {
            if runtime.is_running(self.inner.id) {
                panic!("cycle detected: memo {} was read during its own computation", self.inner.id);
            }
            runtime.track(self.inner.id);
            self.refresh(&runtime);
        }
        self.with_cached(f)
    }

    /// Call `f` with a borrow of the up-to-date value without tracking.
    pub fn with_untracked<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        if let Some(runtime) = self.inner.runtime.upgrade() {
            self.refresh(&runtime);
        }
        self.with_cached(f)
    }

    /// Number of times the computation has run.
    pub fn run_count(&self) -> usize {
        self.inner.run_count.get()
    }

    /// Number of nodes read during the last run.
    pub fn dependency_count(&self) -> usize {
        self.inner
            .runtime
            .upgrade()
            .map_or(0, |runtime| runtime.dependency_count(self.inner.id))
    }

    /// Number of computations that read this memo during their last run.
    pub fn dependent_count(&self) -> usize {
        self.inner
            .runtime
            .upgrade()
            .map_or(0, |runtime| runtime.dependent_count(self.inner.id))
    }

    fn refresh(&self, runtime: &Runtime) {
        // Memo bodies are infallible, so an error here can only come from a
        // stale upstream memo that was itself dropped mid-update.
        if let Err(err) = runtime.update_if_necessary(self.inner.id) {
            tracing::error!(node = %self.inner.id, error = %err, "failed to refresh memo");
        }
    }

    fn with_cached<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        let value = self.inner.value.borrow();
        f(value.as_ref().expect("memo value is computed at creation"))
    }
}

impl<T: Clone + 'static> Memo<T> {
    /// Get the current value, recomputing first if it is stale.
    pub fn get(&self) -> T {
        self.with(T::clone)
    }

    pub fn get_untracked(&self) -> T {
        self.with_untracked(T::clone)
    }
}

impl<T: Clone + 'static> Get<T> for Memo<T> {
    fn get(&self) -> T {
        Memo::get(self)
    }
}

impl<T: 'static> Clone for Memo<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: Debug + 'static> Debug for Memo<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Memo")
            .field("id", &self.inner.id)
            .field("value", &*self.inner.value.borrow())
            .field("run_count", &self.run_count())
            .field("dependent_count", &self.dependent_count())
            .finish()
    }
}

impl Runtime {
    /// Create a memo on this runtime, using `PartialEq` to decide whether a
    /// recomputed value is a change.
    ///
    /// The computation runs once before this returns. Errors from the flush
    /// of writes it made are logged, not returned; a computation that writes
    /// is better expressed with [`Runtime::try_effect`].
    pub fn memo<T: PartialEq + 'static>(&self, compute: impl Fn() -> T + 'static) -> Memo<T> {
        self.memo_with(compute, <T as PartialEq>::eq)
    }

    /// Create a memo on this runtime with a custom equality predicate.
    pub fn memo_with<T: 'static>(
        &self,
        compute: impl Fn() -> T + 'static,
        equals: impl Fn(&T, &T) -> bool + 'static,
    ) -> Memo<T> {
        let id = self.register_node(Node::memo());
        let inner = Rc::new(MemoInner {
            id,
            runtime: self.downgrade(),
            compute: Box::new(compute),
            value: RefCell::new(None),
            equals: Box::new(equals),
            run_count: Cell::new(0),
        });

        let weak: Weak<MemoInner<T>> = Rc::downgrade(&inner);
        self.register_computation(id, Subscriber::Weak(weak));

        // Writes made by the first run are flushed once it has finished
        if let Err(err) = self.batch(|| self.run(id)).and_then(|run| run) {
            tracing::error!(runtime = self.name(), node = %id, error = %err, "initial memo run failed");
        }

        Memo { inner }
    }
}

/// Create a memo on the current thread's runtime.
///
/// Like [`Runtime::memo`], errors from the first run's flush are only
/// logged. See [`try_create_effect`](super::try_create_effect) for a
/// creation that reports them.
pub fn create_memo<T: PartialEq + 'static>(compute: impl Fn() -> T + 'static) -> Memo<T> {
    Memo::new(compute)
}

/// Like [`create_memo`], with a custom equality predicate.
pub fn create_memo_with<T: 'static>(
    compute: impl Fn() -> T + 'static,
    equals: impl Fn(&T, &T) -> bool + 'static,
) -> Memo<T> {
    Memo::new_with(compute, equals)
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
