//! Signal Implementation
//!
//! A Signal is the fundamental reactive primitive. It holds a value and
//! tracks which computations depend on it.
//!
//! # How Signals Work
//!
//! 1. When a signal is read within a reactive context (memo/effect), the
//!    signal registers that context as a subscriber.
//!
//! 2. When a signal is written, the new value is queued with the runtime.
//!    At commit time it is compared with the current value using the
//!    signal's equality predicate; an equal value is dropped and nothing
//!    downstream runs.
//!
//! 3. A changed value bumps the signal's version stamp, and the runtime
//!    re-runs the computations that depend on it.
//!
//! # Read/Write Split
//!
//! [`Signal`] can both read and write. [`Signal::split`] (and
//! [`create_signal`]) hand out a [`ReadSignal`] / [`WriteSignal`] pair so
//! read access can be passed around without write access.

use std::cell::RefCell;
use std::fmt::Debug;
use std::rc::Rc;

use super::runtime::{PendingWrite, Runtime, WeakRuntime};
use crate::error::Result;
use crate::graph::{Node, NodeId};

/// Equality predicate deciding whether a write is a change.
pub(crate) type EqualsFn<T> = Box<dyn Fn(&T, &T) -> bool>;

/// Tracked read access to a reactive value.
pub trait Get<T> {
    /// Return the current value, registering a dependency if called from a
    /// running computation.
    fn get(&self) -> T;
}

struct SignalInner<T: 'static> {
    id: NodeId,
    runtime: WeakRuntime,

    /// The committed value, visible to readers.
    value: RefCell<T>,

    /// The latest queued write, if any.
    pending: RefCell<Option<T>>,

    equals: EqualsFn<T>,
}

impl<T: 'static> PendingWrite for SignalInner<T> {
    fn commit(&self) -> bool {
        let Some(next) = self.pending.borrow_mut().take() else {
            return false;
        };

        let mut current = self.value.borrow_mut();
        if (self.equals)(&*current, &next) {
            return false;
        }
        *current = next;
        true
    }

    fn discard(&self) {
        self.pending.borrow_mut().take();
    }
}

impl<T: 'static> Drop for SignalInner<T> {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.upgrade() {
            runtime.unregister(self.id);
        }
    }
}

/// A reactive signal holding a value of type `T`.
///
/// # Example
///
/// ```rust
/// use ripple_core::reactive::Signal;
///
/// let count = Signal::new(0);
/// assert_eq!(count.get(), 0);
///
/// count.set(5).unwrap();
/// assert_eq!(count.get(), 5);
/// ```
pub struct Signal<T: 'static> {
    inner: Rc<SignalInner<T>>,
}

impl<T: PartialEq + 'static> Signal<T> {
    /// Create a signal on the current thread's runtime, using `PartialEq`
    /// to detect changes.
    pub fn new(value: T) -> Self {
        Runtime::current().signal(value)
    }
}

impl<T: 'static> Signal<T> {
    /// Create a signal on the current thread's runtime with a custom
    /// equality predicate.
    pub fn new_with(value: T, equals: impl Fn(&T, &T) -> bool + 'static) -> Self {
        Runtime::current().signal_with(value, equals)
    }

    /// The signal's node in the dependency graph.
    pub fn id(&self) -> NodeId {
        self.inner.id
    }

    /// Call `f` with a borrow of the committed value, tracking the read.
    ///
    /// # Panics
    ///
    /// Panics if `f` writes this signal outside a batch or computation: the
    /// write commits immediately while the value is still borrowed.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        if let Some(runtime) = self.inner.runtime.upgrade() {
            runtime.track(self.inner.id);
        }
        f(&*self.inner.value.borrow())
    }

    /// Call `f` with a borrow of the committed value without tracking.
    pub fn with_untracked<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&*self.inner.value.borrow())
    }

    /// Write a new value.
    ///
    /// Outside a batch the change propagates before this returns, and any
    /// computation failures are returned here. Inside a batch the write is
    /// queued until the batch closes; reads keep seeing the old value.
    pub fn set(&self, value: T) -> Result<()> {
        match self.inner.runtime.upgrade() {
            Some(runtime) => {
                *self.inner.pending.borrow_mut() = Some(value);
                let write: Rc<dyn PendingWrite> = self.inner.clone();
                runtime.queue_write(self.inner.id, write)
            }
            // No runtime left to notify
            None => {
                *self.inner.value.borrow_mut() = value;
                Ok(())
            }
        }
    }

    /// Write a value derived from the latest one.
    ///
    /// Inside a batch, the latest value is the last queued write, so
    /// successive updates compose.
    pub fn update(&self, f: impl FnOnce(&T) -> T) -> Result<()> {
        let next = {
            let pending = self.inner.pending.borrow();
            match pending.as_ref() {
                Some(queued) => f(queued),
                None => f(&*self.inner.value.borrow()),
            }
        };
        self.set(next)
    }

    /// Number of computations currently subscribed to this signal.
    pub fn subscriber_count(&self) -> usize {
        self.inner
            .runtime
            .upgrade()
            .map_or(0, |runtime| runtime.dependent_count(self.inner.id))
    }

    /// Split into a read half and a write half.
    pub fn split(self) -> (ReadSignal<T>, WriteSignal<T>) {
        (
            ReadSignal {
                signal: self.clone(),
            },
            WriteSignal { signal: self },
        )
    }

    /// A read-only handle sharing this signal.
    pub fn read_only(&self) -> ReadSignal<T> {
        ReadSignal {
            signal: self.clone(),
        }
    }
}

impl<T: Clone + 'static> Signal<T> {
    /// Get the current value, tracking the read.
    pub fn get(&self) -> T {
        self.with(T::clone)
    }

    /// Get the current value without tracking.
    pub fn get_untracked(&self) -> T {
        self.with_untracked(T::clone)
    }
}

impl<T: Clone + 'static> Get<T> for Signal<T> {
    fn get(&self) -> T {
        Signal::get(self)
    }
}

impl<T: 'static> Clone for Signal<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: Debug + 'static> Debug for Signal<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signal")
            .field("id", &self.inner.id)
            .field("value", &*self.inner.value.borrow())
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

/// Read half of a signal.
pub struct ReadSignal<T: 'static> {
    signal: Signal<T>,
}

impl<T: 'static> ReadSignal<T> {
    pub fn id(&self) -> NodeId {
        self.signal.id()
    }

    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        self.signal.with(f)
    }

    pub fn with_untracked<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        self.signal.with_untracked(f)
    }

    pub fn subscriber_count(&self) -> usize {
        self.signal.subscriber_count()
    }
}

impl<T: Clone + 'static> ReadSignal<T> {
    pub fn get(&self) -> T {
        self.signal.get()
    }

    pub fn get_untracked(&self) -> T {
        self.signal.get_untracked()
    }
}

impl<T: Clone + 'static> Get<T> for ReadSignal<T> {
    fn get(&self) -> T {
        self.signal.get()
    }
}

impl<T: 'static> Clone for ReadSignal<T> {
    fn clone(&self) -> Self {
        Self {
            signal: self.signal.clone(),
        }
    }
}

impl<T: Debug + 'static> Debug for ReadSignal<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("ReadSignal").field(&self.signal).finish()
    }
}

/// Write half of a signal.
pub struct WriteSignal<T: 'static> {
    signal: Signal<T>,
}

impl<T: 'static> WriteSignal<T> {
    pub fn id(&self) -> NodeId {
        self.signal.id()
    }

    /// See [`Signal::set`].
    pub fn set(&self, value: T) -> Result<()> {
        self.signal.set(value)
    }

    /// See [`Signal::update`].
    pub fn update(&self, f: impl FnOnce(&T) -> T) -> Result<()> {
        self.signal.update(f)
    }
}

impl<T: 'static> Clone for WriteSignal<T> {
    fn clone(&self) -> Self {
        Self {
            signal: self.signal.clone(),
        }
    }
}

impl<T: 'static> Debug for WriteSignal<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteSignal").field("id", &self.id()).finish()
    }
}

impl Runtime {
    /// Create a signal on this runtime, using `PartialEq` to detect changes.
    pub fn signal<T: PartialEq + 'static>(&self, value: T) -> Signal<T> {
        self.signal_with(value, <T as PartialEq>::eq)
    }

    /// Create a signal on this runtime with a custom equality predicate.
    pub fn signal_with<T: 'static>(
        &self,
        value: T,
        equals: impl Fn(&T, &T) -> bool + 'static,
    ) -> Signal<T> {
        let id = self.register_node(Node::source());
        Signal {
            inner: Rc::new(SignalInner {
                id,
                runtime: self.downgrade(),
                value: RefCell::new(value),
                pending: RefCell::new(None),
                equals: Box::new(equals),
            }),
        }
    }
}

/// Create a signal on the current thread's runtime and split it into a
/// read half and a write half.
pub fn create_signal<T: PartialEq + 'static>(value: T) -> (ReadSignal<T>, WriteSignal<T>) {
    Signal::new(value).split()
}

/// Like [`create_signal`], with a custom equality predicate.
pub fn create_signal_with<T: 'static>(
    value: T,
    equals: impl Fn(&T, &T) -> bool + 'static,
) -> (ReadSignal<T>, WriteSignal<T>) {
    Signal::new_with(value, equals).split()
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
