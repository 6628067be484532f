//! Resources
//!
//! A resource connects the graph to an external producer, typically an
//! async fetch. It is an effect that reads a source, hands the value to the
//! producer, and writes the outcome into an output signal once the
//! producer settles.
//!
//! # Lifecycle
//!
//! 1. On creation and whenever the source changes (or [`Resource::refetch`]
//!    is called), the internal effect starts a new request and raises the
//!    `loading` flag.
//!
//! 2. When the producer settles, the result is committed in a batch of its
//!    own. The batch that triggered the request has usually closed by then,
//!    so the commit never rejoins it.
//!
//! 3. In-flight requests are not cancelled. Every settled request is
//!    committed, so the last one to settle wins, but only the latest request
//!    clears `loading`.

use std::cell::Cell;
use std::fmt;
use std::future::Future;
use std::rc::Rc;

use super::effect::Effect;
use super::runtime::{Runtime, WeakRuntime};
use super::signal::{Get, Signal};
use crate::error::Result;

/// Output of a resource.
#[derive(Debug)]
pub enum ResourceState<U, E> {
    /// No request has settled yet.
    Pending,
    Ready(U),
    /// The producer failed. Two failures are only equal if they share the
    /// same allocation.
    Failed(Rc<E>),
}

impl<U, E> ResourceState<U, E> {
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending)
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready(_))
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }

    pub fn value(&self) -> Option<&U> {
        match self {
            Self::Ready(value) => Some(value),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&Rc<E>> {
        match self {
            Self::Failed(err) => Some(err),
            _ => None,
        }
    }
}

impl<U, E> Default for ResourceState<U, E> {
    fn default() -> Self {
        Self::Pending
    }
}

impl<U: Clone, E> Clone for ResourceState<U, E> {
    fn clone(&self) -> Self {
        match self {
            Self::Pending => Self::Pending,
            Self::Ready(value) => Self::Ready(value.clone()),
            Self::Failed(err) => Self::Failed(Rc::clone(err)),
        }
    }
}

impl<U: PartialEq, E> PartialEq for ResourceState<U, E> {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Pending, Self::Pending) => true,
            (Self::Ready(a), Self::Ready(b)) => a == b,
            (Self::Failed(a), Self::Failed(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

/// Commits the outcome of one request.
struct Settle<U: 'static, E: 'static> {
    runtime: WeakRuntime,
    state: Signal<ResourceState<U, E>>,
    loading: Signal<bool>,
    sequence: Rc<Cell<u64>>,
    request: u64,
}

impl<U: 'static, E: fmt::Debug + 'static> Settle<U, E> {
    fn commit(self, result: std::result::Result<U, E>) {
        let next = match result {
            Ok(value) => ResourceState::Ready(value),
            Err(err) => {
                tracing::error!(
                    node = %self.state.id(),
                    request = self.request,
                    error = ?err,
                    "resource producer failed"
                );
                ResourceState::Failed(Rc::new(err))
            }
        };
        let latest = self.sequence.get() == self.request;

        let outcome = match self.runtime.upgrade() {
            Some(runtime) => runtime.batch(|| self.write(next, latest)).and_then(|r| r),
            None => self.write(next, latest),
        };
        if let Err(err) = outcome {
            tracing::warn!(
                node = %self.state.id(),
                request = self.request,
                error = %err,
                "propagation after resource settlement failed"
            );
        }
    }

    fn write(&self, next: ResourceState<U, E>, latest: bool) -> Result<()> {
        self.state.set(next)?;
        if latest {
            self.loading.set(false)?;
        }
        Ok(())
    }
}

struct ResourceInner<U: 'static, E: 'static> {
    state: Signal<ResourceState<U, E>>,
    loading: Signal<bool>,
    refetch: Signal<u64>,
    effect: Effect,
}

impl<U: 'static, E: 'static> Drop for ResourceInner<U, E> {
    fn drop(&mut self) {
        self.effect.dispose();
    }
}

/// A value derived from a source through an external producer.
///
/// Dropping the last handle stops the resource. Requests already in flight
/// still settle, but nothing reads the result.
///
/// # Example
///
/// ```rust
/// use ripple_core::reactive::{create_resource_sync, create_signal};
///
/// let (id, set_id) = create_signal(1);
/// let user = create_resource_sync(id, |id: i32| {
///     if id > 0 { Ok(format!("user-{id}")) } else { Err("invalid id") }
/// });
/// assert_eq!(user.get().as_deref(), Some("user-1"));
///
/// set_id.set(-1).unwrap();
/// assert!(user.state().is_failed());
/// ```
pub struct Resource<U: 'static, E: 'static> {
    inner: Rc<ResourceInner<U, E>>,
}

impl<U: 'static, E: 'static> Resource<U, E> {
    /// Call `f` with the current state, tracking the read.
    pub fn with_state<R>(&self, f: impl FnOnce(&ResourceState<U, E>) -> R) -> R {
        self.inner.state.with(f)
    }

    /// Whether a request is in flight. Tracked.
    pub fn loading(&self) -> bool {
        self.inner.loading.get()
    }

    /// The error of the last settled request, if it failed. Tracked.
    pub fn error(&self) -> Option<Rc<E>> {
        self.with_state(|state| state.error().cloned())
    }

    /// Re-run the producer with the source's current value.
    pub fn refetch(&self) -> Result<()> {
        self.inner.refetch.update(|n| n.wrapping_add(1))
    }
}

impl<U: Clone + 'static, E: 'static> Resource<U, E> {
    /// The current state. Tracked.
    pub fn state(&self) -> ResourceState<U, E> {
        self.inner.state.get()
    }

    /// The value of the last settled request, if it succeeded. Tracked.
    pub fn get(&self) -> Option<U> {
        self.with_state(|state| state.value().cloned())
    }
}

impl<U: Clone + 'static, E: 'static> Get<ResourceState<U, E>> for Resource<U, E> {
    fn get(&self) -> ResourceState<U, E> {
        self.state()
    }
}

impl<U: 'static, E: 'static> Clone for Resource<U, E> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<U: fmt::Debug + 'static, E: fmt::Debug + 'static> fmt::Debug for Resource<U, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.inner.state.with_untracked(|state| {
            f.debug_struct("Resource")
                .field("state", state)
                .field("loading", &self.inner.loading.get_untracked())
                .finish()
        })
    }
}

impl Runtime {
    /// Create a resource whose producer returns a future.
    ///
    /// # Panics
    ///
    /// Requests are spawned with [`tokio::task::spawn_local`], so this
    /// panics unless called from inside a [`tokio::task::LocalSet`]. Later
    /// requests (source changes, refetches) must be issued there too.
    pub fn resource<S, U, E, Fut>(
        &self,
        source: impl Get<S> + 'static,
        producer: impl Fn(S) -> Fut + 'static,
    ) -> Resource<U, E>
    where
        S: 'static,
        U: PartialEq + 'static,
        E: fmt::Debug + 'static,
        Fut: Future<Output = std::result::Result<U, E>> + 'static,
    {
        self.spawn_resource(source, move |input, settle: Settle<U, E>| {
            let request = producer(input);
            tokio::task::spawn_local(async move {
                let result = request.await;
                settle.commit(result);
            });
        })
    }

    /// Create a resource whose producer returns its result directly. The
    /// result is committed within the same propagation.
    pub fn resource_sync<S, U, E>(
        &self,
        source: impl Get<S> + 'static,
        producer: impl Fn(S) -> std::result::Result<U, E> + 'static,
    ) -> Resource<U, E>
    where
        S: 'static,
        U: PartialEq + 'static,
        E: fmt::Debug + 'static,
    {
        self.spawn_resource(source, move |input, settle: Settle<U, E>| {
            settle.commit(producer(input))
        })
    }

    fn spawn_resource<S, U, E>(
        &self,
        source: impl Get<S> + 'static,
        dispatch: impl Fn(S, Settle<U, E>) + 'static,
    ) -> Resource<U, E>
    where
        S: 'static,
        U: PartialEq + 'static,
        E: fmt::Debug + 'static,
    {
        let state = self.signal(ResourceState::Pending);
        let loading = self.signal(false);
        let refetch = self.signal(0_u64);
        let sequence = Rc::new(Cell::new(0_u64));

        let effect = {
            let runtime = self.downgrade();
            let state = state.clone();
            let loading = loading.clone();
            let refetch = refetch.clone();

            self.effect(move || {
                refetch.with(|_| ());
                let input = source.get();

                let request = sequence.get() + 1;
                sequence.set(request);
                tracing::trace!(node = %state.id(), request, "starting resource request");

                if let Err(err) = loading.set(true) {
                    tracing::warn!(node = %state.id(), error = %err, "failed to raise loading flag");
                }

                let settle = Settle {
                    runtime: runtime.clone(),
                    state: state.clone(),
                    loading: loading.clone(),
                    sequence: Rc::clone(&sequence),
                    request,
                };
                // Reads made by the producer belong to it, not to the resource
                match runtime.upgrade() {
                    Some(runtime) => runtime.untrack(|| dispatch(input, settle)),
                    None => dispatch(input, settle),
                }
            })
        };

        Resource {
            inner: Rc::new(ResourceInner {
                state,
                loading,
                refetch,
                effect,
            }),
        }
    }
}

/// Create a resource with an async producer on the current thread's
/// runtime.
///
/// See [`Runtime::resource`] for the `LocalSet` requirement.
#[doc(alias = "get_resource")]
pub fn create_resource<S, U, E, Fut>(
    source: impl Get<S> + 'static,
    producer: impl Fn(S) -> Fut + 'static,
) -> Resource<U, E>
where
    S: 'static,
    U: PartialEq + 'static,
    E: fmt::Debug + 'static,
    Fut: Future<Output = std::result::Result<U, E>> + 'static,
{
    Runtime::current().resource(source, producer)
}

/// Create a resource with a synchronous producer on the current thread's
/// runtime.
pub fn create_resource_sync<S, U, E>(
    source: impl Get<S> + 'static,
    producer: impl Fn(S) -> std::result::Result<U, E> + 'static,
) -> Resource<U, E>
where
    S: 'static,
    U: PartialEq + 'static,
    E: fmt::Debug + 'static,
{
    Runtime::current().resource_sync(source, producer)
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
