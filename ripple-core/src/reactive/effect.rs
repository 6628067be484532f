//! Effect Implementation
//!
//! An Effect is a side-effecting computation that runs whenever its
//! dependencies change.
//!
//! # How Effects Work
//!
//! 1. When created, the effect runs its function immediately to establish
//!    its initial dependencies.
//!
//! 2. When any dependency changes, the runtime re-runs the effect once per
//!    propagation, after every memo it reads has settled.
//!
//! 3. Every run rebuilds the dependency set from scratch, so a signal read
//!    only under a condition stops triggering the effect once the condition
//!    no longer holds.
//!
//! # Differences from Memo
//!
//! - Memos return a value; effects do not.
//! - Memos are owned by their handles; effects are owned by the runtime and
//!   live until disposed.
//! - An effect created while another computation runs is owned by that
//!   computation. It is disposed when its owner re-runs or is disposed, so
//!   an effect that creates effects does not pile them up.
//! - Effect bodies may fail. A failed effect stays dirty, keeps the
//!   dependencies it read before failing, and is retried the next time one
//!   of them changes.

use std::cell::Cell;
use std::fmt;
use std::rc::Rc;

use super::runtime::{Runtime, WeakRuntime};
use super::subscriber::{Reactive, Subscriber};
use crate::error::{BoxError, Result};
use crate::graph::{Node, NodeId, NodeKind};

type EffectFn = Box<dyn Fn() -> std::result::Result<(), BoxError>>;

struct EffectInner {
    id: NodeId,
    runtime: WeakRuntime,
    run: EffectFn,
    disposed: Cell<bool>,
    run_count: Cell<usize>,
}

impl Reactive for EffectInner {
    fn node_id(&self) -> NodeId {
        self.id
    }

    fn kind(&self) -> NodeKind {
        NodeKind::Effect
    }

    fn execute(&self) -> std::result::Result<bool, BoxError> {
        if self.disposed.get() {
            return Ok(false);
        }
        self.run_count.set(self.run_count.get() + 1);
        (self.run)()?;
        Ok(false)
    }

    fn dispose(&self) {
        self.disposed.set(true);
    }
}

/// Handle to a side-effecting computation.
///
/// Dropping the handle does not stop the effect; call [`Effect::dispose`].
/// An effect created inside another effect's body is disposed for you the
/// next time the outer effect runs.
///
/// # Example
///
/// ```rust
/// use ripple_core::reactive::{create_effect, create_signal};
/// use std::cell::RefCell;
/// use std::rc::Rc;
///
/// let (count, set_count) = create_signal(0);
/// let log = Rc::new(RefCell::new(Vec::new()));
///
/// let _effect = {
///     let log = log.clone();
///     create_effect(move || log.borrow_mut().push(count.get()))
/// };
///
/// set_count.set(5).unwrap();
/// assert_eq!(*log.borrow(), vec![0, 5]);
/// ```
#[derive(Clone)]
pub struct Effect {
    inner: Rc<EffectInner>,
}

impl Effect {
    /// Create an effect on the current thread's runtime and run it once.
    ///
    /// Errors from the propagation triggered by the first run are logged,
    /// not returned; see [`try_create_effect`].
    pub fn new(run: impl Fn() + 'static) -> Self {
        Runtime::current().effect(run)
    }

    pub fn id(&self) -> NodeId {
        self.inner.id
    }

    /// Stop the effect. It will not run again, and its node is removed from
    /// the graph.
    pub fn dispose(&self) {
        self.inner.disposed.set(true);
        if let Some(runtime) = self.inner.runtime.upgrade() {
            runtime.dispose(self.inner.id);
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.get()
    }

    /// Number of times the effect has run, including failed runs.
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
}

impl fmt::Debug for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Effect")
            .field("id", &self.inner.id)
            .field("run_count", &self.run_count())
            .field("dependency_count", &self.dependency_count())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

impl Runtime {
    /// Create an effect on this runtime and run it once.
    ///
    /// The body cannot fail, but writes it makes during the first run are
    /// flushed before this returns, and other computations can fail in that
    /// flush. Those errors are logged at `warn` level and dropped. Use
    /// [`Runtime::try_effect`] to receive them.
    pub fn effect(&self, run: impl Fn() + 'static) -> Effect {
        let body: EffectFn = Box::new(move || {
            run();
            Ok(())
        });
        let (effect, result) = self.spawn_effect(body);
        if let Err(err) = result {
            tracing::warn!(runtime = self.name(), error = %err, "propagation after effect creation failed");
        }
        effect
    }

    /// Create an effect whose body may fail, and run it once.
    ///
    /// If the first run fails, the error is returned. The effect stays
    /// registered and dirty and is retried when one of the dependencies it
    /// read changes; [`ReactiveError::node`](crate::ReactiveError::node)
    /// identifies it for [`Runtime::dispose`].
    pub fn try_effect<E>(
        &self,
        run: impl Fn() -> std::result::Result<(), E> + 'static,
    ) -> Result<Effect>
    where
        E: Into<BoxError>,
    {
        let body: EffectFn = Box::new(move || run().map_err(Into::<BoxError>::into));
        let (effect, result) = self.spawn_effect(body);
        result.map(|()| effect)
    }

    fn spawn_effect(&self, run: EffectFn) -> (Effect, Result<()>) {
        let id = self.register_node(Node::effect());
        let inner = Rc::new(EffectInner {
            id,
            runtime: self.downgrade(),
            run,
            disposed: Cell::new(false),
            run_count: Cell::new(0),
        });
        self.register_computation(id, Subscriber::Owned(inner.clone()));
        self.adopt(id);

        // Writes made by the first run are flushed once it has finished
        let result = self.batch(|| self.run(id)).and_then(|run| run);
        (Effect { inner }, result)
    }
}

/// Create an effect on the current thread's runtime and run it once.
///
/// Propagation errors from the first run are only logged. Callers that need
/// them should use [`try_create_effect`].
pub fn create_effect(run: impl Fn() + 'static) -> Effect {
    Effect::new(run)
}

/// Create a fallible effect on the current thread's runtime.
///
/// See [`Runtime::try_effect`].
pub fn try_create_effect<E>(run: impl Fn() -> std::result::Result<(), E> + 'static) -> Result<Effect>
where
    E: Into<BoxError>,
{
    Runtime::current().try_effect(run)
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[test]
    fn effect_runs_on_creation() {
        let runtime = Runtime::new();
        let effect = runtime.effect(|| {});
        assert_eq!(effect.run_count(), 1);
    }

    #[test]
    fn effect_runs_when_dependency_changes() {
        let runtime = Runtime::new();
        let signal = runtime.signal(0);
        let seen = Rc::new(Cell::new(-1));

        let effect = {
            let signal = signal.clone();
            let seen = seen.clone();
            runtime.effect(move || seen.set(signal.get()))
        };
        assert_eq!(seen.get(), 0);

        signal.set(42).unwrap();
        assert_eq!(seen.get(), 42);
        assert_eq!(effect.run_count(), 2);
        assert_eq!(effect.dependency_count(), 1);
    }

    #[test]
    fn effect_does_not_run_after_disposal() {
        let runtime = Runtime::new();
        let signal = runtime.signal(0);
        let effect = {
            let signal = signal.clone();
            runtime.effect(move || {
                signal.get();
            })
        };

        effect.dispose();
        assert!(effect.is_disposed());
        assert_eq!(signal.subscriber_count(), 0);

        signal.set(1).unwrap();
        signal.set(2).unwrap();
        assert_eq!(effect.run_count(), 1);
    }

    #[test]
    fn effect_can_dispose_itself() {
        let runtime = Runtime::new();
        let signal = runtime.signal(0);
        let slot: Rc<RefCell<Option<Effect>>> = Rc::new(RefCell::new(None));

        let effect = {
            let signal = signal.clone();
            let slot = slot.clone();
            runtime.effect(move || {
                if signal.get() > 0 {
                    if let Some(me) = slot.borrow().as_ref() {
                        me.dispose();
                    }
                }
            })
        };
        *slot.borrow_mut() = Some(effect.clone());

        signal.set(1).unwrap();
        signal.set(2).unwrap();
        assert_eq!(effect.run_count(), 2);
        assert!(effect.is_disposed());
    }

    #[test]
    fn effect_clone_shares_state() {
        let runtime = Runtime::new();
        let effect1 = runtime.effect(|| {});
        let effect2 = effect1.clone();

        assert_eq!(effect1.id(), effect2.id());
        assert_eq!(effect2.run_count(), 1);

        effect1.dispose();
        assert!(effect2.is_disposed());
    }

    #[test]
    fn failed_first_run_is_reported_and_retried() {
        let runtime = Runtime::new();
        let ready = runtime.signal(false);
        let runs = Rc::new(Cell::new(0));

        let err = {
            let ready = ready.clone();
            let runs = runs.clone();
            runtime
                .try_effect(move || {
                    runs.set(runs.get() + 1);
                    if ready.get() {
                        Ok(())
                    } else {
                        Err("not ready")
                    }
                })
                .unwrap_err()
        };
        assert!(err.node().is_some());
        assert_eq!(runs.get(), 1);

        ready.set(true).unwrap();
        assert_eq!(runs.get(), 2);

        runtime.dispose(err.node().unwrap());
        ready.set(false).unwrap();
        assert_eq!(runs.get(), 2);
    }

    #[test]
    fn nested_effects_are_replaced_not_accumulated() {
        let runtime = Runtime::new();
        let signal = runtime.signal(0);
        let inner_runs = Rc::new(Cell::new(0));

        let outer = {
            let runtime = runtime.clone();
            let signal = signal.clone();
            let inner_runs = inner_runs.clone();
            runtime.clone().effect(move || {
                signal.get();
                let signal = signal.clone();
                let inner_runs = inner_runs.clone();
                runtime.effect(move || {
                    signal.get();
                    inner_runs.set(inner_runs.get() + 1);
                });
            })
        };
        assert_eq!(runtime.node_count(), 3);

        for n in 1..=5 {
            signal.set(n).unwrap();
        }

        assert_eq!(outer.run_count(), 6);
        // One run per creation; a replaced inner effect never runs again
        assert_eq!(inner_runs.get(), 6);
        assert_eq!(runtime.node_count(), 3);
        assert_eq!(signal.subscriber_count(), 2);
    }

    #[test]
    fn disposing_the_owner_disposes_nested_effects() {
        let runtime = Runtime::new();
        let signal = runtime.signal(0);
        let slot: Rc<RefCell<Option<Effect>>> = Rc::new(RefCell::new(None));

        let outer = {
            let runtime = runtime.clone();
            let signal = signal.clone();
            let slot = slot.clone();
            runtime.clone().effect(move || {
                let signal = signal.clone();
                let inner = runtime.effect(move || {
                    signal.get();
                });
                *slot.borrow_mut() = Some(inner);
            })
        };
        let inner = slot.borrow().clone().unwrap();
        assert!(!inner.is_disposed());

        outer.dispose();
        assert!(inner.is_disposed());
        assert_eq!(signal.subscriber_count(), 0);
        assert_eq!(runtime.node_count(), 1);
    }

    #[test]
    fn effects_created_at_top_level_have_no_owner() {
        let runtime = Runtime::new();
        let first = runtime.effect(|| {});
        let second = runtime.effect(|| {});

        first.dispose();
        assert!(!second.is_disposed());
        assert_eq!(runtime.node_count(), 1);
    }

    #[test]
    fn effect_logs_what_try_effect_returns() {
        let runtime = Runtime::new();
        let signal = runtime.signal(0);
        let _strict = {
            let signal = signal.clone();
            runtime
                .try_effect(move || if signal.get() > 0 { Err("positive") } else { Ok(()) })
                .unwrap()
        };

        // The failing sibling runs in the flush after the first run; the
        // error is swallowed
        let quiet = {
            let signal = signal.clone();
            runtime.effect(move || {
                if signal.get_untracked() == 0 {
                    signal.set(1).unwrap();
                }
            })
        };
        assert_eq!(quiet.run_count(), 1);
        assert_eq!(signal.get(), 1);

        let loud = {
            let signal = signal.clone();
            runtime.try_effect(move || signal.set(2))
        };
        assert!(loud.is_err());
        assert_eq!(signal.get(), 2);
    }
}
