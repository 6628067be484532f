//! Reactive Runtime
//!
//! The runtime is the central coordinator that connects signals, memos, and
//! effects. It owns the dependency graph, the dependency tracker, and the
//! queue of pending writes, and it runs propagation.
//!
//! # How It Works
//!
//! 1. When a signal, memo or effect is created, it registers a node with
//!    the runtime.
//!
//! 2. When a computation runs, every tracked read is recorded on the
//!    runtime's context stack. When the run ends, the recorded reads
//!    replace the computation's dependency edges.
//!
//! 3. When a signal is written, the write is queued. If no batch or flush
//!    is open, the queue is flushed right away. A flush:
//!    a. bumps the epoch and commits the queued writes,
//!    b. marks everything downstream of the changed signals for checking,
//!    c. visits those nodes in topological order and re-runs each one whose
//!       dependencies changed since it was last verified,
//!    d. repeats while computations keep queueing writes.
//!
//! # Threading
//!
//! A runtime is confined to the thread that created it: every handle is
//! `!Send`. Each thread has a default runtime (see [`Runtime::current`]);
//! independent runtimes can be created with [`Runtime::new`].

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::rc::{Rc, Weak};

use indexmap::IndexMap;
use smallvec::SmallVec;

use super::context::ContextStack;
use super::subscriber::{Reactive, Subscriber};
use crate::config::RuntimeConfig;
use crate::error::{ReactiveError, Result};
use crate::graph::{DirtyState, Node, NodeId, UpdateScheduler};

/// A queued signal write, committed at flush time.
pub(crate) trait PendingWrite {
    /// Apply the pending value. Returns `false` if there was nothing to
    /// apply or the signal's equality predicate judged it unchanged.
    fn commit(&self) -> bool;

    /// Drop the pending value without applying it.
    fn discard(&self);
}

thread_local! {
    static CURRENT: Runtime = Runtime::new();
}

/// Handle to a reactive runtime. Cloning is cheap and shares the runtime.
#[derive(Clone)]
pub struct Runtime {
    pub(crate) inner: Rc<RuntimeInner>,
}

pub(crate) struct RuntimeInner {
    pub(crate) config: RuntimeConfig,
    pub(crate) graph: RefCell<UpdateScheduler>,
    pub(crate) subscribers: RefCell<HashMap<NodeId, Subscriber>>,
    pub(crate) context: ContextStack,
    pub(crate) pending: RefCell<IndexMap<NodeId, Rc<dyn PendingWrite>>>,
    pub(crate) batch_depth: Cell<usize>,
    pub(crate) flushing: Cell<bool>,
    pub(crate) epoch: Cell<u64>,
}

/// Non-owning runtime reference held by signals, memos and effects.
#[derive(Clone)]
pub(crate) struct WeakRuntime(Weak<RuntimeInner>);

impl WeakRuntime {
    pub(crate) fn upgrade(&self) -> Option<Runtime> {
        self.0.upgrade().map(|inner| Runtime { inner })
    }
}

/// Resets the flushing flag even if a computation panics mid-flush.
struct FlushGuard<'a>(&'a Cell<bool>);

impl<'a> FlushGuard<'a> {
    fn new(flag: &'a Cell<bool>) -> Self {
        flag.set(true);
        Self(flag)
    }
}

impl Drop for FlushGuard<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

/// Writes taken from the queue for one flush round. Any write still in
/// the queue when it drops (the round was cut off, or an equality
/// predicate panicked) is discarded so its signal keeps no stale pending
/// value.
struct CommitQueue(indexmap::map::IntoIter<NodeId, Rc<dyn PendingWrite>>);

impl CommitQueue {
    fn len(&self) -> usize {
        self.0.len()
    }
}

impl Iterator for CommitQueue {
    type Item = (NodeId, Rc<dyn PendingWrite>);

    fn next(&mut self) -> Option<Self::Item> {
        self.0.next()
    }
}

impl Drop for CommitQueue {
    fn drop(&mut self) {
        for (_, write) in self.0.by_ref() {
            write.discard();
        }
    }
}

impl Runtime {
    /// Create an independent runtime with default settings.
    pub fn new() -> Self {
        Self::with_config(RuntimeConfig::default())
    }

    pub fn with_config(config: RuntimeConfig) -> Self {
        Self {
            inner: Rc::new(RuntimeInner {
                config,
                graph: RefCell::new(UpdateScheduler::new()),
                subscribers: RefCell::new(HashMap::new()),
                context: ContextStack::new(),
                pending: RefCell::new(IndexMap::new()),
                batch_depth: Cell::new(0),
                flushing: Cell::new(false),
                epoch: Cell::new(0),
            }),
        }
    }

    /// The calling thread's default runtime, used by the free functions
    /// (`create_signal`, `create_effect`, ...).
    pub fn current() -> Self {
        CURRENT.with(Runtime::clone)
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    pub(crate) fn name(&self) -> &str {
        self.inner.config.name.as_deref().unwrap_or("default")
    }

    pub(crate) fn downgrade(&self) -> WeakRuntime {
        WeakRuntime(Rc::downgrade(&self.inner))
    }

    /// Whether two handles refer to the same runtime.
    pub fn ptr_eq(&self, other: &Runtime) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Number of live nodes (signals, memos and effects) in the graph.
    pub fn node_count(&self) -> usize {
        self.inner.graph.borrow().node_count()
    }

    /// Whether a computation is currently recording reads.
    pub fn is_tracking(&self) -> bool {
        self.inner.context.current_observer().is_some()
    }

    /// Whether a batch is open.
    pub fn is_batching(&self) -> bool {
        self.inner.batch_depth.get() > 0
    }

    /// Number of computations that read `node` during their last run.
    pub fn dependent_count(&self, node: NodeId) -> usize {
        self.inner
            .graph
            .borrow()
            .get_node(node)
            .map_or(0, |n| n.dependents().len())
    }

    /// Number of nodes `node` read during its last run.
    pub fn dependency_count(&self, node: NodeId) -> usize {
        self.inner
            .graph
            .borrow()
            .get_node(node)
            .map_or(0, |n| n.dependencies().len())
    }

    /// Stop a computation and remove its node from the graph.
    ///
    /// Disposing an unknown or already disposed node does nothing.
    pub fn dispose(&self, node: NodeId) {
        tracing::debug!(runtime = self.name(), node = %node, "disposing node");
        self.unregister(node);
    }

    // ------------------------------------------------------------------
    // Registration
    // ------------------------------------------------------------------

    pub(crate) fn register_node(&self, node: Node) -> NodeId {
        self.inner.graph.borrow_mut().add_node(node)
    }

    pub(crate) fn register_computation(&self, id: NodeId, subscriber: Subscriber) {
        self.inner.subscribers.borrow_mut().insert(id, subscriber);
    }

    /// Attach a new computation to the computation currently running, if
    /// any. The child is disposed when its owner re-runs or is disposed.
    pub(crate) fn adopt(&self, child: NodeId) {
        if let Some(owner) = self.inner.context.current_owner() {
            self.inner.graph.borrow_mut().adopt(owner, child);
        }
    }

    /// Remove a node, the computations it owns, and everything the runtime
    /// holds for them.
    pub(crate) fn unregister(&self, id: NodeId) {
        // Bind before dropping: releasing an owned effect can drop memo or
        // signal handles it captured, which re-enter `unregister`.
        let subscriber = self.inner.subscribers.borrow_mut().remove(&id);
        let pending = self.inner.pending.borrow_mut().shift_remove(&id);
        let node = self.inner.graph.borrow_mut().remove_node(id);

        if let Some(reactive) = subscriber.as_ref().and_then(Subscriber::upgrade) {
            reactive.dispose();
        }
        if let Some(node) = &node {
            for &child in node.children() {
                self.unregister(child);
            }
        }
        drop((subscriber, pending, node));
    }

    fn dispose_children(&self, owner: NodeId) {
        let children = self.inner.graph.borrow_mut().take_children(owner);
        for child in children {
            tracing::trace!(runtime = self.name(), node = %child, owner = %owner, "disposing owned computation");
            self.unregister(child);
        }
    }

    fn subscriber(&self, id: NodeId) -> Option<Rc<dyn Reactive>> {
        self.inner
            .subscribers
            .borrow()
            .get(&id)
            .and_then(Subscriber::upgrade)
    }

    // ------------------------------------------------------------------
    // Tracking
    // ------------------------------------------------------------------

    /// Record a read of `source` by the running computation, if any.
    pub(crate) fn track(&self, source: NodeId) {
        self.inner.context.track(source);
    }

    pub(crate) fn is_running(&self, node: NodeId) -> bool {
        self.inner.context.is_running(node)
    }

    // ------------------------------------------------------------------
    // Writes and propagation
    // ------------------------------------------------------------------

    /// Queue a signal write. Flushes immediately unless a batch or a flush
    /// is already open, in which case the write joins it.
    pub(crate) fn queue_write(&self, id: NodeId, write: Rc<dyn PendingWrite>) -> Result<()> {
        self.inner.pending.borrow_mut().insert(id, write);

        if self.inner.batch_depth.get() == 0 && !self.inner.flushing.get() {
            self.flush()
        } else {
            Ok(())
        }
    }

    /// Commit pending writes and propagate until the graph settles.
    ///
    /// Returns the failures of every effect that errored along the way.
    /// A nested call (from inside propagation) returns immediately; the
    /// outer flush picks up whatever was queued.
    pub(crate) fn flush(&self) -> Result<()> {
        if self.inner.flushing.get() {
            return Ok(());
        }
        let _flushing = FlushGuard::new(&self.inner.flushing);

        let max_rounds = self.inner.config.max_flush_rounds;
        let mut errors = Vec::new();
        let mut rounds = 0;

        loop {
            let writes = std::mem::take(&mut *self.inner.pending.borrow_mut());
            if writes.is_empty() {
                break;
            }
            let mut writes = CommitQueue(writes.into_iter());

            rounds += 1;
            if rounds > max_rounds {
                tracing::warn!(
                    runtime = self.name(),
                    rounds = max_rounds,
                    dropped = writes.len(),
                    "propagation did not settle, dropping pending writes"
                );
                drop(writes);
                errors.push(ReactiveError::FlushLimitExceeded { rounds: max_rounds });
                break;
            }

            let epoch = self.inner.epoch.get() + 1;
            self.inner.epoch.set(epoch);

            let changed: Vec<NodeId> = writes
                .by_ref()
                .filter_map(|(id, write)| write.commit().then_some(id))
                .collect();

            tracing::trace!(
                runtime = self.name(),
                epoch,
                changed = changed.len(),
                "committed pending writes"
            );

            if changed.is_empty() {
                continue;
            }

            let order = {
                let mut graph = self.inner.graph.borrow_mut();
                for id in &changed {
                    if let Some(node) = graph.get_node_mut(*id) {
                        node.mark_changed(epoch);
                    }
                }
                graph.mark_changed(&changed)
            };

            for id in order {
                if let Err(err) = self.update_if_necessary(id) {
                    tracing::warn!(runtime = self.name(), node = %id, error = %err, "computation failed");
                    errors.push(err);
                }
            }
        }

        tracing::debug!(runtime = self.name(), rounds, failures = errors.len(), "flush complete");

        match ReactiveError::collect(errors) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Bring a node up to date.
    ///
    /// Clean nodes are left alone. A node marked for checking first brings
    /// its upstream memos up to date, then re-runs only if one of its
    /// dependencies changed after it was last verified. Dirty nodes always
    /// re-run. Either way the node ends the call verified at the current
    /// epoch (unless its body failed), so it runs at most once per epoch.
    pub(crate) fn update_if_necessary(&self, id: NodeId) -> Result<()> {
        let (state, verified_at, dependencies) = {
            let graph = self.inner.graph.borrow();
            let Some(node) = graph.get_node(id) else {
                return Ok(());
            };
            if node.is_clean() || !node.kind().is_computation() {
                return Ok(());
            }
            let dependencies: SmallVec<[NodeId; 8]> = node.dependencies().iter().copied().collect();
            (node.dirty_state(), node.verified_at(), dependencies)
        };

        // A node already on the context stack is mid-run; it will be
        // settled when that run finishes.
        if self.is_running(id) {
            return Ok(());
        }

        let mut stale = state == DirtyState::Dirty;
        if !stale {
            for dep in dependencies {
                self.update_if_necessary(dep)?;
                let changed = self
                    .inner
                    .graph
                    .borrow()
                    .get_node(dep)
                    .is_some_and(|n| n.changed_at() > verified_at);
                if changed {
                    stale = true;
                    break;
                }
            }
        }

        if stale {
            self.run(id)
        } else {
            let epoch = self.inner.epoch.get();
            if let Some(node) = self.inner.graph.borrow_mut().get_node_mut(id) {
                node.mark_clean(epoch);
            }
            Ok(())
        }
    }

    /// Run a computation once, rebuilding its dependency set from the reads
    /// made during the run.
    pub(crate) fn run(&self, id: NodeId) -> Result<()> {
        let Some(reactive) = self.subscriber(id) else {
            return Ok(());
        };
        debug_assert_eq!(reactive.node_id(), id);

        // Whatever the last run created is replaced by this one
        self.dispose_children(id);

        tracing::trace!(runtime = self.name(), node = %id, kind = ?reactive.kind(), "running computation");

        let ctx = self.inner.context.enter(Some(id));
        let result = reactive.execute();
        let dependencies = ctx.finish();

        let epoch = self.inner.epoch.get();
        let outcome = {
            let mut graph = self.inner.graph.borrow_mut();
            graph.replace_dependencies(id, dependencies);
            match graph.get_node_mut(id) {
                // Disposed during its own run
                None => Ok(()),
                Some(node) => match result {
                    Ok(changed) => {
                        node.mark_clean(epoch);
                        if changed {
                            node.mark_changed(epoch);
                        }
                        Ok(())
                    }
                    Err(source) => {
                        node.mark_dirty();
                        Err(ReactiveError::computation(id, source))
                    }
                },
            }
        };

        drop(reactive);
        outcome
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("name", &self.name())
            .field("node_count", &self.node_count())
            .field("batch_depth", &self.inner.batch_depth.get())
            .field("running", &self.inner.context.is_active())
            .field("epoch", &self.inner.epoch.get())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
