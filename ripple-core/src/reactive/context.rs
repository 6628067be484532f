//! Reactive Context
//!
//! The reactive context tracks which computation is currently running.
//! This enables automatic dependency tracking: when a signal is read,
//! we can record it as a dependency of the current computation.
//!
//! # Implementation
//!
//! Each runtime owns a stack of context entries. When a memo or effect
//! runs, the runtime pushes an entry for it. When the computation
//! completes, the entry is popped and its recorded reads become the
//! computation's new dependency set.
//!
//! The stack supports nested contexts (e.g., an effect that reads a memo
//! which has to recompute first). Entries without an observer suppress
//! tracking, which is how `untrack` works.

use std::cell::RefCell;

use indexmap::IndexSet;
use smallvec::SmallVec;

use crate::graph::NodeId;

/// An entry in the reactive context stack.
#[derive(Debug, Clone)]
struct ContextEntry {
    /// The computation being run, or `None` inside `untrack`.
    observer: Option<NodeId>,
    /// Nodes read during this run, in first-read order, without duplicates.
    dependencies: SmallVec<[NodeId; 8]>,
}

/// Per-runtime stack of running computations.
#[derive(Debug, Default)]
pub(crate) struct ContextStack {
    entries: RefCell<Vec<ContextEntry>>,
}

impl ContextStack {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Enter a new context. The context is exited when the guard drops.
    pub(crate) fn enter(&self, observer: Option<NodeId>) -> ReactiveContext<'_> {
        self.entries.borrow_mut().push(ContextEntry {
            observer,
            dependencies: SmallVec::new(),
        });

        ReactiveContext {
            stack: self,
            observer,
            finished: false,
        }
    }

    /// The computation that reads are currently attributed to.
    pub(crate) fn current_observer(&self) -> Option<NodeId> {
        self.entries
            .borrow()
            .last()
            .and_then(|entry| entry.observer)
    }

    /// The innermost running computation, even inside `untrack`.
    /// Computations created now belong to it.
    pub(crate) fn current_owner(&self) -> Option<NodeId> {
        self.entries
            .borrow()
            .iter()
            .rev()
            .find_map(|entry| entry.observer)
    }

    /// Whether any computation is running, tracked or not.
    pub(crate) fn is_active(&self) -> bool {
        !self.entries.borrow().is_empty()
    }

    /// Whether `node` is running anywhere on the stack.
    pub(crate) fn is_running(&self, node: NodeId) -> bool {
        self.entries
            .borrow()
            .iter()
            .any(|entry| entry.observer == Some(node))
    }

    /// Record a read of `source` by the current computation.
    ///
    /// Idempotent: reading the same source twice in one run records it once.
    pub(crate) fn track(&self, source: NodeId) {
        let mut entries = self.entries.borrow_mut();
        if let Some(entry) = entries.last_mut() {
            if entry.observer.is_some()
                && entry.observer != Some(source)
                && !entry.dependencies.contains(&source)
            {
                entry.dependencies.push(source);
            }
        }
    }

    fn pop(&self, observer: Option<NodeId>) -> Option<ContextEntry> {
        let popped = self.entries.borrow_mut().pop();
        if let Some(entry) = &popped {
            debug_assert_eq!(
                entry.observer, observer,
                "ReactiveContext mismatch: expected {:?}, got {:?}",
                observer, entry.observer
            );
        }
        popped
    }
}

/// Guard that pops the context when dropped.
///
/// This keeps the stack balanced even if the computation panics.
pub(crate) struct ReactiveContext<'a> {
    stack: &'a ContextStack,
    observer: Option<NodeId>,
    finished: bool,
}

impl ReactiveContext<'_> {
    /// Exit the context and return the dependencies it recorded.
    pub(crate) fn finish(mut self) -> IndexSet<NodeId> {
        self.finished = true;
        self.stack
            .pop(self.observer)
            .map(|entry| entry.dependencies.into_iter().collect())
            .unwrap_or_default()
    }
}

impl Drop for ReactiveContext<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.stack.pop(self.observer);
        }
    }
}
