//! Graph Nodes
//!
//! This module defines the node types that live in the dependency graph.
//! A node only carries graph bookkeeping (edges, dirty state, version
//! stamps). Values and bodies live in the typed handles that own the node.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use indexmap::IndexSet;

/// Unique identifier for a node in the dependency graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u64);

impl NodeId {
    /// Allocate the next unique node ID.
    pub fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The kind of node in the dependency graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// A signal. Sources are the roots of the graph: they have dependents
    /// but never dependencies.
    Source,

    /// A memo. Memos have dependencies and may have dependents.
    /// They cache their computed value.
    Memo,

    /// An effect. Effects are leaves: they read, but nothing reads them.
    Effect,
}

impl NodeKind {
    /// Whether nodes of this kind run a body when they go stale.
    pub fn is_computation(&self) -> bool {
        !matches!(self, NodeKind::Source)
    }
}

/// Dirty state of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirtyState {
    /// The node is up to date.
    Clean,

    /// Something upstream changed. The node must compare its dependencies'
    /// version stamps before deciding whether to re-run.
    Check,

    /// The node must re-run (never ran, or its last run failed).
    Dirty,
}

/// A node in the dependency graph.
#[derive(Debug)]
pub struct Node {
    id: NodeId,
    kind: NodeKind,
    dirty: DirtyState,

    /// Epoch at which this node's value last changed.
    changed_at: u64,

    /// Epoch at which this node was last known to be up to date.
    verified_at: u64,

    /// Nodes this node read during its last run, in first-read order.
    dependencies: IndexSet<NodeId>,

    /// Nodes that read this node during their last run.
    dependents: IndexSet<NodeId>,

    /// The computation that was running when this node was created.
    owner: Option<NodeId>,

    /// Computations created during this node's last run.
    children: IndexSet<NodeId>,
}

impl Node {
    /// Create a new node with the given kind.
    pub fn new(kind: NodeKind) -> Self {
        Self::with_id(NodeId::next(), kind)
    }

    /// Create a node for an ID that was allocated up front, so a handle can
    /// know its ID before the node is inserted.
    pub fn with_id(id: NodeId, kind: NodeKind) -> Self {
        Self {
            id,
            kind,
            dirty: match kind {
                NodeKind::Source => DirtyState::Clean,
                // Computations start dirty so their first run always happens
                NodeKind::Memo | NodeKind::Effect => DirtyState::Dirty,
            },
            changed_at: 0,
            verified_at: 0,
            dependencies: IndexSet::new(),
            dependents: IndexSet::new(),
            owner: None,
            children: IndexSet::new(),
        }
    }

    /// Create a new source (signal) node.
    pub fn source() -> Self {
        Self::new(NodeKind::Source)
    }

    /// Create a new memo node.
    pub fn memo() -> Self {
        Self::new(NodeKind::Memo)
    }

    /// Create a new effect node.
    pub fn effect() -> Self {
        Self::new(NodeKind::Effect)
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    pub fn dirty_state(&self) -> DirtyState {
        self.dirty
    }

    pub fn is_clean(&self) -> bool {
        self.dirty == DirtyState::Clean
    }

    /// Mark the node as up to date as of `epoch`.
    pub fn mark_clean(&mut self, epoch: u64) {
        self.dirty = DirtyState::Clean;
        self.verified_at = epoch;
    }

    /// Mark the node as needing a version check. Dirty nodes stay dirty.
    pub fn mark_check(&mut self) {
        if self.dirty == DirtyState::Clean {
            self.dirty = DirtyState::Check;
        }
    }

    /// Mark the node as definitely needing to re-run.
    pub fn mark_dirty(&mut self) {
        self.dirty = DirtyState::Dirty;
    }

    /// Record that this node's value changed at `epoch`.
    pub fn mark_changed(&mut self, epoch: u64) {
        self.changed_at = epoch;
    }

    pub fn changed_at(&self) -> u64 {
        self.changed_at
    }

    pub fn verified_at(&self) -> u64 {
        self.verified_at
    }

    pub fn add_dependency(&mut self, node_id: NodeId) {
        self.dependencies.insert(node_id);
    }

    pub fn remove_dependency(&mut self, node_id: NodeId) {
        self.dependencies.shift_remove(&node_id);
    }

    pub fn dependencies(&self) -> &IndexSet<NodeId> {
        &self.dependencies
    }

    /// Swap in a new dependency set, returning the old one.
    pub fn replace_dependencies(&mut self, dependencies: IndexSet<NodeId>) -> IndexSet<NodeId> {
        std::mem::replace(&mut self.dependencies, dependencies)
    }

    pub fn add_dependent(&mut self, node_id: NodeId) {
        self.dependents.insert(node_id);
    }

    pub fn remove_dependent(&mut self, node_id: NodeId) {
        self.dependents.shift_remove(&node_id);
    }

    pub fn dependents(&self) -> &IndexSet<NodeId> {
        &self.dependents
    }

    pub fn owner(&self) -> Option<NodeId> {
        self.owner
    }

    pub fn set_owner(&mut self, owner: Option<NodeId>) {
        self.owner = owner;
    }

    pub fn children(&self) -> &IndexSet<NodeId> {
        &self.children
    }

    pub fn add_child(&mut self, child: NodeId) {
        self.children.insert(child);
    }

    pub fn remove_child(&mut self, child: NodeId) {
        self.children.shift_remove(&child);
    }

    /// Detach and return every child.
    pub fn take_children(&mut self) -> IndexSet<NodeId> {
        std::mem::take(&mut self.children)
    }
}
