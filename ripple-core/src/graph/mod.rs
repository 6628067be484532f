//! Dependency Graph
//!
//! This module implements the dependency graph that tracks relationships
//! between signals and the computations that read them.
//!
//! # Overview
//!
//! The dependency graph is a directed acyclic graph (DAG) where:
//!
//! - Nodes represent signals (sources) or computations (memos, effects)
//! - Edges represent dependencies: if A reads B, there is an edge from B to A
//!
//! When a signal changes, we traverse the graph to find all affected nodes
//! and mark them for checking. The runtime then visits them in topological
//! order and re-runs only those whose inputs actually changed.
//!
//! # Design Decisions
//!
//! 1. We use a centralized graph rather than per-signal subscriber lists:
//!    - It enables topological ordering for batched updates
//!    - Handles stay small: a handle only needs its `NodeId`
//!    - Dependency sets can be replaced wholesale after each run
//!
//! 2. The graph is indexed by node ID for O(1) lookups.
//!
//! 3. We maintain both forward (dependencies) and reverse (dependents) edges
//!    to enable traversal in both directions.

mod node;
mod scheduler;

pub use node::{DirtyState, Node, NodeId, NodeKind};
pub use scheduler::UpdateScheduler;
