//! Update Scheduler
//!
//! The scheduler owns the dependency graph and determines the order in which
//! stale nodes are brought up to date. Dependencies are always ordered before
//! their dependents.
//!
//! # Algorithm
//!
//! 1. When one or more sources change, walk their dependents breadth-first
//!    and mark every reachable node as `Check`.
//! 2. Sort the reached nodes topologically (Kahn's algorithm, counting only
//!    edges inside the reached set).
//! 3. The runtime then visits the nodes in that order. A node re-runs only
//!    if a dependency's `changed_at` stamp is newer than its own
//!    `verified_at` stamp, so a memo whose value did not change stops the
//!    wave from going further.
//!
//! Because every node is visited once, after all of its upstream nodes,
//! each computation runs at most once per wave, even when it is reachable
//! along several paths (the diamond case).

use std::collections::{HashMap, VecDeque};

use indexmap::IndexSet;

use super::node::{Node, NodeId};

/// The update scheduler manages the dependency graph and coordinates updates.
#[derive(Debug, Default)]
pub struct UpdateScheduler {
    /// All nodes in the graph, indexed by ID.
    nodes: HashMap<NodeId, Node>,
}

impl UpdateScheduler {
    /// Create a new empty scheduler.
    pub fn new() -> Self {
        Self {
            nodes: HashMap::new(),
        }
    }

    /// Add a node to the graph.
    pub fn add_node(&mut self, node: Node) -> NodeId {
        let id = node.id();
        self.nodes.insert(id, node);
        id
    }

    /// Remove a node from the graph, along with all edges touching it.
    pub fn remove_node(&mut self, node_id: NodeId) -> Option<Node> {
        let node = self.nodes.remove(&node_id)?;
        for &upstream in node.dependencies() {
            self.unlink(upstream, node_id);
        }
        for &downstream in node.dependents() {
            self.unlink(node_id, downstream);
        }
        if let Some(owner) = node.owner().and_then(|owner| self.nodes.get_mut(&owner)) {
            owner.remove_child(node_id);
        }
        for child in node.children() {
            if let Some(child) = self.nodes.get_mut(child) {
                child.set_owner(None);
            }
        }
        Some(node)
    }

    pub fn get_node(&self, node_id: NodeId) -> Option<&Node> {
        self.nodes.get(&node_id)
    }

    pub fn get_node_mut(&mut self, node_id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(&node_id)
    }

    /// Add a dependency edge: `dependent` depends on `dependency`.
    /// Edges to unknown nodes are ignored.
    pub fn add_edge(&mut self, dependency: NodeId, dependent: NodeId) {
        if self.nodes.contains_key(&dependency) && self.nodes.contains_key(&dependent) {
            self.link(dependency, dependent);
        }
    }

    /// Record that `child` was created while `owner` was running.
    pub fn adopt(&mut self, owner: NodeId, child: NodeId) {
        if owner == child || !self.nodes.contains_key(&owner) {
            return;
        }
        let Some(node) = self.nodes.get_mut(&child) else {
            return;
        };
        node.set_owner(Some(owner));
        if let Some(owner) = self.nodes.get_mut(&owner) {
            owner.add_child(child);
        }
    }

    /// Detach and return the children `owner` created during its last run.
    pub fn take_children(&mut self, owner: NodeId) -> IndexSet<NodeId> {
        let children = self
            .nodes
            .get_mut(&owner)
            .map(Node::take_children)
            .unwrap_or_default();
        for child in &children {
            if let Some(node) = self.nodes.get_mut(child) {
                node.set_owner(None);
            }
        }
        children
    }

    /// Rebuild a node's dependency edges from scratch.
    ///
    /// Dependencies that no longer exist in the graph (dropped signals or
    /// memos) are skipped.
    pub fn replace_dependencies(&mut self, node_id: NodeId, dependencies: IndexSet<NodeId>) {
        let dependencies: IndexSet<NodeId> = dependencies
            .into_iter()
            .filter(|dep| *dep != node_id && self.nodes.contains_key(dep))
            .collect();

        let Some(node) = self.nodes.get_mut(&node_id) else {
            return;
        };
        let previous = node.replace_dependencies(dependencies.clone());

        for &stale in previous.difference(&dependencies) {
            self.unlink(stale, node_id);
        }
        for &fresh in &dependencies {
            self.link(fresh, node_id);
        }
    }

    fn link(&mut self, upstream: NodeId, downstream: NodeId) {
        if let Some(node) = self.nodes.get_mut(&upstream) {
            node.add_dependent(downstream);
        }
        if let Some(node) = self.nodes.get_mut(&downstream) {
            node.add_dependency(upstream);
        }
    }

    fn unlink(&mut self, upstream: NodeId, downstream: NodeId) {
        if let Some(node) = self.nodes.get_mut(&upstream) {
            node.remove_dependent(downstream);
        }
        if let Some(node) = self.nodes.get_mut(&downstream) {
            node.remove_dependency(upstream);
        }
    }

    /// Mark everything downstream of `sources` as needing a check.
    ///
    /// Returns the reached nodes in topological order. The sources
    /// themselves are not included.
    pub fn mark_changed(&mut self, sources: &[NodeId]) -> Vec<NodeId> {
        let mut reached = IndexSet::new();
        let mut frontier: VecDeque<NodeId> = sources
            .iter()
            .filter_map(|id| self.nodes.get(id))
            .flat_map(|source| source.dependents().iter().copied())
            .collect();

        while let Some(id) = frontier.pop_front() {
            let Some(node) = self.nodes.get_mut(&id) else {
                continue;
            };
            if reached.insert(id) {
                node.mark_check();
                frontier.extend(node.dependents().iter().copied());
            }
        }

        self.topological_sort(reached.into_iter().collect())
    }

    /// Order `nodes` so that every node comes after its dependencies and
    /// after its owner.
    ///
    /// Only edges between members of `nodes` count (Kahn's algorithm over
    /// the induced subgraph). Nodes missing from the graph are dropped.
    /// Owners go first because re-running an owner replaces its children.
    pub fn topological_sort(&self, nodes: Vec<NodeId>) -> Vec<NodeId> {
        let mut pending: HashMap<NodeId, usize> = nodes
            .iter()
            .filter(|id| self.nodes.contains_key(*id))
            .map(|&id| (id, 0))
            .collect();
        for &id in &nodes {
            let Some(node) = self.nodes.get(&id) else {
                continue;
            };
            let upstream = node
                .dependencies()
                .iter()
                .chain(node.owner().as_ref())
                .filter(|dep| pending.contains_key(*dep))
                .count();
            pending.insert(id, upstream);
        }

        let mut ready: VecDeque<NodeId> = nodes
            .iter()
            .copied()
            .filter(|id| pending.get(id) == Some(&0))
            .collect();
        let mut order = Vec::with_capacity(pending.len());

        while let Some(id) = ready.pop_front() {
            order.push(id);
            let Some(node) = self.nodes.get(&id) else {
                continue;
            };
            for downstream in node.dependents().iter().chain(node.children()) {
                if let Some(count) = pending.get_mut(downstream) {
                    *count -= 1;
                    if *count == 0 {
                        ready.push_back(*downstream);
                    }
                }
            }
        }

        order
    }

    /// Get the total number of nodes in the graph.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::node::DirtyState;

    fn position(order: &[NodeId], id: NodeId) -> usize {
        order.iter().position(|&n| n == id).unwrap()
    }

    #[test]
    fn add_and_remove_nodes() {
        let mut scheduler = UpdateScheduler::new();

        let id1 = scheduler.add_node(Node::source());
        let id2 = scheduler.add_node(Node::memo());

        assert_eq!(scheduler.node_count(), 2);

        scheduler.remove_node(id1);
        assert_eq!(scheduler.node_count(), 1);
        assert!(scheduler.get_node(id1).is_none());
        assert!(scheduler.get_node(id2).is_some());
    }

    #[test]
    fn removing_a_node_detaches_its_edges() {
        let mut scheduler = UpdateScheduler::new();
        let source = scheduler.add_node(Node::source());
        let memo = scheduler.add_node(Node::memo());
        scheduler.add_edge(source, memo);

        scheduler.remove_node(memo);

        assert!(scheduler.get_node(source).unwrap().dependents().is_empty());
    }

    #[test]
    fn add_edges_then_clear_dependencies() {
        let mut scheduler = UpdateScheduler::new();

        let source_id = scheduler.add_node(Node::source());
        let derived_id = scheduler.add_node(Node::memo());

        scheduler.add_edge(source_id, derived_id);

        assert!(scheduler
            .get_node(source_id)
            .unwrap()
            .dependents()
            .contains(&derived_id));
        assert!(scheduler
            .get_node(derived_id)
            .unwrap()
            .dependencies()
            .contains(&source_id));

        scheduler.replace_dependencies(derived_id, IndexSet::new());

        assert!(scheduler.get_node(source_id).unwrap().dependents().is_empty());
        assert!(scheduler.get_node(derived_id).unwrap().dependencies().is_empty());
    }

    #[test]
    fn replace_dependencies_drops_stale_edges() {
        let mut scheduler = UpdateScheduler::new();
        let a = scheduler.add_node(Node::source());
        let b = scheduler.add_node(Node::source());
        let effect = scheduler.add_node(Node::effect());

        scheduler.replace_dependencies(effect, IndexSet::from([a]));
        assert!(scheduler.get_node(a).unwrap().dependents().contains(&effect));

        scheduler.replace_dependencies(effect, IndexSet::from([b]));
        assert!(!scheduler.get_node(a).unwrap().dependents().contains(&effect));
        assert!(scheduler.get_node(b).unwrap().dependents().contains(&effect));
        assert_eq!(scheduler.get_node(effect).unwrap().dependencies().len(), 1);
    }

    #[test]
    fn replace_dependencies_skips_missing_nodes() {
        let mut scheduler = UpdateScheduler::new();
        let effect = scheduler.add_node(Node::effect());
        let gone = NodeId::next();

        scheduler.replace_dependencies(effect, IndexSet::from([gone, effect]));

        assert!(scheduler.get_node(effect).unwrap().dependencies().is_empty());
    }

    #[test]
    fn mark_changed_propagates_in_order() {
        let mut scheduler = UpdateScheduler::new();

        // source -> derived1 -> derived2
        let source_id = scheduler.add_node(Node::source());
        let derived1_id = scheduler.add_node(Node::memo());
        let derived2_id = scheduler.add_node(Node::memo());

        scheduler.add_edge(source_id, derived1_id);
        scheduler.add_edge(derived1_id, derived2_id);

        scheduler.get_node_mut(derived1_id).unwrap().mark_clean(1);
        scheduler.get_node_mut(derived2_id).unwrap().mark_clean(1);

        let to_process = scheduler.mark_changed(&[source_id]);

        assert_eq!(to_process, vec![derived1_id, derived2_id]);
        assert_eq!(
            scheduler.get_node(derived2_id).unwrap().dirty_state(),
            DirtyState::Check
        );
    }

    #[test]
    fn diamond_visits_each_node_once_after_both_parents() {
        let mut scheduler = UpdateScheduler::new();
        let a = scheduler.add_node(Node::source());
        let b = scheduler.add_node(Node::memo());
        let c = scheduler.add_node(Node::memo());
        let d = scheduler.add_node(Node::effect());

        scheduler.add_edge(a, b);
        scheduler.add_edge(a, c);
        scheduler.add_edge(b, d);
        scheduler.add_edge(c, d);

        let order = scheduler.mark_changed(&[a]);

        assert_eq!(order.len(), 3);
        assert!(position(&order, b) < position(&order, d));
        assert!(position(&order, c) < position(&order, d));
    }

    #[test]
    fn uneven_paths_still_order_correctly() {
        // a -> b -> c -> d and a -> d: d is reached first by BFS but must be last
        let mut scheduler = UpdateScheduler::new();
        let a = scheduler.add_node(Node::source());
        let b = scheduler.add_node(Node::memo());
        let c = scheduler.add_node(Node::memo());
        let d = scheduler.add_node(Node::effect());

        scheduler.add_edge(a, d);
        scheduler.add_edge(a, b);
        scheduler.add_edge(b, c);
        scheduler.add_edge(c, d);

        let order = scheduler.mark_changed(&[a]);

        assert_eq!(order, vec![b, c, d]);
    }

    #[test]
    fn multiple_sources_share_one_wave() {
        let mut scheduler = UpdateScheduler::new();
        let a = scheduler.add_node(Node::source());
        let b = scheduler.add_node(Node::source());
        let effect = scheduler.add_node(Node::effect());
        scheduler.add_edge(a, effect);
        scheduler.add_edge(b, effect);

        let order = scheduler.mark_changed(&[a, b]);

        assert_eq!(order, vec![effect]);
    }

    #[test]
    fn owners_are_ordered_before_their_children() {
        // The child reads `a` before its owner finishes, so it is the
        // first dependent of `a`, but it must still come second
        let mut scheduler = UpdateScheduler::new();
        let a = scheduler.add_node(Node::source());
        let child = scheduler.add_node(Node::effect());
        let owner = scheduler.add_node(Node::effect());
        scheduler.add_edge(a, child);
        scheduler.add_edge(a, owner);
        scheduler.adopt(owner, child);

        assert_eq!(scheduler.mark_changed(&[a]), vec![owner, child]);

        let children = scheduler.take_children(owner);
        assert!(children.contains(&child));
        assert_eq!(scheduler.get_node(child).unwrap().owner(), None);
        assert_eq!(scheduler.mark_changed(&[a]), vec![child, owner]);
    }

    #[test]
    fn removing_an_owner_orphans_its_children() {
        let mut scheduler = UpdateScheduler::new();
        let owner = scheduler.add_node(Node::effect());
        let child = scheduler.add_node(Node::effect());
        scheduler.adopt(owner, child);

        let removed = scheduler.remove_node(owner).unwrap();

        assert!(removed.children().contains(&child));
        assert_eq!(scheduler.get_node(child).unwrap().owner(), None);
    }
}
