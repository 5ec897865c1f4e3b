// Generic directed graph with positive integer edge weights.
//
// Used for chord progressions (`WeightedGraph<Chord>`, built by the styles in
// `chord_graph.rs`) and for section-to-section form transitions in the engine
// crate (`WeightedGraph<String>`). Weights are relative likelihoods, not
// probabilities; the consumer turns them into a draw (see
// `harmonic_state.rs`).
//
// Successor lists keep insertion order. Combined with the seeded generator
// this makes every weighted draw reproducible: the same graph built the same
// way always presents candidates in the same order.
//
// The graph is built once and read-only afterwards. `validate` is the single
// structural check, run at configuration time so that a progression can never
// walk into a node it cannot leave.

use std::collections::VecDeque;
use std::hash::Hash;

use rustc_hash::{FxHashMap, FxHashSet};

/// A structural problem found by `WeightedGraph::validate`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphDefect<N> {
    /// The graph has no nodes.
    Empty,
    /// The designated home node is not in the graph.
    MissingHome(N),
    /// This node has no outgoing edges.
    DeadEnd(N),
    /// The home node cannot be reached from this node.
    Unreachable(N),
}

#[derive(Debug, Clone)]
struct NodeEntry<N> {
    node: N,
    successors: Vec<(N, u32)>,
}

/// Directed weighted graph keyed by arbitrary hashable nodes.
#[derive(Debug, Clone)]
pub struct WeightedGraph<N> {
    index: FxHashMap<N, usize>,
    nodes: Vec<NodeEntry<N>>,
}

impl<N> Default for WeightedGraph<N> {
    fn default() -> Self {
        Self {
            index: FxHashMap::default(),
            nodes: Vec::new(),
        }
    }
}

impl<N: Clone + Eq + Hash> WeightedGraph<N> {
    pub fn new() -> Self {
        Self::default()
    }

    fn intern(&mut self, node: &N) -> usize {
        if let Some(&i) = self.index.get(node) {
            return i;
        }
        let i = self.nodes.len();
        self.nodes.push(NodeEntry {
            node: node.clone(),
            successors: Vec::new(),
        });
        self.index.insert(node.clone(), i);
        i
    }

    /// Add an edge, or add `weight` to an existing edge between the same
    /// nodes. Both endpoints become nodes. Returns `false` (and changes
    /// nothing) when `weight` is zero.
    pub fn add_transition(&mut self, from: N, to: N, weight: u32) -> bool {
        if weight == 0 {
            return false;
        }
        self.intern(&to);
        let i = self.intern(&from);
        let successors = &mut self.nodes[i].successors;
        match successors.iter_mut().find(|(n, _)| *n == to) {
            Some((_, w)) => *w = w.saturating_add(weight),
            None => successors.push((to, weight)),
        }
        true
    }

    /// Successors of `node` with their weights, in insertion order. Empty for
    /// unknown nodes.
    pub fn successors(&self, node: &N) -> &[(N, u32)] {
        self.index
            .get(node)
            .map(|&i| self.nodes[i].successors.as_slice())
            .unwrap_or(&[])
    }

    /// Weight of the edge `from -> to`, if present.
    pub fn weight(&self, from: &N, to: &N) -> Option<u32> {
        self.successors(from)
            .iter()
            .find(|(n, _)| n == to)
            .map(|&(_, w)| w)
    }

    pub fn contains(&self, node: &N) -> bool {
        self.index.contains_key(node)
    }

    /// All nodes, in order of first appearance.
    pub fn nodes(&self) -> impl Iterator<Item = &N> {
        self.nodes.iter().map(|e| &e.node)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.nodes.iter().map(|e| e.successors.len()).sum()
    }

    /// Check that every node has a way out and a way back to `home`.
    ///
    /// Reports the first defect found, scanning nodes in insertion order:
    /// dead ends first, then nodes that cannot reach `home` (found by a
    /// breadth-first search over reversed edges starting at `home`).
    pub fn validate(&self, home: &N) -> Result<(), GraphDefect<N>> {
        if self.nodes.is_empty() {
            return Err(GraphDefect::Empty);
        }
        let Some(&home_idx) = self.index.get(home) else {
            return Err(GraphDefect::MissingHome(home.clone()));
        };
        if let Some(entry) = self.nodes.iter().find(|e| e.successors.is_empty()) {
            return Err(GraphDefect::DeadEnd(entry.node.clone()));
        }

        let mut predecessors: Vec<Vec<usize>> = vec![Vec::new(); self.nodes.len()];
        for (i, entry) in self.nodes.iter().enumerate() {
            for (succ, _) in &entry.successors {
                predecessors[self.index[succ]].push(i);
            }
        }

        let mut reaches_home = FxHashSet::default();
        reaches_home.insert(home_idx);
        let mut frontier = VecDeque::from([home_idx]);
        while let Some(i) = frontier.pop_front() {
            for &p in &predecessors[i] {
                if reaches_home.insert(p) {
                    frontier.push_back(p);
                }
            }
        }

        match (0..self.nodes.len()).find(|i| !reaches_home.contains(i)) {
            Some(i) => Err(GraphDefect::Unreachable(self.nodes[i].node.clone())),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_edges_accumulate_weight() {
        let mut g = WeightedGraph::new();
        g.add_transition("a", "b", 2);
        g.add_transition("a", "b", 3);
        assert_eq!(g.weight(&"a", &"b"), Some(5));
        assert_eq!(g.edge_count(), 1);
    }

    #[test]
    fn zero_weight_is_rejected() {
        let mut g: WeightedGraph<&str> = WeightedGraph::new();
        assert!(!g.add_transition("a", "b", 0));
        assert_eq!(g.node_count(), 0);
    }

    #[test]
    fn successors_keep_insertion_order() {
        let mut g = WeightedGraph::new();
        g.add_transition(1, 3, 1);
        g.add_transition(1, 2, 1);
        g.add_transition(1, 4, 1);
        let order: Vec<i32> = g.successors(&1).iter().map(|&(n, _)| n).collect();
        assert_eq!(order, vec![3, 2, 4]);
    }

    #[test]
    fn unknown_node_has_no_successors() {
        let g: WeightedGraph<u8> = WeightedGraph::new();
        assert!(g.successors(&9).is_empty());
        assert!(!g.contains(&9));
    }

    #[test]
    fn cycles_validate() {
        let mut g = WeightedGraph::new();
        g.add_transition("I", "V", 3);
        g.add_transition("V", "I", 1);
        g.add_transition("I", "I", 1);
        assert_eq!(g.validate(&"I"), Ok(()));
    }

    #[test]
    fn dead_end_is_reported() {
        let mut g = WeightedGraph::new();
        g.add_transition("I", "V", 1);
        assert_eq!(g.validate(&"I"), Err(GraphDefect::DeadEnd("V")));
    }

    #[test]
    fn island_that_cannot_return_home_is_reported() {
        let mut g = WeightedGraph::new();
        g.add_transition("I", "V", 1);
        g.add_transition("V", "I", 1);
        g.add_transition("I", "x", 1);
        g.add_transition("x", "y", 1);
        g.add_transition("y", "x", 1);
        assert_eq!(g.validate(&"I"), Err(GraphDefect::Unreachable("x")));
    }

    #[test]
    fn missing_home_and_empty_graph() {
        let empty: WeightedGraph<&str> = WeightedGraph::new();
        assert_eq!(empty.validate(&"I"), Err(GraphDefect::Empty));
        let mut g = WeightedGraph::new();
        g.add_transition("a", "a", 1);
        assert_eq!(g.validate(&"I"), Err(GraphDefect::MissingHome("I")));
    }
}
