//! Indexed graph wrapper for domain-typed nodes.
//!
//! [`IndexedGraph`] maps domain keys (block tags, value tags) to dense [`NodeId`]s so the
//! generic algorithms can run over them, and maps results back afterwards.
//!
//! # Examples
//!
//! ```rust,ignore
//! use flowscope::utils::graph::{algorithms, IndexedGraph};
//!
//! let mut graph: IndexedGraph<&str> = IndexedGraph::new();
//! graph.add_edge("A", "B");
//! graph.add_edge("B", "A");
//! graph.add_edge("B", "C");
//!
//! let sccs = algorithms::strongly_connected_components(&graph);
//! assert_eq!(sccs.len(), 2);
//! ```

use std::{collections::HashMap, hash::Hash};

use crate::utils::graph::{GraphBase, NodeId, Predecessors, RootedGraph, Successors};

/// A directed graph whose nodes are identified by keys of type `K`.
///
/// The first node added is the entry unless [`IndexedGraph::set_entry`] says otherwise.
/// Parallel edges are collapsed.
#[derive(Debug, Clone)]
pub struct IndexedGraph<K> {
    keys: Vec<K>,
    index: HashMap<K, NodeId>,
    successors: Vec<Vec<NodeId>>,
    predecessors: Vec<Vec<NodeId>>,
    entry: NodeId,
}

impl<K: Hash + Eq + Clone> Default for IndexedGraph<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Hash + Eq + Clone> IndexedGraph<K> {
    /// Creates an empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self {
            keys: Vec::new(),
            index: HashMap::new(),
            successors: Vec::new(),
            predecessors: Vec::new(),
            entry: NodeId::new(0),
        }
    }

    /// Adds a node, returning the existing id if the key is already present.
    pub fn add_node(&mut self, key: K) -> NodeId {
        if let Some(&id) = self.index.get(&key) {
            return id;
        }
        let id = NodeId::new(self.keys.len());
        self.keys.push(key.clone());
        self.index.insert(key, id);
        self.successors.push(Vec::new());
        self.predecessors.push(Vec::new());
        id
    }

    /// Adds an edge, creating either endpoint if needed.
    pub fn add_edge(&mut self, from: K, to: K) {
        let from = self.add_node(from);
        let to = self.add_node(to);
        if !self.successors[from.index()].contains(&to) {
            self.successors[from.index()].push(to);
            self.predecessors[to.index()].push(from);
        }
    }

    /// Makes `key` the entry node, adding it if needed.
    pub fn set_entry(&mut self, key: K) {
        self.entry = self.add_node(key);
    }

    /// The id of a key.
    #[must_use]
    pub fn node_id(&self, key: &K) -> Option<NodeId> {
        self.index.get(key).copied()
    }

    /// The key of a node id.
    #[must_use]
    pub fn key(&self, node: NodeId) -> &K {
        &self.keys[node.index()]
    }

    /// All keys in id order.
    #[must_use]
    pub fn keys(&self) -> &[K] {
        &self.keys
    }

    /// Maps a list of node ids back to their keys.
    #[must_use]
    pub fn resolve(&self, nodes: &[NodeId]) -> Vec<K> {
        nodes.iter().map(|node| self.key(*node).clone()).collect()
    }
}

impl<K> GraphBase for IndexedGraph<K> {
    fn node_count(&self) -> usize {
        self.keys.len()
    }

    fn node_ids(&self) -> impl Iterator<Item = NodeId> {
        (0..self.keys.len()).map(NodeId::new)
    }
}

impl<K> Successors for IndexedGraph<K> {
    fn successors(&self, node: NodeId) -> impl Iterator<Item = NodeId> {
        self.successors[node.index()].iter().copied()
    }
}

impl<K> Predecessors for IndexedGraph<K> {
    fn predecessors(&self, node: NodeId) -> impl Iterator<Item = NodeId> {
        self.predecessors[node.index()].iter().copied()
    }
}

impl<K> RootedGraph for IndexedGraph<K> {
    fn entry(&self) -> NodeId {
        self.entry
    }
}
