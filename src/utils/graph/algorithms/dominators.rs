//! Dominator tree computation using the Lengauer-Tarjan algorithm.
//!
//! A node `d` **dominates** a node `n` if every path from the entry node to `n` must pass
//! through `d`. The **immediate dominator** of `n` is the unique node that strictly
//! dominates `n` but does not strictly dominate any other dominator of `n`. Making each
//! node's immediate dominator its parent yields the dominator tree, rooted at the entry.
//!
//! # Algorithm
//!
//! This implementation uses the Lengauer-Tarjan algorithm with path compression, achieving
//! O(E α(V)) time. Both the DFS numbering and the path compression are iterative, so deep
//! graphs cannot overflow the stack.
//!
//! Nodes not reachable from the entry are not part of the tree: they have no immediate
//! dominator, dominate nothing and are dominated by nothing.

use crate::utils::graph::{NodeId, RootedGraph};

/// Result of dominator tree computation.
///
/// # Examples
///
/// ```rust,ignore
/// use flowscope::utils::graph::{algorithms::compute_dominators, IndexedGraph};
///
/// let mut graph: IndexedGraph<&str> = IndexedGraph::new();
/// graph.add_edge("entry", "a");
/// graph.add_edge("a", "b");
///
/// let tree = compute_dominators(&graph);
/// let (a, b) = (graph.node_id(&"a").unwrap(), graph.node_id(&"b").unwrap());
/// assert_eq!(tree.immediate_dominator(b), Some(a));
/// ```
#[derive(Debug, Clone)]
pub struct DominatorTree {
    entry: NodeId,
    idom: Vec<Option<NodeId>>,
    reachable: Vec<bool>,
}

impl DominatorTree {
    /// Returns the entry (root) node of the dominator tree.
    #[inline]
    #[must_use]
    pub fn entry(&self) -> NodeId {
        self.entry
    }

    /// Returns the immediate dominator of a node, or `None` for the entry node and for
    /// unreachable nodes.
    #[inline]
    #[must_use]
    pub fn immediate_dominator(&self, node: NodeId) -> Option<NodeId> {
        self.idom.get(node.index()).copied().flatten()
    }

    /// True if `node` is reachable from the entry.
    #[inline]
    #[must_use]
    pub fn is_reachable(&self, node: NodeId) -> bool {
        self.reachable.get(node.index()).copied().unwrap_or(false)
    }

    /// Checks if node `a` dominates node `b`. A reachable node dominates itself.
    ///
    /// # Complexity
    ///
    /// O(depth) where depth is the depth of `b` in the dominator tree.
    #[must_use]
    pub fn dominates(&self, a: NodeId, b: NodeId) -> bool {
        if !self.is_reachable(a) || !self.is_reachable(b) {
            return false;
        }
        self.dominators(b).any(|d| d == a)
    }

    /// Checks if node `a` strictly dominates node `b`.
    #[inline]
    #[must_use]
    pub fn strictly_dominates(&self, a: NodeId, b: NodeId) -> bool {
        a != b && self.dominates(a, b)
    }

    /// Iterates over all dominators of a node, from the node itself up to the entry.
    #[must_use]
    pub fn dominators(&self, node: NodeId) -> DominatorIterator<'_> {
        DominatorIterator {
            tree: self,
            current: self.is_reachable(node).then_some(node),
        }
    }

    /// Depth of a node in the dominator tree (the entry has depth 0).
    #[must_use]
    pub fn depth(&self, node: NodeId) -> usize {
        self.dominators(node).count().saturating_sub(1)
    }

    /// Nodes immediately dominated by `node`.
    #[must_use]
    pub fn children(&self, node: NodeId) -> Vec<NodeId> {
        self.idom
            .iter()
            .enumerate()
            .filter(|(_, idom)| **idom == Some(node))
            .map(|(index, _)| NodeId::new(index))
            .collect()
    }

    /// Number of nodes in the underlying graph.
    #[inline]
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.idom.len()
    }
}

/// Iterator over the dominator chain of a node.
pub struct DominatorIterator<'a> {
    tree: &'a DominatorTree,
    current: Option<NodeId>,
}

impl Iterator for DominatorIterator<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.current?;
        self.current = self.tree.immediate_dominator(current);
        Some(current)
    }
}

/// Computes the dominator tree of a rooted graph.
pub fn compute_dominators<G>(graph: &G) -> DominatorTree
where
    G: RootedGraph,
{
    let node_count = graph.node_count();
    let entry = graph.entry();
    if node_count == 0 || entry.index() >= node_count {
        return DominatorTree {
            entry,
            idom: vec![None; node_count],
            reachable: vec![false; node_count],
        };
    }

    let mut lt = LengauerTarjan::new(node_count, entry);
    lt.compute(graph);

    let reachable: Vec<bool> = lt.dfnum.iter().map(|&n| n != 0).collect();
    let idom = (0..node_count)
        .map(|i| {
            if i == entry.index() || !reachable[i] {
                None
            } else {
                Some(lt.idom[i])
            }
        })
        .collect();
    DominatorTree {
        entry,
        idom,
        reachable,
    }
}

const SENTINEL: NodeId = NodeId::new(usize::MAX);

struct LengauerTarjan {
    entry: NodeId,
    dfnum: Vec<usize>,
    vertex: Vec<NodeId>,
    parent: Vec<NodeId>,
    semi: Vec<NodeId>,
    idom: Vec<NodeId>,
    ancestor: Vec<NodeId>,
    best: Vec<NodeId>,
    bucket: Vec<Vec<NodeId>>,
    dfs_counter: usize,
}

impl LengauerTarjan {
    fn new(n: usize, entry: NodeId) -> Self {
        Self {
            entry,
            dfnum: vec![0; n],
            vertex: vec![SENTINEL; n],
            parent: vec![SENTINEL; n],
            semi: (0..n).map(NodeId::new).collect(),
            idom: vec![SENTINEL; n],
            ancestor: vec![SENTINEL; n],
            best: (0..n).map(NodeId::new).collect(),
            bucket: vec![Vec::new(); n],
            dfs_counter: 0,
        }
    }

    fn compute<G: RootedGraph>(&mut self, graph: &G) {
        // Phase 1: DFS numbering
        self.dfs(graph, self.entry);

        for i in (1..self.dfs_counter).rev() {
            let w = self.vertex[i];
            let parent_w = self.parent[w.index()];

            // Phase 2: semidominators
            for v in graph.predecessors(w) {
                if self.dfnum[v.index()] == 0 {
                    continue;
                }
                let u = self.eval(v);
                if self.dfnum[self.semi[u.index()].index()]
                    < self.dfnum[self.semi[w.index()].index()]
                {
                    self.semi[w.index()] = self.semi[u.index()];
                }
            }

            let semi_w = self.semi[w.index()];
            self.bucket[semi_w.index()].push(w);
            self.ancestor[w.index()] = parent_w;

            // Phase 3: implicit immediate dominators
            let bucket = std::mem::take(&mut self.bucket[parent_w.index()]);
            for v in bucket {
                let u = self.eval(v);
                self.idom[v.index()] = if self.semi[u.index()] == self.semi[v.index()] {
                    parent_w
                } else {
                    u
                };
            }
        }

        // Phase 4: explicit immediate dominators
        for i in 1..self.dfs_counter {
            let w = self.vertex[i];
            if self.idom[w.index()] != self.semi[w.index()] {
                self.idom[w.index()] = self.idom[self.idom[w.index()].index()];
            }
        }

        self.idom[self.entry.index()] = self.entry;
    }

    fn dfs<G: RootedGraph>(&mut self, graph: &G, start: NodeId) {
        let mut stack = vec![(start, SENTINEL)];

        while let Some((node, parent)) = stack.pop() {
            let idx = node.index();
            if self.dfnum[idx] != 0 {
                continue;
            }

            self.dfs_counter += 1;
            self.dfnum[idx] = self.dfs_counter;
            self.vertex[self.dfs_counter - 1] = node;
            self.parent[idx] = parent;

            let successors: Vec<NodeId> = graph.successors(node).collect();
            for succ in successors.into_iter().rev() {
                if self.dfnum[succ.index()] == 0 {
                    stack.push((succ, node));
                }
            }
        }
    }

    fn eval(&mut self, v: NodeId) -> NodeId {
        if self.ancestor[v.index()] == SENTINEL {
            return v;
        }
        self.compress(v);
        self.best[v.index()]
    }

    fn compress(&mut self, v: NodeId) {
        // Collect the ancestor chain whose own ancestor is still linked, then fold it from
        // the top down.
        let mut chain = Vec::new();
        let mut current = v;
        while self.ancestor[self.ancestor[current.index()].index()] != SENTINEL {
            chain.push(current);
            current = self.ancestor[current.index()];
        }

        while let Some(node) = chain.pop() {
            let ancestor = self.ancestor[node.index()];
            let best_ancestor = self.best[ancestor.index()];
            let best_node = self.best[node.index()];
            if self.dfnum[self.semi[best_ancestor.index()].index()]
                < self.dfnum[self.semi[best_node.index()].index()]
            {
                self.best[node.index()] = best_ancestor;
            }
            self.ancestor[node.index()] = self.ancestor[ancestor.index()];
        }
    }
}
