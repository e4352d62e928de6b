//! Graph traversal algorithms.
//!
//! - [`dfs`] - lazy depth-first preorder iterator
//! - [`postorder`] - depth-first postorder
//! - [`reverse_postorder`] - the standard iteration order for forward dataflow problems
//!
//! All traversals are iterative and only visit nodes reachable from the start node.

use crate::utils::graph::{NodeId, Successors};

/// Depth-first preorder iterator.
pub struct DfsIterator<'g, G: Successors> {
    graph: &'g G,
    stack: Vec<NodeId>,
    visited: Vec<bool>,
}

impl<'g, G: Successors> DfsIterator<'g, G> {
    fn new(graph: &'g G, start: NodeId) -> Self {
        let node_count = graph.node_count();
        if start.index() >= node_count {
            return DfsIterator {
                graph,
                stack: Vec::new(),
                visited: Vec::new(),
            };
        }

        let mut visited = vec![false; node_count];
        visited[start.index()] = true;
        DfsIterator {
            graph,
            stack: vec![start],
            visited,
        }
    }
}

impl<G: Successors> Iterator for DfsIterator<'_, G> {
    type Item = NodeId;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.stack.pop()?;

        // Reverse so successors are visited in their original order
        let successors: Vec<NodeId> = self.graph.successors(node).collect();
        for &succ in successors.iter().rev() {
            if !self.visited[succ.index()] {
                self.visited[succ.index()] = true;
                self.stack.push(succ);
            }
        }

        Some(node)
    }
}

/// Visits every node reachable from `start` in depth-first preorder.
pub fn dfs<G: Successors>(graph: &G, start: NodeId) -> DfsIterator<'_, G> {
    DfsIterator::new(graph, start)
}

/// Returns the nodes reachable from `start` in depth-first postorder.
#[allow(clippy::items_after_statements)]
pub fn postorder<G: Successors>(graph: &G, start: NodeId) -> Vec<NodeId> {
    let node_count = graph.node_count();
    if start.index() >= node_count {
        return Vec::new();
    }

    let mut visited = vec![false; node_count];
    let mut result = Vec::with_capacity(node_count);

    #[derive(Clone, Copy)]
    enum State {
        Enter,
        Exit,
    }

    let mut stack = vec![(start, State::Enter)];
    while let Some((node, state)) = stack.pop() {
        match state {
            State::Enter => {
                if visited[node.index()] {
                    continue;
                }
                visited[node.index()] = true;
                stack.push((node, State::Exit));

                let successors: Vec<NodeId> = graph.successors(node).collect();
                for &succ in successors.iter().rev() {
                    if !visited[succ.index()] {
                        stack.push((succ, State::Enter));
                    }
                }
            }
            State::Exit => result.push(node),
        }
    }

    result
}

/// Returns the nodes reachable from `start` in reverse postorder.
///
/// In reverse postorder every node appears before its successors, except along back
/// edges.
pub fn reverse_postorder<G: Successors>(graph: &G, start: NodeId) -> Vec<NodeId> {
    let mut result = postorder(graph, start);
    result.reverse();
    result
}
