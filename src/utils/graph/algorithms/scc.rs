//! Strongly connected components using Tarjan's algorithm.
//!
//! A strongly connected component (SCC) is a maximal set of nodes in which every node is
//! reachable from every other node. Copy propagation uses SCCs of the block-parameter
//! dependency graph to find groups of phis that only feed each other.
//!
//! The implementation keeps an explicit call stack instead of recursing, so pathological
//! inputs with very long dependency chains cannot overflow the native stack.
//!
//! Components are emitted in reverse topological order: a component is emitted only after
//! every component reachable from it.

use crate::utils::graph::{NodeId, Successors};

/// Computes the strongly connected components of a graph.
///
/// Every node appears in exactly one component; nodes that are not part of any cycle form
/// singleton components.
///
/// # Examples
///
/// ```rust,ignore
/// use flowscope::utils::graph::{algorithms, IndexedGraph};
///
/// let mut graph: IndexedGraph<&str> = IndexedGraph::new();
/// graph.add_edge("a", "b");
/// graph.add_edge("b", "a");
/// graph.add_edge("b", "c");
///
/// let sccs = algorithms::strongly_connected_components(&graph);
/// assert_eq!(sccs.len(), 2);
/// ```
pub fn strongly_connected_components<G>(graph: &G) -> Vec<Vec<NodeId>>
where
    G: Successors,
{
    let node_count = graph.node_count();
    let mut state = TarjanState::new(node_count);
    for i in 0..node_count {
        if state.index[i].is_none() {
            state.strongconnect(graph, NodeId::new(i));
        }
    }
    state.sccs
}

struct TarjanState {
    index: Vec<Option<usize>>,
    lowlink: Vec<usize>,
    on_stack: Vec<bool>,
    stack: Vec<NodeId>,
    current_index: usize,
    sccs: Vec<Vec<NodeId>>,
}

impl TarjanState {
    fn new(n: usize) -> Self {
        Self {
            index: vec![None; n],
            lowlink: vec![0; n],
            on_stack: vec![false; n],
            stack: Vec::new(),
            current_index: 0,
            sccs: Vec::new(),
        }
    }

    fn visit(&mut self, v: NodeId) {
        self.index[v.index()] = Some(self.current_index);
        self.lowlink[v.index()] = self.current_index;
        self.current_index += 1;
        self.stack.push(v);
        self.on_stack[v.index()] = true;
    }

    fn strongconnect<G: Successors>(&mut self, graph: &G, root: NodeId) {
        // Each frame holds a node and its not yet examined successors.
        let mut frames: Vec<(NodeId, std::vec::IntoIter<NodeId>)> = Vec::new();
        self.visit(root);
        frames.push((root, graph.successors(root).collect::<Vec<_>>().into_iter()));

        while let Some((v, successors)) = frames.last_mut() {
            let v = *v;
            if let Some(w) = successors.next() {
                match self.index[w.index()] {
                    None => {
                        self.visit(w);
                        frames.push((w, graph.successors(w).collect::<Vec<_>>().into_iter()));
                    }
                    Some(w_index) if self.on_stack[w.index()] => {
                        self.lowlink[v.index()] = self.lowlink[v.index()].min(w_index);
                    }
                    Some(_) => {}
                }
                continue;
            }

            frames.pop();
            if let Some((parent, _)) = frames.last() {
                self.lowlink[parent.index()] =
                    self.lowlink[parent.index()].min(self.lowlink[v.index()]);
            }

            if Some(self.lowlink[v.index()]) == self.index[v.index()] {
                let mut scc = Vec::new();
                while let Some(w) = self.stack.pop() {
                    self.on_stack[w.index()] = false;
                    scc.push(w);
                    if w == v {
                        break;
                    }
                }
                self.sccs.push(scc);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::graph::IndexedGraph;

    fn sorted(mut sccs: Vec<Vec<NodeId>>) -> Vec<Vec<NodeId>> {
        for scc in &mut sccs {
            scc.sort();
        }
        sccs.sort();
        sccs
    }

    #[test]
    fn test_acyclic_graph_has_singletons() {
        let mut graph = IndexedGraph::new();
        graph.add_edge("a", "b");
        graph.add_edge("b", "c");
        let sccs = strongly_connected_components(&graph);
        assert_eq!(sccs.len(), 3);
        assert!(sccs.iter().all(|scc| scc.len() == 1));
    }

    #[test]
    fn test_two_cycles() {
        let mut graph = IndexedGraph::new();
        graph.add_edge("a", "b");
        graph.add_edge("b", "a");
        graph.add_edge("b", "c");
        graph.add_edge("c", "d");
        graph.add_edge("d", "c");
        let sccs = sorted(strongly_connected_components(&graph));
        assert_eq!(sccs.len(), 2);
        assert!(sccs.iter().all(|scc| scc.len() == 2));
    }

    #[test]
    fn test_reverse_topological_order() {
        let mut graph = IndexedGraph::new();
        graph.add_edge("a", "b");
        graph.add_edge("b", "c");
        let sccs = strongly_connected_components(&graph);
        let c = graph.node_id(&"c").unwrap();
        assert_eq!(sccs[0], vec![c]);
    }

    #[test]
    fn test_deep_cycle_does_not_overflow() {
        let mut graph = IndexedGraph::new();
        for i in 0..50_000u32 {
            graph.add_edge(i, i + 1);
        }
        graph.add_edge(50_000, 0);
        let sccs = strongly_connected_components(&graph);
        assert_eq!(sccs.len(), 1);
        assert_eq!(sccs[0].len(), 50_001);
    }
}
