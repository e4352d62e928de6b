//! Per-graph memoization of analysis results.
//!
//! Every [`FlowGraph`] owns an [`AnalysisCache`]. Results are keyed by the analysis type and
//! live exactly as long as the graph instance they were computed from. A graph produced by
//! a builder starts with a fresh cache, so there is nothing to invalidate.

use std::{
    any::{Any, TypeId},
    sync::Arc,
};

use dashmap::DashMap;

use crate::ir::FlowGraph;

/// An analysis that can be computed for, and cached on, a [`FlowGraph`].
///
/// Implementors are zero-sized markers named `...Analysis`; their `Output` is the result
/// type queried by transforms.
pub trait FlowGraphAnalysis: Send + Sync + 'static {
    /// The analysis result.
    type Output: Send + Sync + 'static;

    /// Computes the result for `graph`. May request other analyses of the same graph.
    fn analyze(&self, graph: &FlowGraph) -> Self::Output;
}

/// Type-indexed side table of analysis results.
#[derive(Default)]
pub struct AnalysisCache {
    results: DashMap<TypeId, Arc<dyn Any + Send + Sync>>,
}

impl AnalysisCache {
    /// Returns the cached result of `analysis`, computing it on first request.
    ///
    /// The computation runs without holding any lock, so analyses may depend on each other.
    /// If two threads race on the same analysis, both compute and the first insertion wins.
    pub(crate) fn get_or_compute<A>(&self, graph: &FlowGraph, analysis: &A) -> Arc<A::Output>
    where
        A: FlowGraphAnalysis,
    {
        let key = TypeId::of::<A>();
        if let Some(cached) = self.lookup::<A>(&key) {
            return cached;
        }

        let computed = Arc::new(analysis.analyze(graph));
        let stored = self
            .results
            .entry(key)
            .or_insert_with(|| Arc::clone(&computed) as Arc<dyn Any + Send + Sync>)
            .value()
            .clone();
        stored.downcast::<A::Output>().unwrap_or(computed)
    }

    fn lookup<A: FlowGraphAnalysis>(&self, key: &TypeId) -> Option<Arc<A::Output>> {
        let cached = self.results.get(key)?.value().clone();
        cached.downcast::<A::Output>().ok()
    }

    /// Number of cached results.
    pub(crate) fn len(&self) -> usize {
        self.results.len()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::ir::FlowGraphBuilder;

    static RUNS: AtomicUsize = AtomicUsize::new(0);

    #[derive(Default)]
    struct CountingAnalysis;

    impl FlowGraphAnalysis for CountingAnalysis {
        type Output = usize;

        fn analyze(&self, graph: &FlowGraph) -> usize {
            RUNS.fetch_add(1, Ordering::SeqCst);
            graph.block_count()
        }
    }

    #[test]
    fn test_results_are_cached_per_instance() {
        let graph = FlowGraphBuilder::new().to_immutable();
        let before = RUNS.load(Ordering::SeqCst);
        assert_eq!(*graph.get_analysis::<CountingAnalysis>(), 1);
        assert_eq!(*graph.clone().get_analysis::<CountingAnalysis>(), 1);
        assert_eq!(RUNS.load(Ordering::SeqCst), before + 1);

        let mut builder = graph.to_builder();
        builder.add_block("extra");
        let edited = builder.to_immutable();
        assert_eq!(*edited.get_analysis::<CountingAnalysis>(), 2);
        assert_eq!(RUNS.load(Ordering::SeqCst), before + 2);
    }
}
