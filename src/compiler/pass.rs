//! Transform traits.
//!
//! Transforms come in two shapes:
//!
//! - [`IntraproceduralOptimization`] - a pure `FlowGraph -> FlowGraph` rewrite that looks
//!   at nothing but the graph itself
//! - [`Optimization`] - a rewrite of a whole [`MethodBody`] that may consult the shared
//!   [`OptimizationState`], for example to fetch callee bodies
//!
//! [`Intraprocedural`] lifts the first shape into the second, and [`Checkpoint`] is the
//! one general transform that does not rewrite anything: it publishes the current body so
//! later inlining requests observe it.

use crate::{
    compiler::{EventKind, EventLog, OptimizationState},
    ir::{FlowGraph, MethodBody, MethodRef},
    Result,
};

/// A transform of a single flow graph.
///
/// Implementations must be deterministic and must return a graph that satisfies every
/// invariant checked by [`FlowGraph::validate`] whenever their input does. When nothing
/// can be improved they return the input graph itself.
pub trait IntraproceduralOptimization: Send + Sync {
    /// Short unique name of the transform.
    fn name(&self) -> &'static str;

    /// One-line description of what the transform does.
    fn description(&self) -> &'static str;

    /// Rewrites `graph`, recording what changed into `log`.
    fn apply(&self, graph: &FlowGraph, log: &EventLog) -> FlowGraph;

    /// Rewrites `graph`, discarding the event log.
    fn run(&self, graph: &FlowGraph) -> FlowGraph {
        self.apply(graph, &EventLog::new())
    }
}

/// A transform of a method body.
pub trait Optimization: Send + Sync {
    /// Short unique name of the transform.
    fn name(&self) -> &'static str;

    /// True for transforms that mark a point in a pipeline where bodies are published.
    fn is_checkpoint(&self) -> bool {
        false
    }

    /// Rewrites the body of `method`.
    ///
    /// # Errors
    ///
    /// Only failures of the body provider behind `state` are propagated.
    fn apply(
        &self,
        method: &MethodRef,
        body: &MethodBody,
        state: &OptimizationState,
    ) -> Result<MethodBody>;
}

/// Adapter running an [`IntraproceduralOptimization`] on a method body's implementation.
///
/// Events are recorded into the state's log, attributed to the method.
#[derive(Debug, Clone, Default)]
pub struct Intraprocedural<T>(pub T);

impl<T: IntraproceduralOptimization> Optimization for Intraprocedural<T> {
    fn name(&self) -> &'static str {
        self.0.name()
    }

    fn apply(
        &self,
        method: &MethodRef,
        body: &MethodBody,
        state: &OptimizationState,
    ) -> Result<MethodBody> {
        let scratch = EventLog::new();
        let graph = self.0.apply(body.implementation(), &scratch);
        state.events().merge_for_method(&scratch, &method.to_string());
        if graph.same_instance(body.implementation()) {
            return Ok(body.clone());
        }
        Ok(body.with_implementation(graph))
    }
}

/// Publishes the current body of a method into the state's body cache.
#[derive(Debug, Clone, Copy, Default)]
pub struct Checkpoint;

impl Optimization for Checkpoint {
    fn name(&self) -> &'static str {
        "checkpoint"
    }

    fn is_checkpoint(&self) -> bool {
        true
    }

    fn apply(
        &self,
        method: &MethodRef,
        body: &MethodBody,
        state: &OptimizationState,
    ) -> Result<MethodBody> {
        state.publish(method, body.clone());
        state
            .events()
            .record(EventKind::Info)
            .method(method.to_string())
            .pass(self.name())
            .message(format!("published body of {method}"));
        Ok(body.clone())
    }
}
