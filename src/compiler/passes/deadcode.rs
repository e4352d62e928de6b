//! Dead value and dead block elimination.
//!
//! [`DeadValueElimination`] removes instructions and block parameters whose values can
//! never influence observable behavior. [`DeadBlockElimination`] removes blocks that no
//! path from the entry reaches.
//!
//! # Example
//!
//! Before:
//! ```text
//! entry(x):
//!   a = add x, 1        // unused
//!   p = alloca i32      // only ever written
//!   store p, x
//!   call sink(x)
//!   return x
//! ```
//!
//! After:
//! ```text
//! entry(x):
//!   call sink(x)
//!   return x
//! ```
//!
//! # Algorithm
//!
//! Liveness is computed backwards from a seed set:
//!
//! 1. Every effectful instruction, except stores into a local allocation whose address
//!    never escapes
//! 2. Every entry block parameter
//! 3. Every value used by a block's flow instruction (switch scrutinee, try instruction,
//!    return value)
//!
//! The closure follows instruction arguments and, for block parameters, the matching
//! argument of every branch into the block. When a local allocation becomes live, the
//! stores into it that were held back in step 1 become live too.

use std::collections::{HashMap, HashSet};

use crate::{
    analysis::{
        AliasAnalysis, BlockReachabilityAnalysis, EffectfulInstructionsAnalysis,
    },
    compiler::{EventKind, EventLog, IntraproceduralOptimization},
    ir::{BasicBlockTag, FlowGraph, ValueTag},
};

/// Removes values nothing observable depends on.
pub struct DeadValueElimination;

impl Default for DeadValueElimination {
    fn default() -> Self {
        Self::new()
    }
}

impl DeadValueElimination {
    /// Creates a new dead value elimination transform.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Computes the set of live values.
    fn live_values(graph: &FlowGraph) -> HashSet<ValueTag> {
        let alias = graph.get_analysis::<AliasAnalysis>();
        let effects = graph.get_analysis::<EffectfulInstructionsAnalysis>();

        // Stores into non-escaping locals, keyed by the allocation they write into
        let mut local_stores: HashMap<ValueTag, Vec<ValueTag>> = HashMap::new();
        let mut worklist: Vec<ValueTag> = Vec::new();
        for tag in effects.iter() {
            let held_back = graph
                .instruction(tag)
                .and_then(|named| named.instruction().store_pointer())
                .filter(|pointer| alias.is_local(pointer))
                .and_then(|pointer| alias.root(pointer));
            match held_back {
                Some(root) => local_stores.entry(root.clone()).or_default().push(tag.clone()),
                None => worklist.push(tag.clone()),
            }
        }

        let mut param_sources: HashMap<ValueTag, Vec<ValueTag>> = HashMap::new();
        for block in graph.blocks() {
            let flow = block.flow();
            for instruction in flow.instructions() {
                worklist.extend(instruction.arguments().iter().cloned());
            }
            for branch in flow.branches() {
                let Some(target) = graph.block(branch.target()) else {
                    continue;
                };
                for (parameter, argument) in target.parameter_tags().zip(branch.arguments()) {
                    if let Some(value) = argument.as_value() {
                        param_sources
                            .entry(parameter.clone())
                            .or_default()
                            .push(value.clone());
                    }
                }
            }
        }
        if let Some(entry) = graph.block(graph.entry_point()) {
            worklist.extend(entry.parameter_tags().cloned());
        }

        let mut live = HashSet::new();
        while let Some(value) = worklist.pop() {
            if !live.insert(value.clone()) {
                continue;
            }
            if let Some(named) = graph.instruction(&value) {
                worklist.extend(named.instruction().arguments().iter().cloned());
            } else if let Some(sources) = param_sources.get(&value) {
                worklist.extend(sources.iter().cloned());
            }
            if let Some(stores) = local_stores.remove(&value) {
                worklist.extend(stores);
            }
        }
        live
    }
}

impl IntraproceduralOptimization for DeadValueElimination {
    fn name(&self) -> &'static str {
        "dead-value-elimination"
    }

    fn description(&self) -> &'static str {
        "Removes instructions and block parameters that cannot affect observable behavior"
    }

    fn apply(&self, graph: &FlowGraph, log: &EventLog) -> FlowGraph {
        let live = Self::live_values(graph);

        let dead_instructions: Vec<ValueTag> = graph
            .blocks()
            .flat_map(|block| block.instructions().iter())
            .filter(|tag| !live.contains(*tag))
            .cloned()
            .collect();
        let mut dead_parameters: Vec<(BasicBlockTag, HashSet<ValueTag>)> = Vec::new();
        for block in graph.blocks() {
            if block.tag() == graph.entry_point() {
                continue;
            }
            let dead: HashSet<ValueTag> = block
                .parameter_tags()
                .filter(|tag| !live.contains(*tag))
                .cloned()
                .collect();
            if !dead.is_empty() {
                dead_parameters.push((block.tag().clone(), dead));
            }
        }

        if dead_instructions.is_empty() && dead_parameters.is_empty() {
            return graph.clone();
        }

        let mut builder = graph.to_builder();
        for (block, parameters) in &dead_parameters {
            builder.remove_parameters(block, parameters);
            for parameter in parameters {
                log.record(EventKind::ParameterRemoved)
                    .block(block)
                    .value(parameter)
                    .pass(self.name());
            }
        }
        builder.remove_instructions(&dead_instructions);
        for tag in &dead_instructions {
            log.record(EventKind::InstructionRemoved)
                .value(tag)
                .pass(self.name());
        }
        builder.to_immutable()
    }
}

/// Removes blocks that are unreachable from the entry.
pub struct DeadBlockElimination;

impl Default for DeadBlockElimination {
    fn default() -> Self {
        Self::new()
    }
}

impl DeadBlockElimination {
    /// Creates a new dead block elimination transform.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl IntraproceduralOptimization for DeadBlockElimination {
    fn name(&self) -> &'static str {
        "dead-block-elimination"
    }

    fn description(&self) -> &'static str {
        "Removes blocks that no path from the entry reaches"
    }

    fn apply(&self, graph: &FlowGraph, log: &EventLog) -> FlowGraph {
        let reachability = graph.get_analysis::<BlockReachabilityAnalysis>();
        let entry = graph.entry_point();
        let dead: Vec<BasicBlockTag> = graph
            .block_tags()
            .iter()
            .filter(|tag| *tag != entry && !reachability.is_strictly_reachable(entry, tag))
            .cloned()
            .collect();
        if dead.is_empty() {
            return graph.clone();
        }

        let mut builder = graph.to_builder();
        for tag in &dead {
            builder.remove_block(tag);
            log.record(EventKind::BlockRemoved).block(tag).pass(self.name());
        }
        builder.to_immutable()
    }
}
