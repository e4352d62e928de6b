//! The set of instructions whose execution is observable.

use std::collections::HashSet;

use crate::{
    analysis::FlowGraphAnalysis,
    ir::{FlowGraph, ValueTag},
};

/// Computes [`EffectfulInstructions`].
#[derive(Debug, Default, Clone, Copy)]
pub struct EffectfulInstructionsAnalysis;

impl FlowGraphAnalysis for EffectfulInstructionsAnalysis {
    type Output = EffectfulInstructions;

    fn analyze(&self, graph: &FlowGraph) -> EffectfulInstructions {
        let instructions = graph
            .named_instructions()
            .filter(|named| named.instruction().prototype().is_effectful())
            .map(|named| named.tag().clone())
            .collect();
        EffectfulInstructions { instructions }
    }
}

/// Named instructions that write memory or may throw, and so can neither be deleted when
/// unused nor freely reordered.
#[derive(Debug, Clone)]
pub struct EffectfulInstructions {
    instructions: HashSet<ValueTag>,
}

impl EffectfulInstructions {
    /// True if `value` is defined by an effectful instruction.
    #[must_use]
    pub fn contains(&self, value: &ValueTag) -> bool {
        self.instructions.contains(value)
    }

    /// Iterates over the effectful instructions.
    pub fn iter(&self) -> impl Iterator<Item = &ValueTag> {
        self.instructions.iter()
    }

    /// Number of effectful instructions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    /// True if the graph has no effectful instructions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }
}
