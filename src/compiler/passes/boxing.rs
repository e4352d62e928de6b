//! Box-to-alloca replacement.
//!
//! A `box` whose payload is only ever accessed in place never needs to live on the heap.
//! The box qualifies when every user is an `unbox` of the same payload type, and every
//! pointer derived from those unboxes (directly or through `get_field_pointer`) is only
//! used as the pointer operand of a load, the pointer operand of a store, or the base of
//! another field pointer. The box then becomes an `alloca` initialized with the boxed
//! value, and the unboxes are replaced by the slot itself.
//!
//! # Example
//!
//! Before:
//! ```text
//! b = box<i32> x
//! p = unbox<i32> b
//! v = load p
//! ```
//!
//! After:
//! ```text
//! s = alloca i32
//! store s, x
//! v = load s
//! ```

use std::collections::HashMap;

use crate::{
    analysis::{ValueUses, ValueUsesAnalysis},
    compiler::{EventKind, EventLog, IntraproceduralOptimization},
    ir::{FlowGraph, GraphStore, Instruction, InstructionPrototype, ValueTag},
};

/// Replaces non-escaping boxes with stack slots.
pub struct BoxToAlloca;

impl Default for BoxToAlloca {
    fn default() -> Self {
        Self::new()
    }
}

impl BoxToAlloca {
    /// Creates a new box replacement pass.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// True if the pointer `value` is only used in place.
    fn stays_in_place(graph: &GraphStore, uses: &ValueUses, value: &ValueTag) -> bool {
        if !uses.flow_users(value).is_empty() {
            return false;
        }
        uses.instruction_users(value).iter().all(|user| {
            let Some(named) = graph.instruction(user) else {
                return false;
            };
            let instruction = named.instruction();
            if instruction.load_pointer() == Some(value) {
                return true;
            }
            if instruction.store_pointer() == Some(value) {
                return instruction.store_value() != Some(value);
            }
            match instruction.field_pointer() {
                Some((base, _)) if base == value => Self::stays_in_place(graph, uses, user),
                _ => false,
            }
        })
    }

    /// The unboxes of `boxed` if it can be replaced.
    fn replaceable(graph: &GraphStore, uses: &ValueUses, boxed: &ValueTag) -> Option<Vec<ValueTag>> {
        let InstructionPrototype::Box { element_type } = graph.instruction(boxed)?.instruction().prototype()
        else {
            return None;
        };
        if !uses.flow_users(boxed).is_empty() {
            return None;
        }
        let unboxes = uses.instruction_users(boxed);
        for unbox in unboxes {
            let instruction = graph.instruction(unbox)?.instruction();
            match instruction.prototype() {
                InstructionPrototype::Unbox {
                    element_type: payload,
                } if payload == element_type => {}
                _ => return None,
            }
            if !Self::stays_in_place(graph, uses, unbox) {
                return None;
            }
        }
        Some(unboxes.to_vec())
    }
}

impl IntraproceduralOptimization for BoxToAlloca {
    fn name(&self) -> &'static str {
        "box-to-alloca"
    }

    fn description(&self) -> &'static str {
        "Replaces boxes that never escape with stack slots"
    }

    fn apply(&self, graph: &FlowGraph, log: &EventLog) -> FlowGraph {
        let uses = graph.get_analysis::<ValueUsesAnalysis>();
        let mut builder = graph.to_builder();
        let mut replaced = 0;
        for named in graph.named_instructions() {
            let boxed = named.tag();
            let Some(unboxes) = Self::replaceable(graph, &uses, boxed) else {
                continue;
            };
            let instruction = named.instruction();
            let (InstructionPrototype::Box { element_type }, Some(initial)) =
                (instruction.prototype(), instruction.boxed_value())
            else {
                continue;
            };

            let slot = builder.insert_before(boxed, Instruction::alloca(element_type.clone()), "slot");
            builder.insert_before(
                boxed,
                Instruction::store(element_type.clone(), slot.clone(), initial.clone()),
                "init",
            );
            let redirects: HashMap<ValueTag, ValueTag> = unboxes
                .iter()
                .map(|unbox| (unbox.clone(), slot.clone()))
                .collect();
            builder.replace_uses(&redirects);
            builder.remove_instructions(unboxes.iter());
            builder.remove_instruction(boxed);
            replaced += 1;
            log.record(EventKind::BoxReplaced)
                .block(named.block())
                .value(boxed)
                .message(format!("{} unboxes redirected to {slot}", unboxes.len()))
                .pass(self.name());
        }

        if replaced == 0 {
            return graph.clone();
        }
        builder.to_immutable()
    }
}
