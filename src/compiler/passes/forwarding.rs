//! Register forwarding.
//!
//! Rewrites every use of a value defined in another block into a use of a block
//! parameter, threading the value through branch arguments along every path. Afterwards
//! each block only refers to its own parameters and instructions, which lets jump
//! threading move flows between blocks without worrying about dominance.
//!
//! # Example
//!
//! Before:
//! ```text
//! entry(x):
//!   jump next()
//! next:
//!   return x
//! ```
//!
//! After:
//! ```text
//! entry(x):
//!   jump next(x)
//! next(x'):
//!   return x'
//! ```
//!
//! Live-in sets are computed with the usual backwards fixpoint:
//! `live_in(B) = uses(B) ∪ (⋃ live_in(S) for successors S) − defs(B)`.

use std::collections::{BTreeSet, HashMap, HashSet};

use crate::{
    compiler::{EventLog, IntraproceduralOptimization},
    ir::{BasicBlockTag, BranchArgument, FlowGraph, GraphStore, Type, ValueTag},
};

/// Turns cross-block value uses into explicit block parameters.
pub struct RegisterForwarding;

impl Default for RegisterForwarding {
    fn default() -> Self {
        Self::new()
    }
}

impl RegisterForwarding {
    /// Creates a new register forwarding transform.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Values each block uses without defining, ordered by tag.
    pub(crate) fn live_ins(graph: &GraphStore) -> HashMap<BasicBlockTag, BTreeSet<ValueTag>> {
        let mut defs: HashMap<&BasicBlockTag, HashSet<&ValueTag>> = HashMap::new();
        let mut live: HashMap<BasicBlockTag, BTreeSet<ValueTag>> = HashMap::new();
        for block in graph.blocks() {
            let defined: HashSet<&ValueTag> = block
                .parameter_tags()
                .chain(block.instructions().iter())
                .collect();
            let mut used: BTreeSet<ValueTag> = BTreeSet::new();
            for tag in block.instructions() {
                if let Some(named) = graph.instruction(tag) {
                    used.extend(named.instruction().arguments().iter().cloned());
                }
            }
            used.extend(block.flow().used_values());
            used.retain(|value| !defined.contains(value));
            live.insert(block.tag().clone(), used);
            defs.insert(block.tag(), defined);
        }

        let mut changed = true;
        while changed {
            changed = false;
            for block in graph.blocks().collect::<Vec<_>>().into_iter().rev() {
                let mut additions: Vec<ValueTag> = Vec::new();
                for successor in block.flow().successors() {
                    let Some(incoming) = live.get(&successor) else {
                        continue;
                    };
                    let defined = &defs[block.tag()];
                    additions.extend(
                        incoming
                            .iter()
                            .filter(|value| !defined.contains(value))
                            .cloned(),
                    );
                }
                if let Some(current) = live.get_mut(block.tag()) {
                    for value in additions {
                        changed |= current.insert(value);
                    }
                }
            }
        }
        live
    }
}

impl IntraproceduralOptimization for RegisterForwarding {
    fn name(&self) -> &'static str {
        "register-forwarding"
    }

    fn description(&self) -> &'static str {
        "Passes values used across blocks explicitly as block parameters"
    }

    fn apply(&self, graph: &FlowGraph, log: &EventLog) -> FlowGraph {
        let mut live = Self::live_ins(graph);
        live.remove(graph.entry_point());
        live.retain(|_, values| !values.is_empty());
        if live.is_empty() {
            return graph.clone();
        }

        let mut builder = graph.to_builder();
        let mut renames: HashMap<BasicBlockTag, HashMap<ValueTag, ValueTag>> = HashMap::new();
        let mut forwarded = 0;
        for tag in graph.block_tags() {
            let Some(values) = live.get(tag) else {
                continue;
            };
            let rename = renames.entry(tag.clone()).or_default();
            for value in values {
                let ty = graph.value_type(value).unwrap_or(Type::Void);
                let parameter = builder.append_parameter(tag, ty, value.name());
                rename.insert(value.clone(), parameter);
                forwarded += 1;
            }
        }

        let empty = HashMap::new();
        for block in graph.blocks() {
            let tag = block.tag();
            let rename = renames.get(tag).unwrap_or(&empty);
            let local = |value: &ValueTag| rename.get(value).unwrap_or(value).clone();

            if !rename.is_empty() {
                for instruction in block.instructions() {
                    let Some(named) = graph.instruction(instruction) else {
                        continue;
                    };
                    if named.instruction().arguments().iter().any(|a| rename.contains_key(a)) {
                        builder.replace_instruction(
                            instruction,
                            named.instruction().map_arguments(local),
                        );
                    }
                }
            }

            let flow = block.flow();
            let needs_arguments = flow
                .successors()
                .iter()
                .any(|successor| live.contains_key(successor));
            if rename.is_empty() && !needs_arguments {
                continue;
            }
            let renamed = flow.map_values(local);
            let branches = renamed
                .branches()
                .into_iter()
                .map(|branch| {
                    let mut branch = branch.clone();
                    for value in live.get(branch.target()).into_iter().flatten() {
                        branch = branch.with_appended(BranchArgument::Value(local(value)));
                    }
                    branch
                })
                .collect();
            builder.set_flow(tag, renamed.with_branches(branches));
        }

        log.info(format!(
            "{}: forwarded {forwarded} values into block parameters",
            self.name()
        ));
        builder.to_immutable()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        ir::ArithOp,
        test::{
            assert_preserves_semantics, assert_unchanged,
            builders::{build_graph, int32},
            interpreter::Value,
        },
    };

    fn only_local_uses(graph: &FlowGraph) -> bool {
        RegisterForwarding::live_ins(graph)
            .iter()
            .all(|(block, values)| block == graph.entry_point() || values.is_empty())
    }

    #[test]
    fn test_values_are_passed_explicitly() {
        let graph = build_graph(|g| {
            let entry = g.entry();
            let next = g.block("next");
            let x = g.param(&entry, int32(), "x");
            let one = g.i32(&entry, 1);
            g.jump(&entry, &next, &[]);
            let sum = g.op(&next, ArithOp::Add, &x, &one);
            g.ret_i32(&next, &sum);
        });

        let optimized =
            assert_preserves_semantics(&RegisterForwarding::new(), &graph, &[vec![Value::i32(2)]]);
        assert!(only_local_uses(&optimized));
        let next = optimized.blocks().find(|b| b.tag().name() == "next").unwrap();
        assert_eq!(next.parameters().len(), 2);
        assert_unchanged(&RegisterForwarding::new(), &optimized);
    }

    #[test]
    fn test_values_travel_around_loops() {
        let graph = build_graph(|g| {
            let entry = g.entry();
            let header = g.block("header");
            let body = g.block("body");
            let exit = g.block("exit");
            let n = g.param(&entry, int32(), "n");
            let step = g.i32(&entry, 2);
            let zero = g.i32(&entry, 0);
            g.jump(&entry, &header, &[&zero]);

            let i = g.param(&header, int32(), "i");
            let done = g.op(&header, ArithOp::Ge, &i, &n);
            g.branch(&header, &done, &exit, &body);
            let next = g.op(&body, ArithOp::Add, &i, &step);
            g.jump(&body, &header, &[&next]);
            let scaled = g.op(&exit, ArithOp::Mul, &i, &step);
            g.ret_i32(&exit, &scaled);
        });

        let optimized = assert_preserves_semantics(
            &RegisterForwarding::new(),
            &graph,
            &[vec![Value::i32(0)], vec![Value::i32(7)]],
        );
        assert!(only_local_uses(&optimized));
        let header = optimized.blocks().find(|b| b.tag().name() == "header").unwrap();
        // i, plus n and step forwarded from the entry
        assert_eq!(header.parameters().len(), 3);
    }
}
