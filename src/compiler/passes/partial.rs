//! Partial scalar replacement.
//!
//! [`ScalarReplacement`] gives up on any aggregate that escapes anywhere. Often the escape
//! happens late, on one path, after a stretch of code that only reads and writes fields.
//! This pass delays the escape: it places a *rematerialization stub* at the nearest common
//! dominator of every escaping use, which allocates a fresh aggregate, copies the fields
//! over and stands in for the original from there on. Every use before the stub stays on
//! the original aggregate, which no longer escapes and is then scalarized.
//!
//! A materialization analysis ([`BlockFixpointAnalysis`]) tracks which stubs may already
//! have run on entry to each block. If a use that stays on the original can run after its
//! stub, which is what happens when the stub sits in a loop with earlier uses, the
//! aggregate is materialized as it is today and left alone.
//!
//! A field pointer taken before the stub but dereferenced after it would keep reading the
//! original, so such an aggregate is left alone too.
//!
//! Aggregates that are only initialized before they escape gain nothing and are skipped.
//!
//! # Example
//!
//! Before:
//! ```text
//! p  = alloca Point
//! px = get_field_pointer<x> p
//! store px, x
//! v  = load px
//! switch flag [true -> escape] else -> done
//! escape:
//!   call sink(p)
//! ```
//!
//! After (before scalarization):
//! ```text
//! escape:
//!   m  = alloca Point
//!   ... field copies from p to m ...
//!   call sink(m)
//! ```

use std::collections::{HashMap, HashSet};

use crate::{
    analysis::{
        dataflow::{solve_block_fixpoint, BlockFixpointAnalysis},
        DominatorTree, DominatorTreeAnalysis, ValueUses, ValueUsesAnalysis,
    },
    compiler::{
        passes::{
            scalar::{already_minimal, is_default, Aggregate, AggregateUse},
            ScalarReplacement,
        },
        EventKind, EventLog, IntraproceduralOptimization,
    },
    ir::{BasicBlock, BasicBlockTag, FlowGraph, FlowGraphBuilder, GraphStore, Instruction, ValueTag},
};

/// Delays the materialization of escaping aggregates and scalarizes what comes before.
pub struct PartialScalarReplacement;

impl Default for PartialScalarReplacement {
    fn default() -> Self {
        Self::new()
    }
}

/// Where the stub for one aggregate goes and which uses it takes over.
struct Plan {
    aggregate: Aggregate,
    block: BasicBlockTag,
    /// Position and tag of the first escaping instruction in `block`; `None` appends.
    anchor: Option<(usize, ValueTag)>,
    staying: Vec<(ValueTag, BasicBlockTag)>,
    moving: Vec<ValueTag>,
    flow_users: Vec<BasicBlockTag>,
}

impl Plan {
    /// True if position `index` of `block` (`None` for the flow) runs after the stub on
    /// every path.
    fn after_stub(&self, dominators: &DominatorTree, block: &BasicBlockTag, index: Option<usize>) -> bool {
        if *block != self.block {
            return dominators.is_strictly_dominated_by(block, &self.block);
        }
        match (&self.anchor, index) {
            (_, None) => true,
            (None, Some(_)) => false,
            (Some((position, _)), Some(index)) => index >= *position,
        }
    }

    /// True if `pointer`, or a copy of it, is used at a point that may run after the stub.
    /// Passing it along a branch counts.
    fn pointer_used_after_stub(
        &self,
        graph: &GraphStore,
        uses: &ValueUses,
        dominators: &DominatorTree,
        pointer: &ValueTag,
    ) -> bool {
        let mut pending = vec![pointer.clone()];
        let mut seen = HashSet::new();
        while let Some(value) = pending.pop() {
            if !seen.insert(value.clone()) {
                continue;
            }
            if !uses.flow_users(&value).is_empty() {
                return true;
            }
            for user in uses.instruction_users(&value) {
                let Some(named) = graph.instruction(user) else {
                    return true;
                };
                if named.instruction().copy_source() == Some(&value) {
                    pending.push(user.clone());
                    continue;
                }
                let index = graph.block(named.block()).and_then(|b| b.instruction_index(user));
                if self.after_stub(dominators, named.block(), index) {
                    return true;
                }
            }
        }
        false
    }
}

/// Blocks on entry to which each stub may already have run.
struct MaterializationAnalysis<'a> {
    stubs: HashMap<&'a BasicBlockTag, Vec<&'a ValueTag>>,
}

impl BlockFixpointAnalysis for MaterializationAnalysis<'_> {
    type State = HashSet<ValueTag>;

    fn entry_state(&self, _graph: &FlowGraph) -> Self::State {
        HashSet::new()
    }

    fn transfer(&self, block: &BasicBlock, input: &Self::State, _graph: &FlowGraph) -> Self::State {
        let mut output = input.clone();
        if let Some(stubs) = self.stubs.get(block.tag()) {
            output.extend(stubs.iter().map(|tag| (*tag).clone()));
        }
        output
    }
}

impl PartialScalarReplacement {
    /// Creates a new partial scalar replacement pass.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// True if a use staying on the aggregate reads something back before the escape.
    fn reads_before_escape(graph: &GraphStore, uses: &ValueUses, staying: &[(ValueTag, AggregateUse)]) -> bool {
        staying.iter().any(|(user, kind)| match kind {
            AggregateUse::Load => true,
            AggregateUse::Field(_) => {
                !uses.flow_users(user).is_empty()
                    || uses.instruction_users(user).iter().any(|inner| {
                        graph.instruction(inner).map_or(true, |named| {
                            let instruction = named.instruction();
                            instruction.store_pointer() != Some(user)
                                || instruction.store_value() == Some(user)
                        })
                    })
            }
            AggregateUse::DefaultStore | AggregateUse::Store => false,
        })
    }

    fn plan(graph: &FlowGraph, uses: &ValueUses, dominators: &DominatorTree, tag: &ValueTag) -> Option<Plan> {
        let aggregate = Aggregate::allocated_by(graph, tag)?;
        if aggregate
            .initial
            .as_ref()
            .is_some_and(|init| !is_default(graph, init))
            && !aggregate.fields_visible()
        {
            return None;
        }

        let mut scalar = Vec::new();
        let mut escaping = Vec::new();
        for user in uses.instruction_users(tag) {
            let block = graph.instruction(user)?.block().clone();
            match aggregate.classify(graph, user) {
                Some(kind) => scalar.push((user.clone(), block, kind)),
                None => escaping.push((user.clone(), block)),
            }
        }
        let flow_users = uses.flow_users(tag).to_vec();
        if escaping.is_empty() && flow_users.is_empty() {
            return None;
        }

        let escape_blocks: Vec<&BasicBlockTag> =
            escaping.iter().map(|(_, block)| block).chain(&flow_users).collect();
        let block = dominators.try_find_common_dominator(escape_blocks.iter().copied())?;
        let anchor = graph.block(&block)?.instructions().iter().enumerate().find_map(|(index, tag)| {
            escaping
                .iter()
                .any(|(user, _)| user == tag)
                .then(|| (index, tag.clone()))
        });

        let mut plan = Plan {
            aggregate,
            block,
            anchor,
            staying: Vec::new(),
            moving: escaping.into_iter().map(|(user, _)| user).collect(),
            flow_users,
        };
        let mut staying_kinds = Vec::new();
        for (user, block, kind) in scalar {
            let index = graph.block(&block)?.instruction_index(&user);
            if plan.after_stub(dominators, &block, index) {
                plan.moving.push(user);
            } else {
                if matches!(kind, AggregateUse::Field(_))
                    && plan.pointer_used_after_stub(graph, uses, dominators, &user)
                {
                    return None;
                }
                staying_kinds.push((user.clone(), kind));
                plan.staying.push((user, block));
            }
        }

        if !Self::reads_before_escape(graph, uses, &staying_kinds)
            || already_minimal(graph, &staying_kinds, &HashMap::new())
        {
            return None;
        }
        Some(plan)
    }

    /// Drops plans whose stub may run before a use that stays on the original aggregate.
    fn drop_conflicts(graph: &FlowGraph, plans: &mut Vec<Plan>) {
        loop {
            let mut stubs: HashMap<&BasicBlockTag, Vec<&ValueTag>> = HashMap::new();
            for plan in plans.iter() {
                stubs.entry(&plan.block).or_default().push(&plan.aggregate.tag);
            }
            let materialized = solve_block_fixpoint(&MaterializationAnalysis { stubs }, graph);
            let conflicting: HashSet<ValueTag> = plans
                .iter()
                .filter(|plan| {
                    plan.staying.iter().any(|(_, block)| {
                        materialized
                            .input(block)
                            .is_some_and(|state| state.contains(&plan.aggregate.tag))
                    })
                })
                .map(|plan| plan.aggregate.tag.clone())
                .collect();
            if conflicting.is_empty() {
                return;
            }
            plans.retain(|plan| !conflicting.contains(&plan.aggregate.tag));
        }
    }

    fn emit_stub(builder: &mut FlowGraphBuilder, plan: &Plan) -> ValueTag {
        let emit = |builder: &mut FlowGraphBuilder, instruction: Instruction, name: &str| match &plan.anchor {
            Some((_, anchor)) => builder.insert_before(anchor, instruction, name),
            None => builder.append_instruction(&plan.block, instruction, name),
        };

        let aggregate = &plan.aggregate;
        let ty = aggregate.ty();
        let copy = if aggregate.initial.is_some() {
            let zero = emit(builder, Instruction::default_value(ty.clone()), "zero");
            emit(builder, Instruction::boxed(ty, zero), "remat")
        } else {
            emit(builder, Instruction::alloca(ty), "remat")
        };
        for field in &aggregate.fields {
            let field_type = field.field_type().clone();
            let from = emit(
                builder,
                Instruction::get_field_pointer(field.clone(), aggregate.tag.clone()),
                field.name(),
            );
            let value = emit(builder, Instruction::load(field_type.clone(), from), field.name());
            let to = emit(
                builder,
                Instruction::get_field_pointer(field.clone(), copy.clone()),
                field.name(),
            );
            emit(builder, Instruction::store(field_type, to, value), "remat");
        }
        copy
    }
}

impl IntraproceduralOptimization for PartialScalarReplacement {
    fn name(&self) -> &'static str {
        "partial-scalar-replacement"
    }

    fn description(&self) -> &'static str {
        "Delays the materialization of escaping aggregates and scalarizes what comes before"
    }

    fn apply(&self, graph: &FlowGraph, log: &EventLog) -> FlowGraph {
        let uses = graph.get_analysis::<ValueUsesAnalysis>();
        let dominators = graph.get_analysis::<DominatorTreeAnalysis>();
        let mut plans: Vec<Plan> = graph
            .named_instructions()
            .filter_map(|named| Self::plan(graph, &uses, &dominators, named.tag()))
            .collect();
        Self::drop_conflicts(graph, &mut plans);
        if plans.is_empty() {
            return ScalarReplacement::new().apply(graph, log);
        }

        let mut builder = graph.to_builder();
        for plan in &plans {
            let copy = Self::emit_stub(&mut builder, plan);
            let original = &plan.aggregate.tag;
            let redirect = |value: &ValueTag| {
                if value == original {
                    copy.clone()
                } else {
                    value.clone()
                }
            };
            for user in &plan.moving {
                let Some(instruction) = builder.instruction(user).map(|n| n.instruction().map_arguments(redirect))
                else {
                    continue;
                };
                builder.replace_instruction(user, instruction);
            }
            for block in &plan.flow_users {
                let Some(flow) = builder.block(block).map(|b| b.flow().map_values(redirect)) else {
                    continue;
                };
                builder.set_flow(block, flow);
            }
            log.record(EventKind::AggregateRematerialized)
                .block(&plan.block)
                .value(original)
                .message(format!(
                    "{} stays scalar for {} uses before {}",
                    plan.aggregate.def.name(),
                    plan.staying.len(),
                    plan.block
                ))
                .pass(self.name());
        }

        ScalarReplacement::new().apply(&builder.to_immutable(), log)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        ir::{FieldRef, InstructionPrototype, MethodDef, MethodRef, PointerKind, Type, TypeRef},
        test::{
            assert_unchanged,
            builders::{build_graph, int32, point_type},
            interpreter::{Interpreter, Outcome, Value},
        },
    };

    fn field(def: &TypeRef, index: usize) -> FieldRef {
        def.instance_fields().nth(index).cloned().unwrap()
    }

    /// `sink(p: Point*) -> i32` returning `p.x`, with its body.
    fn sink(def: &TypeRef) -> (MethodRef, FlowGraph) {
        let pointer = Type::pointer(Type::Named(def.clone()), PointerKind::Transient);
        let method = MethodDef::new("sink", "test", vec![pointer.clone()], int32()).into_ref();
        let body = build_graph(|g| {
            let entry = g.entry();
            let p = g.param(&entry, pointer, "p");
            let px = g.push(&entry, Instruction::get_field_pointer(field(def, 0), p));
            let x = g.push(&entry, Instruction::load(int32(), px));
            g.ret_i32(&entry, &x);
        });
        (method, body)
    }

    fn run(graph: &FlowGraph, method: &MethodRef, body: &FlowGraph, arguments: Vec<Value>) -> Outcome {
        Interpreter::new()
            .with_method(method, body.clone())
            .run(graph, arguments)
            .unwrap()
    }

    fn point_allocations(graph: &FlowGraph, def: &TypeRef) -> Vec<ValueTag> {
        graph
            .named_instructions()
            .filter(|n| match n.instruction().prototype() {
                InstructionPrototype::Alloca { element_type } => {
                    element_type.as_named().is_some_and(|d| d.id() == def.id())
                }
                _ => false,
            })
            .map(|n| n.tag().clone())
            .collect()
    }

    #[test]
    fn test_escape_on_one_path_is_delayed() {
        let def = point_type();
        let (method, body) = sink(&def);
        let graph = build_graph(|g| {
            let entry = g.entry();
            let escape = g.block("escape");
            let done = g.block("done");
            let x = g.param(&entry, int32(), "x");
            let flag = g.param(&entry, Type::Bool, "flag");
            let p = g.push(&entry, Instruction::alloca(Type::Named(def.clone())));
            let px = g.push(&entry, Instruction::get_field_pointer(field(&def, 0), p.clone()));
            g.push(&entry, Instruction::store(int32(), px.clone(), x));
            let v = g.push(&entry, Instruction::load(int32(), px));
            g.branch(&entry, &flag, &escape, &done);
            let r = g.push(&escape, Instruction::call(method.clone(), vec![p]));
            let sum = g.op(&escape, crate::ir::ArithOp::Add, &r, &v);
            g.ret_i32(&escape, &sum);
            g.ret_i32(&done, &v);
        });

        let log = EventLog::new();
        let optimized = PartialScalarReplacement::new().apply(&graph, &log);
        optimized.validate().unwrap();
        assert_eq!(log.count_kind(EventKind::AggregateRematerialized), 1);
        assert_eq!(log.count_kind(EventKind::AggregateScalarized), 1);

        let remaining = point_allocations(&optimized, &def);
        assert_eq!(remaining.len(), 1);
        assert_eq!(optimized.defining_block(&remaining[0]).unwrap().name(), "escape");

        for flag in [true, false] {
            let arguments = vec![Value::i32(21), Value::Bool(flag)];
            assert_eq!(
                run(&graph, &method, &body, arguments.clone()),
                run(&optimized, &method, &body, arguments)
            );
        }
        assert_unchanged(&PartialScalarReplacement::new(), &optimized);
    }

    #[test]
    fn test_field_pointer_read_after_escape_keeps_aggregate() {
        let def = point_type();
        let pointer = Type::pointer(Type::Named(def.clone()), PointerKind::Transient);
        let bump = MethodDef::new("bump", "test", vec![pointer.clone()], int32()).into_ref();
        let bump_body = build_graph(|g| {
            let entry = g.entry();
            let q = g.param(&entry, pointer, "q");
            let qx = g.push(&entry, Instruction::get_field_pointer(field(&def, 0), q));
            let two = g.i32(&entry, 2);
            g.push(&entry, Instruction::store(int32(), qx, two.clone()));
            g.ret_i32(&entry, &two);
        });
        let graph = build_graph(|g| {
            let entry = g.entry();
            let x = g.param(&entry, int32(), "x");
            let p = g.push(&entry, Instruction::alloca(Type::Named(def.clone())));
            let px = g.push(&entry, Instruction::get_field_pointer(field(&def, 0), p.clone()));
            g.push(&entry, Instruction::store(int32(), px.clone(), x));
            g.push(&entry, Instruction::load(int32(), px.clone()));
            g.push(&entry, Instruction::call(bump.clone(), vec![p]));
            let after = g.push(&entry, Instruction::load(int32(), px));
            g.ret_i32(&entry, &after);
        });

        let optimized = PartialScalarReplacement::new().run(&graph);
        optimized.validate().unwrap();
        let arguments = vec![Value::i32(1)];
        assert_eq!(
            run(&graph, &bump, &bump_body, arguments.clone()),
            Outcome::Returned(Value::i32(2))
        );
        assert_eq!(
            run(&optimized, &bump, &bump_body, arguments),
            Outcome::Returned(Value::i32(2))
        );
        assert_unchanged(&PartialScalarReplacement::new(), &graph);
    }

    #[test]
    fn test_stub_in_loop_forces_materialization() {
        let def = point_type();
        let (method, _) = sink(&def);
        let graph = build_graph(|g| {
            let entry = g.entry();
            let header = g.block("header");
            let body = g.block("body");
            let exit = g.block("exit");
            let flag = g.param(&entry, Type::Bool, "flag");
            let p = g.push(&entry, Instruction::alloca(Type::Named(def.clone())));
            g.jump(&entry, &header, &[]);
            let px = g.push(&header, Instruction::get_field_pointer(field(&def, 0), p.clone()));
            let v = g.push(&header, Instruction::load(int32(), px));
            g.branch(&header, &flag, &body, &exit);
            g.push(&body, Instruction::call(method.clone(), vec![p]));
            g.jump(&body, &header, &[]);
            g.ret_i32(&exit, &v);
        });
        assert_unchanged(&PartialScalarReplacement::new(), &graph);
    }

    #[test]
    fn test_initialize_then_escape_is_left_alone() {
        let def = point_type();
        let (method, _) = sink(&def);
        let graph = build_graph(|g| {
            let entry = g.entry();
            let x = g.param(&entry, int32(), "x");
            let p = g.push(&entry, Instruction::alloca(Type::Named(def.clone())));
            let px = g.push(&entry, Instruction::get_field_pointer(field(&def, 0), p.clone()));
            g.push(&entry, Instruction::store(int32(), px, x));
            let r = g.push(&entry, Instruction::call(method.clone(), vec![p]));
            g.ret_i32(&entry, &r);
        });
        assert_unchanged(&PartialScalarReplacement::new(), &graph);
    }
}
