//! Method inlining.
//!
//! Replaces static calls and `new_object` instructions with a copy of the callee's body.
//! This is the one transform that needs other methods: callee bodies come from the
//! [`OptimizationState`], fetched in a single batch per application.
//!
//! # Candidates
//!
//! A call site is considered when:
//!
//! - it is a named `call` with static dispatch, or a `new_object`
//! - the callee is not the caller, after following generic instantiations back to their
//!   definition
//! - the callee lives in the caller's module, unless
//!   [`InliningConfig::allow_cross_module`] is set
//!
//! # Heuristic
//!
//! The cost of a site is the callee's instruction count plus its block count. The gain is
//! [`InliningConfig::base_gain`], plus a bonus per argument (a flat
//! [`InliningConfig::alloca_argument_bonus`] for arguments defined by `alloca`, the
//! argument's estimated size over [`InliningConfig::size_bonus_divisor`] otherwise), plus
//! the return type's estimated size over the same divisor. A site is inlined when the gain
//! is at least the cost and every type and member the callee mentions is accessible from
//! the caller.
//!
//! # Rewrite
//!
//! The caller's block is split right after the call. Instructions that follow the call move
//! into a continuation block that takes the call's result as a parameter. The block then
//! jumps into a copy of the callee, and every return in the copy jumps to the continuation.
//! A `new_object` site first allocates a zero-initialized object, passes it as `this`, and
//! continues with that object instead of whatever the constructor returns.
//!
//! Each site is rewritten on a fork of the caller's builder that is only kept once the
//! whole splice has succeeded.
//!
//! # Example
//!
//! Before:
//! ```text
//! entry(x):
//!   y = call square(x)
//!   return y
//! ```
//!
//! After:
//! ```text
//! entry(x):
//!   jump square.entry(x)
//! square.entry(a):
//!   r = mul a, a
//!   jump entry.cont(r)
//! entry.cont(y):
//!   return y
//! ```

use std::collections::HashMap;

use crate::{
    analysis::DominatorTreeAnalysis,
    compiler::{EventKind, InliningConfig, Optimization, OptimizationState},
    ir::{
        AccessRules, BasicBlockTag, BlockFlow, Branch, FlowGraph, FlowGraphBuilder, GraphStore,
        Instruction, InstructionPrototype, Member, MethodBody, MethodDef, MethodLookup,
        MethodRef, ValueTag,
    },
    Result,
};

/// Inlines profitable static calls and constructor invocations.
pub struct Inlining {
    config: InliningConfig,
}

impl Default for Inlining {
    fn default() -> Self {
        Self::new()
    }
}

/// A call site that may be inlined.
struct Site {
    call: ValueTag,
    callee: MethodRef,
    constructs: bool,
}

impl Inlining {
    /// Creates an inliner with the default cost model.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(InliningConfig::default())
    }

    /// Creates an inliner with the given cost model.
    #[must_use]
    pub fn with_config(config: InliningConfig) -> Self {
        Self { config }
    }

    /// The cost of inlining `callee`: its instruction count plus its block count.
    #[must_use]
    pub fn cost(callee: &MethodBody) -> usize {
        let graph = callee.implementation();
        graph.instruction_count() + graph.block_count()
    }

    /// The gain of inlining the call `call`, defined in `caller`.
    #[must_use]
    pub fn gain(&self, caller: &GraphStore, call: &Instruction) -> usize {
        let divisor = self.config.size_bonus_divisor.max(1);
        let arguments: usize = call
            .arguments()
            .iter()
            .map(|argument| {
                let from_alloca = caller.instruction(argument).is_some_and(|named| {
                    matches!(named.instruction().prototype(), InstructionPrototype::Alloca { .. })
                });
                if from_alloca {
                    self.config.alloca_argument_bonus
                } else {
                    caller
                        .value_type(argument)
                        .map_or(0, |ty| ty.estimated_size() / divisor)
                }
            })
            .sum();
        self.config.base_gain + arguments + call.result_type().estimated_size() / divisor
    }

    fn candidates(&self, method: &MethodRef, graph: &FlowGraph) -> Vec<Site> {
        let caller = method.root_definition().id();
        graph
            .named_instructions()
            .filter_map(|named| {
                let (callee, constructs) = match named.instruction().prototype() {
                    InstructionPrototype::Call {
                        callee,
                        lookup: MethodLookup::Static,
                    } => (callee, false),
                    InstructionPrototype::NewObject { constructor } => (constructor, true),
                    _ => return None,
                };
                if callee.root_definition().id() == caller {
                    return None;
                }
                if !self.config.allow_cross_module && callee.module() != method.module() {
                    return None;
                }
                Some(Site {
                    call: named.tag().clone(),
                    callee: callee.clone(),
                    constructs,
                })
            })
            .collect()
    }

    /// True if every type and member mentioned by `callee` is accessible from `caller`.
    fn accessible(caller: &MethodDef, callee: &FlowGraph) -> bool {
        let prototype_accessible = |prototype: &InstructionPrototype| {
            let member = match prototype {
                InstructionPrototype::GetFieldPointer { field } => {
                    AccessRules::can_access(caller, Member::Field(field))
                }
                InstructionPrototype::Call { callee, .. } => {
                    AccessRules::can_access(caller, Member::Method(callee))
                }
                InstructionPrototype::NewObject { constructor } => {
                    AccessRules::can_access(caller, Member::Method(constructor))
                }
                _ => true,
            };
            member && AccessRules::can_access_type(caller, &prototype.result_type())
        };

        callee.blocks().all(|block| {
            block
                .parameters()
                .iter()
                .all(|parameter| AccessRules::can_access_type(caller, parameter.parameter_type()))
                && block.instructions().iter().all(|tag| {
                    callee
                        .instruction(tag)
                        .is_some_and(|named| prototype_accessible(named.instruction().prototype()))
                })
                && block
                    .flow()
                    .instructions()
                    .into_iter()
                    .all(|instruction| prototype_accessible(instruction.prototype()))
        })
    }

    /// Why `site` should not be inlined, if it should not.
    fn decline_reason(
        &self,
        method: &MethodRef,
        caller: &GraphStore,
        site: &Site,
        callee: Option<&MethodBody>,
    ) -> Option<String> {
        let Some(callee) = callee else {
            return Some(format!("no body for {}", site.callee));
        };
        let cost = Self::cost(callee);
        if cost > self.config.max_callee_cost {
            return Some(format!("{} costs {cost}, above the limit", site.callee));
        }
        let gain = caller
            .instruction(&site.call)
            .map_or(0, |named| self.gain(caller, named.instruction()));
        if gain < cost {
            return Some(format!("{} costs {cost} for a gain of {gain}", site.callee));
        }
        if !Self::accessible(method, callee.implementation()) {
            return Some(format!("{} uses members hidden from {method}", site.callee));
        }
        None
    }

    /// Splices `callee` in place of `site`. Returns `None`, leaving `builder` in an
    /// unspecified state, if the callee does not fit the call.
    fn splice(builder: &mut FlowGraphBuilder, site: &Site, callee: &MethodBody) -> Option<()> {
        let named = builder.instruction(&site.call)?;
        let block = named.block().clone();
        let call = named.instruction().clone();
        let result_type = call.result_type();
        let position = builder.block(&block)?.instruction_index(&site.call)?;
        let following: Vec<ValueTag> = builder.block(&block)?.instructions()[position + 1..].to_vec();
        let flow = builder.block(&block)?.flow().clone();

        let mut arguments = call.arguments().to_vec();
        if site.constructs {
            let object_type = result_type.pointee()?.clone();
            let zero = builder.insert_before(&site.call, Instruction::default_value(object_type.clone()), "zero");
            let object = builder.insert_before(&site.call, Instruction::boxed(object_type, zero), "this");
            arguments.insert(0, object);
        }

        let graph = callee.implementation();
        let entry = graph.block(graph.entry_point())?;
        if entry.parameters().len() != arguments.len() {
            return None;
        }
        let this = if site.constructs {
            Some(entry.parameter_tags().next()?.clone())
        } else {
            None
        };

        let continuation = builder.add_block(format!("{}.cont", block.name()));
        let result = builder.append_parameter(&continuation, result_type, site.call.name());
        for tag in &following {
            builder.move_instruction(tag, &continuation, usize::MAX);
        }
        builder.set_flow(&continuation, flow);
        builder.replace_all_uses(&site.call, &result);
        builder.remove_instruction(&site.call);

        // Blocks the callee can never reach are not copied.
        let order = graph.get_analysis::<DominatorTreeAnalysis>().reverse_postorder();
        let prefix = site.callee.name().to_string();
        let mut blocks: HashMap<BasicBlockTag, BasicBlockTag> = HashMap::new();
        let mut values: HashMap<ValueTag, ValueTag> = HashMap::new();
        for source_tag in &order {
            let source = graph.block(source_tag)?;
            let copy = builder.add_block(format!("{prefix}.{}", source_tag.name()));
            for parameter in source.parameters() {
                let tag = builder.append_parameter(&copy, parameter.parameter_type().clone(), parameter.tag().name());
                values.insert(parameter.tag().clone(), tag);
            }
            blocks.insert(source_tag.clone(), copy);
        }

        for source_tag in &order {
            let source = graph.block(source_tag)?;
            let copy = blocks.get(source_tag)?.clone();
            for tag in source.instructions() {
                let instruction = graph.instruction(tag)?.instruction();
                let new_tag = builder.append_instruction(&copy, map_instruction(instruction, &values)?, tag.name());
                values.insert(tag.clone(), new_tag);
            }

            let flow = match source.flow() {
                BlockFlow::Return(value) => {
                    let returned = match &this {
                        Some(this) => values.get(this)?.clone(),
                        None => builder.append_instruction(&copy, map_instruction(value, &values)?, "result"),
                    };
                    BlockFlow::jump(continuation.clone(), vec![returned])
                }
                other => {
                    let mut missing = false;
                    let mapped = other.map_values(|value| {
                        values.get(value).cloned().unwrap_or_else(|| {
                            missing = true;
                            value.clone()
                        })
                    });
                    if missing {
                        return None;
                    }
                    let branches = mapped
                        .branches()
                        .into_iter()
                        .map(|branch| Some(branch.with_target(blocks.get(branch.target())?.clone())))
                        .collect::<Option<Vec<Branch>>>()?;
                    mapped.with_branches(branches)
                }
            };
            builder.set_flow(&copy, flow);
        }

        let target = blocks.get(graph.entry_point())?.clone();
        builder.set_flow(&block, BlockFlow::jump(target, arguments));
        Some(())
    }
}

fn map_instruction(instruction: &Instruction, values: &HashMap<ValueTag, ValueTag>) -> Option<Instruction> {
    let arguments = instruction
        .arguments()
        .iter()
        .map(|argument| values.get(argument).cloned())
        .collect::<Option<Vec<ValueTag>>>()?;
    Some(instruction.with_arguments(arguments))
}

impl Optimization for Inlining {
    fn name(&self) -> &'static str {
        "inlining"
    }

    fn apply(&self, method: &MethodRef, body: &MethodBody, state: &OptimizationState) -> Result<MethodBody> {
        let graph = body.implementation();
        let sites = self.candidates(method, graph);
        if sites.is_empty() {
            return Ok(body.clone());
        }

        let events = state.events();
        let caller = method.to_string();
        let bodies = match state.request_bodies(sites.iter().map(|site| &site.callee)).wait() {
            Ok(bodies) => bodies,
            Err(error) => {
                events.warn(format!("inlining into {caller} skipped: {error}"));
                events
                    .record(EventKind::InlineDeclined)
                    .method(caller.as_str())
                    .message(error.to_string())
                    .pass(self.name());
                return Ok(body.clone());
            }
        };

        let mut builder = graph.to_builder();
        let mut inlined = 0;
        for site in &sites {
            let callee = bodies.get(&site.callee).and_then(Option::as_ref);
            if let Some(reason) = self.decline_reason(method, graph, site, callee) {
                events
                    .record(EventKind::InlineDeclined)
                    .method(caller.as_str())
                    .value(&site.call)
                    .message(reason)
                    .pass(self.name());
                continue;
            }
            let Some(callee) = callee else {
                continue;
            };

            let mut speculative = builder.fork();
            if Self::splice(&mut speculative, site, callee).is_none() {
                events
                    .record(EventKind::InlineDeclined)
                    .method(caller.as_str())
                    .value(&site.call)
                    .message(format!("{} does not match the call's signature", site.callee))
                    .pass(self.name());
                continue;
            }
            builder = speculative;
            inlined += 1;
            events
                .record(EventKind::MethodInlined)
                .method(caller.as_str())
                .value(&site.call)
                .message(format!("inlined {} (cost {})", site.callee, Self::cost(callee)))
                .pass(self.name());
        }

        if inlined == 0 {
            return Ok(body.clone());
        }
        Ok(body.with_implementation(builder.to_immutable()))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        compiler::BodyProvider,
        ir::{Access, ArithOp, Type, TypeDef, TypeKind},
        test::{
            builders::{build_graph, int32},
            interpreter::{Interpreter, Outcome, Value},
        },
        Error,
    };

    /// Serves a fixed set of bodies.
    struct Library {
        bodies: HashMap<u64, MethodBody>,
        broken: bool,
    }

    impl BodyProvider for Library {
        fn fetch_body(&self, method: &MethodRef) -> Result<Option<MethodBody>> {
            if self.broken {
                return Err(Error::BodyProvider(format!("cannot load {method}")));
            }
            Ok(self.bodies.get(&method.id()).cloned())
        }
    }

    fn state(bodies: &[(&MethodRef, &FlowGraph)]) -> OptimizationState {
        OptimizationState::new(Library {
            bodies: bodies
                .iter()
                .map(|(method, graph)| (method.id(), MethodBody::for_method(method, (*graph).clone())))
                .collect(),
            broken: false,
        })
    }

    fn square() -> (MethodRef, FlowGraph) {
        let method = MethodDef::new("square", "app", vec![int32()], int32()).into_ref();
        let graph = build_graph(|g| {
            let entry = g.entry();
            let a = g.param(&entry, int32(), "a");
            let product = g.op(&entry, ArithOp::Mul, &a, &a);
            g.ret_i32(&entry, &product);
        });
        (method, graph)
    }

    fn caller_of(callee: &MethodRef) -> (MethodRef, MethodBody) {
        let method = MethodDef::new("caller", "app", vec![int32()], int32()).into_ref();
        let graph = build_graph(|g| {
            let entry = g.entry();
            let x = g.param(&entry, int32(), "x");
            let y = g.push(&entry, Instruction::call(callee.clone(), vec![x]));
            let one = g.i32(&entry, 1);
            let sum = g.op(&entry, ArithOp::Add, &y, &one);
            g.ret_i32(&entry, &sum);
        });
        let body = MethodBody::for_method(&method, graph);
        (method, body)
    }

    fn has_calls(graph: &FlowGraph) -> bool {
        graph.named_instructions().any(|named| {
            matches!(
                named.instruction().prototype(),
                InstructionPrototype::Call { .. } | InstructionPrototype::NewObject { .. }
            )
        })
    }

    #[test]
    fn test_small_callee_is_inlined() {
        let (square, square_graph) = square();
        let (caller, body) = caller_of(&square);
        let state = state(&[(&square, &square_graph)]);

        let optimized = Inlining::new().apply(&caller, &body, &state).unwrap();
        optimized.validate().unwrap();
        assert!(!has_calls(optimized.implementation()));
        assert_eq!(state.events().count_kind(EventKind::MethodInlined), 1);

        let run = |graph: &FlowGraph| Interpreter::new().run(graph, vec![Value::i32(7)]).unwrap();
        assert_eq!(run(optimized.implementation()), Outcome::Returned(Value::i32(50)));
    }

    #[test]
    fn test_gain_and_cost_are_monotonic() {
        let (square, square_graph) = square();
        let pointer = Type::pointer(int32(), crate::ir::PointerKind::Transient);
        let by_ref = MethodDef::new("by_ref", "app", vec![pointer], int32()).into_ref();
        let graph = build_graph(|g| {
            let entry = g.entry();
            let x = g.param(&entry, int32(), "x");
            let local = g.push(&entry, Instruction::alloca(int32()));
            let direct = g.push(&entry, Instruction::call(square.clone(), vec![x]));
            let indirect = g.push(&entry, Instruction::call(by_ref.clone(), vec![local]));
            let sum = g.op(&entry, ArithOp::Add, &direct, &indirect);
            g.ret_i32(&entry, &sum);
        });
        let gain_of = |name: &str| {
            let named = graph
                .named_instructions()
                .find(|named| {
                    matches!(
                        named.instruction().prototype(),
                        InstructionPrototype::Call { callee, .. } if callee.name() == name
                    )
                })
                .unwrap();
            Inlining::new().gain(&graph, named.instruction())
        };
        assert!(gain_of("by_ref") > gain_of("square"));

        let bigger = build_graph(|g| {
            let entry = g.entry();
            let a = g.param(&entry, int32(), "a");
            let product = g.op(&entry, ArithOp::Mul, &a, &a);
            let again = g.op(&entry, ArithOp::Mul, &product, &a);
            g.ret_i32(&entry, &again);
        });
        let cost = |graph: &FlowGraph| Inlining::cost(&MethodBody::for_method(&square, graph.clone()));
        assert!(cost(&bigger) > cost(&square_graph));
    }

    #[test]
    fn test_recursive_call_is_not_a_candidate() {
        let method = MethodDef::new("loop", "app", vec![int32()], int32()).into_ref();
        let graph = build_graph(|g| {
            let entry = g.entry();
            let x = g.param(&entry, int32(), "x");
            let y = g.push(&entry, Instruction::call(method.clone(), vec![x]));
            g.ret_i32(&entry, &y);
        });
        let body = MethodBody::for_method(&method, graph.clone());
        let state = state(&[(&method, &graph)]);

        let optimized = Inlining::new().apply(&method, &body, &state).unwrap();
        assert!(optimized.implementation().same_instance(body.implementation()));
        assert_eq!(state.cached_count(), 0);
    }

    #[test]
    fn test_cross_module_callee_is_skipped_by_default() {
        let foreign = MethodDef::new("square", "lib", vec![int32()], int32()).into_ref();
        let (_, square_graph) = square();
        let (caller, body) = caller_of(&foreign);
        let state = state(&[(&foreign, &square_graph)]);

        let optimized = Inlining::new().apply(&caller, &body, &state).unwrap();
        assert!(has_calls(optimized.implementation()));

        let permissive = Inlining::with_config(InliningConfig {
            allow_cross_module: true,
            ..Default::default()
        });
        let optimized = permissive.apply(&caller, &body, &state).unwrap();
        assert!(!has_calls(optimized.implementation()));
    }

    #[test]
    fn test_expensive_callee_is_declined() {
        let (square, square_graph) = square();
        let (caller, body) = caller_of(&square);
        let state = state(&[(&square, &square_graph)]);
        let stingy = Inlining::with_config(InliningConfig {
            base_gain: 0,
            size_bonus_divisor: 1000,
            ..Default::default()
        });

        let optimized = stingy.apply(&caller, &body, &state).unwrap();
        assert!(has_calls(optimized.implementation()));
        assert!(state.events().has(EventKind::InlineDeclined));
    }

    #[test]
    fn test_missing_body_declines_site() {
        let (square, _) = square();
        let (caller, body) = caller_of(&square);
        let state = state(&[]);

        let optimized = Inlining::new().apply(&caller, &body, &state).unwrap();
        assert!(has_calls(optimized.implementation()));
        assert_eq!(state.events().count_kind(EventKind::InlineDeclined), 1);
    }

    #[test]
    fn test_provider_failure_is_a_warning() {
        let (square, _) = square();
        let (caller, body) = caller_of(&square);
        let state = OptimizationState::with_provider(Arc::new(Library {
            bodies: HashMap::new(),
            broken: true,
        }));

        let optimized = Inlining::new().apply(&caller, &body, &state).unwrap();
        assert!(optimized.implementation().same_instance(body.implementation()));
        assert!(state.events().warnings().count() >= 1);
        assert!(state.events().has(EventKind::InlineDeclined));
    }

    #[test]
    fn test_constructor_returns_the_new_object() {
        let counter = TypeDef::new("Counter", "app", TypeKind::Class, Access::Public);
        assert!(counter.define_public_fields(&[("count", int32())]));
        let ctor = MethodDef::new("ctor", "app", vec![int32()], Type::Void)
            .with_declaring_type(counter.clone())
            .as_constructor()
            .into_ref();
        let this_type = ctor.this_type().unwrap();
        let count = counter.instance_fields().next().cloned().unwrap();
        let ctor_graph = build_graph(|g| {
            let entry = g.entry();
            let this = g.param(&entry, this_type.clone(), "this");
            let start = g.param(&entry, int32(), "start");
            let slot = g.push(&entry, Instruction::get_field_pointer(count.clone(), this));
            g.push(&entry, Instruction::store(int32(), slot, start));
            let unit = g.push(&entry, Instruction::default_value(Type::Void));
            g.ret(&entry, Type::Void, &unit);
        });

        let method = MethodDef::new("make", "app", vec![int32()], int32()).into_ref();
        let graph = build_graph(|g| {
            let entry = g.entry();
            let x = g.param(&entry, int32(), "x");
            let object = g.push(&entry, Instruction::new_object(ctor.clone(), vec![x]));
            let slot = g.push(&entry, Instruction::get_field_pointer(count.clone(), object));
            let value = g.push(&entry, Instruction::load(int32(), slot));
            g.ret_i32(&entry, &value);
        });
        let body = MethodBody::for_method(&method, graph);
        let state = state(&[(&ctor, &ctor_graph)]);

        let optimized = Inlining::new().apply(&method, &body, &state).unwrap();
        optimized.validate().unwrap();
        assert!(!has_calls(optimized.implementation()));

        let run = |graph: &FlowGraph| {
            Interpreter::new()
                .with_method(&ctor, ctor_graph.clone())
                .run(graph, vec![Value::i32(12)])
                .unwrap()
        };
        assert_eq!(run(optimized.implementation()), Outcome::Returned(Value::i32(12)));
        assert_eq!(run(body.implementation()), Outcome::Returned(Value::i32(12)));
    }
}
