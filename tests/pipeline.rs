//! Pipeline integration tests.
//!
//! These tests drive the optimizer through its public API only:
//! 1. Build flow graphs with `FlowGraphBuilder`
//! 2. Wrap them in method bodies and serve callees from a `BodyProvider`
//! 3. Run single transforms or the default pipeline
//! 4. Check the structure of the result and the events that were recorded

use std::collections::HashMap;

use flowscope::prelude::*;

fn int32() -> Type {
    Type::Int(IntegerSpec::I32)
}

/// Serves a fixed map of bodies.
struct Program {
    bodies: HashMap<MethodRef, MethodBody>,
}

impl BodyProvider for Program {
    fn fetch_body(&self, method: &MethodRef) -> Result<Option<MethodBody>> {
        Ok(self.bodies.get(method).cloned())
    }
}

fn constant(builder: &mut FlowGraphBuilder, block: &BasicBlockTag, value: i32) -> ValueTag {
    builder.append_instruction(block, Instruction::constant(Constant::i32(value), int32()), "k")
}

fn binary(
    builder: &mut FlowGraphBuilder,
    block: &BasicBlockTag,
    op: ArithOp,
    lhs: &ValueTag,
    rhs: &ValueTag,
) -> ValueTag {
    builder.append_instruction(
        block,
        Instruction::arith(op, int32(), vec![lhs.clone(), rhs.clone()]),
        "t",
    )
}

fn count(graph: &FlowGraph, predicate: impl Fn(&InstructionPrototype) -> bool) -> usize {
    graph
        .named_instructions()
        .filter(|named| predicate(named.instruction().prototype()))
        .count()
}

fn calls(graph: &FlowGraph) -> usize {
    count(graph, |prototype| matches!(prototype, InstructionPrototype::Call { .. }))
}

/// `square(a) = a * a`
fn square() -> (MethodRef, MethodBody) {
    let method = MethodDef::new("square", "app", vec![int32()], int32()).into_ref();
    let mut builder = FlowGraphBuilder::new();
    let entry = builder.entry_point().clone();
    let a = builder.append_parameter(&entry, int32(), "a");
    let product = binary(&mut builder, &entry, ArithOp::Mul, &a, &a);
    builder.set_flow(&entry, BlockFlow::return_value(int32(), product));
    let body = MethodBody::for_method(&method, builder.to_immutable());
    (method, body)
}

/// `caller(x) = square(x) + 1`
fn caller(callee: &MethodRef) -> (MethodRef, MethodBody) {
    let method = MethodDef::new("caller", "app", vec![int32()], int32()).into_ref();
    let mut builder = FlowGraphBuilder::new();
    let entry = builder.entry_point().clone();
    let x = builder.append_parameter(&entry, int32(), "x");
    let squared = builder.append_instruction(&entry, Instruction::call(callee.clone(), vec![x]), "squared");
    let one = constant(&mut builder, &entry, 1);
    let sum = binary(&mut builder, &entry, ArithOp::Add, &squared, &one);
    builder.set_flow(&entry, BlockFlow::return_value(int32(), sum));
    let body = MethodBody::for_method(&method, builder.to_immutable());
    (method, body)
}

/// A branch on `2 + 3 == 5` whose else side is dead.
fn folded_branch() -> (MethodRef, MethodBody) {
    let method = MethodDef::new("folded", "app", vec![int32()], int32()).into_ref();
    let mut builder = FlowGraphBuilder::new();
    let entry = builder.entry_point().clone();
    let taken = builder.add_block("taken");
    let dead = builder.add_block("dead");
    let x = builder.append_parameter(&entry, int32(), "x");
    let two = constant(&mut builder, &entry, 2);
    let three = constant(&mut builder, &entry, 3);
    let five = constant(&mut builder, &entry, 5);
    let sum = binary(&mut builder, &entry, ArithOp::Add, &two, &three);
    let condition = builder.append_instruction(
        &entry,
        Instruction::arith(ArithOp::Eq, int32(), vec![sum, five]),
        "condition",
    );
    builder.set_flow(
        &entry,
        BlockFlow::Switch(SwitchFlow::if_else(condition, Branch::to(taken.clone()), Branch::to(dead.clone()))),
    );
    let doubled = binary(&mut builder, &taken, ArithOp::Add, &x, &x);
    builder.set_flow(&taken, BlockFlow::return_value(int32(), doubled));
    let zero = constant(&mut builder, &dead, 0);
    builder.set_flow(&dead, BlockFlow::return_value(int32(), zero));
    let body = MethodBody::for_method(&method, builder.to_immutable());
    (method, body)
}

#[test]
fn test_pipeline_folds_constant_branch() -> Result<()> {
    let (method, body) = folded_branch();
    let state = OptimizationState::new(Program {
        bodies: HashMap::new(),
    });

    let optimized = Pipeline::from_config(&OptimizerConfig::default()).optimize_to_fixpoint(&method, &body, &state)?;
    optimized.validate()?;

    let graph = optimized.implementation();
    assert_eq!(graph.block_count(), 1, "dead branch survived:\n{graph}");
    assert!(state.events().has(EventKind::ConstantFolded));
    assert!(state.events().has(EventKind::BlockRemoved));
    Ok(())
}

#[test]
fn test_pipeline_inlines_through_provider() -> Result<()> {
    let (square, square_body) = square();
    let (method, body) = caller(&square);
    let state = OptimizationState::new(Program {
        bodies: HashMap::from([(square.clone(), square_body)]),
    });

    let optimized = Pipeline::from_config(&OptimizerConfig::default()).optimize_to_fixpoint(&method, &body, &state)?;
    optimized.validate()?;

    assert_eq!(calls(optimized.implementation()), 0);
    assert_eq!(state.events().count_kind(EventKind::MethodInlined), 1);
    Ok(())
}

#[test]
fn test_pipeline_respects_inlining_config() -> Result<()> {
    let (square, square_body) = square();
    let (method, body) = caller(&square);
    let state = OptimizationState::new(Program {
        bodies: HashMap::from([(square.clone(), square_body)]),
    });
    let mut config = OptimizerConfig::default();
    config.inlining.max_callee_cost = 0;

    let optimized = Pipeline::from_config(&config).optimize(&method, &body, &state)?;
    optimized.validate()?;

    assert_eq!(calls(optimized.implementation()), 1);
    assert!(state.events().has(EventKind::InlineDeclined));
    Ok(())
}

#[test]
fn test_checkpoint_publishes_optimized_body() -> Result<()> {
    let (square, square_body) = square();
    let (method, body) = caller(&square);
    let state = OptimizationState::new(Program {
        bodies: HashMap::from([(square.clone(), square_body)]),
    });

    let optimized = Pipeline::from_config(&OptimizerConfig::default()).optimize(&method, &body, &state)?;

    let published = state.request_bodies([&method]).wait()?;
    assert_eq!(published[&method].as_ref(), Some(&optimized));
    Ok(())
}

#[test]
fn test_optimize_all_keeps_input_order() -> Result<()> {
    let (square, square_body) = square();
    let (method, body) = caller(&square);
    let (folded, folded_body) = folded_branch();
    let state = OptimizationState::new(Program {
        bodies: HashMap::from([(square.clone(), square_body.clone())]),
    });

    let methods = vec![(method.clone(), body), (folded.clone(), folded_body), (square.clone(), square_body)];
    let optimized = Pipeline::from_config(&OptimizerConfig::default()).optimize_all(&methods, &state)?;

    let names: Vec<&str> = optimized.iter().map(|(method, _)| method.name()).collect();
    assert_eq!(names, ["caller", "folded", "square"]);
    for (_, body) in &optimized {
        body.validate()?;
    }
    Ok(())
}

#[test]
fn test_custom_pipeline_runs_in_order() -> Result<()> {
    let pipeline = Pipeline::new()
        .then_intraprocedural(ConstantPropagation::new())
        .then_intraprocedural(DeadValueElimination::new())
        .then_intraprocedural(DeadBlockElimination::new());
    assert_eq!(
        pipeline.names(),
        ["constant-propagation", "dead-value-elimination", "dead-block-elimination"]
    );

    let (method, body) = folded_branch();
    let state = OptimizationState::new(Program {
        bodies: HashMap::new(),
    });
    let optimized = pipeline.optimize(&method, &body, &state)?;
    optimized.validate()?;
    let graph = optimized.implementation();
    assert_eq!(graph.block_count(), 2, "expected entry and taken:\n{graph}");
    assert!(graph.blocks().all(|block| block.tag().name() != "dead"));
    Ok(())
}
