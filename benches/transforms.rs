//! Benchmarks for the transform catalog.
//!
//! Runs individual transforms and the default pipeline on synthetic flow graphs:
//! - A long chain of blocks carrying redundant arithmetic
//! - A sparse switch with many cases
//! - A caller whose helper gets inlined

extern crate flowscope;

use std::{collections::HashMap, hint::black_box};

use criterion::{criterion_group, criterion_main, Criterion};
use flowscope::prelude::*;

fn int32() -> Type {
    Type::Int(IntegerSpec::I32)
}

/// `blocks` blocks in a row, each recomputing `x + y` and folding in a constant.
fn arithmetic_chain(blocks: usize) -> FlowGraph {
    let mut builder = FlowGraphBuilder::new();
    let entry = builder.entry_point().clone();
    let x = builder.append_parameter(&entry, int32(), "x");
    let y = builder.append_parameter(&entry, int32(), "y");
    let mut current = entry;
    let mut accumulator = x.clone();
    for index in 0..blocks {
        let sum = builder.append_instruction(
            &current,
            Instruction::arith(ArithOp::Add, int32(), vec![x.clone(), y.clone()]),
            "sum",
        );
        let step = builder.append_instruction(
            &current,
            Instruction::constant(Constant::i32(index as i32 % 5), int32()),
            "step",
        );
        let scaled = builder.append_instruction(
            &current,
            Instruction::arith(ArithOp::Mul, int32(), vec![sum, step]),
            "scaled",
        );
        let next_value = builder.append_instruction(
            &current,
            Instruction::arith(ArithOp::Add, int32(), vec![accumulator, scaled]),
            "acc",
        );
        let next = builder.add_block(format!("b{index}"));
        let parameter = builder.append_parameter(&next, int32(), "acc");
        builder.set_flow(&current, BlockFlow::jump(next.clone(), vec![next_value]));
        current = next;
        accumulator = parameter;
    }
    builder.set_flow(&current, BlockFlow::return_value(int32(), accumulator));
    builder.to_immutable()
}

/// A switch over `cases` values spaced `stride` apart.
fn sparse_switch(cases: i32, stride: i32) -> FlowGraph {
    let mut builder = FlowGraphBuilder::new();
    let entry = builder.entry_point().clone();
    let x = builder.append_parameter(&entry, int32(), "x");
    let fallback = builder.add_block("fallback");
    let minus_one = builder.append_instruction(&fallback, Instruction::constant(Constant::i32(-1), int32()), "none");
    builder.set_flow(&fallback, BlockFlow::return_value(int32(), minus_one));
    let switch_cases = (0..cases)
        .map(|value| {
            let target = builder.add_block(format!("case{value}"));
            let result = builder.append_instruction(&target, Instruction::constant(Constant::i32(value), int32()), "r");
            builder.set_flow(&target, BlockFlow::return_value(int32(), result));
            SwitchCase::new(vec![Constant::i32(value * stride)], Branch::to(target))
        })
        .collect();
    builder.set_flow(
        &entry,
        BlockFlow::Switch(SwitchFlow::new(Instruction::copy(int32(), x), switch_cases, Branch::to(fallback))),
    );
    builder.to_immutable()
}

struct Helpers {
    bodies: HashMap<MethodRef, MethodBody>,
}

impl BodyProvider for Helpers {
    fn fetch_body(&self, method: &MethodRef) -> Result<Option<MethodBody>> {
        Ok(self.bodies.get(method).cloned())
    }
}

/// A caller invoking a small helper `calls` times, plus a provider serving the helper.
fn caller_with_helper(calls: usize) -> (MethodRef, MethodBody, Helpers) {
    let helper = MethodDef::new("helper", "bench", vec![int32()], int32()).into_ref();
    let mut builder = FlowGraphBuilder::new();
    let entry = builder.entry_point().clone();
    let a = builder.append_parameter(&entry, int32(), "a");
    let doubled = builder.append_instruction(&entry, Instruction::arith(ArithOp::Add, int32(), vec![a.clone(), a]), "d");
    builder.set_flow(&entry, BlockFlow::return_value(int32(), doubled));
    let helper_body = MethodBody::for_method(&helper, builder.to_immutable());

    let caller = MethodDef::new("caller", "bench", vec![int32()], int32()).into_ref();
    let mut builder = FlowGraphBuilder::new();
    let entry = builder.entry_point().clone();
    let mut value = builder.append_parameter(&entry, int32(), "x");
    for _ in 0..calls {
        value = builder.append_instruction(&entry, Instruction::call(helper.clone(), vec![value]), "call");
    }
    builder.set_flow(&entry, BlockFlow::return_value(int32(), value));
    let body = MethodBody::for_method(&caller, builder.to_immutable());

    let helpers = Helpers {
        bodies: HashMap::from([(helper, helper_body)]),
    };
    (caller, body, helpers)
}

fn bench_value_numbering(c: &mut Criterion) {
    let graph = arithmetic_chain(200);

    c.bench_function("gvn_chain_200", |b| {
        b.iter(|| black_box(GlobalValueNumbering::new().run(black_box(&graph))));
    });
}

fn bench_constant_propagation(c: &mut Criterion) {
    let graph = arithmetic_chain(200);

    c.bench_function("constprop_chain_200", |b| {
        b.iter(|| black_box(ConstantPropagation::new().run(black_box(&graph))));
    });
}

fn bench_switch_lowering(c: &mut Criterion) {
    let dense = sparse_switch(256, 1);
    let sparse = sparse_switch(256, 97);

    c.bench_function("switch_lowering_dense_256", |b| {
        b.iter(|| black_box(SwitchLowering::new().run(black_box(&dense))));
    });
    c.bench_function("switch_lowering_sparse_256", |b| {
        b.iter(|| black_box(SwitchLowering::new().run(black_box(&sparse))));
    });
}

fn bench_inlining(c: &mut Criterion) {
    let (caller, body, helpers) = caller_with_helper(32);
    let state = OptimizationState::new(helpers);

    c.bench_function("inline_32_calls", |b| {
        b.iter(|| {
            let inlined = Inlining::new().apply(&caller, black_box(&body), &state).unwrap();
            black_box(inlined)
        });
    });
}

fn bench_pipeline(c: &mut Criterion) {
    let (caller, body, helpers) = caller_with_helper(16);
    let state = OptimizationState::new(helpers);
    let pipeline = Pipeline::from_config(&OptimizerConfig::default());

    c.bench_function("pipeline_fixpoint_16_calls", |b| {
        b.iter(|| {
            let optimized = pipeline.optimize_to_fixpoint(&caller, black_box(&body), &state).unwrap();
            black_box(optimized)
        });
    });
}

criterion_group!(
    benches,
    bench_value_numbering,
    bench_constant_propagation,
    bench_switch_lowering,
    bench_inlining,
    bench_pipeline
);
criterion_main!(benches);
