//! Sparse conditional constant propagation.
//!
//! Values whose result is the same on every execution are replaced with literals, and
//! switches whose outcome is statically known are simplified. Reachability and constancy
//! are discovered together, so a block that only looks reachable through a branch that can
//! never be taken does not pollute the values it would feed.
//!
//! # Example
//!
//! Before:
//! ```text
//! entry:
//!   a = const 2
//!   b = const 3
//!   c = lt a, b
//!   switch copy c [true -> then] else -> other
//! then:
//!   return a
//! other:
//!   return b
//! ```
//!
//! After:
//! ```text
//! entry:
//!   a = const 2
//!   b = const 3
//!   c = const true
//!   jump then
//! then:
//!   return a
//! other:
//!   unreachable
//! ```
//!
//! # Lattice
//!
//! ```text
//!             Top
//!           /     \
//!   Constant(k)   NonNull
//!           \     /
//!            Bottom
//! ```
//!
//! `NonNull` tracks pointers known to be non-null (allocations, field addresses, unboxed
//! references), which lets equality tests against `null` fold even though the pointer
//! itself is not a literal. `Constant(k)` and `NonNull` are incomparable: two different
//! constants, or a constant and `NonNull`, meet at `Bottom`.

use std::collections::HashMap;

use crate::{
    analysis::{
        dataflow::{LatticeAnalysis, LatticeCells, LatticeSolver, MeetSemiLattice},
        ValueUsesAnalysis,
    },
    compiler::{passes::utils::EntryConstants, EventKind, EventLog, IntraproceduralOptimization},
    ir::{
        evaluate_intrinsic, ArithOp, BasicBlockTag, BlockFlow, Constant, EffectFlags,
        ExceptionSpec, FlowGraph, Instruction, InstructionPrototype, SwitchFlow, Type, ValueTag,
    },
};

/// Folds an arithmetic intrinsic applied to literal arguments.
///
/// Returning `None` means "not a constant". An evaluator must only return a value when the
/// instruction cannot throw for these arguments.
pub type ConstantEvaluator = fn(&InstructionPrototype, &[Constant]) -> Option<Constant>;

#[derive(Debug, Clone, Copy, PartialEq)]
enum Cell {
    Top,
    Constant(Constant),
    NonNull,
    Bottom,
}

impl MeetSemiLattice for Cell {
    fn meet(&self, other: &Self) -> Self {
        match (*self, *other) {
            (Cell::Top, cell) | (cell, Cell::Top) => cell,
            (Cell::Bottom, _) | (_, Cell::Bottom) => Cell::Bottom,
            (Cell::Constant(a), Cell::Constant(b)) if a == b => Cell::Constant(a),
            (Cell::NonNull, Cell::NonNull) => Cell::NonNull,
            _ => Cell::Bottom,
        }
    }

    fn is_bottom(&self) -> bool {
        matches!(self, Cell::Bottom)
    }
}

struct ConstantLattice {
    evaluator: ConstantEvaluator,
}

impl ConstantLattice {
    fn constants(arguments: &[Cell]) -> Option<Vec<Constant>> {
        arguments
            .iter()
            .map(|cell| match cell {
                Cell::Constant(c) => Some(*c),
                _ => None,
            })
            .collect()
    }

    /// Indices of the branches a switch on `scrutinee` may take.
    fn switch_branches(switch: &SwitchFlow, scrutinee: Cell) -> Vec<usize> {
        let default_index = switch.cases().len();
        match scrutinee {
            Cell::Top => Vec::new(),
            Cell::Constant(value) => {
                let ty = switch.value().result_type();
                let value = value.specialize(&ty);
                let index = switch
                    .cases()
                    .iter()
                    .position(|case| case.values().iter().any(|v| v.specialize(&ty) == value))
                    .unwrap_or(default_index);
                vec![index]
            }
            Cell::NonNull => switch
                .cases()
                .iter()
                .enumerate()
                .filter(|(_, case)| !case.values().iter().all(Constant::is_null))
                .map(|(index, _)| index)
                .chain(std::iter::once(default_index))
                .collect(),
            Cell::Bottom => (0..=default_index).collect(),
        }
    }
}

impl LatticeAnalysis for ConstantLattice {
    type Cell = Cell;

    fn top(&self) -> Cell {
        Cell::Top
    }

    fn bottom(&self) -> Cell {
        Cell::Bottom
    }

    fn evaluate(&self, instruction: &Instruction, arguments: &[Cell], _graph: &FlowGraph) -> Cell {
        let prototype = instruction.prototype();
        match prototype {
            InstructionPrototype::Constant { value, result_type } => {
                return Cell::Constant(value.specialize(result_type));
            }
            InstructionPrototype::Copy { .. } | InstructionPrototype::ReinterpretCast { .. } => {
                return arguments.first().copied().unwrap_or(Cell::Bottom);
            }
            InstructionPrototype::Store { .. } => {
                return arguments.get(1).copied().unwrap_or(Cell::Bottom);
            }
            _ => {}
        }
        if arguments.contains(&Cell::Top) {
            return Cell::Top;
        }

        if let Some(op) = prototype.arith_op() {
            if let Some(constants) = Self::constants(arguments) {
                if let Some(folded) = (self.evaluator)(prototype, &constants) {
                    return Cell::Constant(folded);
                }
            }
            if matches!(op, ArithOp::Eq | ArithOp::Ne) {
                let null_test = matches!(
                    arguments,
                    [Cell::NonNull, Cell::Constant(c)] | [Cell::Constant(c), Cell::NonNull] if c.is_null()
                );
                if null_test {
                    return Cell::Constant(Constant::Bool(op == ArithOp::Ne));
                }
            }
        }

        if prototype.effects().contains(EffectFlags::NON_NULL_RESULT) {
            Cell::NonNull
        } else {
            Cell::Bottom
        }
    }

    fn live_branches(&self, flow: &BlockFlow, cells: &LatticeCells<Cell>, graph: &FlowGraph) -> Vec<usize> {
        match flow {
            BlockFlow::Jump(_) => vec![0],
            BlockFlow::Switch(switch) => {
                let scrutinee =
                    self.evaluate(switch.value(), &cells.arguments(switch.value()), graph);
                Self::switch_branches(switch, scrutinee)
            }
            BlockFlow::Try(try_flow) => {
                let instruction = try_flow.instruction();
                let arguments = cells.arguments(instruction);
                if arguments.contains(&Cell::Top) {
                    return Vec::new();
                }
                let folds = instruction.prototype().arith_op().is_some()
                    && Self::constants(&arguments)
                        .and_then(|c| (self.evaluator)(instruction.prototype(), &c))
                        .is_some();
                match instruction.prototype().exception_spec() {
                    ExceptionSpec::NoThrow => vec![0],
                    ExceptionSpec::MayThrow if folds => vec![0],
                    ExceptionSpec::MayThrow => vec![0, 1],
                    ExceptionSpec::AlwaysThrow => vec![1],
                }
            }
            BlockFlow::Return(_) | BlockFlow::Unreachable => Vec::new(),
        }
    }
}

/// Replaces values with statically known results by literals and prunes switch branches
/// that can never be taken.
pub struct ConstantPropagation {
    evaluator: ConstantEvaluator,
}

impl Default for ConstantPropagation {
    fn default() -> Self {
        Self::new()
    }
}

impl ConstantPropagation {
    /// Creates the transform with the standard intrinsic evaluator.
    #[must_use]
    pub fn new() -> Self {
        Self::with_evaluator(evaluate_intrinsic)
    }

    /// Creates the transform with a custom evaluator.
    #[must_use]
    pub fn with_evaluator(evaluator: ConstantEvaluator) -> Self {
        Self { evaluator }
    }
}

enum Fold {
    /// Turn the instruction itself into a literal.
    Replace(ValueTag, Constant, Type),
    /// Keep the definition and redirect its uses to a literal.
    Redirect(ValueTag, Constant, Type),
}

impl IntraproceduralOptimization for ConstantPropagation {
    fn name(&self) -> &'static str {
        "constant-propagation"
    }

    fn description(&self) -> &'static str {
        "Replaces values with statically known results and prunes impossible branches"
    }

    fn apply(&self, graph: &FlowGraph, log: &EventLog) -> FlowGraph {
        let lattice = ConstantLattice {
            evaluator: self.evaluator,
        };
        let result = LatticeSolver::new(&lattice, graph).solve();
        let uses = graph.get_analysis::<ValueUsesAnalysis>();

        let mut dead_blocks: Vec<BasicBlockTag> = Vec::new();
        let mut folds: Vec<Fold> = Vec::new();
        let mut simplified: Vec<(BasicBlockTag, BlockFlow)> = Vec::new();

        for block in graph.blocks() {
            let tag = block.tag();
            if !result.is_live(tag) {
                let already_dead =
                    block.instructions().is_empty() && matches!(block.flow(), BlockFlow::Unreachable);
                if !already_dead {
                    dead_blocks.push(tag.clone());
                }
                continue;
            }

            for parameter in block.parameters() {
                if let Cell::Constant(c) = result.cell(parameter.tag()) {
                    if uses.is_used(parameter.tag()) {
                        folds.push(Fold::Redirect(
                            parameter.tag().clone(),
                            c,
                            parameter.parameter_type().clone(),
                        ));
                    }
                }
            }

            for value in block.instructions() {
                let Some(named) = graph.instruction(value) else {
                    continue;
                };
                let Cell::Constant(c) = result.cell(value) else {
                    continue;
                };
                let instruction = named.instruction();
                let prototype = instruction.prototype();
                if matches!(prototype, InstructionPrototype::Constant { .. }) {
                    continue;
                }
                let ty = instruction.result_type();
                if !prototype.is_effectful() || prototype.arith_op().is_some() {
                    folds.push(Fold::Replace(value.clone(), c, ty));
                } else if uses.is_used(value) {
                    folds.push(Fold::Redirect(value.clone(), c, ty));
                }
            }

            if let BlockFlow::Switch(switch) = block.flow() {
                let live: Vec<usize> = (0..=switch.cases().len())
                    .filter(|index| result.is_edge_live(tag, *index))
                    .collect();
                if live.len() <= switch.cases().len() {
                    if let Some(flow) = Self::prune_switch(switch, &live) {
                        simplified.push((tag.clone(), flow));
                    }
                }
            }
        }

        if dead_blocks.is_empty() && folds.is_empty() && simplified.is_empty() {
            return graph.clone();
        }

        let mut builder = graph.to_builder();
        for tag in &dead_blocks {
            let instructions: Vec<ValueTag> = builder
                .block(tag)
                .map(|b| b.instructions().to_vec())
                .unwrap_or_default();
            builder.remove_instructions(&instructions);
            builder.set_flow(tag, BlockFlow::Unreachable);
            log.record(EventKind::BlockMarkedUnreachable)
                .block(tag)
                .pass(self.name());
        }

        let mut literals = EntryConstants::new(&builder);
        let mut redirects: HashMap<ValueTag, ValueTag> = HashMap::new();
        for fold in folds {
            match fold {
                Fold::Replace(tag, constant, ty) => {
                    builder.replace_instruction(&tag, Instruction::constant(constant, ty));
                    log.record(EventKind::ConstantFolded)
                        .value(&tag)
                        .message(format!("{tag} = {constant}"))
                        .pass(self.name());
                }
                Fold::Redirect(tag, constant, ty) => {
                    let literal = literals.get(&mut builder, constant, &ty);
                    redirects.insert(tag.clone(), literal);
                    log.record(EventKind::ConstantFolded)
                        .value(&tag)
                        .message(format!("uses of {tag} = {constant}"))
                        .pass(self.name());
                }
            }
        }
        builder.replace_uses(&redirects);

        for (tag, flow) in simplified {
            builder.set_flow(&tag, flow);
            log.record(EventKind::BranchSimplified)
                .block(&tag)
                .pass(self.name());
        }
        builder.to_immutable()
    }
}

impl ConstantPropagation {
    /// Keeps only the branches at `live` (in [`BlockFlow::branches`] order).
    ///
    /// Returns `None` when there is nothing to prune or no branch is live.
    fn prune_switch(switch: &SwitchFlow, live: &[usize]) -> Option<BlockFlow> {
        let default_index = switch.cases().len();
        match live {
            [] => None,
            [index] => {
                let branch = switch
                    .cases()
                    .get(*index)
                    .map_or(switch.default_branch(), |case| case.branch());
                Some(BlockFlow::Jump(branch.clone()))
            }
            _ if !live.contains(&default_index) => None,
            _ => {
                let cases = switch
                    .cases()
                    .iter()
                    .enumerate()
                    .filter(|(index, _)| live.contains(index))
                    .map(|(_, case)| case.clone())
                    .collect();
                Some(BlockFlow::Switch(SwitchFlow::new(
                    switch.value().clone(),
                    cases,
                    switch.default_branch().clone(),
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        ir::{Branch, PointerKind, SwitchCase},
        test::{
            assert_preserves_semantics, assert_unchanged,
            builders::{build_graph, int32},
            interpreter::Value,
        },
    };

    #[test]
    fn test_folds_arithmetic() {
        let mut sum = None;
        let graph = build_graph(|g| {
            let entry = g.entry();
            let a = g.i32(&entry, 2);
            let b = g.i32(&entry, 3);
            let s = g.op(&entry, ArithOp::Add, &a, &b);
            g.ret_i32(&entry, &s);
            sum = Some(s);
        });

        let optimized =
            assert_preserves_semantics(&ConstantPropagation::new(), &graph, &[Vec::new()]);
        let sum = sum.unwrap();
        assert_eq!(
            optimized.instruction(&sum).unwrap().instruction().constant_value(),
            Some(Constant::i32(5))
        );
        assert_unchanged(&ConstantPropagation::new(), &optimized);
    }

    #[test]
    fn test_prunes_constant_branch() {
        let graph = build_graph(|g| {
            let entry = g.entry();
            let then_block = g.block("then");
            let else_block = g.block("else");
            let a = g.i32(&entry, 2);
            let b = g.i32(&entry, 3);
            let c = g.op(&entry, ArithOp::Lt, &a, &b);
            g.branch(&entry, &c, &then_block, &else_block);
            g.ret_i32(&then_block, &a);
            g.ret_i32(&else_block, &b);
        });

        let log = EventLog::new();
        let optimized = ConstantPropagation::new().apply(&graph, &log);
        assert!(optimized.validate().is_ok());
        let entry = optimized.block(optimized.entry_point()).unwrap();
        assert!(matches!(entry.flow(), BlockFlow::Jump(_)));
        assert!(log.has(EventKind::BranchSimplified));
        assert_eq!(log.count_kind(EventKind::BlockMarkedUnreachable), 1);
        assert_preserves_semantics(&ConstantPropagation::new(), &graph, &[Vec::new()]);
    }

    #[test]
    fn test_meet_of_different_facts_is_bottom() {
        let two = Cell::Constant(Constant::i32(2));
        let three = Cell::Constant(Constant::i32(3));
        assert_eq!(two.meet(&two), two);
        assert_eq!(two.meet(&Cell::Top), two);
        assert_eq!(two.meet(&three), Cell::Bottom);
        assert_eq!(two.meet(&Cell::NonNull), Cell::Bottom);
        assert_eq!(Cell::NonNull.meet(&three), Cell::Bottom);
        assert_eq!(Cell::NonNull.meet(&Cell::NonNull), Cell::NonNull);
        assert_eq!(Cell::Constant(Constant::Null).meet(&Cell::NonNull), Cell::Bottom);
    }

    #[test]
    fn test_switch_on_constant_jumps_to_matching_case() {
        let graph = build_graph(|g| {
            let entry = g.entry();
            let one = g.block("one");
            let three = g.block("three");
            let other = g.block("other");
            let value = g.i32(&entry, 3);
            g.switch_i32(&entry, &value, &[(&[1], &one), (&[3], &three)], &other);
            let a = g.i32(&one, 10);
            g.ret_i32(&one, &a);
            let b = g.i32(&three, 30);
            g.ret_i32(&three, &b);
            let c = g.i32(&other, 0);
            g.ret_i32(&other, &c);
        });

        let log = EventLog::new();
        let optimized = ConstantPropagation::new().apply(&graph, &log);
        assert!(optimized.validate().is_ok());
        let entry = optimized.block(optimized.entry_point()).unwrap();
        let BlockFlow::Jump(branch) = entry.flow() else {
            panic!("expected jump:\n{optimized}");
        };
        assert_eq!(branch.target().name(), "three");
        for block in optimized.blocks() {
            if matches!(block.tag().name(), "one" | "other") {
                assert!(matches!(block.flow(), BlockFlow::Unreachable));
                assert!(block.instructions().is_empty());
            }
        }
        assert_eq!(log.count_kind(EventKind::BlockMarkedUnreachable), 2);
        assert_preserves_semantics(&ConstantPropagation::new(), &graph, &[Vec::new()]);
    }

    #[test]
    fn test_switch_on_non_null_drops_null_cases() {
        let pointer = Type::pointer(int32(), PointerKind::Box);
        let graph = build_graph(|g| {
            let entry = g.entry();
            let missing = g.block("missing");
            let present = g.block("present");
            let x = g.param(&entry, int32(), "x");
            let boxed = g.push(&entry, Instruction::boxed(int32(), x.clone()));
            g.set_flow(
                &entry,
                BlockFlow::Switch(SwitchFlow::new(
                    Instruction::copy(pointer.clone(), boxed),
                    vec![SwitchCase::new(vec![Constant::Null], Branch::to(missing.clone()))],
                    Branch::to(present.clone()),
                )),
            );
            let zero = g.i32(&missing, 0);
            g.ret_i32(&missing, &zero);
            g.ret_i32(&present, &x);
        });

        let optimized =
            assert_preserves_semantics(&ConstantPropagation::new(), &graph, &[vec![Value::i32(5)]]);
        let entry = optimized.block(optimized.entry_point()).unwrap();
        let BlockFlow::Jump(branch) = entry.flow() else {
            panic!("expected jump:\n{optimized}");
        };
        assert_eq!(branch.target().name(), "present");

        let switch = SwitchFlow::new(
            Instruction::copy(int32(), ValueTag::new("v")),
            vec![
                SwitchCase::new(vec![Constant::Null], Branch::to(optimized.entry_point().clone())),
                SwitchCase::new(vec![Constant::i32(1)], Branch::to(optimized.entry_point().clone())),
                SwitchCase::new(
                    vec![Constant::Null, Constant::i32(2)],
                    Branch::to(optimized.entry_point().clone()),
                ),
            ],
            Branch::to(optimized.entry_point().clone()),
        );
        assert_eq!(ConstantLattice::switch_branches(&switch, Cell::NonNull), vec![1, 2, 3]);
    }

    #[test]
    fn test_loop_invariant_parameter() {
        let graph = build_graph(|g| {
            let entry = g.entry();
            let header = g.block("header");
            let body = g.block("body");
            let exit = g.block("exit");
            let n = g.param(&entry, int32(), "n");
            let zero = g.i32(&entry, 0);
            g.jump(&entry, &header, &[&zero, &zero]);

            let i = g.param(&header, int32(), "i");
            let k = g.param(&header, int32(), "k");
            let done = g.op(&header, ArithOp::Ge, &i, &n);
            g.branch(&header, &done, &exit, &body);

            let one = g.i32(&body, 1);
            let next = g.op(&body, ArithOp::Add, &i, &one);
            g.jump(&body, &header, &[&next, &k]);
            g.ret_i32(&exit, &k);
        });

        let log = EventLog::new();
        let optimized = ConstantPropagation::new().apply(&graph, &log);
        assert!(optimized.validate().is_ok());
        // Only `k` is constant; `i` varies.
        assert_eq!(log.count_kind(EventKind::ConstantFolded), 1);
        assert_preserves_semantics(
            &ConstantPropagation::new(),
            &graph,
            &[vec![Value::i32(0)], vec![Value::i32(4)]],
        );
    }

    #[test]
    fn test_null_test_on_allocation_folds() {
        let graph = build_graph(|g| {
            let entry = g.entry();
            let x = g.param(&entry, int32(), "x");
            let boxed = g.push(&entry, Instruction::boxed(int32(), x));
            let pointer = Type::pointer(int32(), PointerKind::Box);
            let null = g.push(&entry, Instruction::constant(Constant::Null, pointer.clone()));
            let is_null = g.push(
                &entry,
                Instruction::arith(ArithOp::Eq, pointer, vec![boxed, null]),
            );
            g.ret(&entry, Type::Bool, &is_null);
        });

        let optimized = assert_preserves_semantics(
            &ConstantPropagation::new(),
            &graph,
            &[vec![Value::i32(1)]],
        );
        let entry = optimized.block(optimized.entry_point()).unwrap();
        let BlockFlow::Return(ret) = entry.flow() else {
            panic!("expected return");
        };
        assert_eq!(
            optimized.constant_value(&ret.arguments()[0]),
            Some(Constant::Bool(false))
        );
    }

    #[test]
    fn test_division_by_zero_is_not_folded() {
        let graph = build_graph(|g| {
            let entry = g.entry();
            let a = g.i32(&entry, 7);
            let z = g.i32(&entry, 0);
            let q = g.op(&entry, ArithOp::Div, &a, &z);
            g.ret_i32(&entry, &q);
        });
        assert_unchanged(&ConstantPropagation::new(), &graph);
    }

    #[test]
    fn test_custom_evaluator() {
        fn never(_: &InstructionPrototype, _: &[Constant]) -> Option<Constant> {
            None
        }
        fn unsigned_only(prototype: &InstructionPrototype, args: &[Constant]) -> Option<Constant> {
            let folded = evaluate_intrinsic(prototype, args)?;
            folded
                .as_int()
                .is_some_and(|i| !i.spec().is_signed())
                .then_some(folded)
        }

        let graph = build_graph(|g| {
            let entry = g.entry();
            let a = g.i32(&entry, 2);
            let b = g.i32(&entry, 3);
            let s = g.op(&entry, ArithOp::Mul, &a, &b);
            g.ret_i32(&entry, &s);
        });
        assert_unchanged(&ConstantPropagation::with_evaluator(never), &graph);
        assert_unchanged(&ConstantPropagation::with_evaluator(unsigned_only), &graph);
        assert!(!ConstantPropagation::new().run(&graph).same_instance(&graph));
    }
}
