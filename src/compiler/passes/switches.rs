//! Switch lowering.
//!
//! Rewrites general switches into shapes a back end can emit directly. A switch is left
//! alone once it is a two-way test (one case with one value) or a jump table
//! ([`SwitchFlow::is_jump_table`]); otherwise one strategy is picked:
//!
//! | Strategy | When |
//! |----------|------|
//! | Jump | no cases, or every case goes where the default goes |
//! | Test cascade | at most `max_cascade_values` values, or a non-integer scrutinee |
//! | Bit test | value span below `bit_test_max_span` and 1 case with ≥3 values, 2 with ≥5, or 3 with ≥6 |
//! | Jump table | at least `jump_table_min_density` of the span is covered |
//! | Search tree | anything else |
//!
//! A search tree splits the sorted values at the pivot maximizing
//! `(left density + right density) * ln(gap at pivot)` and tests `value < pivot`; both
//! halves are new switches that are lowered in turn.
//!
//! # Bit tests
//!
//! ```text
//! r = sub x, min
//! i = convert<u64> r
//! in = le i, span
//! switch in [true -> bits] else -> default
//! bits:
//!   b = shl 1, i
//!   t = and b, mask_0
//!   switch ne(t, 0) [true -> case_0] else -> next
//! ```
//!
//! # Jump tables
//!
//! ```text
//! r = sub x, min
//! i = convert<unsigned> r
//! in = le i, span
//! switch in [true -> table] else -> default
//! table:
//!   switch i [0 -> ..., 1 -> ..., span -> ...] else -> default
//! ```
//!
//! Indices between case values branch to the default.

use std::collections::{HashMap, HashSet};

use crate::{
    compiler::{EventKind, EventLog, IntraproceduralOptimization, SwitchLoweringConfig},
    ir::{
        ArithOp, BasicBlockTag, BlockFlow, Branch, Constant, FlowGraph, FlowGraphBuilder,
        Instruction, InstructionPrototype, IntegerSpec, SwitchCase, SwitchFlow, Type, ValueTag,
    },
};

/// Lowers switches into test cascades, bit tests, jump tables and search trees.
pub struct SwitchLowering {
    config: SwitchLoweringConfig,
}

impl Default for SwitchLowering {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "kebab-case")]
enum Strategy {
    Jump,
    TestCascade,
    BitTest,
    JumpTable,
    SearchTree,
}

/// The switch being lowered, with its scrutinee available as a named value.
struct Lowering {
    block: BasicBlockTag,
    scrutinee: ValueTag,
    ty: Type,
    cases: Vec<SwitchCase>,
    default_branch: Branch,
}

impl Lowering {
    fn append(&self, builder: &mut FlowGraphBuilder, block: &BasicBlockTag, instruction: Instruction, name: &str) -> ValueTag {
        builder.append_instruction(block, instruction, name)
    }

    fn literal(&self, builder: &mut FlowGraphBuilder, block: &BasicBlockTag, value: i128, spec: IntegerSpec) -> ValueTag {
        self.append(
            builder,
            block,
            Instruction::constant(Constant::int(value, spec), Type::Int(spec)),
            "k",
        )
    }

    /// A two-way test of the scrutinee against one value.
    fn test(&self, value: Constant, hit: Branch, miss: Branch) -> BlockFlow {
        BlockFlow::Switch(SwitchFlow::new(
            Instruction::copy(self.ty.clone(), self.scrutinee.clone()),
            vec![SwitchCase::new(vec![value], hit)],
            miss,
        ))
    }

    /// The cases restricted to `values`, as a switch on the scrutinee.
    fn restricted(&self, values: &HashSet<i128>) -> BlockFlow {
        let cases = self
            .cases
            .iter()
            .filter_map(|case| {
                let kept: Vec<Constant> = case
                    .values()
                    .iter()
                    .copied()
                    .filter(|c| {
                        c.specialize(&self.ty)
                            .as_int()
                            .is_some_and(|i| values.contains(&i.value()))
                    })
                    .collect();
                (!kept.is_empty()).then(|| SwitchCase::new(kept, case.branch().clone()))
            })
            .collect();
        BlockFlow::Switch(SwitchFlow::new(
            Instruction::copy(self.ty.clone(), self.scrutinee.clone()),
            cases,
            self.default_branch.clone(),
        ))
    }

    fn cascade(&self, builder: &mut FlowGraphBuilder) {
        let tests: Vec<(Constant, Branch)> = self
            .cases
            .iter()
            .flat_map(|case| case.values().iter().map(|v| (*v, case.branch().clone())))
            .collect();
        let mut current = self.block.clone();
        for (index, (value, branch)) in tests.iter().enumerate() {
            if index + 1 == tests.len() {
                builder.set_flow(&current, self.test(*value, branch.clone(), self.default_branch.clone()));
            } else {
                let next = builder.add_block("switch.test");
                builder.set_flow(&current, self.test(*value, branch.clone(), Branch::to(next.clone())));
                current = next;
            }
        }
    }

    /// Appends `index = convert<target>(scrutinee - min)` and a range check against `span`,
    /// branching to a fresh block when in range. Returns `(in-range block, index)`.
    fn range_check(
        &self,
        builder: &mut FlowGraphBuilder,
        spec: IntegerSpec,
        target: IntegerSpec,
        min: i128,
        span: i128,
        name: &str,
    ) -> (BasicBlockTag, ValueTag) {
        let block = self.block.clone();
        let min = self.literal(builder, &block, min, spec);
        let rebased = self.append(
            builder,
            &block,
            Instruction::arith(ArithOp::Sub, self.ty.clone(), vec![self.scrutinee.clone(), min]),
            "rebased",
        );
        let index = self.append(
            builder,
            &block,
            Instruction::new(
                InstructionPrototype::convert(self.ty.clone(), Type::Int(target)),
                vec![rebased],
            ),
            "index",
        );
        let limit = self.literal(builder, &block, span, target);
        let in_range = self.append(
            builder,
            &block,
            Instruction::arith(ArithOp::Le, Type::Int(target), vec![index.clone(), limit]),
            "in_range",
        );
        let inside = builder.add_block(name);
        builder.set_flow(
            &block,
            BlockFlow::Switch(SwitchFlow::if_else(
                in_range,
                Branch::to(inside.clone()),
                self.default_branch.clone(),
            )),
        );
        (inside, index)
    }

    fn bit_test(&self, builder: &mut FlowGraphBuilder, spec: IntegerSpec, min: i128, span: i128) {
        let (bits, index) = self.range_check(builder, spec, IntegerSpec::U64, min, span, "switch.bits");
        let one = self.literal(builder, &bits, 1, IntegerSpec::U64);
        let zero = self.literal(builder, &bits, 0, IntegerSpec::U64);
        let u64_type = Type::Int(IntegerSpec::U64);
        let bit = self.append(
            builder,
            &bits,
            Instruction::arith(ArithOp::Shl, u64_type.clone(), vec![one, index]),
            "bit",
        );

        let mut current = bits;
        for (position, case) in self.cases.iter().enumerate() {
            let mask = case
                .values()
                .iter()
                .filter_map(|c| c.specialize(&self.ty).as_int())
                .fold(0i128, |mask, v| mask | (1i128 << (v.value() - min)));
            let mask = self.literal(builder, &current, mask, IntegerSpec::U64);
            let masked = self.append(
                builder,
                &current,
                Instruction::arith(ArithOp::And, u64_type.clone(), vec![bit.clone(), mask]),
                "masked",
            );
            let hit = self.append(
                builder,
                &current,
                Instruction::arith(ArithOp::Ne, u64_type.clone(), vec![masked, zero.clone()]),
                "hit",
            );
            let miss = if position + 1 == self.cases.len() {
                self.default_branch.clone()
            } else {
                Branch::to(builder.add_block("switch.bits"))
            };
            builder.set_flow(
                &current,
                BlockFlow::Switch(SwitchFlow::if_else(hit, case.branch().clone(), miss.clone())),
            );
            current = miss.target().clone();
        }
    }

    fn jump_table(&self, builder: &mut FlowGraphBuilder, spec: IntegerSpec, min: i128, span: i128) {
        let unsigned = spec.unsigned();
        let (table, index) = self.range_check(builder, spec, unsigned, min, span, "switch.table");
        let targets: HashMap<i128, &Branch> = self
            .cases
            .iter()
            .flat_map(|case| {
                case.values()
                    .iter()
                    .filter_map(|c| c.specialize(&self.ty).as_int())
                    .map(move |v| (v.value(), case.branch()))
            })
            .collect();
        let cases = (0..=span)
            .map(|offset| {
                let branch = targets.get(&(min + offset)).copied().unwrap_or(&self.default_branch);
                SwitchCase::new(vec![Constant::int(offset, unsigned)], branch.clone())
            })
            .collect();
        builder.set_flow(
            &table,
            BlockFlow::Switch(SwitchFlow::new(
                Instruction::copy(Type::Int(unsigned), index),
                cases,
                self.default_branch.clone(),
            )),
        );
    }

    /// Splits at the best pivot; returns the two new halves.
    fn search_tree(&self, builder: &mut FlowGraphBuilder, spec: IntegerSpec, sorted: &[i128]) -> [BasicBlockTag; 2] {
        let density = |values: &[i128]| match (values.first(), values.last()) {
            (Some(first), Some(last)) => values.len() as f64 / ((last - first) as f64 + 1.0),
            _ => 0.0,
        };
        let middle = sorted.len() / 2;
        let pivot = (1..sorted.len())
            .max_by(|&a, &b| {
                let score = |p: usize| {
                    let gap = (sorted[p] - sorted[p - 1]) as f64;
                    (density(&sorted[..p]) + density(&sorted[p..])) * gap.ln()
                };
                score(a)
                    .total_cmp(&score(b))
                    .then_with(|| middle.abs_diff(b).cmp(&middle.abs_diff(a)))
            })
            .unwrap_or(middle);

        let block = self.block.clone();
        let bound = self.literal(builder, &block, sorted[pivot], spec);
        let below = self.append(
            builder,
            &block,
            Instruction::arith(ArithOp::Lt, self.ty.clone(), vec![self.scrutinee.clone(), bound]),
            "below",
        );
        let left = builder.add_block("switch.low");
        let right = builder.add_block("switch.high");
        builder.set_flow(
            &block,
            BlockFlow::Switch(SwitchFlow::if_else(
                below,
                Branch::to(left.clone()),
                Branch::to(right.clone()),
            )),
        );
        builder.set_flow(&left, self.restricted(&sorted[..pivot].iter().copied().collect()));
        builder.set_flow(&right, self.restricted(&sorted[pivot..].iter().copied().collect()));
        [left, right]
    }
}

impl SwitchLowering {
    /// Creates a switch lowering pass with default heuristics.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(SwitchLoweringConfig::default())
    }

    /// Creates a switch lowering pass with the given heuristics.
    #[must_use]
    pub fn with_config(config: SwitchLoweringConfig) -> Self {
        Self { config }
    }

    fn bit_test_profile(cases: usize, values: usize) -> bool {
        matches!((cases, values), (1, 3..) | (2, 5..) | (3, 6..))
    }

    /// Lowers the switch ending `block`, if it is not lowered yet. Returns the strategy and
    /// any new switches that still need lowering.
    fn lower(&self, builder: &mut FlowGraphBuilder, block: &BasicBlockTag) -> Option<(Strategy, Vec<BasicBlockTag>)> {
        let BlockFlow::Switch(switch) = builder.block(block)?.flow().clone() else {
            return None;
        };
        if switch.is_if_else() || switch.is_jump_table() {
            return None;
        }
        let default_branch = switch.default_branch().clone();
        if switch.cases().iter().all(|case| *case.branch() == default_branch) {
            builder.set_flow(block, BlockFlow::Jump(default_branch));
            return Some((Strategy::Jump, Vec::new()));
        }

        let ty = switch.value().result_type();
        let scrutinee = match switch.value().copy_source() {
            Some(source) => source.clone(),
            None => builder.append_instruction(block, switch.value().clone(), "scrutinee"),
        };
        let lowering = Lowering {
            block: block.clone(),
            scrutinee,
            ty: ty.clone(),
            cases: switch.cases().to_vec(),
            default_branch,
        };

        let value_count: usize = switch.cases().iter().map(|case| case.values().len()).sum();
        let integers: Option<Vec<i128>> = switch
            .cases()
            .iter()
            .flat_map(|case| case.values())
            .map(|c| c.specialize(&ty).as_int().map(|i| i.value()))
            .collect();
        let (Some(spec), Some(mut sorted)) = (ty.integer_spec(), integers) else {
            lowering.cascade(builder);
            return Some((Strategy::TestCascade, Vec::new()));
        };
        if value_count <= self.config.max_cascade_values {
            lowering.cascade(builder);
            return Some((Strategy::TestCascade, Vec::new()));
        }

        sorted.sort_unstable();
        sorted.dedup();
        let (min, max) = (sorted[0], sorted[sorted.len() - 1]);
        let span = max - min;

        if self.config.allow_bit_tests
            && span < i128::from(self.config.bit_test_max_span.min(64))
            && Self::bit_test_profile(switch.cases().len(), sorted.len())
        {
            lowering.bit_test(builder, spec, min, span);
            return Some((Strategy::BitTest, Vec::new()));
        }
        let density = sorted.len() as f64 / (span as f64 + 1.0);
        if self.config.allow_jump_tables && density >= self.config.jump_table_min_density {
            lowering.jump_table(builder, spec, min, span);
            return Some((Strategy::JumpTable, Vec::new()));
        }
        let halves = lowering.search_tree(builder, spec, &sorted);
        Some((Strategy::SearchTree, halves.to_vec()))
    }
}

impl IntraproceduralOptimization for SwitchLowering {
    fn name(&self) -> &'static str {
        "switch-lowering"
    }

    fn description(&self) -> &'static str {
        "Lowers switches into tests, bit tests, jump tables and search trees"
    }

    fn apply(&self, graph: &FlowGraph, log: &EventLog) -> FlowGraph {
        let mut builder = graph.to_builder();
        let mut worklist: Vec<BasicBlockTag> = graph
            .blocks()
            .filter(|block| matches!(block.flow(), BlockFlow::Switch(_)))
            .map(|block| block.tag().clone())
            .collect();
        worklist.reverse();

        let mut lowered = 0;
        while let Some(block) = worklist.pop() {
            let Some((strategy, pending)) = self.lower(&mut builder, &block) else {
                continue;
            };
            lowered += 1;
            log.record(EventKind::SwitchLowered)
                .block(&block)
                .message(strategy.to_string())
                .pass(self.name());
            worklist.extend(pending.into_iter().rev());
        }

        if lowered == 0 {
            return graph.clone();
        }
        builder.to_immutable()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test::{
        assert_preserves_semantics, assert_unchanged,
        builders::{build_graph, int32, GraphSketch},
        interpreter::Value,
    };

    /// A switch on the entry parameter where case `i` returns `i + 1` and the default
    /// returns 0.
    fn switch_graph(cases: &[&[i32]]) -> FlowGraph {
        build_graph(|g: &mut GraphSketch| {
            let entry = g.entry();
            let x = g.param(&entry, int32(), "x");
            let mut targets = Vec::new();
            for (index, _) in cases.iter().enumerate() {
                let block = g.block(&format!("case{index}"));
                let v = g.i32(&block, index as i32 + 1);
                g.ret_i32(&block, &v);
                targets.push(block);
            }
            let default = g.block("default");
            let zero = g.i32(&default, 0);
            g.ret_i32(&default, &zero);
            let arms: Vec<(&[i32], &BasicBlockTag)> = cases.iter().copied().zip(targets.iter()).collect();
            g.switch_i32(&entry, &x, &arms, &default);
        })
    }

    fn inputs(range: std::ops::RangeInclusive<i32>) -> Vec<Vec<Value>> {
        range.map(|v| vec![Value::i32(v)]).collect()
    }

    fn strategies(graph: &FlowGraph) -> Vec<String> {
        let log = EventLog::new();
        SwitchLowering::new().apply(graph, &log);
        log.filter_kind(EventKind::SwitchLowered)
            .map(|event| event.message.clone())
            .collect()
    }

    fn fully_lowered(graph: &FlowGraph) -> bool {
        graph.blocks().all(|block| match block.flow() {
            BlockFlow::Switch(switch) => switch.is_if_else() || switch.is_jump_table(),
            _ => true,
        })
    }

    #[test]
    fn test_small_switch_becomes_cascade() {
        let graph = switch_graph(&[&[0, 1], &[2]]);
        assert_eq!(strategies(&graph), vec!["test-cascade"]);
        let lowered = assert_preserves_semantics(&SwitchLowering::new(), &graph, &inputs(-2..=4));
        assert!(fully_lowered(&lowered));
        assert_unchanged(&SwitchLowering::new(), &lowered);
    }

    #[test]
    fn test_single_case_bit_test() {
        let graph = switch_graph(&[&[1, 3, 5, 9]]);
        assert_eq!(strategies(&graph), vec!["bit-test"]);
        let lowered = assert_preserves_semantics(&SwitchLowering::new(), &graph, &inputs(-1..=11));
        assert!(fully_lowered(&lowered));
    }

    #[test]
    fn test_dense_switch_becomes_jump_table() {
        let graph = switch_graph(&[&[10], &[11], &[12], &[14], &[15]]);
        assert_eq!(strategies(&graph), vec!["jump-table"]);
        let lowered = assert_preserves_semantics(&SwitchLowering::new(), &graph, &inputs(8..=17));
        assert!(lowered.blocks().any(|b| matches!(b.flow(), BlockFlow::Switch(s) if s.is_jump_table())));
        assert_unchanged(&SwitchLowering::new(), &lowered);
    }

    #[test]
    fn test_sparse_switch_becomes_search_tree() {
        let graph = switch_graph(&[&[0], &[1000], &[2000], &[3000], &[4000]]);
        let applied = strategies(&graph);
        assert_eq!(applied[0], "search-tree");
        let mut inputs = vec![vec![Value::i32(-5)], vec![Value::i32(5000)], vec![Value::i32(1500)]];
        inputs.extend([0, 1000, 2000, 3000, 4000].map(|v| vec![Value::i32(v)]));
        let lowered = assert_preserves_semantics(&SwitchLowering::new(), &graph, &inputs);
        assert!(fully_lowered(&lowered));
    }

    #[test]
    fn test_span_of_three_values_covers_every_input() {
        let graph = switch_graph(&[&[0, 1, 2]]);
        let lowered = assert_preserves_semantics(&SwitchLowering::new(), &graph, &inputs(-3..=5));
        assert!(fully_lowered(&lowered));
    }

    #[test]
    fn test_bit_tests_can_be_disabled() {
        let graph = switch_graph(&[&[1, 3, 5, 9]]);
        let config = SwitchLoweringConfig {
            allow_bit_tests: false,
            allow_jump_tables: false,
            ..Default::default()
        };
        let log = EventLog::new();
        let lowered = SwitchLowering::with_config(config).apply(&graph, &log);
        assert!(!log
            .filter_kind(EventKind::SwitchLowered)
            .any(|e| e.message == "bit-test"));
        assert!(fully_lowered(&lowered));
    }
}
