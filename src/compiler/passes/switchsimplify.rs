//! Switch simplification.
//!
//! Algebraic rewrites of the value a switch tests:
//!
//! - **Constant scrutinee**: the switch becomes a jump to the branch the constant selects
//! - **Widening conversion**: a switch on `convert<i64>(x)` with `x: i32` tests `x`
//!   directly; case values that `x` cannot represent are dropped since they can never
//!   match
//! - **Equality test**: a switch whose scrutinee is `arith.eq(x, k)` or `arith.ne(x, k)`
//!   for a literal `k` becomes a one-case switch on `x`
//!
//! Rewrites repeat until the switch stops changing. The canonical if-else form, a switch
//! on a copy of a named boolean, is left alone.
//!
//! # Example
//!
//! Before:
//! ```text
//! switch arith.eq(x, 4) [true -> a] else -> b
//! ```
//!
//! After:
//! ```text
//! switch copy x [4 -> a] else -> b
//! ```

use crate::{
    compiler::{EventKind, EventLog, IntraproceduralOptimization},
    ir::{
        ArithOp, BlockFlow, Constant, FlowGraph, GraphStore, Instruction, InstructionPrototype,
        SwitchCase, SwitchFlow, Type, ValueTag,
    },
};

/// Rewrites switch scrutinees into simpler equivalents.
pub struct SwitchSimplification;

impl Default for SwitchSimplification {
    fn default() -> Self {
        Self::new()
    }
}

impl SwitchSimplification {
    /// Creates a new switch simplification pass.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// The literal a scrutinee evaluates to, if any.
    fn constant_scrutinee(graph: &GraphStore, value: &Instruction) -> Option<Constant> {
        if let Some(constant) = value.constant_value() {
            return Some(constant.specialize(&value.result_type()));
        }
        graph.constant_value(value.copy_source()?)
    }

    /// `(source, source type)` if `value` is, or copies, an integer widening conversion.
    fn widened(graph: &GraphStore, value: &Instruction) -> Option<(ValueTag, Type)> {
        let conversion = match value.copy_source() {
            Some(source) => graph.instruction(source)?.instruction(),
            None => value,
        };
        let InstructionPrototype::Intrinsic {
            result_type,
            parameter_types,
            ..
        } = conversion.prototype()
        else {
            return None;
        };
        if conversion.prototype().arith_op() != Some(ArithOp::Convert) {
            return None;
        }
        let source_type = parameter_types.first()?;
        let (from, to) = (source_type.integer_spec()?, result_type.integer_spec()?);
        let widening = to.bits() > from.bits() && (from.is_signed() == to.is_signed() || !from.is_signed());
        if !widening {
            return None;
        }
        Some((conversion.arguments().first()?.clone(), source_type.clone()))
    }

    fn simplify(graph: &GraphStore, switch: &SwitchFlow) -> Option<BlockFlow> {
        let value = switch.value();

        if let Some(constant) = Self::constant_scrutinee(graph, value) {
            return Some(BlockFlow::Jump(switch.branch_for(&constant).clone()));
        }

        if let Some((source, source_type)) = Self::widened(graph, value) {
            let wide_type = value.result_type();
            let spec = source_type.integer_spec()?;
            let cases = switch
                .cases()
                .iter()
                .filter_map(|case| {
                    let values: Vec<Constant> = case
                        .values()
                        .iter()
                        .filter_map(|c| c.specialize(&wide_type).as_int())
                        .map(|c| c.value())
                        .filter(|v| spec.is_representable(*v))
                        .map(|v| Constant::int(v, spec))
                        .collect();
                    (!values.is_empty()).then(|| SwitchCase::new(values, case.branch().clone()))
                })
                .collect();
            return Some(BlockFlow::Switch(SwitchFlow::new(
                Instruction::copy(source_type, source),
                cases,
                switch.default_branch().clone(),
            )));
        }

        let op = value.prototype().arith_op()?;
        if !matches!(op, ArithOp::Eq | ArithOp::Ne) {
            return None;
        }
        let InstructionPrototype::Intrinsic {
            parameter_types, ..
        } = value.prototype()
        else {
            return None;
        };
        let operand_type = parameter_types.first()?.clone();
        if !operand_type.is_integer() && operand_type != Type::Bool {
            return None;
        }
        let [lhs, rhs] = value.arguments() else {
            return None;
        };
        let (tested, literal) = match (graph.constant_value(lhs), graph.constant_value(rhs)) {
            (_, Some(k)) => (lhs, k),
            (Some(k), None) => (rhs, k),
            (None, None) => return None,
        };
        let when_true = switch.branch_for(&Constant::Bool(true)).clone();
        let when_false = switch.branch_for(&Constant::Bool(false)).clone();
        let (matched, otherwise) = if op == ArithOp::Eq {
            (when_true, when_false)
        } else {
            (when_false, when_true)
        };
        Some(BlockFlow::Switch(SwitchFlow::new(
            Instruction::copy(operand_type.clone(), tested.clone()),
            vec![SwitchCase::new(vec![literal.specialize(&operand_type)], matched)],
            otherwise,
        )))
    }
}

impl IntraproceduralOptimization for SwitchSimplification {
    fn name(&self) -> &'static str {
        "switch-simplification"
    }

    fn description(&self) -> &'static str {
        "Rewrites switch scrutinees into simpler equivalents"
    }

    fn apply(&self, graph: &FlowGraph, log: &EventLog) -> FlowGraph {
        let mut builder = graph.to_builder();
        let mut simplified = 0;
        for block in graph.blocks() {
            let mut flow = block.flow().clone();
            let mut rounds = 0;
            while let BlockFlow::Switch(switch) = &flow {
                let Some(next) = Self::simplify(graph, switch) else {
                    break;
                };
                flow = next;
                rounds += 1;
                if rounds > 8 {
                    break;
                }
            }
            if rounds == 0 {
                continue;
            }
            builder.set_flow(block.tag(), flow);
            simplified += 1;
            log.record(EventKind::SwitchSimplified)
                .block(block.tag())
                .message(format!("{rounds} rewrites"))
                .pass(self.name());
        }

        if simplified == 0 {
            return graph.clone();
        }
        builder.to_immutable()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        ir::{BasicBlockTag, Branch, IntegerSpec},
        test::{
            assert_preserves_semantics, assert_unchanged,
            builders::{build_graph, int32, GraphSketch},
            interpreter::Value,
        },
    };

    fn returns(g: &mut GraphSketch, block: &BasicBlockTag, value: i32) {
        let v = g.i32(block, value);
        g.ret_i32(block, &v);
    }

    #[test]
    fn test_constant_scrutinee_becomes_jump() {
        let graph = build_graph(|g| {
            let entry = g.entry();
            let a = g.block("a");
            let b = g.block("b");
            let three = g.i32(&entry, 3);
            g.switch_i32(&entry, &three, &[(&[1], &a), (&[3], &b)], &a);
            returns(g, &a, 1);
            returns(g, &b, 2);
        });

        let optimized = assert_preserves_semantics(&SwitchSimplification::new(), &graph, &[vec![]]);
        let entry = optimized.block(optimized.entry_point()).unwrap();
        assert!(matches!(entry.flow(), BlockFlow::Jump(b) if b.target().name() == "b"));
    }

    #[test]
    fn test_widening_conversion_is_looked_through() {
        let i64_type = Type::Int(IntegerSpec::I64);
        let graph = build_graph(|g| {
            let entry = g.entry();
            let a = g.block("a");
            let b = g.block("b");
            let c = g.block("c");
            let x = g.param(&entry, int32(), "x");
            let cases = vec![
                SwitchCase::new(
                    vec![Constant::int(5, IntegerSpec::I64), Constant::int(1 << 40, IntegerSpec::I64)],
                    Branch::to(a.clone()),
                ),
                SwitchCase::new(vec![Constant::int(-1, IntegerSpec::I64)], Branch::to(b.clone())),
            ];
            g.set_flow(
                &entry,
                BlockFlow::Switch(SwitchFlow::new(
                    Instruction::new(InstructionPrototype::convert(int32(), i64_type.clone()), vec![x]),
                    cases,
                    Branch::to(c.clone()),
                )),
            );
            returns(g, &a, 1);
            returns(g, &b, 2);
            returns(g, &c, 3);
        });

        let inputs: Vec<Vec<Value>> = [5, -1, 0, 7].iter().map(|v| vec![Value::i32(*v)]).collect();
        let optimized = assert_preserves_semantics(&SwitchSimplification::new(), &graph, &inputs);
        let entry = optimized.block(optimized.entry_point()).unwrap();
        let BlockFlow::Switch(switch) = entry.flow() else {
            panic!("expected a switch:\n{optimized}");
        };
        assert_eq!(switch.value().result_type(), int32());
        assert_eq!(switch.cases()[0].values(), &[Constant::i32(5)]);
        assert_unchanged(&SwitchSimplification::new(), &optimized);
    }

    #[test]
    fn test_equality_scrutinee_becomes_case() {
        let graph = build_graph(|g| {
            let entry = g.entry();
            let a = g.block("a");
            let b = g.block("b");
            let x = g.param(&entry, int32(), "x");
            let four = g.i32(&entry, 4);
            g.set_flow(
                &entry,
                BlockFlow::Switch(SwitchFlow::new(
                    Instruction::arith(ArithOp::Ne, int32(), vec![x, four]),
                    vec![SwitchCase::new(vec![Constant::Bool(true)], Branch::to(a.clone()))],
                    Branch::to(b.clone()),
                )),
            );
            returns(g, &a, 1);
            returns(g, &b, 2);
        });

        let log = EventLog::new();
        let optimized = SwitchSimplification::new().apply(&graph, &log);
        assert!(log.has(EventKind::SwitchSimplified));
        let entry = optimized.block(optimized.entry_point()).unwrap();
        let BlockFlow::Switch(switch) = entry.flow() else {
            panic!("expected a switch:\n{optimized}");
        };
        assert_eq!(switch.cases().len(), 1);
        assert_eq!(switch.cases()[0].branch().target().name(), "b");
        assert_preserves_semantics(
            &SwitchSimplification::new(),
            &graph,
            &[vec![Value::i32(4)], vec![Value::i32(5)]],
        );
    }

    #[test]
    fn test_if_else_is_left_alone() {
        let graph = build_graph(|g| {
            let entry = g.entry();
            let a = g.block("a");
            let b = g.block("b");
            let x = g.param(&entry, int32(), "x");
            let zero = g.i32(&entry, 0);
            let cond = g.op(&entry, ArithOp::Eq, &x, &zero);
            g.branch(&entry, &cond, &a, &b);
            returns(g, &a, 1);
            returns(g, &b, 2);
        });
        assert_unchanged(&SwitchSimplification::new(), &graph);
    }
}
