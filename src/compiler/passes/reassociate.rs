//! Operator reassociation.
//!
//! Regroups arithmetic so that constants end up next to each other, where constant
//! propagation can fold them:
//!
//! - `(a - b) - c` becomes `a - (b + c)` on integers
//! - `(a / b) / c` becomes `a / (b * c)` when `b` and `c` are positive literals whose
//!   product fits the operand type
//! - a chain of one associative operator (`+`, `*`, `&`, `|`, `^`) is flattened into its
//!   leaves, constants are folded together, identities are dropped, and the chain is rebuilt
//!   left-leaning with the folded constant last
//!
//! Only intermediate results with a single use are absorbed, so no computation is
//! duplicated. Floating point operators are left alone.
//!
//! # Example
//!
//! Before:
//! ```text
//! a = add x, 1
//! b = add a, y
//! c = add b, 2
//! ```
//!
//! After:
//! ```text
//! t = add x, y
//! c = add t, 3
//! ```

use std::sync::Arc;

use crate::{
    analysis::{ValueUses, ValueUsesAnalysis},
    compiler::{EventKind, EventLog, IntraproceduralOptimization},
    ir::{
        evaluate_intrinsic, ArithOp, Constant, FlowGraph, FlowGraphBuilder, GraphStore,
        Instruction, InstructionPrototype, Type, ValueTag,
    },
};

/// Regroups operator chains so their constants can be folded.
pub struct ReassociateOperators;

impl Default for ReassociateOperators {
    fn default() -> Self {
        Self::new()
    }
}

/// A binary arithmetic instruction.
struct Binary {
    op: ArithOp,
    ty: Type,
    lhs: ValueTag,
    rhs: ValueTag,
}

fn binary(graph: &GraphStore, value: &ValueTag) -> Option<Binary> {
    let instruction = graph.instruction(value)?.instruction();
    let InstructionPrototype::Intrinsic {
        parameter_types, ..
    } = instruction.prototype()
    else {
        return None;
    };
    let op = instruction.prototype().arith_op()?;
    let [lhs, rhs] = instruction.arguments() else {
        return None;
    };
    Some(Binary {
        op,
        ty: parameter_types.first()?.clone(),
        lhs: lhs.clone(),
        rhs: rhs.clone(),
    })
}

fn is_identity(op: ArithOp, constant: Constant) -> bool {
    match constant {
        Constant::Int(i) => match op {
            ArithOp::Add | ArithOp::Or | ArithOp::Xor => i.is_zero(),
            ArithOp::Mul => i.value() == 1,
            ArithOp::And => {
                let spec = i.spec();
                i.value() == if spec.is_signed() { -1 } else { spec.max_value() }
            }
            _ => false,
        },
        Constant::Bool(b) => match op {
            ArithOp::And => b,
            ArithOp::Or | ArithOp::Xor => !b,
            _ => false,
        },
        _ => false,
    }
}

impl ReassociateOperators {
    /// Creates a new reassociation pass.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// True if `value` is a single-use operand of another `op` instruction over `ty`, and
    /// will therefore be absorbed into that instruction's chain.
    fn is_interior(graph: &GraphStore, uses: &ValueUses, value: &ValueTag, op: ArithOp, ty: &Type) -> bool {
        if uses.use_count(value) != 1 {
            return false;
        }
        let [user] = uses.instruction_users(value) else {
            return false;
        };
        binary(graph, user).is_some_and(|parent| parent.op == op && parent.ty == *ty)
    }

    /// Inserts `lhs op rhs` before `anchor`, folding it when both sides are literals.
    fn combine(
        builder: &mut FlowGraphBuilder,
        anchor: &ValueTag,
        op: ArithOp,
        ty: &Type,
        lhs: ValueTag,
        rhs: ValueTag,
    ) -> ValueTag {
        let folded = match (builder.constant_value(&lhs), builder.constant_value(&rhs)) {
            (Some(a), Some(b)) => {
                evaluate_intrinsic(&InstructionPrototype::arith(op, ty.clone()), &[a, b])
            }
            _ => None,
        };
        let instruction = match folded {
            Some(constant) => Instruction::constant(constant, ty.clone()),
            None => Instruction::arith(op, ty.clone(), vec![lhs, rhs]),
        };
        builder.insert_before(anchor, instruction, "combined")
    }

    fn collect_leaves(
        builder: &FlowGraphBuilder,
        uses: &ValueUses,
        value: &ValueTag,
        op: ArithOp,
        ty: &Type,
        leaves: &mut Vec<ValueTag>,
    ) {
        match binary(builder, value) {
            Some(node) if node.op == op && node.ty == *ty && uses.use_count(value) == 1 => {
                Self::collect_leaves(builder, uses, &node.lhs, op, ty, leaves);
                Self::collect_leaves(builder, uses, &node.rhs, op, ty, leaves);
            }
            _ => leaves.push(value.clone()),
        }
    }

    /// `(a - b) - c` to `a - (b + c)`.
    fn subtraction(builder: &mut FlowGraphBuilder, uses: &ValueUses, root: &ValueTag, node: &Binary) -> bool {
        let Some(inner) = binary(builder, &node.lhs) else {
            return false;
        };
        if inner.op != ArithOp::Sub || inner.ty != node.ty || uses.use_count(&node.lhs) != 1 {
            return false;
        }
        let sum = Self::combine(
            builder,
            root,
            ArithOp::Add,
            &node.ty,
            inner.rhs,
            node.rhs.clone(),
        );
        builder.replace_instruction(
            root,
            Instruction::arith(ArithOp::Sub, node.ty.clone(), vec![inner.lhs, sum]),
        );
        true
    }

    /// `(a / b) / c` to `a / (b * c)` for positive literal divisors.
    fn division(builder: &mut FlowGraphBuilder, uses: &ValueUses, root: &ValueTag, node: &Binary) -> bool {
        let Some(inner) = binary(builder, &node.lhs) else {
            return false;
        };
        if inner.op != ArithOp::Div || inner.ty != node.ty || uses.use_count(&node.lhs) != 1 {
            return false;
        }
        let (Some(b), Some(c)) = (
            builder.constant_value(&inner.rhs).and_then(|c| c.as_int()),
            builder.constant_value(&node.rhs).and_then(|c| c.as_int()),
        ) else {
            return false;
        };
        let Some(spec) = node.ty.integer_spec() else {
            return false;
        };
        if b.value() <= 0 || c.value() <= 0 {
            return false;
        }
        let Some(product) = b.value().checked_mul(c.value()) else {
            return false;
        };
        if !spec.is_representable(product) {
            return false;
        }
        let divisor = builder.insert_before(
            root,
            Instruction::constant(Constant::int(product, spec), node.ty.clone()),
            "divisor",
        );
        builder.replace_instruction(
            root,
            Instruction::arith(ArithOp::Div, node.ty.clone(), vec![inner.lhs, divisor]),
        );
        true
    }

    /// Flattens and rebuilds the associative chain rooted at `root`.
    fn chain(builder: &mut FlowGraphBuilder, uses: &ValueUses, root: &ValueTag, node: &Binary) -> bool {
        let mut leaves = Vec::new();
        Self::collect_leaves(builder, uses, &node.lhs, node.op, &node.ty, &mut leaves);
        Self::collect_leaves(builder, uses, &node.rhs, node.op, &node.ty, &mut leaves);

        let mut variables = Vec::new();
        let mut constants = Vec::new();
        for leaf in leaves {
            match builder.constant_value(&leaf) {
                Some(constant) => constants.push(constant.specialize(&node.ty)),
                None => variables.push(leaf),
            }
        }
        let has_identity = constants.iter().any(|c| is_identity(node.op, *c));
        if constants.len() < 2 && !has_identity {
            return false;
        }

        let prototype = InstructionPrototype::arith(node.op, node.ty.clone());
        let mut folded: Option<Constant> = None;
        for constant in constants {
            folded = match folded {
                None => Some(constant),
                Some(acc) => match evaluate_intrinsic(&prototype, &[acc, constant]) {
                    Some(result) => Some(result),
                    None => return false,
                },
            };
        }
        let folded = folded.filter(|c| variables.is_empty() || !is_identity(node.op, *c));

        let mut operands: Vec<ValueTag> = variables;
        if let Some(constant) = folded {
            let literal = builder.insert_before(
                root,
                Instruction::constant(constant, node.ty.clone()),
                "folded",
            );
            operands.push(literal);
        }
        let Some((last, init)) = operands.split_last() else {
            return false;
        };
        let Some((first, middle)) = init.split_first() else {
            builder.replace_instruction(root, Instruction::copy(node.ty.clone(), last.clone()));
            return true;
        };
        let mut accumulated = first.clone();
        for operand in middle {
            accumulated = builder.insert_before(
                root,
                Instruction::arith(node.op, node.ty.clone(), vec![accumulated, operand.clone()]),
                "chain",
            );
        }
        builder.replace_instruction(
            root,
            Instruction::arith(node.op, node.ty.clone(), vec![accumulated, last.clone()]),
        );
        true
    }
}

impl IntraproceduralOptimization for ReassociateOperators {
    fn name(&self) -> &'static str {
        "reassociate-operators"
    }

    fn description(&self) -> &'static str {
        "Regroups arithmetic so constants can be folded together"
    }

    fn apply(&self, graph: &FlowGraph, log: &EventLog) -> FlowGraph {
        let uses: Arc<ValueUses> = graph.get_analysis::<ValueUsesAnalysis>();
        let mut builder = graph.to_builder();
        let mut rewritten = 0;
        for named in graph.named_instructions() {
            let root = named.tag();
            let Some(node) = binary(&builder, root) else {
                continue;
            };
            let integer = node.ty.is_integer();
            let changed = match node.op {
                ArithOp::Sub if integer => Self::subtraction(&mut builder, &uses, root, &node),
                ArithOp::Div if integer => Self::division(&mut builder, &uses, root, &node),
                op if op.is_associative()
                    && (integer || node.ty == Type::Bool)
                    && !Self::is_interior(graph, &uses, root, op, &node.ty) =>
                {
                    Self::chain(&mut builder, &uses, root, &node)
                }
                _ => false,
            };
            if changed {
                rewritten += 1;
                log.record(EventKind::ExpressionReassociated)
                    .block(named.block())
                    .value(root)
                    .pass(self.name());
            }
        }

        if rewritten == 0 {
            return graph.clone();
        }
        builder.to_immutable()
    }
}
