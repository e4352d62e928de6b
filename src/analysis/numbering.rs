//! Structural value numbering.
//!
//! Values receive equal numbers when they are provably interchangeable: copies share the
//! number of their source, and two value-numberable instructions share a number when their
//! prototypes are equal and their arguments have pairwise equal numbers (in any order for
//! commutative operators). Parameters and instructions with effects are always unique.
//!
//! Blocks are visited in reverse postorder, so every argument is numbered before its users
//! except for block parameters fed along back edges, which are unique anyway.

use std::collections::{HashMap, HashSet};

use crate::{
    analysis::{DominatorTreeAnalysis, FlowGraphAnalysis},
    ir::{BasicBlockTag, FlowGraph, Instruction, InstructionPrototype, ValueTag},
};

/// Computes [`ValueNumbering`].
#[derive(Debug, Default, Clone, Copy)]
pub struct ValueNumberingAnalysis;

impl FlowGraphAnalysis for ValueNumberingAnalysis {
    type Output = ValueNumbering;

    fn analyze(&self, graph: &FlowGraph) -> ValueNumbering {
        let dominators = graph.get_analysis::<DominatorTreeAnalysis>();
        let mut order = dominators.reverse_postorder();
        let visited: HashSet<BasicBlockTag> = order.iter().cloned().collect();
        order.extend(graph.block_tags().iter().filter(|tag| !visited.contains(*tag)).cloned());

        let mut numbering = Numberer::default();
        for tag in &order {
            let Some(block) = graph.block(tag) else {
                continue;
            };
            for parameter in block.parameter_tags() {
                numbering.fresh(parameter);
            }
            for tag in block.instructions() {
                if let Some(named) = graph.instruction(tag) {
                    numbering.instruction(tag, named.instruction());
                }
            }
        }

        let mut classes: HashMap<usize, Vec<ValueTag>> = HashMap::new();
        for tag in &order {
            let Some(block) = graph.block(tag) else {
                continue;
            };
            for value in block.parameter_tags().chain(block.instructions()) {
                if let Some(number) = numbering.numbers.get(value) {
                    classes.entry(*number).or_default().push(value.clone());
                }
            }
        }

        ValueNumbering {
            numbers: numbering.numbers,
            classes,
        }
    }
}

#[derive(Default)]
struct Numberer {
    numbers: HashMap<ValueTag, usize>,
    expressions: HashMap<(InstructionPrototype, Vec<usize>), usize>,
    next: usize,
}

impl Numberer {
    fn fresh(&mut self, value: &ValueTag) -> usize {
        let number = self.next;
        self.next += 1;
        self.numbers.insert(value.clone(), number);
        number
    }

    fn instruction(&mut self, tag: &ValueTag, instruction: &Instruction) {
        if let Some(source) = instruction.copy_source() {
            if let Some(number) = self.numbers.get(source).copied() {
                self.numbers.insert(tag.clone(), number);
                return;
            }
        }

        let prototype = instruction.prototype();
        if !prototype.is_value_numberable() {
            self.fresh(tag);
            return;
        }

        let mut arguments = Vec::with_capacity(instruction.arguments().len());
        for argument in instruction.arguments() {
            match self.numbers.get(argument) {
                Some(number) => arguments.push(*number),
                None => {
                    self.fresh(tag);
                    return;
                }
            }
        }
        if prototype.arith_op().is_some_and(|op| op.is_commutative()) {
            arguments.sort_unstable();
        }
        let prototype = match prototype {
            InstructionPrototype::Constant { value, result_type } => InstructionPrototype::Constant {
                value: value.specialize(result_type),
                result_type: result_type.clone(),
            },
            other => other.clone(),
        };

        let key = (prototype, arguments);
        if let Some(number) = self.expressions.get(&key).copied() {
            self.numbers.insert(tag.clone(), number);
        } else {
            let number = self.fresh(tag);
            self.expressions.insert(key, number);
        }
    }
}

/// Value numbers and the equivalence classes they induce.
#[derive(Debug, Clone)]
pub struct ValueNumbering {
    numbers: HashMap<ValueTag, usize>,
    classes: HashMap<usize, Vec<ValueTag>>,
}

impl ValueNumbering {
    /// The number of a value.
    #[must_use]
    pub fn number(&self, value: &ValueTag) -> Option<usize> {
        self.numbers.get(value).copied()
    }

    /// True if both values are known to be interchangeable.
    #[must_use]
    pub fn equivalent(&self, a: &ValueTag, b: &ValueTag) -> bool {
        a == b || matches!((self.number(a), self.number(b)), (Some(x), Some(y)) if x == y)
    }

    /// Every value sharing the number of `value`, in reverse postorder.
    #[must_use]
    pub fn class(&self, value: &ValueTag) -> &[ValueTag] {
        self.number(value)
            .and_then(|number| self.classes.get(&number))
            .map_or(&[], Vec::as_slice)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{ArithOp, BlockFlow, Constant, FlowGraphBuilder, IntegerSpec, Type};

    #[test]
    fn test_commutative_and_constant_equivalence() {
        let int = Type::Int(IntegerSpec::I32);
        let mut builder = FlowGraphBuilder::new();
        let entry = builder.entry_point().clone();
        let x = builder.append_parameter(&entry, int.clone(), "x");
        let y = builder.append_parameter(&entry, int.clone(), "y");
        let zero = builder.append_instruction(&entry, Instruction::default_value(int.clone()), "zero");
        let also_zero = builder.append_instruction(&entry, Instruction::constant(Constant::i32(0), int.clone()), "z");
        let xy = builder.append_instruction(&entry, Instruction::arith(ArithOp::Add, int.clone(), vec![x.clone(), y.clone()]), "xy");
        let yx = builder.append_instruction(&entry, Instruction::arith(ArithOp::Add, int.clone(), vec![y.clone(), x.clone()]), "yx");
        let x_minus_y = builder.append_instruction(&entry, Instruction::arith(ArithOp::Sub, int.clone(), vec![x.clone(), y.clone()]), "d1");
        let y_minus_x = builder.append_instruction(&entry, Instruction::arith(ArithOp::Sub, int.clone(), vec![y.clone(), x.clone()]), "d2");
        let copied = builder.append_instruction(&entry, Instruction::copy(int.clone(), xy.clone()), "c");
        let slot = builder.append_instruction(&entry, Instruction::alloca(int.clone()), "s1");
        let other_slot = builder.append_instruction(&entry, Instruction::alloca(int.clone()), "s2");
        builder.set_flow(&entry, BlockFlow::return_value(int, copied.clone()));
        let graph = builder.to_immutable();

        let numbering = graph.get_analysis::<ValueNumberingAnalysis>();
        assert!(numbering.equivalent(&zero, &also_zero));
        assert!(numbering.equivalent(&xy, &yx));
        assert!(numbering.equivalent(&copied, &xy));
        assert!(!numbering.equivalent(&x_minus_y, &y_minus_x));
        assert!(!numbering.equivalent(&x, &y));
        assert!(!numbering.equivalent(&slot, &other_slot));
        assert_eq!(numbering.class(&xy), &[xy.clone(), yx, copied]);
    }
}
