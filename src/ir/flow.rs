//! Block terminators and branches.
//!
//! Every basic block ends in exactly one [`BlockFlow`]. Flows carry their outgoing
//! [`Branch`]es (each with the arguments bound to the target block's parameters) and may
//! embed anonymous instructions of their own: the scrutinee of a switch, the returned value,
//! and the risky operation guarded by a try flow.

use std::fmt;

use crate::ir::{BasicBlockTag, Constant, Instruction, Type, ValueTag};

/// An argument passed along a branch.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum BranchArgument {
    /// An ordinary SSA value.
    Value(ValueTag),
    /// The result of a try flow's risky instruction. Only valid on its success branch.
    TryResult,
    /// The captured exception of a try flow. Only valid on its exception branch.
    TryException,
}

impl BranchArgument {
    /// The referenced value, if this is an ordinary value argument.
    #[must_use]
    pub fn as_value(&self) -> Option<&ValueTag> {
        match self {
            BranchArgument::Value(value) => Some(value),
            _ => None,
        }
    }
}

impl fmt::Display for BranchArgument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BranchArgument::Value(value) => write!(f, "{value}"),
            BranchArgument::TryResult => f.write_str("#try-result"),
            BranchArgument::TryException => f.write_str("#exception"),
        }
    }
}

/// A control transfer to a block, binding its parameters.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Branch {
    target: BasicBlockTag,
    arguments: Vec<BranchArgument>,
}

impl Branch {
    /// Creates a branch.
    #[must_use]
    pub fn new(target: BasicBlockTag, arguments: Vec<BranchArgument>) -> Self {
        Self { target, arguments }
    }

    /// A branch without arguments.
    #[must_use]
    pub fn to(target: BasicBlockTag) -> Self {
        Self::new(target, Vec::new())
    }

    /// A branch whose arguments are all ordinary values.
    #[must_use]
    pub fn with_values(target: BasicBlockTag, values: Vec<ValueTag>) -> Self {
        Self::new(target, values.into_iter().map(BranchArgument::Value).collect())
    }

    /// The target block.
    #[must_use]
    pub fn target(&self) -> &BasicBlockTag {
        &self.target
    }

    /// The arguments, one per target parameter.
    #[must_use]
    pub fn arguments(&self) -> &[BranchArgument] {
        &self.arguments
    }

    /// Iterates over ordinary value arguments.
    pub fn values(&self) -> impl Iterator<Item = &ValueTag> {
        self.arguments.iter().filter_map(BranchArgument::as_value)
    }

    /// Returns a copy that targets another block with the same arguments.
    #[must_use]
    pub fn with_target(&self, target: BasicBlockTag) -> Self {
        Self::new(target, self.arguments.clone())
    }

    /// Returns a copy with a new argument list.
    #[must_use]
    pub fn with_arguments(&self, arguments: Vec<BranchArgument>) -> Self {
        Self::new(self.target.clone(), arguments)
    }

    /// Returns a copy with one more argument appended.
    #[must_use]
    pub fn with_appended(&self, argument: BranchArgument) -> Self {
        let mut arguments = self.arguments.clone();
        arguments.push(argument);
        Self::new(self.target.clone(), arguments)
    }

    /// Returns a copy with every ordinary value passed through `map`.
    #[must_use]
    pub fn map_values(&self, mut map: impl FnMut(&ValueTag) -> ValueTag) -> Self {
        Self::new(
            self.target.clone(),
            self.arguments
                .iter()
                .map(|arg| match arg {
                    BranchArgument::Value(value) => BranchArgument::Value(map(value)),
                    other => other.clone(),
                })
                .collect(),
        )
    }
}

impl fmt::Display for Branch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.target)?;
        for (index, argument) in self.arguments.iter().enumerate() {
            if index > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{argument}")?;
        }
        f.write_str(")")
    }
}

/// One arm of a switch: a set of values that all select the same branch.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SwitchCase {
    values: Vec<Constant>,
    branch: Branch,
}

impl SwitchCase {
    /// Creates a case. Duplicate values are dropped.
    #[must_use]
    pub fn new(values: Vec<Constant>, branch: Branch) -> Self {
        let mut unique: Vec<Constant> = Vec::with_capacity(values.len());
        for value in values {
            if !unique.contains(&value) {
                unique.push(value);
            }
        }
        Self {
            values: unique,
            branch,
        }
    }

    /// The values selecting this case.
    #[must_use]
    pub fn values(&self) -> &[Constant] {
        &self.values
    }

    /// The branch taken.
    #[must_use]
    pub fn branch(&self) -> &Branch {
        &self.branch
    }
}

/// A multi-way branch on a scrutinee value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SwitchFlow {
    value: Instruction,
    cases: Vec<SwitchCase>,
    default_branch: Branch,
}

impl SwitchFlow {
    /// Creates a switch. Case value sets are expected to be disjoint.
    #[must_use]
    pub fn new(value: Instruction, cases: Vec<SwitchCase>, default_branch: Branch) -> Self {
        Self {
            value,
            cases,
            default_branch,
        }
    }

    /// The canonical two-way form: `condition == true` selects `if_branch`.
    #[must_use]
    pub fn if_else(condition: ValueTag, if_branch: Branch, else_branch: Branch) -> Self {
        Self::new(
            Instruction::copy(Type::Bool, condition),
            vec![SwitchCase::new(vec![Constant::Bool(true)], if_branch)],
            else_branch,
        )
    }

    /// The scrutinee instruction.
    #[must_use]
    pub fn value(&self) -> &Instruction {
        &self.value
    }

    /// The cases.
    #[must_use]
    pub fn cases(&self) -> &[SwitchCase] {
        &self.cases
    }

    /// The default branch.
    #[must_use]
    pub fn default_branch(&self) -> &Branch {
        &self.default_branch
    }

    /// True for the canonical two-branch form: one case holding exactly one value.
    #[must_use]
    pub fn is_if_else(&self) -> bool {
        self.cases.len() == 1 && self.cases[0].values.len() == 1
    }

    /// True for the jump-table form produced by switch lowering.
    ///
    /// The scrutinee is an unsigned integer and the cases are `0..n` in order, one value per
    /// case, without gaps.
    #[must_use]
    pub fn is_jump_table(&self) -> bool {
        let unsigned = self
            .value
            .result_type()
            .integer_spec()
            .is_some_and(|spec| !spec.is_signed());
        unsigned
            && self.cases.len() > 1
            && self.cases.iter().enumerate().all(|(index, case)| {
                matches!(case.values.as_slice(), [Constant::Int(value)] if value.value() == index as i128)
            })
    }

    /// The branch selected when the scrutinee equals `value`.
    #[must_use]
    pub fn branch_for(&self, value: &Constant) -> &Branch {
        self.cases
            .iter()
            .find(|case| case.values.contains(value))
            .map_or(&self.default_branch, |case| &case.branch)
    }
}

/// A risky instruction with separate success and exception continuations.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TryFlow {
    instruction: Instruction,
    success_branch: Branch,
    exception_branch: Branch,
}

impl TryFlow {
    /// Creates a try flow.
    #[must_use]
    pub fn new(instruction: Instruction, success_branch: Branch, exception_branch: Branch) -> Self {
        Self {
            instruction,
            success_branch,
            exception_branch,
        }
    }

    /// The guarded instruction.
    #[must_use]
    pub fn instruction(&self) -> &Instruction {
        &self.instruction
    }

    /// Branch taken when the instruction completes normally.
    #[must_use]
    pub fn success_branch(&self) -> &Branch {
        &self.success_branch
    }

    /// Branch taken when the instruction throws.
    #[must_use]
    pub fn exception_branch(&self) -> &Branch {
        &self.exception_branch
    }
}

/// The terminator of a basic block.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum BlockFlow {
    /// Unconditional branch.
    Jump(Branch),
    /// Multi-way branch.
    Switch(SwitchFlow),
    /// Exception-guarded instruction.
    Try(TryFlow),
    /// Returns the value of the embedded instruction.
    Return(Instruction),
    /// Control never reaches the end of the block.
    Unreachable,
}

impl BlockFlow {
    /// `jump target(values...)`.
    #[must_use]
    pub fn jump(target: BasicBlockTag, values: Vec<ValueTag>) -> Self {
        BlockFlow::Jump(Branch::with_values(target, values))
    }

    /// Returns a copy of `value`.
    #[must_use]
    pub fn return_value(value_type: Type, value: ValueTag) -> Self {
        BlockFlow::Return(Instruction::copy(value_type, value))
    }

    /// Outgoing branches in a fixed order (cases before default, success before exception).
    #[must_use]
    pub fn branches(&self) -> Vec<&Branch> {
        match self {
            BlockFlow::Jump(branch) => vec![branch],
            BlockFlow::Switch(switch) => switch
                .cases
                .iter()
                .map(|case| &case.branch)
                .chain(std::iter::once(&switch.default_branch))
                .collect(),
            BlockFlow::Try(flow) => vec![&flow.success_branch, &flow.exception_branch],
            BlockFlow::Return(_) | BlockFlow::Unreachable => Vec::new(),
        }
    }

    /// Replaces the branches, which must be given in the order of [`BlockFlow::branches`].
    #[must_use]
    pub fn with_branches(&self, branches: Vec<Branch>) -> Self {
        debug_assert_eq!(branches.len(), self.branches().len());
        let mut branches = branches.into_iter();
        let mut next = |fallback: &Branch| branches.next().unwrap_or_else(|| fallback.clone());
        match self {
            BlockFlow::Jump(branch) => BlockFlow::Jump(next(branch)),
            BlockFlow::Switch(switch) => {
                let cases = switch
                    .cases
                    .iter()
                    .map(|case| SwitchCase {
                        values: case.values.clone(),
                        branch: next(&case.branch),
                    })
                    .collect();
                let default_branch = next(&switch.default_branch);
                BlockFlow::Switch(SwitchFlow::new(switch.value.clone(), cases, default_branch))
            }
            BlockFlow::Try(flow) => {
                let success = next(&flow.success_branch);
                let exception = next(&flow.exception_branch);
                BlockFlow::Try(TryFlow::new(flow.instruction.clone(), success, exception))
            }
            other => other.clone(),
        }
    }

    /// Anonymous instructions embedded in the flow.
    #[must_use]
    pub fn instructions(&self) -> Vec<&Instruction> {
        match self {
            BlockFlow::Switch(switch) => vec![&switch.value],
            BlockFlow::Try(flow) => vec![&flow.instruction],
            BlockFlow::Return(value) => vec![value],
            BlockFlow::Jump(_) | BlockFlow::Unreachable => Vec::new(),
        }
    }

    /// Replaces the embedded instructions, given in the order of [`BlockFlow::instructions`].
    #[must_use]
    pub fn with_instructions(&self, instructions: Vec<Instruction>) -> Self {
        debug_assert_eq!(instructions.len(), self.instructions().len());
        let mut instructions = instructions.into_iter();
        let mut next = |fallback: &Instruction| instructions.next().unwrap_or_else(|| fallback.clone());
        match self {
            BlockFlow::Switch(switch) => BlockFlow::Switch(SwitchFlow::new(
                next(&switch.value),
                switch.cases.clone(),
                switch.default_branch.clone(),
            )),
            BlockFlow::Try(flow) => BlockFlow::Try(TryFlow::new(
                next(&flow.instruction),
                flow.success_branch.clone(),
                flow.exception_branch.clone(),
            )),
            BlockFlow::Return(value) => BlockFlow::Return(next(value)),
            other => other.clone(),
        }
    }

    /// Returns a copy with every referenced value passed through `map`.
    #[must_use]
    pub fn map_values(&self, mut map: impl FnMut(&ValueTag) -> ValueTag) -> Self {
        let instructions = self
            .instructions()
            .into_iter()
            .map(|instruction| instruction.map_arguments(&mut map))
            .collect();
        let flow = self.with_instructions(instructions);
        let branches = flow
            .branches()
            .into_iter()
            .map(|branch| branch.map_values(&mut map))
            .collect();
        flow.with_branches(branches)
    }

    /// Every value referenced by the flow, including branch arguments.
    #[must_use]
    pub fn used_values(&self) -> Vec<ValueTag> {
        let mut values: Vec<ValueTag> = self
            .instructions()
            .into_iter()
            .flat_map(|instruction| instruction.arguments().iter().cloned())
            .collect();
        for branch in self.branches() {
            values.extend(branch.values().cloned());
        }
        values
    }

    /// Target blocks, one entry per branch.
    #[must_use]
    pub fn successors(&self) -> Vec<BasicBlockTag> {
        self.branches()
            .into_iter()
            .map(|branch| branch.target().clone())
            .collect()
    }
}

impl fmt::Display for BlockFlow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockFlow::Jump(branch) => write!(f, "jump {branch}"),
            BlockFlow::Switch(switch) => {
                write!(f, "switch {} {{", switch.value)?;
                for case in &switch.cases {
                    let values: Vec<String> = case.values.iter().map(ToString::to_string).collect();
                    write!(f, " [{}] -> {};", values.join(", "), case.branch)?;
                }
                write!(f, " default -> {} }}", switch.default_branch)
            }
            BlockFlow::Try(flow) => write!(
                f,
                "try {} then {} catch {}",
                flow.instruction, flow.success_branch, flow.exception_branch
            ),
            BlockFlow::Return(value) => write!(f, "return {value}"),
            BlockFlow::Unreachable => f.write_str("unreachable"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::IntegerSpec;

    #[test]
    fn test_switch_branch_selection() {
        let x = ValueTag::new("x");
        let (a, b, c) = (
            BasicBlockTag::new("a"),
            BasicBlockTag::new("b"),
            BasicBlockTag::new("c"),
        );
        let switch = SwitchFlow::new(
            Instruction::copy(Type::Int(IntegerSpec::I32), x),
            vec![
                SwitchCase::new(vec![Constant::i32(1)], Branch::to(a.clone())),
                SwitchCase::new(vec![Constant::i32(3), Constant::i32(3)], Branch::to(b.clone())),
            ],
            Branch::to(c.clone()),
        );
        assert_eq!(switch.branch_for(&Constant::i32(3)).target(), &b);
        assert_eq!(switch.branch_for(&Constant::i32(7)).target(), &c);
        assert_eq!(switch.cases()[1].values().len(), 1);
        assert!(!switch.is_if_else());

        let flow = BlockFlow::Switch(switch);
        assert_eq!(flow.successors(), vec![a, b, c]);
    }

    #[test]
    fn test_map_values_rewrites_instructions_and_branches() {
        let (x, y) = (ValueTag::new("x"), ValueTag::new("y"));
        let target = BasicBlockTag::new("t");
        let flow = BlockFlow::Switch(SwitchFlow::if_else(
            x.clone(),
            Branch::with_values(target.clone(), vec![x.clone()]),
            Branch::to(target),
        ));
        let mapped = flow.map_values(|v| if *v == x { y.clone() } else { v.clone() });
        assert_eq!(mapped.used_values(), vec![y.clone(), y]);
    }

    #[test]
    fn test_jump_table_shape() {
        let x = ValueTag::new("x");
        let target = BasicBlockTag::new("t");
        let spec = IntegerSpec::U32;
        let cases = (0..4)
            .map(|i| SwitchCase::new(vec![Constant::int(i, spec)], Branch::to(target.clone())))
            .collect();
        let table = SwitchFlow::new(Instruction::copy(Type::Int(spec), x), cases, Branch::to(target));
        assert!(table.is_jump_table());
    }
}
