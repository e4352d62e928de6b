//! Basic blocks and named instructions.

use crate::ir::{BasicBlockTag, BlockFlow, Instruction, Type, ValueTag};

/// A block parameter: a phi-like value bound by every branch that targets the block.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BlockParameter {
    tag: ValueTag,
    parameter_type: Type,
}

impl BlockParameter {
    /// Creates a parameter.
    #[must_use]
    pub fn new(tag: ValueTag, parameter_type: Type) -> Self {
        Self {
            tag,
            parameter_type,
        }
    }

    /// The value defined by this parameter.
    #[must_use]
    pub fn tag(&self) -> &ValueTag {
        &self.tag
    }

    /// The parameter's type.
    #[must_use]
    pub fn parameter_type(&self) -> &Type {
        &self.parameter_type
    }
}

/// A straight-line sequence of named instructions ending in a flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BasicBlock {
    pub(crate) tag: BasicBlockTag,
    pub(crate) parameters: Vec<BlockParameter>,
    pub(crate) instructions: Vec<ValueTag>,
    pub(crate) flow: BlockFlow,
}

impl BasicBlock {
    pub(crate) fn new(tag: BasicBlockTag) -> Self {
        Self {
            tag,
            parameters: Vec::new(),
            instructions: Vec::new(),
            flow: BlockFlow::Unreachable,
        }
    }

    /// The block's tag.
    #[must_use]
    pub fn tag(&self) -> &BasicBlockTag {
        &self.tag
    }

    /// The block's parameters, in binding order.
    #[must_use]
    pub fn parameters(&self) -> &[BlockParameter] {
        &self.parameters
    }

    /// Tags of the block's parameters, in binding order.
    pub fn parameter_tags(&self) -> impl Iterator<Item = &ValueTag> {
        self.parameters.iter().map(BlockParameter::tag)
    }

    /// Position of a parameter in the binding order.
    #[must_use]
    pub fn parameter_index(&self, tag: &ValueTag) -> Option<usize> {
        self.parameters.iter().position(|p| p.tag() == tag)
    }

    /// Tags of the block's named instructions, in execution order.
    #[must_use]
    pub fn instructions(&self) -> &[ValueTag] {
        &self.instructions
    }

    /// Position of an instruction within the block.
    #[must_use]
    pub fn instruction_index(&self, tag: &ValueTag) -> Option<usize> {
        self.instructions.iter().position(|t| t == tag)
    }

    /// The block's terminator.
    #[must_use]
    pub fn flow(&self) -> &BlockFlow {
        &self.flow
    }
}

/// An instruction bound to the value it defines and the block that contains it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamedInstruction {
    pub(crate) tag: ValueTag,
    pub(crate) block: BasicBlockTag,
    pub(crate) instruction: Instruction,
}

impl NamedInstruction {
    /// The defined value.
    #[must_use]
    pub fn tag(&self) -> &ValueTag {
        &self.tag
    }

    /// The containing block.
    #[must_use]
    pub fn block(&self) -> &BasicBlockTag {
        &self.block
    }

    /// The instruction.
    #[must_use]
    pub fn instruction(&self) -> &Instruction {
        &self.instruction
    }
}
