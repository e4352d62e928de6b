//! Mutable construction and editing of flow graphs.
//!
//! [`FlowGraphBuilder`] holds a copy-on-write working set of a graph's storage: blocks and
//! instructions are reference counted and only cloned when they are actually edited, so
//! starting a builder from a large graph and touching a handful of blocks is cheap.
//!
//! A builder is confined to a single task. [`FlowGraphBuilder::to_immutable`] produces a
//! [`FlowGraph`] snapshot; the snapshot is cached until the next edit, so transforms can
//! freely interleave "query an analysis of the current state" with edits.
//!
//! # Example
//!
//! ```rust
//! use flowscope::ir::{BlockFlow, Constant, FlowGraphBuilder, Instruction, IntegerSpec, Type};
//!
//! let int = Type::Int(IntegerSpec::I32);
//! let mut builder = FlowGraphBuilder::new();
//! let entry = builder.entry_point().clone();
//! let x = builder.append_instruction(&entry, Instruction::constant(Constant::i32(4), int.clone()), "x");
//! builder.set_flow(&entry, BlockFlow::return_value(int, x));
//!
//! let graph = builder.to_immutable();
//! assert!(graph.validate().is_ok());
//! ```

use std::{
    cell::OnceCell,
    collections::{HashMap, HashSet},
    ops::Deref,
    sync::Arc,
};

use crate::ir::{
    graph::{GraphStore, ParameterSite},
    BasicBlock, BasicBlockTag, BlockFlow, BlockParameter, FlowGraph, Instruction,
    NamedInstruction, Type, ValueTag,
};

/// A mutable working copy of a flow graph.
#[derive(Clone)]
pub struct FlowGraphBuilder {
    store: GraphStore,
    snapshot: OnceCell<FlowGraph>,
}

impl Default for FlowGraphBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl FlowGraphBuilder {
    /// Creates a graph holding a single, empty entry block.
    #[must_use]
    pub fn new() -> Self {
        Self {
            store: GraphStore::with_entry(BasicBlockTag::new("entry")),
            snapshot: OnceCell::new(),
        }
    }

    pub(crate) fn from_graph(graph: &FlowGraph) -> Self {
        Self {
            store: graph.store().clone(),
            snapshot: OnceCell::from(graph.clone()),
        }
    }

    /// Produces an immutable snapshot of the current state.
    #[must_use]
    pub fn to_immutable(&self) -> FlowGraph {
        self.snapshot
            .get_or_init(|| FlowGraph::from_store(self.store.clone()))
            .clone()
    }

    /// Creates an independent copy for speculative edits.
    ///
    /// The fork shares all unmodified storage with `self`. Adopt it with
    /// `*builder = fork` to keep the edits, or drop it to discard them.
    #[must_use]
    pub fn fork(&self) -> Self {
        self.clone()
    }

    fn touch(&mut self) {
        if self.snapshot.get().is_some() {
            self.snapshot = OnceCell::new();
        }
    }

    fn block_mut(&mut self, tag: &BasicBlockTag) -> Option<&mut BasicBlock> {
        self.touch();
        self.store.blocks.get_mut(tag).map(Arc::make_mut)
    }

    /// Makes `tag` the entry block.
    pub fn set_entry_point(&mut self, tag: &BasicBlockTag) {
        debug_assert!(self.store.contains_block(tag), "unknown block {tag}");
        self.touch();
        self.store.entry = tag.clone();
    }

    /// Adds an empty block with unreachable flow.
    pub fn add_block(&mut self, name: impl AsRef<str>) -> BasicBlockTag {
        self.touch();
        let tag = BasicBlockTag::new(name);
        self.store
            .blocks
            .insert(tag.clone(), Arc::new(BasicBlock::new(tag.clone())));
        self.store.block_order.push(tag.clone());
        tag
    }

    /// Removes a block together with its parameters and instructions.
    ///
    /// Branches that still target the block must be rewritten by the caller.
    pub fn remove_block(&mut self, tag: &BasicBlockTag) {
        debug_assert!(*tag != self.store.entry, "cannot remove the entry block");
        self.touch();
        let Some(block) = self.store.blocks.remove(tag) else {
            return;
        };
        for parameter in block.parameters() {
            self.store.parameters.remove(parameter.tag());
        }
        for instruction in block.instructions() {
            self.store.instructions.remove(instruction);
        }
        self.store.block_order.retain(|t| t != tag);
    }

    /// Appends a parameter to a block.
    pub fn append_parameter(
        &mut self,
        block: &BasicBlockTag,
        parameter_type: Type,
        name: impl AsRef<str>,
    ) -> ValueTag {
        let index = self.store.block(block).map_or(0, |b| b.parameters().len());
        self.insert_parameter(block, index, parameter_type, name)
    }

    /// Inserts a parameter at `index` in a block's parameter list.
    pub fn insert_parameter(
        &mut self,
        block: &BasicBlockTag,
        index: usize,
        parameter_type: Type,
        name: impl AsRef<str>,
    ) -> ValueTag {
        let tag = ValueTag::new(name);
        let parameter = BlockParameter::new(tag.clone(), parameter_type.clone());
        if let Some(data) = self.block_mut(block) {
            let index = index.min(data.parameters.len());
            data.parameters.insert(index, parameter);
            self.store.parameters.insert(
                tag.clone(),
                ParameterSite {
                    block: block.clone(),
                    parameter_type,
                },
            );
        } else {
            debug_assert!(false, "unknown block {block}");
        }
        tag
    }

    /// Removes parameters from a block and drops the matching argument from every branch
    /// that targets it.
    pub fn remove_parameters(&mut self, block: &BasicBlockTag, parameters: &HashSet<ValueTag>) {
        let Some(data) = self.store.block(block) else {
            return;
        };
        let removed: Vec<usize> = data
            .parameters()
            .iter()
            .enumerate()
            .filter(|(_, p)| parameters.contains(p.tag()))
            .map(|(index, _)| index)
            .collect();
        if removed.is_empty() {
            return;
        }

        if let Some(data) = self.block_mut(block) {
            data.parameters.retain(|p| !parameters.contains(p.tag()));
        }
        for tag in parameters {
            if self.store.parameters.get(tag).is_some_and(|site| site.block == *block) {
                self.store.parameters.remove(tag);
            }
        }

        let sources: Vec<BasicBlockTag> = self
            .store
            .blocks()
            .filter(|b| b.flow().branches().iter().any(|br| br.target() == block))
            .map(|b| b.tag().clone())
            .collect();
        for source in sources {
            let Some(flow) = self.store.block(&source).map(|b| b.flow().clone()) else {
                continue;
            };
            let branches = flow
                .branches()
                .into_iter()
                .map(|branch| {
                    if branch.target() != block {
                        return branch.clone();
                    }
                    let arguments = branch
                        .arguments()
                        .iter()
                        .enumerate()
                        .filter(|(index, _)| !removed.contains(index))
                        .map(|(_, argument)| argument.clone())
                        .collect();
                    branch.with_arguments(arguments)
                })
                .collect();
            self.set_flow(&source, flow.with_branches(branches));
        }
    }

    /// Appends an instruction to the end of a block.
    pub fn append_instruction(
        &mut self,
        block: &BasicBlockTag,
        instruction: Instruction,
        name: impl AsRef<str>,
    ) -> ValueTag {
        let index = self.store.block(block).map_or(0, |b| b.instructions().len());
        self.insert_instruction(block, index, instruction, name)
    }

    /// Inserts an instruction at `index` within a block.
    pub fn insert_instruction(
        &mut self,
        block: &BasicBlockTag,
        index: usize,
        instruction: Instruction,
        name: impl AsRef<str>,
    ) -> ValueTag {
        let tag = ValueTag::new(name);
        if let Some(data) = self.block_mut(block) {
            let index = index.min(data.instructions.len());
            data.instructions.insert(index, tag.clone());
            self.store.instructions.insert(
                tag.clone(),
                Arc::new(NamedInstruction {
                    tag: tag.clone(),
                    block: block.clone(),
                    instruction,
                }),
            );
        } else {
            debug_assert!(false, "unknown block {block}");
        }
        tag
    }

    /// Inserts an instruction immediately before `anchor`.
    pub fn insert_before(
        &mut self,
        anchor: &ValueTag,
        instruction: Instruction,
        name: impl AsRef<str>,
    ) -> ValueTag {
        let (block, index) = self.position_of(anchor);
        self.insert_instruction(&block, index, instruction, name)
    }

    /// Inserts an instruction immediately after `anchor`.
    pub fn insert_after(
        &mut self,
        anchor: &ValueTag,
        instruction: Instruction,
        name: impl AsRef<str>,
    ) -> ValueTag {
        let (block, index) = self.position_of(anchor);
        self.insert_instruction(&block, index + 1, instruction, name)
    }

    fn position_of(&self, tag: &ValueTag) -> (BasicBlockTag, usize) {
        let block = self
            .store
            .instruction(tag)
            .map(|named| named.block.clone())
            .unwrap_or_else(|| self.store.entry.clone());
        debug_assert!(self.store.is_instruction(tag), "unknown instruction {tag}");
        let index = self
            .store
            .block(&block)
            .and_then(|b| b.instruction_index(tag))
            .unwrap_or(0);
        (block, index)
    }

    /// Replaces the instruction that defines `tag`, keeping the tag and position.
    pub fn replace_instruction(&mut self, tag: &ValueTag, instruction: Instruction) {
        self.touch();
        if let Some(named) = self.store.instructions.get_mut(tag) {
            Arc::make_mut(named).instruction = instruction;
        } else {
            debug_assert!(false, "unknown instruction {tag}");
        }
    }

    /// Removes a named instruction. Its uses must already have been rewritten.
    pub fn remove_instruction(&mut self, tag: &ValueTag) {
        self.touch();
        let Some(named) = self.store.instructions.remove(tag) else {
            return;
        };
        if let Some(block) = self.store.blocks.get_mut(&named.block) {
            Arc::make_mut(block).instructions.retain(|t| t != tag);
        }
    }

    /// Removes every instruction in `tags`.
    pub fn remove_instructions<'a>(&mut self, tags: impl IntoIterator<Item = &'a ValueTag>) {
        let tags: HashSet<&ValueTag> = tags.into_iter().collect();
        if tags.is_empty() {
            return;
        }
        self.touch();
        let mut blocks = HashSet::new();
        for tag in &tags {
            if let Some(named) = self.store.instructions.remove(*tag) {
                blocks.insert(named.block.clone());
            }
        }
        for block in blocks {
            if let Some(data) = self.store.blocks.get_mut(&block) {
                Arc::make_mut(data).instructions.retain(|t| !tags.contains(t));
            }
        }
    }

    /// Moves an instruction to position `index` of `block`.
    pub fn move_instruction(&mut self, tag: &ValueTag, block: &BasicBlockTag, index: usize) {
        self.touch();
        let Some(named) = self.store.instructions.get_mut(tag) else {
            debug_assert!(false, "unknown instruction {tag}");
            return;
        };
        let source = std::mem::replace(&mut Arc::make_mut(named).block, block.clone());
        if let Some(data) = self.store.blocks.get_mut(&source) {
            Arc::make_mut(data).instructions.retain(|t| t != tag);
        }
        if let Some(data) = self.store.blocks.get_mut(block) {
            let data = Arc::make_mut(data);
            let index = index.min(data.instructions.len());
            data.instructions.insert(index, tag.clone());
        }
    }

    /// Reorders the instructions of a block. `order` must be a permutation of them.
    pub fn set_instruction_order(&mut self, block: &BasicBlockTag, order: Vec<ValueTag>) {
        if let Some(data) = self.block_mut(block) {
            debug_assert_eq!(
                data.instructions.iter().collect::<HashSet<_>>(),
                order.iter().collect::<HashSet<_>>()
            );
            data.instructions = order;
        }
    }

    /// Replaces a block's flow.
    pub fn set_flow(&mut self, block: &BasicBlockTag, flow: BlockFlow) {
        if let Some(data) = self.block_mut(block) {
            data.flow = flow;
        } else {
            debug_assert!(false, "unknown block {block}");
        }
    }

    /// Rewrites every use of a key of `replacements` into the corresponding value.
    ///
    /// Definitions are left in place. The map is applied once, so callers must flatten
    /// chains before calling.
    pub fn replace_uses(&mut self, replacements: &HashMap<ValueTag, ValueTag>) {
        if replacements.is_empty() {
            return;
        }
        self.touch();
        let map = |value: &ValueTag| replacements.get(value).unwrap_or(value).clone();

        for named in self.store.instructions.values_mut() {
            if named
                .instruction
                .arguments()
                .iter()
                .any(|arg| replacements.contains_key(arg))
            {
                let rewritten = named.instruction.map_arguments(map);
                Arc::make_mut(named).instruction = rewritten;
            }
        }
        for block in self.store.blocks.values_mut() {
            if block
                .flow
                .used_values()
                .iter()
                .any(|value| replacements.contains_key(value))
            {
                let rewritten = block.flow.map_values(map);
                Arc::make_mut(block).flow = rewritten;
            }
        }
    }

    /// Rewrites every use of `from` into `to`.
    pub fn replace_all_uses(&mut self, from: &ValueTag, to: &ValueTag) {
        let mut replacements = HashMap::new();
        replacements.insert(from.clone(), to.clone());
        self.replace_uses(&replacements);
    }
}

impl Deref for FlowGraphBuilder {
    type Target = GraphStore;

    fn deref(&self) -> &GraphStore {
        &self.store
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Branch, Constant, IntegerSpec};

    fn int() -> Type {
        Type::Int(IntegerSpec::I32)
    }

    #[test]
    fn test_snapshot_is_cached_until_edit() {
        let mut builder = FlowGraphBuilder::new();
        let a = builder.to_immutable();
        let b = builder.to_immutable();
        assert!(a.same_instance(&b));

        let entry = builder.entry_point().clone();
        builder.append_instruction(&entry, Instruction::constant(Constant::i32(1), int()), "c");
        let c = builder.to_immutable();
        assert!(!a.same_instance(&c));
        assert_eq!(a.instruction_count(), 0);
        assert_eq!(c.instruction_count(), 1);
    }

    #[test]
    fn test_remove_parameters_strips_branch_arguments() {
        let mut builder = FlowGraphBuilder::new();
        let entry = builder.entry_point().clone();
        let join = builder.add_block("join");
        let p = builder.append_parameter(&join, int(), "p");
        let q = builder.append_parameter(&join, int(), "q");
        let one = builder.append_instruction(&entry, Instruction::constant(Constant::i32(1), int()), "one");
        let two = builder.append_instruction(&entry, Instruction::constant(Constant::i32(2), int()), "two");
        builder.set_flow(&entry, BlockFlow::jump(join.clone(), vec![one, two.clone()]));
        builder.set_flow(&join, BlockFlow::return_value(int(), q.clone()));

        builder.remove_parameters(&join, &HashSet::from([p]));
        let graph = builder.to_immutable();
        assert!(graph.validate().is_ok());
        let BlockFlow::Jump(branch) = graph.block(&entry).map(|b| b.flow().clone()).unwrap() else {
            panic!("expected jump");
        };
        assert_eq!(branch, Branch::with_values(join, vec![two]));
        assert!(graph.is_parameter(&q));
    }

    #[test]
    fn test_replace_uses_and_fork() {
        let mut builder = FlowGraphBuilder::new();
        let entry = builder.entry_point().clone();
        let a = builder.append_instruction(&entry, Instruction::constant(Constant::i32(1), int()), "a");
        let b = builder.append_instruction(&entry, Instruction::copy(int(), a.clone()), "b");
        builder.set_flow(&entry, BlockFlow::return_value(int(), b.clone()));

        let mut fork = builder.fork();
        fork.replace_all_uses(&b, &a);
        fork.remove_instruction(&b);
        assert_eq!(fork.instruction_count(), 1);
        assert_eq!(builder.instruction_count(), 2);
        assert!(fork.to_immutable().validate().is_ok());
    }

    #[test]
    fn test_move_instruction() {
        let mut builder = FlowGraphBuilder::new();
        let entry = builder.entry_point().clone();
        let next = builder.add_block("next");
        let a = builder.append_instruction(&entry, Instruction::constant(Constant::i32(1), int()), "a");
        builder.set_flow(&entry, BlockFlow::jump(next.clone(), Vec::new()));
        builder.set_flow(&next, BlockFlow::return_value(int(), a.clone()));
        builder.move_instruction(&a, &next, 0);
        let graph = builder.to_immutable();
        assert_eq!(graph.defining_block(&a), Some(&next));
        assert!(graph.validate().is_ok());
    }
}
