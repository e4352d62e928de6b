//! The immutable flow graph.
//!
//! A [`FlowGraph`] owns a set of basic blocks, the named instructions and block parameters
//! that define every SSA value, and one distinguished entry block. Graphs are immutable and
//! cheap to clone: clones share both the underlying storage and the analysis cache. All
//! edits go through [`crate::ir::FlowGraphBuilder`], whose [`to_immutable`] produces a new
//! graph with an empty analysis cache.
//!
//! Read-only queries are implemented on [`GraphStore`], which both the graph and the builder
//! dereference to, so analyses and transforms can inspect either one uniformly.
//!
//! # Invariants
//!
//! - every value is defined exactly once, by a named instruction or a block parameter
//! - every branch targets an existing block and binds all of its parameters
//! - `#try-result` and `#exception` only appear on the matching branch of a try flow
//! - every use is dominated by its definition (checked for reachable blocks)
//!
//! [`FlowGraph::validate`] checks all of them.
//!
//! [`to_immutable`]: crate::ir::FlowGraphBuilder::to_immutable

use std::{
    collections::HashMap,
    fmt,
    ops::Deref,
    sync::Arc,
};

use crate::{
    analysis::{AnalysisCache, DominatorTreeAnalysis, FlowGraphAnalysis},
    ir::{
        BasicBlock, BasicBlockTag, BlockFlow, BranchArgument, Constant, FlowGraphBuilder,
        NamedInstruction, Type, ValueTag,
    },
    Result,
};

/// Where a block parameter lives.
#[derive(Debug, Clone)]
pub(crate) struct ParameterSite {
    pub(crate) block: BasicBlockTag,
    pub(crate) parameter_type: Type,
}

/// Storage shared by [`FlowGraph`] and [`FlowGraphBuilder`], plus all read-only queries.
#[derive(Debug, Clone)]
pub struct GraphStore {
    pub(crate) entry: BasicBlockTag,
    pub(crate) block_order: Vec<BasicBlockTag>,
    pub(crate) blocks: HashMap<BasicBlockTag, Arc<BasicBlock>>,
    pub(crate) instructions: HashMap<ValueTag, Arc<NamedInstruction>>,
    pub(crate) parameters: HashMap<ValueTag, ParameterSite>,
}

impl GraphStore {
    pub(crate) fn with_entry(entry: BasicBlockTag) -> Self {
        let mut blocks = HashMap::new();
        blocks.insert(entry.clone(), Arc::new(BasicBlock::new(entry.clone())));
        Self {
            entry: entry.clone(),
            block_order: vec![entry],
            blocks,
            instructions: HashMap::new(),
            parameters: HashMap::new(),
        }
    }

    /// The entry block.
    #[must_use]
    pub fn entry_point(&self) -> &BasicBlockTag {
        &self.entry
    }

    /// Block tags in insertion order.
    #[must_use]
    pub fn block_tags(&self) -> &[BasicBlockTag] {
        &self.block_order
    }

    /// Blocks in insertion order.
    pub fn blocks(&self) -> impl Iterator<Item = &BasicBlock> {
        self.block_order
            .iter()
            .filter_map(|tag| self.blocks.get(tag).map(Arc::as_ref))
    }

    /// Number of blocks.
    #[must_use]
    pub fn block_count(&self) -> usize {
        self.block_order.len()
    }

    /// Number of named instructions.
    #[must_use]
    pub fn instruction_count(&self) -> usize {
        self.instructions.len()
    }

    /// Looks up a block.
    #[must_use]
    pub fn block(&self, tag: &BasicBlockTag) -> Option<&BasicBlock> {
        self.blocks.get(tag).map(Arc::as_ref)
    }

    /// True if the block exists.
    #[must_use]
    pub fn contains_block(&self, tag: &BasicBlockTag) -> bool {
        self.blocks.contains_key(tag)
    }

    /// Looks up a named instruction.
    #[must_use]
    pub fn instruction(&self, tag: &ValueTag) -> Option<&NamedInstruction> {
        self.instructions.get(tag).map(Arc::as_ref)
    }

    /// All named instructions, in block order and then execution order.
    pub fn named_instructions(&self) -> impl Iterator<Item = &NamedInstruction> {
        self.blocks().flat_map(move |block| {
            block
                .instructions()
                .iter()
                .filter_map(move |tag| self.instruction(tag))
        })
    }

    /// True if `tag` is a block parameter.
    #[must_use]
    pub fn is_parameter(&self, tag: &ValueTag) -> bool {
        self.parameters.contains_key(tag)
    }

    /// True if `tag` is defined by a named instruction.
    #[must_use]
    pub fn is_instruction(&self, tag: &ValueTag) -> bool {
        self.instructions.contains_key(tag)
    }

    /// True if `tag` is defined anywhere in the graph.
    #[must_use]
    pub fn contains_value(&self, tag: &ValueTag) -> bool {
        self.is_instruction(tag) || self.is_parameter(tag)
    }

    /// The type of a value.
    #[must_use]
    pub fn value_type(&self, tag: &ValueTag) -> Option<Type> {
        if let Some(instruction) = self.instructions.get(tag) {
            return Some(instruction.instruction.result_type());
        }
        self.parameters
            .get(tag)
            .map(|site| site.parameter_type.clone())
    }

    /// The block that defines a value.
    #[must_use]
    pub fn defining_block(&self, tag: &ValueTag) -> Option<&BasicBlockTag> {
        if let Some(instruction) = self.instructions.get(tag) {
            return Some(&instruction.block);
        }
        self.parameters.get(tag).map(|site| &site.block)
    }

    /// Follows chains of `copy` instructions back to their source.
    #[must_use]
    pub fn resolve_copies<'a>(&'a self, mut tag: &'a ValueTag) -> &'a ValueTag {
        let mut steps = 0;
        while let Some(source) = self.instruction(tag).and_then(|i| i.instruction.copy_source()) {
            tag = source;
            steps += 1;
            if steps > self.instructions.len() {
                break;
            }
        }
        tag
    }

    /// The literal a value evaluates to, looking through copies.
    #[must_use]
    pub fn constant_value(&self, tag: &ValueTag) -> Option<Constant> {
        let resolved = self.resolve_copies(tag);
        let named = self.instruction(resolved)?;
        let value = named.instruction.constant_value()?;
        Some(value.specialize(&named.instruction.result_type()))
    }
}

/// An immutable SSA control-flow graph.
#[derive(Clone)]
pub struct FlowGraph {
    store: Arc<GraphStore>,
    analyses: Arc<AnalysisCache>,
}

impl FlowGraph {
    pub(crate) fn from_store(store: GraphStore) -> Self {
        Self {
            store: Arc::new(store),
            analyses: Arc::new(AnalysisCache::default()),
        }
    }

    /// Creates a builder initialized with this graph's contents.
    #[must_use]
    pub fn to_builder(&self) -> FlowGraphBuilder {
        FlowGraphBuilder::from_graph(self)
    }

    pub(crate) fn store(&self) -> &GraphStore {
        &self.store
    }

    /// True if both handles refer to the very same graph instance.
    #[must_use]
    pub fn same_instance(&self, other: &FlowGraph) -> bool {
        Arc::ptr_eq(&self.store, &other.store)
    }

    /// Returns the result of analysis `A`, computing and caching it on first request.
    ///
    /// Results are cached per graph instance; a graph produced by a builder starts with an
    /// empty cache, so a result can never be observed for a graph it was not computed from.
    pub fn get_analysis<A>(&self) -> Arc<A::Output>
    where
        A: FlowGraphAnalysis + Default,
    {
        self.analyses.get_or_compute(self, &A::default())
    }

    /// Checks every structural and SSA invariant of the graph.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] describing the first violation found.
    pub fn validate(&self) -> Result<()> {
        let store = &self.store;
        if !store.contains_block(&store.entry) {
            return Err(malformed_error!("entry block {} does not exist", store.entry));
        }

        for block in store.blocks() {
            for (index, tag) in block.instructions().iter().enumerate() {
                let Some(named) = store.instruction(tag) else {
                    return Err(malformed_error!("{} lists undefined instruction {}", block.tag(), tag));
                };
                if named.block != block.tag {
                    return Err(malformed_error!("{} is listed in {} but bound to {}", tag, block.tag(), named.block));
                }
                if block.instructions()[..index].contains(tag) {
                    return Err(malformed_error!("{} appears twice in {}", tag, block.tag()));
                }
            }
            for parameter in block.parameters() {
                match store.parameters.get(parameter.tag()) {
                    Some(site) if site.block == block.tag => {}
                    _ => return Err(malformed_error!("parameter {} is not bound to {}", parameter.tag(), block.tag())),
                }
            }
            self.validate_flow(block)?;
        }

        if store.instructions.len() != store.blocks().map(|b| b.instructions().len()).sum::<usize>() {
            return Err(malformed_error!("an instruction is not listed by its block"));
        }

        self.validate_dominance()
    }

    fn validate_flow(&self, block: &BasicBlock) -> Result<()> {
        let store = &self.store;
        let flow = block.flow();
        let branches = flow.branches();
        for (index, branch) in branches.iter().enumerate() {
            let Some(target) = store.block(branch.target()) else {
                return Err(malformed_error!("{} branches to missing block {}", block.tag(), branch.target()));
            };
            if target.parameters().len() != branch.arguments().len() {
                return Err(malformed_error!(
                    "{} passes {} arguments to {} which takes {}",
                    block.tag(),
                    branch.arguments().len(),
                    target.tag(),
                    target.parameters().len()
                ));
            }
            for argument in branch.arguments() {
                let allowed = match (flow, argument) {
                    (_, BranchArgument::Value(_)) => true,
                    (BlockFlow::Try(_), BranchArgument::TryResult) => index == 0,
                    (BlockFlow::Try(_), BranchArgument::TryException) => index == 1,
                    _ => false,
                };
                if !allowed {
                    return Err(malformed_error!("{} uses {} outside its try branch", block.tag(), argument));
                }
            }
        }
        for value in flow.used_values() {
            if !store.contains_value(&value) {
                return Err(malformed_error!("{} uses undefined value {}", block.tag(), value));
            }
        }
        Ok(())
    }

    fn validate_dominance(&self) -> Result<()> {
        let store = &self.store;
        let dominators = self.get_analysis::<DominatorTreeAnalysis>();
        for block in store.blocks() {
            if !dominators.is_reachable(block.tag()) {
                continue;
            }
            for (index, tag) in block.instructions().iter().enumerate() {
                let Some(named) = store.instruction(tag) else {
                    continue;
                };
                for argument in named.instruction.arguments() {
                    if !dominators.dominates_value(store, argument, block.tag(), Some(index)) {
                        return Err(malformed_error!("{} uses {} which does not dominate it", tag, argument));
                    }
                }
            }
            for value in block.flow().used_values() {
                if !dominators.dominates_value(store, &value, block.tag(), None) {
                    return Err(malformed_error!("flow of {} uses {} which does not dominate it", block.tag(), value));
                }
            }
        }
        Ok(())
    }
}

impl Deref for FlowGraph {
    type Target = GraphStore;

    fn deref(&self) -> &GraphStore {
        &self.store
    }
}

impl PartialEq for FlowGraph {
    /// Structural equality: same entry, same blocks in the same order, same instructions.
    fn eq(&self, other: &Self) -> bool {
        if self.same_instance(other) {
            return true;
        }
        let (a, b) = (&*self.store, &*other.store);
        a.entry == b.entry
            && a.block_order == b.block_order
            && a.blocks().zip(b.blocks()).all(|(x, y)| x == y)
            && a.instructions.len() == b.instructions.len()
            && a
                .instructions
                .iter()
                .all(|(tag, named)| b.instructions.get(tag).is_some_and(|other| other == named))
    }
}

impl fmt::Debug for FlowGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl fmt::Display for FlowGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "entry: {}", self.entry)?;
        for block in self.blocks() {
            let parameters: Vec<String> = block
                .parameters()
                .iter()
                .map(|p| format!("{}: {}", p.tag(), p.parameter_type()))
                .collect();
            writeln!(f, "{}({}):", block.tag(), parameters.join(", "))?;
            for tag in block.instructions() {
                if let Some(named) = self.instruction(tag) {
                    writeln!(f, "    {} = {}", tag, named.instruction())?;
                }
            }
            writeln!(f, "    {}", block.flow())?;
        }
        Ok(())
    }
}
