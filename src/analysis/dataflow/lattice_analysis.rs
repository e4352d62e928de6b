//! Sparse forward lattice analyses over SSA values.
//!
//! A [`LatticeAnalysis`] assigns a lattice cell to every SSA value. The [`LatticeSolver`]
//! computes the fixpoint over values and reachable blocks simultaneously, in the style of
//! Wegman & Zadeck: a block only contributes once some live branch reaches it, and a block
//! parameter only meets the arguments of live incoming edges. Values defined in blocks that
//! never become live keep their Top cell.
//!
//! # Algorithm
//!
//! 1. The entry block is live; its parameters start at [`LatticeAnalysis::entry_parameter`]
//! 2. Processing a live block re-evaluates its instructions in order, then asks the
//!    analysis which branches of its flow are live
//! 3. Newly live edges make their target live and feed its parameters
//! 4. Whenever a cell drops, every live block that uses the value is re-queued
//!
//! Cells only ever move down (each update is met with the previous cell), so the solver
//! terminates for any lattice of finite height.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::{
    analysis::dataflow::MeetSemiLattice,
    ir::{BasicBlockTag, BlockFlow, BlockParameter, BranchArgument, FlowGraph, Instruction, ValueTag},
};

/// The current cell of every value; values never assigned read as Top.
#[derive(Debug, Clone)]
pub struct LatticeCells<C> {
    top: C,
    cells: HashMap<ValueTag, C>,
}

impl<C: MeetSemiLattice> LatticeCells<C> {
    fn new(top: C) -> Self {
        Self {
            top,
            cells: HashMap::new(),
        }
    }

    /// The cell of a value.
    #[must_use]
    pub fn get(&self, value: &ValueTag) -> C {
        self.cells.get(value).cloned().unwrap_or_else(|| self.top.clone())
    }

    /// The cells of an instruction's arguments.
    #[must_use]
    pub fn arguments(&self, instruction: &Instruction) -> Vec<C> {
        instruction.arguments().iter().map(|arg| self.get(arg)).collect()
    }

    /// Lowers the cell of `value` to `cell ∧ current`, returning true if it changed.
    fn lower(&mut self, value: &ValueTag, cell: &C) -> bool {
        let current = self.get(value);
        let lowered = current.meet(cell);
        if lowered == current {
            return false;
        }
        self.cells.insert(value.clone(), lowered);
        true
    }
}

/// A sparse forward analysis over SSA values.
pub trait LatticeAnalysis {
    /// The abstract value tracked per SSA value.
    type Cell: MeetSemiLattice;

    /// The greatest element: "not evaluated yet".
    fn top(&self) -> Self::Cell;

    /// The least element: "any value".
    fn bottom(&self) -> Self::Cell;

    /// The cell of a parameter of the entry block. Defaults to Bottom, since method
    /// arguments are unknown.
    fn entry_parameter(&self, _parameter: &BlockParameter) -> Self::Cell {
        self.bottom()
    }

    /// Evaluates an instruction given the cells of its arguments.
    fn evaluate(&self, instruction: &Instruction, arguments: &[Self::Cell], graph: &FlowGraph)
        -> Self::Cell;

    /// Indices (in [`BlockFlow::branches`] order) of the branches that may be taken.
    ///
    /// The default treats every branch as live.
    fn live_branches(
        &self,
        flow: &BlockFlow,
        _cells: &LatticeCells<Self::Cell>,
        _graph: &FlowGraph,
    ) -> Vec<usize> {
        (0..flow.branches().len()).collect()
    }
}

/// The fixpoint computed by a [`LatticeSolver`].
#[derive(Debug, Clone)]
pub struct LatticeResult<C> {
    cells: LatticeCells<C>,
    live_blocks: HashSet<BasicBlockTag>,
    live_edges: HashSet<(BasicBlockTag, usize)>,
}

impl<C: MeetSemiLattice> LatticeResult<C> {
    /// The final cell of a value.
    #[must_use]
    pub fn cell(&self, value: &ValueTag) -> C {
        self.cells.get(value)
    }

    /// All final cells.
    #[must_use]
    pub fn cells(&self) -> &LatticeCells<C> {
        &self.cells
    }

    /// True if some live branch reaches `block` (or it is the entry).
    #[must_use]
    pub fn is_live(&self, block: &BasicBlockTag) -> bool {
        self.live_blocks.contains(block)
    }

    /// True if branch `index` of `block`'s flow may be taken.
    #[must_use]
    pub fn is_edge_live(&self, block: &BasicBlockTag, index: usize) -> bool {
        self.live_edges.contains(&(block.clone(), index))
    }

    /// The live blocks.
    #[must_use]
    pub fn live_blocks(&self) -> &HashSet<BasicBlockTag> {
        &self.live_blocks
    }
}

/// Worklist solver for [`LatticeAnalysis`] implementations.
pub struct LatticeSolver<'a, A: LatticeAnalysis> {
    analysis: &'a A,
    graph: &'a FlowGraph,
    cells: LatticeCells<A::Cell>,
    live_blocks: HashSet<BasicBlockTag>,
    live_edges: HashSet<(BasicBlockTag, usize)>,
    incoming: HashMap<BasicBlockTag, Vec<(BasicBlockTag, usize)>>,
    users: HashMap<ValueTag, Vec<BasicBlockTag>>,
    worklist: VecDeque<BasicBlockTag>,
    queued: HashSet<BasicBlockTag>,
    iterations: usize,
}

impl<'a, A: LatticeAnalysis> LatticeSolver<'a, A> {
    /// Creates a solver for `analysis` over `graph`.
    #[must_use]
    pub fn new(analysis: &'a A, graph: &'a FlowGraph) -> Self {
        let mut incoming: HashMap<BasicBlockTag, Vec<(BasicBlockTag, usize)>> = HashMap::new();
        let mut users: HashMap<ValueTag, Vec<BasicBlockTag>> = HashMap::new();
        for block in graph.blocks() {
            for (index, branch) in block.flow().branches().into_iter().enumerate() {
                incoming
                    .entry(branch.target().clone())
                    .or_default()
                    .push((block.tag().clone(), index));
            }
            for tag in block.instructions() {
                if let Some(named) = graph.instruction(tag) {
                    for argument in named.instruction().arguments() {
                        users.entry(argument.clone()).or_default().push(block.tag().clone());
                    }
                }
            }
            for value in block.flow().used_values() {
                users.entry(value).or_default().push(block.tag().clone());
            }
        }

        Self {
            analysis,
            graph,
            cells: LatticeCells::new(analysis.top()),
            live_blocks: HashSet::new(),
            live_edges: HashSet::new(),
            incoming,
            users,
            worklist: VecDeque::new(),
            queued: HashSet::new(),
            iterations: 0,
        }
    }

    /// Number of block visits performed so far.
    #[must_use]
    pub const fn iterations(&self) -> usize {
        self.iterations
    }

    /// Runs the analysis to its fixpoint.
    #[must_use]
    pub fn solve(mut self) -> LatticeResult<A::Cell> {
        let graph = self.graph;
        let entry = graph.entry_point().clone();
        if let Some(block) = graph.block(&entry) {
            for parameter in block.parameters() {
                let cell = self.analysis.entry_parameter(parameter);
                self.cells.lower(parameter.tag(), &cell);
            }
            self.live_blocks.insert(entry.clone());
            self.enqueue(&entry);
        }

        while let Some(tag) = self.worklist.pop_front() {
            self.queued.remove(&tag);
            self.iterations += 1;
            self.process(&tag);
        }

        LatticeResult {
            cells: self.cells,
            live_blocks: self.live_blocks,
            live_edges: self.live_edges,
        }
    }

    fn enqueue(&mut self, block: &BasicBlockTag) {
        if self.queued.insert(block.clone()) {
            self.worklist.push_back(block.clone());
        }
    }

    fn notify(&mut self, value: &ValueTag) {
        let Some(users) = self.users.get(value) else {
            return;
        };
        let live: Vec<BasicBlockTag> = users
            .iter()
            .filter(|block| self.live_blocks.contains(*block))
            .cloned()
            .collect();
        for block in live {
            self.enqueue(&block);
        }
    }

    fn process(&mut self, tag: &BasicBlockTag) {
        let graph = self.graph;
        let Some(block) = graph.block(tag) else {
            return;
        };

        for value in block.instructions() {
            let Some(named) = graph.instruction(value) else {
                continue;
            };
            let arguments = self.cells.arguments(named.instruction());
            let cell = self.analysis.evaluate(named.instruction(), &arguments, graph);
            if self.cells.lower(value, &cell) {
                self.notify(value);
            }
        }

        let flow = block.flow();
        let branches = flow.branches();
        for index in self.analysis.live_branches(flow, &self.cells, graph) {
            let Some(branch) = branches.get(index) else {
                continue;
            };
            self.live_edges.insert((tag.clone(), index));
            let target = branch.target().clone();
            if self.live_blocks.insert(target.clone()) {
                self.enqueue(&target);
            }
            self.update_parameters(&target);
        }
    }

    /// Meets the arguments of every live edge into `target` into its parameters.
    fn update_parameters(&mut self, target: &BasicBlockTag) {
        let graph = self.graph;
        let Some(block) = graph.block(target) else {
            return;
        };
        let incoming = self.incoming.get(target).cloned().unwrap_or_default();
        for (position, parameter) in block.parameters().iter().enumerate() {
            let mut cell = self.analysis.top();
            for (source, index) in &incoming {
                if !self.live_edges.contains(&(source.clone(), *index)) {
                    continue;
                }
                let Some(flow) = graph.block(source).map(|b| b.flow()) else {
                    continue;
                };
                let Some(argument) = flow
                    .branches()
                    .get(*index)
                    .and_then(|branch| branch.arguments().get(position))
                    .cloned()
                else {
                    continue;
                };
                cell = cell.meet(&self.argument_cell(flow, &argument));
            }
            if self.cells.lower(parameter.tag(), &cell) {
                self.notify(parameter.tag());
                self.enqueue(target);
            }
        }
    }

    fn argument_cell(&self, flow: &BlockFlow, argument: &BranchArgument) -> A::Cell {
        match (argument, flow) {
            (BranchArgument::Value(value), _) => self.cells.get(value),
            (BranchArgument::TryResult, BlockFlow::Try(try_flow)) => {
                let instruction = try_flow.instruction();
                let arguments = self.cells.arguments(instruction);
                self.analysis.evaluate(instruction, &arguments, self.graph)
            }
            _ => self.analysis.bottom(),
        }
    }
}
