//! Copy propagation and redundant block parameter elimination.
//!
//! Uses of copies are redirected to the copied value, and block parameters that can only
//! ever hold one value are replaced by that value. Block parameters play the role of phi
//! nodes, with the branch arguments as their operands.
//!
//! # Example
//!
//! Before:
//! ```text
//! entry(x):
//!   y = copy x
//!   jump loop(y)
//! loop(p):
//!   switch copy c [true -> loop(p)] else -> exit
//! exit:
//!   return p
//! ```
//!
//! After:
//! ```text
//! entry(x):
//!   y = copy x        // left for dead value elimination
//!   jump loop()
//! loop:
//!   switch copy c [true -> loop()] else -> exit
//! exit:
//!   return x
//! ```
//!
//! # Algorithm
//!
//! Follows Braun et al., "Simple and Efficient Construction of Static Single Assignment
//! Form" (CC 2013):
//!
//! 1. Copies map to their source. A store yields the value it stores, so its result maps
//!    to the stored value as well
//! 2. A parameter is trivial when, ignoring references to itself, all of its operands
//!    resolve to the same value. Trivial parameters are replaced and their users re-checked
//!    from a worklist
//! 3. The remaining parameters are split into strongly connected components of the
//!    operand graph. A component with exactly one operand from outside the component is
//!    redundant as a whole; otherwise the search recurses into the parameters whose
//!    operands all lie inside it
//!
//! Parameters of the entry block and parameters fed by a try flow's result or exception
//! are never candidates.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::{
    analysis::ValueUsesAnalysis,
    compiler::{passes::utils::EntryConstants, EventKind, EventLog, IntraproceduralOptimization},
    ir::{BasicBlockTag, BranchArgument, Constant, FlowGraph, Type, ValueTag},
    utils::graph::{algorithms::strongly_connected_components, IndexedGraph},
};

/// Replacement of a value: `Some(v)` for another value, `None` for "never defined on any
/// path", which happens for parameters that only ever receive themselves.
type Replacements = HashMap<ValueTag, Option<ValueTag>>;

/// Propagates copies and removes redundant block parameters.
pub struct CopyPropagation;

impl Default for CopyPropagation {
    fn default() -> Self {
        Self::new()
    }
}

impl CopyPropagation {
    /// Creates a new copy propagation transform.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

fn resolve(map: &Replacements, value: &ValueTag) -> Option<ValueTag> {
    let mut current = value.clone();
    for _ in 0..=map.len() {
        match map.get(&current) {
            None => return Some(current),
            Some(None) => return None,
            Some(Some(next)) if *next == current => return Some(current),
            Some(Some(next)) => current = next.clone(),
        }
    }
    Some(current)
}

struct PhiSimplifier {
    /// Operands of every candidate parameter, one per incoming branch.
    operands: HashMap<ValueTag, Vec<ValueTag>>,
    replacements: Replacements,
}

impl PhiSimplifier {
    fn new(graph: &FlowGraph) -> Self {
        let mut replacements = Replacements::new();
        for named in graph.named_instructions() {
            let instruction = named.instruction();
            let source = instruction.copy_source().or_else(|| instruction.store_value());
            if let Some(source) = source {
                replacements.insert(named.tag().clone(), Some(source.clone()));
            }
        }

        let mut operands: HashMap<ValueTag, Vec<ValueTag>> = HashMap::new();
        let mut excluded: HashSet<ValueTag> = HashSet::new();
        for block in graph.blocks() {
            if block.tag() == graph.entry_point() {
                excluded.extend(block.parameter_tags().cloned());
            }
            for parameter in block.parameter_tags() {
                operands.entry(parameter.clone()).or_default();
            }
        }
        for block in graph.blocks() {
            for branch in block.flow().branches() {
                let Some(target) = graph.block(branch.target()) else {
                    continue;
                };
                for (parameter, argument) in target.parameter_tags().zip(branch.arguments()) {
                    match argument {
                        BranchArgument::Value(value) => {
                            operands.entry(parameter.clone()).or_default().push(value.clone());
                        }
                        BranchArgument::TryResult | BranchArgument::TryException => {
                            excluded.insert(parameter.clone());
                        }
                    }
                }
            }
        }
        operands.retain(|parameter, _| !excluded.contains(parameter));

        Self {
            operands,
            replacements,
        }
    }

    /// The single value `parameter` can hold, if it is trivial.
    ///
    /// `Some(None)` means no operand defines it at all.
    fn trivial_value(&self, parameter: &ValueTag) -> Option<Option<ValueTag>> {
        let mut same: Option<ValueTag> = None;
        for operand in self.operands.get(parameter)? {
            let Some(resolved) = resolve(&self.replacements, operand) else {
                continue;
            };
            if resolved == *parameter || same.as_ref() == Some(&resolved) {
                continue;
            }
            if same.is_some() {
                return None;
            }
            same = Some(resolved);
        }
        Some(same)
    }

    fn remove_trivial(&mut self) {
        let mut users: HashMap<ValueTag, Vec<ValueTag>> = HashMap::new();
        for (parameter, operands) in &self.operands {
            for operand in operands {
                if let Some(resolved) = resolve(&self.replacements, operand) {
                    users.entry(resolved).or_default().push(parameter.clone());
                }
            }
        }

        let mut candidates: Vec<&ValueTag> = self.operands.keys().collect();
        candidates.sort();
        let mut worklist: VecDeque<ValueTag> = candidates.into_iter().cloned().collect();
        while let Some(parameter) = worklist.pop_front() {
            if self.replacements.contains_key(&parameter) {
                continue;
            }
            let Some(value) = self.trivial_value(&parameter) else {
                continue;
            };
            self.replacements.insert(parameter.clone(), value);
            if let Some(dependents) = users.get(&parameter) {
                worklist.extend(dependents.iter().filter(|p| **p != parameter).cloned());
            }
        }
    }

    /// Strongly connected groups of `parameters`, following operands that stay inside them.
    fn components(&self, parameters: &[ValueTag]) -> Vec<Vec<ValueTag>> {
        let members: HashSet<&ValueTag> = parameters.iter().collect();
        let mut dependencies: IndexedGraph<ValueTag> = IndexedGraph::new();
        for parameter in parameters {
            dependencies.add_node(parameter.clone());
        }
        for parameter in parameters {
            for operand in self.operands.get(parameter).into_iter().flatten() {
                if let Some(resolved) = resolve(&self.replacements, operand) {
                    if members.contains(&resolved) {
                        dependencies.add_edge(parameter.clone(), resolved);
                    }
                }
            }
        }
        strongly_connected_components(&dependencies)
            .iter()
            .map(|component| dependencies.resolve(component))
            .collect()
    }

    /// Replaces whole groups of parameters that only pass one outside value around.
    ///
    /// A group fed by several outside values is searched again without the members that
    /// take outside values, so nested loops are handled innermost last.
    fn remove_redundant_components(&mut self, parameters: &[ValueTag]) {
        let mut pending = self.components(parameters);
        pending.reverse();
        while let Some(component) = pending.pop() {
            if component.iter().any(|p| self.replacements.contains_key(p)) {
                continue;
            }
            let inside: HashSet<&ValueTag> = component.iter().collect();
            let mut outside: Vec<ValueTag> = Vec::new();
            let mut inner: Vec<ValueTag> = Vec::new();
            for parameter in &component {
                let mut is_inner = true;
                for operand in self.operands.get(parameter).into_iter().flatten() {
                    let Some(resolved) = resolve(&self.replacements, operand) else {
                        continue;
                    };
                    if inside.contains(&resolved) {
                        continue;
                    }
                    is_inner = false;
                    if !outside.contains(&resolved) {
                        outside.push(resolved);
                    }
                }
                if is_inner {
                    inner.push(parameter.clone());
                }
            }

            match outside.as_slice() {
                [] => {
                    for parameter in &component {
                        self.replacements.insert(parameter.clone(), None);
                    }
                }
                [value] => {
                    for parameter in &component {
                        self.replacements.insert(parameter.clone(), Some(value.clone()));
                    }
                }
                _ if inner.len() < component.len() && !inner.is_empty() => {
                    let mut nested = self.components(&inner);
                    nested.reverse();
                    pending.extend(nested);
                }
                _ => {}
            }
        }
    }

    fn eliminated_parameters(&self) -> Vec<ValueTag> {
        let mut eliminated: Vec<ValueTag> = self
            .operands
            .keys()
            .filter(|p| self.replacements.contains_key(*p))
            .cloned()
            .collect();
        eliminated.sort();
        eliminated
    }
}

impl IntraproceduralOptimization for CopyPropagation {
    fn name(&self) -> &'static str {
        "copy-propagation"
    }

    fn description(&self) -> &'static str {
        "Redirects uses of copies to their source and removes redundant block parameters"
    }

    fn apply(&self, graph: &FlowGraph, log: &EventLog) -> FlowGraph {
        let mut simplifier = PhiSimplifier::new(graph);
        simplifier.remove_trivial();
        let mut remaining: Vec<ValueTag> = simplifier
            .operands
            .keys()
            .filter(|p| !simplifier.replacements.contains_key(*p))
            .cloned()
            .collect();
        remaining.sort();
        simplifier.remove_redundant_components(&remaining);

        let uses = graph.get_analysis::<ValueUsesAnalysis>();
        let mut resolved: Vec<(ValueTag, Option<ValueTag>)> = simplifier
            .replacements
            .keys()
            .filter(|value| uses.is_used(value))
            .map(|value| (value.clone(), resolve(&simplifier.replacements, value)))
            .filter(|(value, target)| target.as_ref() != Some(value))
            .collect();
        resolved.sort_by(|a, b| a.0.cmp(&b.0));
        let eliminated = simplifier.eliminated_parameters();

        if resolved.is_empty() && eliminated.is_empty() {
            return graph.clone();
        }

        let mut builder = graph.to_builder();
        let mut literals = EntryConstants::new(&builder);
        let mut replacements: HashMap<ValueTag, ValueTag> = HashMap::new();
        for (value, target) in resolved {
            let target = match target {
                Some(target) => target,
                None => {
                    let ty = builder.value_type(&value).unwrap_or(Type::Void);
                    literals.get(&mut builder, Constant::Default, &ty)
                }
            };
            if graph.is_instruction(&value) {
                log.record(EventKind::CopyPropagated)
                    .value(&value)
                    .message(format!("{value} -> {target}"))
                    .pass(self.name());
            }
            replacements.insert(value, target);
        }
        builder.replace_uses(&replacements);

        let mut by_block: HashMap<BasicBlockTag, HashSet<ValueTag>> = HashMap::new();
        for parameter in &eliminated {
            if let Some(block) = graph.defining_block(parameter) {
                by_block.entry(block.clone()).or_default().insert(parameter.clone());
            }
        }
        let mut blocks: Vec<&BasicBlockTag> = by_block.keys().collect();
        blocks.sort();
        for block in blocks {
            builder.remove_parameters(block, &by_block[block]);
        }
        for parameter in &eliminated {
            log.record(EventKind::PhiEliminated)
                .value(parameter)
                .pass(self.name());
        }
        builder.to_immutable()
    }
}
