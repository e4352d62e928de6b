//! Scalar replacement of aggregates.
//!
//! An `alloca` or `box` of a struct type is replaced by one `alloca` per instance field
//! when every use of it is one of:
//!
//! - a `get_field_pointer` of one of its fields, which becomes that field's slot
//! - a `store` of `default`, which becomes one default store per field
//! - a whole-value `load` or `store`, if every field is visible to any caller; these go
//!   through a temporary that is filled or drained field by field
//!
//! Any other use, including being passed along a branch, keeps the aggregate in memory.
//! The payload of a `box` is handled like a whole-value store right after allocation.
//! Copying one replaced aggregate into another (`store a, load b`) copies the fields
//! directly and never materializes the value, as long as the store follows the load in
//! the same block with no memory write in between. An allocation whose one whole-value access
//! would need a temporary, and which is otherwise only accessed field by field, already
//! looks like its own replacement and is left alone.
//!
//! Field slots of struct type are themselves replaced on the next round.
//!
//! # Example
//!
//! Before:
//! ```text
//! p  = alloca Point
//! px = get_field_pointer<x> p
//! store px, 1
//! py = get_field_pointer<y> p
//! v  = load py
//! ```
//!
//! After:
//! ```text
//! x = alloca i32
//! y = alloca i32
//! store x, 1
//! v = load y
//! ```

use std::collections::{HashMap, HashSet};

use crate::{
    analysis::{ValueUses, ValueUsesAnalysis},
    compiler::{EventKind, EventLog, IntraproceduralOptimization},
    ir::{
        Access, Constant, EffectFlags, FieldRef, FlowGraph, FlowGraphBuilder, GraphStore, Instruction,
        InstructionPrototype, Type, TypeRef, ValueTag,
    },
};

const MAX_ROUNDS: usize = 8;

/// Splits non-escaping struct allocations into per-field slots.
pub struct ScalarReplacement;

impl Default for ScalarReplacement {
    fn default() -> Self {
        Self::new()
    }
}

/// A struct-typed allocation.
pub(super) struct Aggregate {
    pub tag: ValueTag,
    pub def: TypeRef,
    pub fields: Vec<FieldRef>,
    /// The payload of a `box`.
    pub initial: Option<ValueTag>,
}

/// How an instruction uses an aggregate's address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum AggregateUse {
    Field(usize),
    DefaultStore,
    Load,
    Store,
}

impl Aggregate {
    /// The aggregate allocated by `tag`, if it allocates a struct with fields.
    pub fn allocated_by(graph: &GraphStore, tag: &ValueTag) -> Option<Self> {
        let instruction = graph.instruction(tag)?.instruction();
        let (element_type, initial) = match instruction.prototype() {
            InstructionPrototype::Alloca { element_type } => (element_type, None),
            InstructionPrototype::Box { element_type } => {
                (element_type, instruction.boxed_value().cloned())
            }
            _ => return None,
        };
        let def = element_type.as_struct()?.clone();
        let fields: Vec<FieldRef> = def.instance_fields().cloned().collect();
        if fields.is_empty() {
            return None;
        }
        Some(Self {
            tag: tag.clone(),
            def,
            fields,
            initial,
        })
    }

    pub fn ty(&self) -> Type {
        Type::Named(self.def.clone())
    }

    /// True if whole-value loads and stores may be split into field accesses.
    pub fn fields_visible(&self) -> bool {
        self.def.access() == Access::Public
            && self.fields.iter().all(|field| field.access() == Access::Public)
    }

    /// Classifies one instruction user; `None` means the use needs the aggregate in memory.
    pub fn classify(&self, graph: &GraphStore, user: &ValueTag) -> Option<AggregateUse> {
        let instruction = graph.instruction(user)?.instruction();
        if let Some((base, field)) = instruction.field_pointer() {
            if base != &self.tag {
                return None;
            }
            return self.def.instance_field_index(field).map(AggregateUse::Field);
        }
        if instruction.load_pointer() == Some(&self.tag) {
            return self.fields_visible().then_some(AggregateUse::Load);
        }
        if instruction.store_pointer() == Some(&self.tag) {
            let value = instruction.store_value()?;
            if value == &self.tag {
                return None;
            }
            if is_default(graph, value) {
                return Some(AggregateUse::DefaultStore);
            }
            return self.fields_visible().then_some(AggregateUse::Store);
        }
        None
    }

    /// The classified users if every use can be scalarized.
    fn scalar_uses(&self, graph: &GraphStore, uses: &ValueUses) -> Option<Vec<(ValueTag, AggregateUse)>> {
        if !uses.flow_users(&self.tag).is_empty() {
            return None;
        }
        if self.initial.as_ref().is_some_and(|init| !is_default(graph, init)) && !self.fields_visible() {
            return None;
        }
        uses.instruction_users(&self.tag)
            .iter()
            .map(|user| Some((user.clone(), self.classify(graph, user)?)))
            .collect()
    }
}

/// True if `value` is a literal `default`.
pub(super) fn is_default(graph: &GraphStore, value: &ValueTag) -> bool {
    graph
        .instruction(graph.resolve_copies(value))
        .and_then(|named| named.instruction().constant_value())
        .is_some_and(|constant| matches!(constant, Constant::Default))
}

/// One round of replacement over a snapshot of the graph.
struct Round<'a> {
    graph: &'a FlowGraph,
    builder: FlowGraphBuilder,
    slots: HashMap<ValueTag, Vec<ValueTag>>,
    /// Whole loads whose only users are stores into other replaced aggregates.
    forwarded: HashMap<ValueTag, ValueTag>,
    removed: HashSet<ValueTag>,
}

impl Round<'_> {
    fn store_fields(&mut self, anchor: &ValueTag, aggregate: &Aggregate, value: &ValueTag) {
        let Some(slots) = self.slots.get(&aggregate.tag).cloned() else {
            return;
        };
        if is_default(self.graph, value) {
            for (field, slot) in aggregate.fields.iter().zip(&slots) {
                let ty = field.field_type().clone();
                let zero = self
                    .builder
                    .insert_before(anchor, Instruction::default_value(ty.clone()), "zero");
                self.builder
                    .insert_before(anchor, Instruction::store(ty, slot.clone(), zero), "init");
            }
            return;
        }

        if let Some(source) = self.forwarded.get(value).and_then(|s| self.slots.get(s)).cloned() {
            for ((field, slot), from) in aggregate.fields.iter().zip(&slots).zip(&source) {
                let ty = field.field_type().clone();
                let loaded = self
                    .builder
                    .insert_before(anchor, Instruction::load(ty.clone(), from.clone()), field.name());
                self.builder
                    .insert_before(anchor, Instruction::store(ty, slot.clone(), loaded), "copy");
            }
            return;
        }

        let ty = aggregate.ty();
        let temporary = self
            .builder
            .insert_before(anchor, Instruction::alloca(ty.clone()), "spill");
        self.builder.insert_before(
            anchor,
            Instruction::store(ty, temporary.clone(), value.clone()),
            "spill",
        );
        for (field, slot) in aggregate.fields.iter().zip(&slots) {
            let ty = field.field_type().clone();
            let pointer = self.builder.insert_before(
                anchor,
                Instruction::get_field_pointer(field.clone(), temporary.clone()),
                field.name(),
            );
            let loaded = self
                .builder
                .insert_before(anchor, Instruction::load(ty.clone(), pointer), field.name());
            self.builder
                .insert_before(anchor, Instruction::store(ty, slot.clone(), loaded), "split");
        }
    }

    fn load_fields(&mut self, load: &ValueTag, aggregate: &Aggregate) {
        let Some(slots) = self.slots.get(&aggregate.tag).cloned() else {
            return;
        };
        let ty = aggregate.ty();
        let temporary = self
            .builder
            .insert_before(load, Instruction::alloca(ty.clone()), "gather");
        for (field, slot) in aggregate.fields.iter().zip(&slots) {
            let field_type = field.field_type().clone();
            let loaded = self
                .builder
                .insert_before(load, Instruction::load(field_type.clone(), slot.clone()), field.name());
            let pointer = self.builder.insert_before(
                load,
                Instruction::get_field_pointer(field.clone(), temporary.clone()),
                field.name(),
            );
            self.builder
                .insert_before(load, Instruction::store(field_type, pointer, loaded), "gather");
        }
        self.builder
            .replace_instruction(load, Instruction::load(ty, temporary));
    }
}

/// True if `store` follows `load` in the same block with nothing in between that may
/// write memory, so the fields read at the store still hold the loaded value.
fn unclobbered_between(graph: &GraphStore, load: &ValueTag, store: &ValueTag) -> bool {
    let (Some(loaded), Some(stored)) = (graph.instruction(load), graph.instruction(store)) else {
        return false;
    };
    if loaded.block() != stored.block() {
        return false;
    }
    let Some(block) = graph.block(loaded.block()) else {
        return false;
    };
    let (Some(from), Some(to)) = (block.instruction_index(load), block.instruction_index(store)) else {
        return false;
    };
    from < to
        && block.instructions()[from + 1..to].iter().all(|between| {
            graph.instruction(between).is_some_and(|n| {
                !n.instruction()
                    .prototype()
                    .effects()
                    .contains(EffectFlags::WRITES_MEMORY)
            })
        })
}

/// True if every user of the whole load `load` stores it into a replaced aggregate of the
/// same type, without using the store's result, before anything can overwrite the source.
fn feeds_only_replaced(
    graph: &GraphStore,
    uses: &ValueUses,
    load: &ValueTag,
    aggregates: &HashMap<ValueTag, Aggregate>,
    def: &TypeRef,
) -> bool {
    let users = uses.instruction_users(load);
    !users.is_empty()
        && uses.flow_users(load).is_empty()
        && users.iter().all(|user| {
            let Some(instruction) = graph.instruction(user).map(|n| n.instruction()) else {
                return false;
            };
            instruction.store_value() == Some(load)
                && !uses.is_used(user)
                && unclobbered_between(graph, load, user)
                && instruction
                    .store_pointer()
                    .and_then(|target| aggregates.get(target))
                    .is_some_and(|target| target.def.id() == def.id())
        })
}

/// Whole loads that can be copied field to field, mapped to the aggregate they read.
fn forwarded_loads(
    graph: &GraphStore,
    uses: &ValueUses,
    plans: &[(ValueTag, Vec<(ValueTag, AggregateUse)>)],
    aggregates: &HashMap<ValueTag, Aggregate>,
) -> HashMap<ValueTag, ValueTag> {
    let mut forwarded = HashMap::new();
    for (tag, users) in plans {
        let Some(aggregate) = aggregates.get(tag) else {
            continue;
        };
        for (user, kind) in users {
            if *kind == AggregateUse::Load && feeds_only_replaced(graph, uses, user, aggregates, &aggregate.def) {
                forwarded.insert(user.clone(), tag.clone());
            }
        }
    }
    forwarded
}

/// True if the aggregate has exactly one whole-value access that would need a temporary and
/// is otherwise only accessed field by field. Such an aggregate already has the shape its
/// replacement would take.
pub(super) fn already_minimal(
    graph: &GraphStore,
    users: &[(ValueTag, AggregateUse)],
    forwarded: &HashMap<ValueTag, ValueTag>,
) -> bool {
    let mut general = 0;
    for (user, kind) in users {
        match kind {
            AggregateUse::Field(_) => {}
            AggregateUse::DefaultStore => return false,
            AggregateUse::Load if forwarded.contains_key(user) => return false,
            AggregateUse::Load => general += 1,
            AggregateUse::Store => {
                let value = graph.instruction(user).and_then(|n| n.instruction().store_value());
                if value.is_some_and(|v| forwarded.contains_key(v)) {
                    return false;
                }
                general += 1;
            }
        }
    }
    general == 1
}

impl ScalarReplacement {
    /// Creates a new scalar replacement pass.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    fn round(&self, graph: &FlowGraph, log: &EventLog) -> Option<FlowGraph> {
        let uses = graph.get_analysis::<ValueUsesAnalysis>();
        let mut aggregates: HashMap<ValueTag, Aggregate> = HashMap::new();
        let mut plans: Vec<(ValueTag, Vec<(ValueTag, AggregateUse)>)> = Vec::new();
        for named in graph.named_instructions() {
            let Some(aggregate) = Aggregate::allocated_by(graph, named.tag()) else {
                continue;
            };
            let Some(users) = aggregate.scalar_uses(graph, &uses) else {
                continue;
            };
            plans.push((named.tag().clone(), users));
            aggregates.insert(named.tag().clone(), aggregate);
        }
        if plans.is_empty() {
            return None;
        }

        let mut forwarded = forwarded_loads(graph, &uses, &plans, &aggregates);
        loop {
            let before = plans.len();
            plans.retain(|(tag, users)| {
                let boxed = aggregates.get(tag).is_some_and(|a| a.initial.is_some());
                boxed || !already_minimal(graph, users, &forwarded)
            });
            if plans.len() == before {
                break;
            }
            aggregates.retain(|tag, _| plans.iter().any(|(kept, _)| kept == tag));
            forwarded = forwarded_loads(graph, &uses, &plans, &aggregates);
        }
        if plans.is_empty() {
            return None;
        }

        let mut round = Round {
            graph,
            builder: graph.to_builder(),
            slots: HashMap::new(),
            forwarded,
            removed: HashSet::new(),
        };

        for (tag, _) in &plans {
            let Some(aggregate) = aggregates.get(tag) else {
                continue;
            };
            let slots = aggregate
                .fields
                .iter()
                .map(|field| {
                    round
                        .builder
                        .insert_before(tag, Instruction::alloca(field.field_type().clone()), field.name())
                })
                .collect();
            round.slots.insert(tag.clone(), slots);
        }

        for (tag, users) in &plans {
            let Some(aggregate) = aggregates.get(tag) else {
                continue;
            };
            if let Some(initial) = &aggregate.initial {
                round.store_fields(tag, aggregate, initial);
            }
            for (user, kind) in users {
                match kind {
                    AggregateUse::Field(index) => {
                        let Some(slot) = round.slots.get(tag).and_then(|s| s.get(*index)).cloned() else {
                            continue;
                        };
                        round.builder.replace_all_uses(user, &slot);
                        round.removed.insert(user.clone());
                    }
                    AggregateUse::DefaultStore | AggregateUse::Store => {
                        let Some(value) = graph.instruction(user).and_then(|n| n.instruction().store_value()) else {
                            continue;
                        };
                        round.store_fields(user, aggregate, value);
                        if !round.forwarded.contains_key(value) {
                            round.builder.replace_all_uses(user, value);
                        }
                        round.removed.insert(user.clone());
                    }
                    AggregateUse::Load => {
                        if round.forwarded.contains_key(user) {
                            round.removed.insert(user.clone());
                        } else {
                            round.load_fields(user, aggregate);
                        }
                    }
                }
            }
            round.removed.insert(tag.clone());
            log.record(EventKind::AggregateScalarized)
                .value(tag)
                .message(format!("{} split into {} fields", aggregate.def.name(), aggregate.fields.len()))
                .pass(self.name());
        }

        let Round {
            mut builder, removed, ..
        } = round;
        builder.remove_instructions(removed.iter());
        Some(builder.to_immutable())
    }
}

impl IntraproceduralOptimization for ScalarReplacement {
    fn name(&self) -> &'static str {
        "scalar-replacement"
    }

    fn description(&self) -> &'static str {
        "Splits struct allocations that never escape into one slot per field"
    }

    fn apply(&self, graph: &FlowGraph, log: &EventLog) -> FlowGraph {
        let Some(mut current) = self.round(graph, log) else {
            return graph.clone();
        };
        for _ in 1..MAX_ROUNDS {
            match self.round(&current, log) {
                Some(next) => current = next,
                None => break,
            }
        }
        current
    }
}
