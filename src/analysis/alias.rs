//! Alias analysis for pointer values.
//!
//! Every pointer is decomposed into a *root* and a *field path*: copies, casts and `unbox`
//! are looked through, and each `get_field_pointer` appends its field to the path. Two
//! pointers with the same root alias exactly when their paths agree; pointers with
//! different roots are only known not to alias when both roots are fresh allocations, or
//! when one of them is a local allocation whose address never escapes.

use std::collections::{HashMap, HashSet};

use crate::{
    analysis::{FlowGraphAnalysis, ValueUsesAnalysis},
    ir::{FieldRef, FlowGraph, GraphStore, Instruction, InstructionPrototype, ValueTag},
};

/// Result of an alias query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Alias {
    /// Both pointers always refer to the same location.
    MustAlias,
    /// The pointers never refer to overlapping locations.
    NoAlias,
    /// Nothing is known.
    MayAlias,
}

#[derive(Debug, Clone)]
struct PointerPath {
    root: ValueTag,
    fields: Vec<FieldRef>,
    reinterpreted: bool,
}

/// Computes [`AliasInfo`].
#[derive(Debug, Default, Clone, Copy)]
pub struct AliasAnalysis;

impl FlowGraphAnalysis for AliasAnalysis {
    type Output = AliasInfo;

    fn analyze(&self, graph: &FlowGraph) -> AliasInfo {
        let mut paths = HashMap::new();
        for named in graph.named_instructions() {
            paths.insert(named.tag().clone(), decompose(graph, named.tag()));
        }
        for block in graph.blocks() {
            for parameter in block.parameter_tags() {
                paths.insert(parameter.clone(), decompose(graph, parameter));
            }
        }

        let allocations: HashSet<ValueTag> = graph
            .named_instructions()
            .filter(|named| is_allocation(named.instruction().prototype()))
            .map(|named| named.tag().clone())
            .collect();

        let uses = graph.get_analysis::<ValueUsesAnalysis>();
        let mut escaping = HashSet::new();
        for (value, path) in &paths {
            if !allocations.contains(&path.root) || escaping.contains(&path.root) {
                continue;
            }
            if !uses.flow_users(value).is_empty() {
                escaping.insert(path.root.clone());
                continue;
            }
            let escapes = uses.instruction_users(value).iter().any(|user| {
                graph
                    .instruction(user)
                    .map_or(true, |named| escapes_through(named.instruction(), value))
            });
            if escapes {
                escaping.insert(path.root.clone());
            }
        }

        let local = allocations
            .iter()
            .filter(|root| !escaping.contains(*root))
            .filter(|root| {
                graph.instruction(root).is_some_and(|named| {
                    matches!(
                        named.instruction().prototype(),
                        InstructionPrototype::Alloca { .. } | InstructionPrototype::Box { .. }
                    )
                })
            })
            .cloned()
            .collect();

        AliasInfo {
            paths,
            allocations,
            local,
        }
    }
}

fn is_allocation(prototype: &InstructionPrototype) -> bool {
    matches!(
        prototype,
        InstructionPrototype::Alloca { .. }
            | InstructionPrototype::AllocaArray { .. }
            | InstructionPrototype::Box { .. }
            | InstructionPrototype::NewObject { .. }
    )
}

/// True if `user` lets the address held in `value` leave the set of tracked pointers.
fn escapes_through(user: &Instruction, value: &ValueTag) -> bool {
    match user.prototype() {
        InstructionPrototype::Load { .. }
        | InstructionPrototype::Copy { .. }
        | InstructionPrototype::ReinterpretCast { .. }
        | InstructionPrototype::GetFieldPointer { .. }
        | InstructionPrototype::Unbox { .. } => false,
        InstructionPrototype::Store { .. } => user.store_value() == Some(value),
        _ => true,
    }
}

fn decompose(graph: &GraphStore, value: &ValueTag) -> PointerPath {
    let mut current = value.clone();
    let mut fields = Vec::new();
    let mut reinterpreted = false;
    let mut steps = 0;
    while let Some(named) = graph.instruction(&current) {
        let instruction = named.instruction();
        let next = if let Some((base, field)) = instruction.field_pointer() {
            fields.push(field.clone());
            base
        } else if let Some(source) = instruction.cast_source() {
            reinterpreted = true;
            source
        } else if let Some(source) = instruction.copy_source().or(instruction.unboxed_value()) {
            source
        } else {
            break;
        };
        current = next.clone();
        steps += 1;
        if steps > graph.instruction_count() {
            break;
        }
    }
    fields.reverse();
    PointerPath {
        root: current,
        fields,
        reinterpreted,
    }
}

/// Pointer decompositions of one graph, answering alias queries.
#[derive(Debug, Clone)]
pub struct AliasInfo {
    paths: HashMap<ValueTag, PointerPath>,
    allocations: HashSet<ValueTag>,
    local: HashSet<ValueTag>,
}

impl AliasInfo {
    /// Classifies the pointer pair `(a, b)`.
    #[must_use]
    pub fn query(&self, a: &ValueTag, b: &ValueTag) -> Alias {
        if a == b {
            return Alias::MustAlias;
        }
        let (Some(left), Some(right)) = (self.paths.get(a), self.paths.get(b)) else {
            return Alias::MayAlias;
        };

        if left.root == right.root {
            if left.reinterpreted || right.reinterpreted {
                return Alias::MayAlias;
            }
            let diverges = left
                .fields
                .iter()
                .zip(&right.fields)
                .any(|(x, y)| x.id() != y.id());
            return if diverges {
                Alias::NoAlias
            } else if left.fields.len() == right.fields.len() {
                Alias::MustAlias
            } else {
                Alias::MayAlias
            };
        }

        let fresh = |root: &ValueTag| self.allocations.contains(root);
        if fresh(&left.root) && fresh(&right.root) {
            return Alias::NoAlias;
        }
        if self.local.contains(&left.root) || self.local.contains(&right.root) {
            return Alias::NoAlias;
        }
        Alias::MayAlias
    }

    /// True unless `a` and `b` are known not to overlap.
    #[must_use]
    pub fn may_alias(&self, a: &ValueTag, b: &ValueTag) -> bool {
        self.query(a, b) != Alias::NoAlias
    }

    /// The allocation or opaque value a pointer is derived from.
    #[must_use]
    pub fn root(&self, pointer: &ValueTag) -> Option<&ValueTag> {
        self.paths.get(pointer).map(|path| &path.root)
    }

    /// True if `pointer` is derived from a local allocation whose address never escapes.
    #[must_use]
    pub fn is_local(&self, pointer: &ValueTag) -> bool {
        self.root(pointer).is_some_and(|root| self.local.contains(root))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{
        Access, BlockFlow, FlowGraphBuilder, IntegerSpec, PointerKind, Type, TypeDef, TypeKind,
    };

    #[test]
    fn test_fields_and_roots() {
        let int = Type::Int(IntegerSpec::I32);
        let pair = TypeDef::new("Pair", "app", TypeKind::Struct, Access::Public);
        pair.define_public_fields(&[("a", int.clone()), ("b", int.clone())]);
        let fields: Vec<_> = pair.instance_fields().cloned().collect();
        let pair_type = Type::Named(pair.clone());

        let mut builder = FlowGraphBuilder::new();
        let entry = builder.entry_point().clone();
        let external = builder.append_parameter(&entry, Type::pointer(int.clone(), PointerKind::Reference), "p");
        let local = builder.append_instruction(&entry, Instruction::alloca(pair_type.clone()), "local");
        let a = builder.append_instruction(&entry, Instruction::get_field_pointer(fields[0].clone(), local.clone()), "a");
        let b = builder.append_instruction(&entry, Instruction::get_field_pointer(fields[1].clone(), local.clone()), "b");
        let a2 = builder.append_instruction(
            &entry,
            Instruction::copy(Type::pointer(int.clone(), PointerKind::Reference), a.clone()),
            "a2",
        );
        let escaped = builder.append_instruction(&entry, Instruction::alloca(int.clone()), "escaped");
        builder.set_flow(
            &entry,
            BlockFlow::return_value(Type::pointer(int, PointerKind::Transient), escaped.clone()),
        );
        let graph = builder.to_immutable();

        let alias = graph.get_analysis::<AliasAnalysis>();
        assert_eq!(alias.query(&a, &a2), Alias::MustAlias);
        assert_eq!(alias.query(&a, &b), Alias::NoAlias);
        assert_eq!(alias.query(&local, &a), Alias::MayAlias);
        assert_eq!(alias.query(&a, &external), Alias::NoAlias);
        assert_eq!(alias.query(&escaped, &external), Alias::MayAlias);
        assert_eq!(alias.query(&escaped, &local), Alias::NoAlias);
        assert!(alias.is_local(&a2));
        assert!(!alias.is_local(&escaped));
    }
}
