//! Helpers shared by several transforms.

use std::collections::HashMap;

use crate::ir::{BasicBlockTag, Constant, FlowGraphBuilder, Instruction, Type, ValueTag};

/// Follows `map` from `value` until reaching a value that is not a key.
///
/// Cycles stop at the first repeated value.
pub fn resolve_chain(map: &HashMap<ValueTag, ValueTag>, value: &ValueTag) -> ValueTag {
    let mut current = value;
    let mut steps = 0;
    while let Some(next) = map.get(current) {
        if next == value || steps > map.len() {
            break;
        }
        current = next;
        steps += 1;
    }
    current.clone()
}

/// Flattens every chain in `map` so it can be applied in a single pass.
pub fn flatten(map: &HashMap<ValueTag, ValueTag>) -> HashMap<ValueTag, ValueTag> {
    map.keys()
        .map(|key| (key.clone(), resolve_chain(map, key)))
        .filter(|(key, value)| key != value)
        .collect()
}

/// Literals materialized at the top of the entry block, one per `(constant, type)` pair.
pub struct EntryConstants {
    entry: BasicBlockTag,
    cache: HashMap<(Constant, Type), ValueTag>,
}

impl EntryConstants {
    pub fn new(builder: &FlowGraphBuilder) -> Self {
        Self {
            entry: builder.entry_point().clone(),
            cache: HashMap::new(),
        }
    }

    /// The tag of `constant` typed as `ty`, inserting it at index 0 on first request.
    pub fn get(&mut self, builder: &mut FlowGraphBuilder, constant: Constant, ty: &Type) -> ValueTag {
        let key = (constant, ty.clone());
        if let Some(tag) = self.cache.get(&key) {
            return tag.clone();
        }
        let tag = builder.insert_instruction(
            &self.entry,
            0,
            Instruction::constant(constant, ty.clone()),
            "const",
        );
        self.cache.insert(key, tag.clone());
        tag
    }
}
