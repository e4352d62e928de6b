//! Opaque identifiers for SSA values and basic blocks.
//!
//! Every value and block in a [`crate::ir::FlowGraph`] is named by a tag that pairs a
//! human-readable name with a process-wide unique ordinal. Tags are never reused: removing
//! a value from a graph and creating a new one with the same name yields a distinct tag, so
//! stale references can never silently alias a newer definition.
//!
//! Tags are cheap to clone (the name is reference counted) and hash on the ordinal only.

use std::{
    fmt,
    hash::{Hash, Hasher},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

static NEXT_ORDINAL: AtomicU64 = AtomicU64::new(1);

fn next_ordinal() -> u64 {
    NEXT_ORDINAL.fetch_add(1, Ordering::Relaxed)
}

macro_rules! define_tag {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone)]
        pub struct $name {
            name: Arc<str>,
            ordinal: u64,
        }

        impl $name {
            /// Creates a fresh tag with the given name and a new, never-reused ordinal.
            #[must_use]
            pub fn new(name: impl AsRef<str>) -> Self {
                Self {
                    name: Arc::from(name.as_ref()),
                    ordinal: next_ordinal(),
                }
            }

            /// Returns the human-readable part of the tag.
            #[must_use]
            pub fn name(&self) -> &str {
                &self.name
            }

            /// Returns the disambiguating ordinal of the tag.
            #[must_use]
            pub fn ordinal(&self) -> u64 {
                self.ordinal
            }
        }

        impl PartialEq for $name {
            fn eq(&self, other: &Self) -> bool {
                self.ordinal == other.ordinal
            }
        }

        impl Eq for $name {}

        impl Hash for $name {
            fn hash<H: Hasher>(&self, state: &mut H) {
                self.ordinal.hash(state);
            }
        }

        impl PartialOrd for $name {
            fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
                Some(self.cmp(other))
            }
        }

        impl Ord for $name {
            fn cmp(&self, other: &Self) -> std::cmp::Ordering {
                self.ordinal.cmp(&other.ordinal)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}_{}", self.name, self.ordinal)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self)
            }
        }
    };
}

define_tag!(
    /// Identifies an SSA value: the result of a named instruction or a block parameter.
    ValueTag
);

define_tag!(
    /// Identifies a basic block within a flow graph.
    BasicBlockTag
);
