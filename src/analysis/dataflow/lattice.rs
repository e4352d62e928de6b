//! Lattice traits for data flow analysis.
//!
//! A lattice defines how abstract values combine at control flow join points. Every
//! forward analysis in this crate combines predecessor facts with [`MeetSemiLattice::meet`].
//!
//! # Lattice Theory Background
//!
//! - **Partial Order**: Elements can be compared (≤)
//! - **Meet (∧)**: Greatest lower bound of two elements
//! - **Top (⊤)**: Greatest element (no information yet)
//! - **Bottom (⊥)**: Least element (anything is possible)
//!
//! Solvers start optimistically from Top and only ever move cells downwards, so any
//! lattice of finite height guarantees termination.

use std::{collections::HashSet, fmt::Debug, hash::Hash};

/// A meet semi-lattice.
///
/// # Laws
///
/// - Idempotent: `a.meet(&a) == a`
/// - Commutative: `a.meet(&b) == b.meet(&a)`
/// - Associative: `a.meet(&b).meet(&c) == a.meet(&b.meet(&c))`
///
/// # Example
///
/// ```rust,ignore
/// #[derive(Clone, Debug, PartialEq)]
/// enum Sign { Top, Negative, Positive, Bottom }
///
/// impl MeetSemiLattice for Sign {
///     fn meet(&self, other: &Self) -> Self {
///         match (self, other) {
///             (Sign::Top, x) | (x, Sign::Top) => x.clone(),
///             (a, b) if a == b => a.clone(),
///             _ => Sign::Bottom,
///         }
///     }
///
///     fn is_bottom(&self) -> bool {
///         matches!(self, Sign::Bottom)
///     }
/// }
/// ```
pub trait MeetSemiLattice: Clone + Debug + PartialEq {
    /// Greatest lower bound of `self` and `other`.
    #[must_use]
    fn meet(&self, other: &Self) -> Self;

    /// True if this is the least element; meeting it with anything yields itself.
    fn is_bottom(&self) -> bool;
}

// Sets form a "may" lattice: facts that hold on any incoming path survive the meet.
impl<T> MeetSemiLattice for HashSet<T>
where
    T: Clone + Debug + Eq + Hash,
{
    fn meet(&self, other: &Self) -> Self {
        let mut result = self.clone();
        result.extend(other.iter().cloned());
        result
    }

    fn is_bottom(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_meet_is_union() {
        let a: HashSet<u32> = [1, 2].into_iter().collect();
        let b: HashSet<u32> = [2, 3].into_iter().collect();
        let met = a.meet(&b);
        assert_eq!(met.len(), 3);
        assert_eq!(met, b.meet(&a));
        assert_eq!(a.meet(&a), a);
    }
}
