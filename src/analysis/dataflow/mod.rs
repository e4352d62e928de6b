//! Data flow analysis framework.
//!
//! This module provides two generic forward solvers over [`crate::ir::FlowGraph`]s:
//!
//! - [`LatticeSolver`] - sparse, per-value analyses ([`LatticeAnalysis`]) that discover
//!   reachable blocks while they propagate, used by constant propagation
//! - [`solve_block_fixpoint`] - dense, per-block analyses ([`BlockFixpointAnalysis`]) used
//!   for memory state and aggregate materialization
//!
//! Both are built on [`MeetSemiLattice`].
//!
//! # Thread Safety
//!
//! Solvers are single-threaded; their results are plain data and can be shared freely.

mod fixpoint;
mod lattice;
mod lattice_analysis;

pub use fixpoint::{solve_block_fixpoint, BlockFixpointAnalysis, BlockFixpointResult};
pub use lattice::MeetSemiLattice;
pub use lattice_analysis::{LatticeAnalysis, LatticeCells, LatticeResult, LatticeSolver};
