//! The transform catalog.
//!
//! Every transform here implements [`crate::compiler::IntraproceduralOptimization`] except
//! [`Inlining`], which needs callee bodies and therefore implements
//! [`crate::compiler::Optimization`].
//!
//! | Transform | Rewrites |
//! |-----------|----------|
//! | [`ConstantPropagation`] | values and switches with statically known outcomes |
//! | [`CopyPropagation`] | copies and redundant block parameters |
//! | [`DeadValueElimination`] | values nothing observable depends on |
//! | [`DeadBlockElimination`] | blocks unreachable from the entry |
//! | [`BlockFusion`] | single-successor/single-predecessor block pairs |
//! | [`RegisterForwarding`] | cross-block uses into explicit block parameters |
//! | [`JumpThreading`] | branches to trivial blocks and avoidable try flows |
//! | [`ScalarReplacement`] | non-escaping aggregates into per-field slots |
//! | [`PartialScalarReplacement`] | aggregates that escape late, up to the escape point |
//! | [`SwitchLowering`] | switches into back-end friendly forms |
//! | [`GlobalValueNumbering`] | recomputations of dominating values |
//! | [`MemoryAccessElimination`] | loads with known values and dead stores |
//! | [`ReassociateOperators`] | operator chains with foldable constants |
//! | [`InstructionReordering`] | instruction order within blocks |
//! | [`BoxToAlloca`] | boxes that never escape |
//! | [`SwitchSimplification`] | switch scrutinees with simpler equivalents |

mod boxing;
mod constprop;
mod copying;
mod deadcode;
mod forwarding;
mod fusion;
mod gvn;
mod inlining;
mod memory;
mod partial;
mod reassociate;
mod reorder;
mod scalar;
mod switches;
mod switchsimplify;
mod threading;
mod utils;

pub use boxing::BoxToAlloca;
pub use constprop::{ConstantEvaluator, ConstantPropagation};
pub use copying::CopyPropagation;
pub use deadcode::{DeadBlockElimination, DeadValueElimination};
pub use forwarding::RegisterForwarding;
pub use fusion::BlockFusion;
pub use gvn::GlobalValueNumbering;
pub use inlining::Inlining;
pub use memory::MemoryAccessElimination;
pub use partial::PartialScalarReplacement;
pub use reassociate::ReassociateOperators;
pub use reorder::InstructionReordering;
pub use scalar::ScalarReplacement;
pub use switches::SwitchLowering;
pub use switchsimplify::SwitchSimplification;
pub use threading::JumpThreading;
