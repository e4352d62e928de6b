//! Optimization framework and transform catalog.
//!
//! This module sits on top of the IR and the analyses:
//!
//! - [`crate::ir`] - flow graphs, instructions and the builder used to edit them
//! - [`crate::analysis`] - cached analyses transforms request on demand
//! - [`compiler`](self) - the transforms themselves and the plumbing to run them
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                      Optimization Framework                      │
//! ├──────────────────────────────────────────────────────────────────┤
//! │                                                                  │
//! │  IntraproceduralOptimization   FlowGraph -> FlowGraph            │
//! │    └─ Intraprocedural<T>       lifts it to a method transform    │
//! │                                                                  │
//! │  Optimization                  MethodBody -> Result<MethodBody>  │
//! │    ├─ Inlining                 fetches callee bodies             │
//! │    └─ Checkpoint               publishes the current body        │
//! │                                                                  │
//! │  OptimizationState             shared across methods             │
//! │    ├─ BodyProvider             supplies callee bodies            │
//! │    ├─ body cache               one fetch per callee              │
//! │    └─ EventLog                 what every transform changed      │
//! │                                                                  │
//! │  Pipeline                      ordered list, optional fixpoint   │
//! │                                                                  │
//! │  Transforms (17)                                                 │
//! │    ├─ Values: constant/copy propagation, GVN, reassociation      │
//! │    ├─ Memory: scalar replacement, load/store elimination, boxes  │
//! │    ├─ Control: threading, fusion, switch lowering/simplification │
//! │    ├─ Cleanup: dead values, dead blocks, reordering              │
//! │    └─ Interprocedural: inlining                                  │
//! │                                                                  │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```rust
//! use flowscope::compiler::{CopyPropagation, IntraproceduralOptimization};
//! use flowscope::ir::{BlockFlow, FlowGraphBuilder, Instruction, IntegerSpec, Type};
//!
//! let int = Type::Int(IntegerSpec::I32);
//! let mut builder = FlowGraphBuilder::new();
//! let entry = builder.entry_point().clone();
//! let x = builder.append_parameter(&entry, int.clone(), "x");
//! let y = builder.append_instruction(&entry, Instruction::copy(int.clone(), x.clone()), "y");
//! builder.set_flow(&entry, BlockFlow::return_value(int, y));
//!
//! let optimized = CopyPropagation::new().run(&builder.to_immutable());
//! assert!(optimized.validate().is_ok());
//! ```

mod config;
mod events;
mod pass;
mod passes;
mod pipeline;
mod state;

pub use config::{InliningConfig, OptimizerConfig, PipelineConfig, SwitchLoweringConfig};
pub use events::{Event, EventBuilder, EventKind, EventLog};
pub use pass::{Checkpoint, Intraprocedural, IntraproceduralOptimization, Optimization};
pub use passes::{
    BlockFusion, BoxToAlloca, ConstantEvaluator, ConstantPropagation, CopyPropagation,
    DeadBlockElimination, DeadValueElimination, GlobalValueNumbering, Inlining,
    InstructionReordering, JumpThreading, MemoryAccessElimination, PartialScalarReplacement,
    ReassociateOperators, RegisterForwarding, ScalarReplacement, SwitchLowering,
    SwitchSimplification,
};
pub use pipeline::Pipeline;
pub use state::{BodyProvider, BodyRequest, OptimizationState};
