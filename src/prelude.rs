//! # flowscope Prelude
//!
//! The types most programs need to build flow graphs and optimize them. Import this module
//! to get the IR, the transform traits and the pipeline in one line.

// ================================================================================================
// Core Types and Error Handling
// ================================================================================================

/// The main error type for all flowscope operations
pub use crate::Error;

/// The result type used throughout flowscope
pub use crate::Result;

// ================================================================================================
// Intermediate Representation
// ================================================================================================

/// Types and the members declared on them
pub use crate::ir::{
    Access, FieldDef, FieldRef, IntegerSpec, MethodDef, MethodRef, PointerKind, Type, TypeDef,
    TypeKind, TypeRef,
};

/// Instructions and their operations
pub use crate::ir::{ArithOp, Constant, Instruction, InstructionPrototype, MethodLookup};

/// Block terminators
pub use crate::ir::{BlockFlow, Branch, BranchArgument, SwitchCase, SwitchFlow, TryFlow};

/// Flow graphs, their blocks and the builder used to edit them
pub use crate::ir::{
    BasicBlock, BasicBlockTag, FlowGraph, FlowGraphBuilder, MethodBody, ValueTag,
};

// ================================================================================================
// Optimization
// ================================================================================================

/// Transform traits and the pipeline that sequences them
pub use crate::compiler::{
    Intraprocedural, IntraproceduralOptimization, Optimization, OptimizerConfig, Pipeline,
};

/// Shared state and the collaborator that supplies callee bodies
pub use crate::compiler::{BodyProvider, EventKind, EventLog, OptimizationState};

/// The transform catalog
pub use crate::compiler::{
    BlockFusion, BoxToAlloca, ConstantPropagation, CopyPropagation, DeadBlockElimination,
    DeadValueElimination, GlobalValueNumbering, Inlining, InstructionReordering, JumpThreading,
    MemoryAccessElimination, PartialScalarReplacement, ReassociateOperators, RegisterForwarding,
    ScalarReplacement, SwitchLowering, SwitchSimplification,
};
