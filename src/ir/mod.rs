//! The SSA intermediate representation.
//!
//! Programs are represented as [`FlowGraph`]s: control-flow graphs of [`BasicBlock`]s in
//! static single assignment form. Join points use block parameters instead of phi
//! instructions; every [`Branch`] binds the parameters of its target.
//!
//! # Key Components
//!
//! - [`FlowGraph`] - immutable, cheaply clonable graph with a per-instance analysis cache
//! - [`FlowGraphBuilder`] - copy-on-write editor producing new graphs
//! - [`Instruction`] / [`InstructionPrototype`] - operations and their effect declarations
//! - [`BlockFlow`] - block terminators (jump, switch, try, return, unreachable)
//! - [`MethodBody`] - a graph paired with the signature it implements
//! - [`Type`] and the descriptor model in [`types`]
//!
//! # Example
//!
//! ```rust
//! use flowscope::ir::{ArithOp, BlockFlow, FlowGraphBuilder, Instruction, IntegerSpec, Type};
//!
//! let int = Type::Int(IntegerSpec::I32);
//! let mut builder = FlowGraphBuilder::new();
//! let entry = builder.entry_point().clone();
//! let a = builder.append_parameter(&entry, int.clone(), "a");
//! let b = builder.append_parameter(&entry, int.clone(), "b");
//! let sum = builder.append_instruction(
//!     &entry,
//!     Instruction::arith(ArithOp::Add, int.clone(), vec![a, b]),
//!     "sum",
//! );
//! builder.set_flow(&entry, BlockFlow::return_value(int, sum));
//! assert!(builder.to_immutable().validate().is_ok());
//! ```

pub mod arith;
mod block;
mod body;
mod builder;
mod constant;
mod flow;
mod graph;
mod instruction;
mod prototype;
mod tags;
pub mod types;

pub use arith::evaluate_intrinsic;
pub use block::{BasicBlock, BlockParameter, NamedInstruction};
pub use body::{MethodBody, Parameter};
pub use builder::FlowGraphBuilder;
pub use constant::{Constant, IntegerConstant};
pub use flow::{BlockFlow, Branch, BranchArgument, SwitchCase, SwitchFlow, TryFlow};
pub use graph::{FlowGraph, GraphStore};
pub use instruction::Instruction;
pub use prototype::{
    ArithOp, EffectFlags, ExceptionSpec, InstructionPrototype, Intrinsic, MethodLookup,
};
pub use tags::{BasicBlockTag, ValueTag};
pub use types::{
    Access, AccessRules, FieldDef, FieldRef, IntegerSpec, Member, MethodDef, MethodRef,
    PointerKind, Type, TypeDef, TypeKind, TypeRef,
};
