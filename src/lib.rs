// Copyright 2025 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![deny(missing_docs)]
#![deny(unsafe_code)]
#![allow(clippy::too_many_arguments)]

//! # flowscope
//!
//! An optimizing middle-end for programs in SSA form. Methods are represented as flow
//! graphs of basic blocks; blocks take parameters instead of phi nodes, and every
//! instruction that produces a value is named by a unique tag. A catalog of transforms
//! rewrites those graphs into cheaper, equivalent ones.
//!
//! ## Features
//!
//! - **Persistent flow graphs** - immutable graphs share structure with the builders they
//!   came from, so forking and discarding an edit is cheap
//! - **Cached analyses** - dominators, uses, value numbering, memory SSA and more are
//!   computed on demand and memoized per graph instance
//! - **Transform catalog** - value, memory and control flow simplifications, switch
//!   lowering, scalar replacement of aggregates, and inlining
//! - **Parallel pipelines** - a [`compiler::Pipeline`] optimizes many methods at once
//!   against a shared [`compiler::OptimizationState`]
//! - **Change log** - every transform records what it changed in an
//!   [`compiler::EventLog`]
//!
//! ## Quick Start
//!
//! ```rust
//! use flowscope::prelude::*;
//!
//! let int = Type::Int(IntegerSpec::I32);
//! let mut builder = FlowGraphBuilder::new();
//! let entry = builder.entry_point().clone();
//! let x = builder.append_parameter(&entry, int.clone(), "x");
//! let zero = builder.append_instruction(&entry, Instruction::constant(Constant::i32(0), int.clone()), "zero");
//! let sum = builder.append_instruction(
//!     &entry,
//!     Instruction::arith(ArithOp::Add, int.clone(), vec![x, zero]),
//!     "sum",
//! );
//! builder.set_flow(&entry, BlockFlow::return_value(int, sum));
//! let graph = builder.to_immutable();
//!
//! let optimized = ConstantPropagation::new().run(&graph);
//! optimized.validate()?;
//! # Ok::<(), flowscope::Error>(())
//! ```
//!
//! ## Architecture
//!
//! - [`ir`] - types, instructions, flows, blocks, flow graphs and their builder
//! - [`analysis`] - analyses over flow graphs plus a small dataflow framework
//! - [`compiler`] - transforms, the pipeline that orders them, and shared state
//! - [`utils`] - graph algorithms used by the analyses
//!
//! ## Error Handling
//!
//! Transforms never fail on well-formed input. Fallible operations return [`Result`]:
//! validating a graph, and fetching callee bodies through a
//! [`compiler::BodyProvider`].

#[macro_use]
pub(crate) mod error;

/// Shared functionality used by the unit tests.
#[cfg(test)]
pub(crate) mod test;

/// Convenient re-exports of the most commonly used types and traits.
///
/// # Example
///
/// ```rust
/// use flowscope::prelude::*;
///
/// let pipeline = Pipeline::from_config(&OptimizerConfig::default());
/// assert!(!pipeline.is_empty());
/// ```
pub mod prelude;

/// The intermediate representation: types, instructions, block flows, flow graphs.
pub mod ir;

/// Analyses over flow graphs.
pub mod analysis;

/// Transforms and the machinery that runs them.
pub mod compiler;

/// Graph algorithms shared by the analyses.
pub mod utils;

/// `flowscope` Result type
///
/// A type alias for [`std::result::Result<T, Error>`] where the error type is always [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// `flowscope` Error type
///
/// Every fallible operation in the crate reports one of these variants.
pub use error::Error;
