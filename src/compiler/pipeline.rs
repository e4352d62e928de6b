//! An ordered list of transforms.
//!
//! [`Pipeline`] is a convenience for running transforms in sequence. It does not decide
//! which transforms are worth running; callers either assemble their own list or start
//! from [`Pipeline::from_config`], which provides a sensible default order.
//!
//! A pipeline can run its list once ([`Pipeline::optimize`]) or repeat it until the body
//! stops changing ([`Pipeline::optimize_to_fixpoint`]). Independent methods can be
//! optimized in parallel with [`Pipeline::optimize_all`].

use std::sync::Arc;

use rayon::prelude::*;

use crate::{
    compiler::{
        passes::{
            BlockFusion, BoxToAlloca, ConstantPropagation, CopyPropagation,
            DeadBlockElimination, DeadValueElimination, GlobalValueNumbering, Inlining,
            InstructionReordering, JumpThreading, MemoryAccessElimination,
            PartialScalarReplacement, ReassociateOperators, SwitchLowering,
            SwitchSimplification,
        },
        Checkpoint, Intraprocedural, IntraproceduralOptimization, Optimization,
        OptimizationState, OptimizerConfig,
    },
    ir::{MethodBody, MethodRef},
    Result,
};

/// An ordered list of transforms.
#[derive(Clone)]
pub struct Pipeline {
    transforms: Vec<Arc<dyn Optimization>>,
    max_iterations: usize,
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl Pipeline {
    /// Creates an empty pipeline.
    #[must_use]
    pub fn new() -> Self {
        Self {
            transforms: Vec::new(),
            max_iterations: OptimizerConfig::default().pipeline.max_iterations,
        }
    }

    /// The default catalog, configured from `config`.
    ///
    /// Cleanups follow every transform that tends to leave dead values or trivial block
    /// parameters behind. Switch lowering runs late, after jump threading has had the
    /// chance to merge switches, and the list ends in a [`Checkpoint`].
    #[must_use]
    pub fn from_config(config: &OptimizerConfig) -> Self {
        Self::new()
            .with_max_iterations(config.pipeline.max_iterations)
            .then_intraprocedural(SwitchSimplification::new())
            .then_intraprocedural(ConstantPropagation::new())
            .then_intraprocedural(CopyPropagation::new())
            .then_intraprocedural(DeadValueElimination::new())
            .then_intraprocedural(DeadBlockElimination::new())
            .then_intraprocedural(BoxToAlloca::new())
            .then(Inlining::with_config(config.inlining.clone()))
            .then_intraprocedural(PartialScalarReplacement::new())
            .then_intraprocedural(MemoryAccessElimination::new())
            .then_intraprocedural(CopyPropagation::new())
            .then_intraprocedural(GlobalValueNumbering::new())
            .then_intraprocedural(ReassociateOperators::new())
            .then_intraprocedural(ConstantPropagation::new())
            .then_intraprocedural(CopyPropagation::new())
            .then_intraprocedural(DeadValueElimination::new())
            .then_intraprocedural(JumpThreading::new())
            .then_intraprocedural(BlockFusion::new())
            .then_intraprocedural(DeadBlockElimination::new())
            .then_intraprocedural(SwitchLowering::with_config(config.switch_lowering.clone()))
            .then_intraprocedural(InstructionReordering::new())
            .then(Checkpoint)
    }

    /// Sets the iteration cap of [`Pipeline::optimize_to_fixpoint`].
    #[must_use]
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations.max(1);
        self
    }

    /// Appends a transform.
    #[must_use]
    pub fn then(mut self, transform: impl Optimization + 'static) -> Self {
        self.transforms.push(Arc::new(transform));
        self
    }

    /// Appends an intraprocedural transform.
    #[must_use]
    pub fn then_intraprocedural(
        self,
        transform: impl IntraproceduralOptimization + 'static,
    ) -> Self {
        self.then(Intraprocedural(transform))
    }

    /// Number of transforms.
    #[must_use]
    pub fn len(&self) -> usize {
        self.transforms.len()
    }

    /// True if the pipeline holds no transforms.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.transforms.is_empty()
    }

    /// Transform names, in order.
    #[must_use]
    pub fn names(&self) -> Vec<&'static str> {
        self.transforms.iter().map(|t| t.name()).collect()
    }

    /// Runs every transform once, in order.
    ///
    /// # Errors
    ///
    /// Propagates the first error returned by a transform.
    pub fn optimize(
        &self,
        method: &MethodRef,
        body: &MethodBody,
        state: &OptimizationState,
    ) -> Result<MethodBody> {
        let mut current = body.clone();
        for transform in &self.transforms {
            current = transform.apply(method, &current, state)?;
        }
        Ok(current)
    }

    /// Repeats [`Pipeline::optimize`] until a round leaves the body structurally unchanged,
    /// or the iteration cap is hit.
    ///
    /// # Errors
    ///
    /// Propagates the first error returned by a transform.
    pub fn optimize_to_fixpoint(
        &self,
        method: &MethodRef,
        body: &MethodBody,
        state: &OptimizationState,
    ) -> Result<MethodBody> {
        let mut current = body.clone();
        for iteration in 0..self.max_iterations {
            let next = self.optimize(method, &current, state)?;
            if next == current {
                state
                    .events()
                    .info(format!("{method} reached a fixpoint after {} rounds", iteration + 1));
                return Ok(next);
            }
            current = next;
        }
        state.events().warn(format!(
            "{method} did not reach a fixpoint within {} rounds",
            self.max_iterations
        ));
        Ok(current)
    }

    /// Optimizes independent methods in parallel, each to its fixpoint.
    ///
    /// Results are returned in input order.
    ///
    /// # Errors
    ///
    /// Propagates the first error returned for any method.
    pub fn optimize_all(
        &self,
        methods: &[(MethodRef, MethodBody)],
        state: &OptimizationState,
    ) -> Result<Vec<(MethodRef, MethodBody)>> {
        methods
            .par_iter()
            .map(|(method, body)| {
                self.optimize_to_fixpoint(method, body, state)
                    .map(|optimized| (method.clone(), optimized))
            })
            .collect()
    }
}
