//! Optimizer configuration.
//!
//! Configuration is plain data, organized per concern:
//!
//! - [`OptimizerConfig`] - top-level container
//! - [`InliningConfig`] - the inliner's cost/gain model
//! - [`SwitchLoweringConfig`] - which lowered switch shapes are allowed and when
//! - [`PipelineConfig`] - iteration limits of [`crate::compiler::Pipeline`]
//!
//! Heuristic settings only ever affect code quality, never correctness.
//!
//! # Example
//!
//! ```rust
//! use flowscope::compiler::{InliningConfig, OptimizerConfig};
//!
//! let config = OptimizerConfig {
//!     inlining: InliningConfig {
//!         allow_cross_module: true,
//!         ..Default::default()
//!     },
//!     ..Default::default()
//! };
//! assert_eq!(config.inlining.base_gain, 10);
//! ```

/// Top-level optimizer configuration.
#[derive(Debug, Clone, Default)]
pub struct OptimizerConfig {
    /// Settings for the inliner.
    pub inlining: InliningConfig,

    /// Settings for switch lowering.
    pub switch_lowering: SwitchLoweringConfig,

    /// Settings for the pipeline driver.
    pub pipeline: PipelineConfig,
}

/// The inliner's cost/gain model.
///
/// The cost of inlining a call is the callee's instruction count plus its block count.
/// The gain is `base_gain`, plus for every argument its estimated size divided by
/// `size_bonus_divisor` (or `alloca_argument_bonus` for arguments produced by `alloca`),
/// plus the estimated size of the return type divided by `size_bonus_divisor`. A call is
/// inlined when the gain is at least the cost.
#[derive(Debug, Clone)]
pub struct InliningConfig {
    /// Constant part of the gain.
    pub base_gain: usize,

    /// Flat gain for every argument defined by an `alloca`.
    ///
    /// Inlining such a call removes a level of indirection.
    pub alloca_argument_bonus: usize,

    /// Divisor applied to estimated type sizes when computing the per-argument and
    /// return-type gain.
    pub size_bonus_divisor: usize,

    /// Whether a callee defined in another module may be inlined.
    ///
    /// Disabled by default so callers never bind to another module's implementation
    /// details.
    pub allow_cross_module: bool,

    /// Callees costlier than this are never inlined, regardless of gain.
    pub max_callee_cost: usize,
}

impl Default for InliningConfig {
    fn default() -> Self {
        Self {
            base_gain: 10,
            alloca_argument_bonus: 8,
            size_bonus_divisor: 8,
            allow_cross_module: false,
            max_callee_cost: 256,
        }
    }
}

/// Settings for switch lowering.
#[derive(Debug, Clone)]
pub struct SwitchLoweringConfig {
    /// Whether dense switches over a small span may become bit tests.
    pub allow_bit_tests: bool,

    /// Whether dense switches may become jump tables.
    pub allow_jump_tables: bool,

    /// Minimum ratio of distinct case values to value span for a jump table.
    pub jump_table_min_density: f64,

    /// Bit tests are only used when the value span is below this.
    pub bit_test_max_span: u32,

    /// Switches with at most this many distinct values become test cascades.
    pub max_cascade_values: usize,
}

impl Default for SwitchLoweringConfig {
    fn default() -> Self {
        Self {
            allow_bit_tests: true,
            allow_jump_tables: true,
            jump_table_min_density: 0.4,
            bit_test_max_span: 64,
            max_cascade_values: 3,
        }
    }
}

/// Settings for [`crate::compiler::Pipeline`].
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Maximum number of passes over the whole catalog when iterating to a fixpoint.
    pub max_iterations: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self { max_iterations: 10 }
    }
}
