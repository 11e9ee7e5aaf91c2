//! Pipeline configuration.
//!
//! [`Config`] is an immutable value handed to the [`Remesher`](crate::pipeline::Remesher).
//! The four feature switches mirror the command-line flags; the remaining
//! fields are tuning knobs with defaults that work for typical inputs.
//!
//! # Example
//!
//! ```
//! use quadmesh::Config;
//!
//! let config = Config::default()
//!     .with_target_faces(2000)
//!     .with_preserve_sharp(true)
//!     .with_seed(7);
//! assert!(config.validate().is_ok());
//! ```

use crate::error::{QuadError, Result};

/// Options for the remeshing pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Keep sharp creases and boundaries as feature lines in the output.
    pub preserve_sharp: bool,

    /// Derive the scale field from curvature instead of using a uniform one.
    pub adaptive_scale: bool,

    /// Use min-cost flow (instead of plain max-flow) when removing
    /// singularities and redistributing position residuals.
    pub minimum_cost_flow: bool,

    /// Use the constraint-search repair strategy instead of flow rounds.
    pub aggressive_sat: bool,

    /// Desired number of output quads; `None` infers it from the input
    /// vertex count.
    pub target_faces: Option<usize>,

    /// Seed for random field initialization.
    pub seed: u64,

    /// Dihedral angle (degrees) above which an edge is considered sharp.
    pub sharp_angle_degrees: f64,

    /// Maximum Gauss-Seidel sweeps per hierarchy level for the orientation field.
    pub orientation_iterations: usize,

    /// Maximum Gauss-Seidel sweeps per hierarchy level for the position field.
    pub position_iterations: usize,

    /// Relative energy decrease below which a level is considered converged.
    pub convergence_threshold: f64,

    /// Smallest adaptive target length, as a fraction of the uniform one.
    pub min_scale_ratio: f64,

    /// Largest adaptive target length, as a multiple of the uniform one.
    pub max_scale_ratio: f64,

    /// Jacobi smoothing passes per level for the adaptive scale field.
    pub scale_smoothing_iterations: usize,

    /// Maximum collapse-and-reflow rounds of the flow repair.
    pub repair_rounds: usize,

    /// Maximum search nodes per region for the constraint repair.
    pub sat_search_budget: usize,

    /// Maximum region growth steps for the constraint repair.
    pub sat_max_rings: usize,

    /// Whether to use parallel execution (default: true).
    pub parallel: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            preserve_sharp: false,
            adaptive_scale: false,
            minimum_cost_flow: false,
            aggressive_sat: false,
            target_faces: None,
            seed: 0,
            sharp_angle_degrees: 60.0,
            orientation_iterations: 6,
            position_iterations: 6,
            convergence_threshold: 1e-3,
            min_scale_ratio: 0.25,
            max_scale_ratio: 4.0,
            scale_smoothing_iterations: 4,
            repair_rounds: 8,
            sat_search_budget: 20_000,
            sat_max_rings: 3,
            parallel: true,
        }
    }
}

impl Config {
    /// Set whether sharp features are preserved.
    pub fn with_preserve_sharp(mut self, preserve: bool) -> Self {
        self.preserve_sharp = preserve;
        self
    }

    /// Set whether the scale field adapts to curvature.
    pub fn with_adaptive_scale(mut self, adaptive: bool) -> Self {
        self.adaptive_scale = adaptive;
        self
    }

    /// Set whether min-cost flow is used.
    pub fn with_minimum_cost_flow(mut self, mcf: bool) -> Self {
        self.minimum_cost_flow = mcf;
        self
    }

    /// Set whether the constraint-search repair is used.
    pub fn with_aggressive_sat(mut self, sat: bool) -> Self {
        self.aggressive_sat = sat;
        self
    }

    /// Set the desired number of output quads.
    pub fn with_target_faces(mut self, faces: usize) -> Self {
        self.target_faces = Some(faces);
        self
    }

    /// Infer the number of output quads from the input.
    pub fn with_inferred_target(mut self) -> Self {
        self.target_faces = None;
        self
    }

    /// Set the random seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Set the sharp-edge dihedral threshold in degrees.
    pub fn with_sharp_angle(mut self, degrees: f64) -> Self {
        self.sharp_angle_degrees = degrees;
        self
    }

    /// Set the per-level sweep budgets of both field solvers.
    pub fn with_iterations(mut self, orientation: usize, position: usize) -> Self {
        self.orientation_iterations = orientation;
        self.position_iterations = position;
        self
    }

    /// Set the relative convergence threshold.
    pub fn with_convergence_threshold(mut self, threshold: f64) -> Self {
        self.convergence_threshold = threshold;
        self
    }

    /// Set the clamp range of the adaptive scale field.
    pub fn with_scale_ratio(mut self, min_ratio: f64, max_ratio: f64) -> Self {
        self.min_scale_ratio = min_ratio;
        self.max_scale_ratio = max_ratio;
        self
    }

    /// Set the number of flow repair rounds.
    pub fn with_repair_rounds(mut self, rounds: usize) -> Self {
        self.repair_rounds = rounds;
        self
    }

    /// Set whether to use parallel execution.
    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// Create options for single-threaded execution.
    pub fn sequential(mut self) -> Self {
        self.parallel = false;
        self
    }

    /// Check the tuning values for consistency.
    ///
    /// # Errors
    /// Returns [`QuadError::InvalidParameter`] naming the first bad value.
    pub fn validate(&self) -> Result<()> {
        if self.target_faces == Some(0) {
            return Err(QuadError::invalid_param("target_faces", 0, "must be positive"));
        }
        if !(self.sharp_angle_degrees > 0.0 && self.sharp_angle_degrees < 180.0) {
            return Err(QuadError::invalid_param(
                "sharp_angle_degrees",
                self.sharp_angle_degrees,
                "must be in (0, 180)",
            ));
        }
        if !(self.convergence_threshold >= 0.0 && self.convergence_threshold < 1.0) {
            return Err(QuadError::invalid_param(
                "convergence_threshold",
                self.convergence_threshold,
                "must be in [0, 1)",
            ));
        }
        if !(self.min_scale_ratio > 0.0 && self.min_scale_ratio <= 1.0) {
            return Err(QuadError::invalid_param(
                "min_scale_ratio",
                self.min_scale_ratio,
                "must be in (0, 1]",
            ));
        }
        if self.max_scale_ratio < 1.0 || !self.max_scale_ratio.is_finite() {
            return Err(QuadError::invalid_param(
                "max_scale_ratio",
                self.max_scale_ratio,
                "must be at least 1",
            ));
        }
        Ok(())
    }
}
