//! Solver configuration.
//!
//! Parameters arrive as a loose JSON mapping. Recognised keys are applied,
//! everything else is ignored, and out-of-range values are corrected rather
//! than rejected: configuration is advisory and must never make a solver
//! unusable.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{trace, warn};

use crate::backend::{KrylovParams, PreconditionerKind};

pub const DEFAULT_DIMENSION: usize = 1;
pub const DEFAULT_MAX_ITERATIONS: usize = 5000;
pub const DEFAULT_PRE_MAX_ITERATIONS: usize = 1;
pub const DEFAULT_TOLERANCE: f64 = 1e-4;
pub const DEFAULT_GMRES_RESTART: usize = 30;

/// Parameters of the iterative adapters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverConfig {
    /// 1 = scalar unknown per node, 2 or 3 = vector unknowns (elasticity)
    pub dimension: usize,
    #[serde(rename = "max_iter")]
    pub max_iterations: usize,
    /// Sweeps of the preconditioner per application
    #[serde(rename = "pre_max_iter")]
    pub pre_max_iterations: usize,
    /// Relative residual threshold
    #[serde(rename = "conv_tol", alias = "tolerance")]
    pub convergence_tolerance: f64,
    pub gmres_restart: usize,
    pub preconditioner: PreconditionerKind,
    /// Row partitions of the assembled backend matrix
    pub partitions: usize,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            dimension: DEFAULT_DIMENSION,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            pre_max_iterations: DEFAULT_PRE_MAX_ITERATIONS,
            convergence_tolerance: DEFAULT_TOLERANCE,
            gmres_restart: DEFAULT_GMRES_RESTART,
            preconditioner: PreconditionerKind::default(),
            partitions: 1,
        }
    }
}

impl SolverConfig {
    /// Apply a JSON parameter mapping on top of the current values.
    ///
    /// Unknown keys are skipped. `conv_tol` wins over its alias `tolerance`
    /// when both are present.
    pub fn apply_json(&mut self, params: &Value) {
        let Some(map) = params.as_object() else {
            if !params.is_null() {
                warn!("ignoring solver parameters that are not a JSON object");
            }
            return;
        };

        for (key, value) in map {
            match key.as_str() {
                "dimension" => set_count(&mut self.dimension, key, value),
                "max_iter" => set_count(&mut self.max_iterations, key, value),
                "pre_max_iter" => set_count(&mut self.pre_max_iterations, key, value),
                "gmres_restart" => set_count(&mut self.gmres_restart, key, value),
                "partitions" => set_count(&mut self.partitions, key, value),
                "preconditioner" => {
                    match value.as_str().and_then(PreconditionerKind::from_name) {
                        Some(kind) => self.preconditioner = kind,
                        None => warn!(%value, "unknown preconditioner, keeping {}", self.preconditioner.name()),
                    }
                }
                "conv_tol" | "tolerance" => {}
                _ => trace!(key = key.as_str(), "ignoring unrecognized solver parameter"),
            }
        }

        if let Some(value) = map.get("conv_tol").or_else(|| map.get("tolerance")) {
            set_tolerance(
                &mut self.convergence_tolerance,
                DEFAULT_TOLERANCE,
                "conv_tol",
                value,
            );
        }
    }

    /// Clamp every field into its valid range.
    pub fn sanitized(mut self) -> Self {
        self.dimension = self.dimension.max(1);
        self.max_iterations = self.max_iterations.max(1);
        self.pre_max_iterations = self.pre_max_iterations.max(1);
        self.gmres_restart = self.gmres_restart.max(1);
        self.partitions = self.partitions.max(1);
        if !(self.convergence_tolerance.is_finite() && self.convergence_tolerance > 0.0) {
            self.convergence_tolerance = DEFAULT_TOLERANCE;
        }
        self
    }

    /// Parameter set handed to the Krylov backend.
    pub fn krylov_params(&self) -> KrylovParams {
        KrylovParams {
            dimension: self.dimension,
            max_iterations: self.max_iterations,
            pre_max_iterations: self.pre_max_iterations,
            tolerance: self.convergence_tolerance,
            restart: self.gmres_restart,
            preconditioner: self.preconditioner,
        }
    }

    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Read a positive integer parameter; anything below 1 is clamped to 1.
pub(crate) fn set_count(target: &mut usize, key: &str, value: &Value) {
    let parsed = if let Some(u) = value.as_u64() {
        Some(u as usize)
    } else if let Some(i) = value.as_i64() {
        Some(i.max(0) as usize)
    } else {
        value
            .as_f64()
            .filter(|f| f.is_finite())
            .map(|f| f.round().max(0.0) as usize)
    };

    match parsed {
        Some(0) => {
            warn!(key, "parameter must be at least 1, clamping");
            *target = 1;
        }
        Some(v) => *target = v,
        None => warn!(key, %value, "ignoring parameter that is not a number"),
    }
}

/// Read a strictly positive tolerance; invalid values fall back to `default`.
pub(crate) fn set_tolerance(target: &mut f64, default: f64, key: &str, value: &Value) {
    match value.as_f64() {
        Some(tol) if tol.is_finite() && tol > 0.0 => *target = tol,
        Some(tol) => {
            warn!(key, tol, default, "tolerance must be positive, using default");
            *target = default;
        }
        None => warn!(key, %value, "ignoring tolerance that is not a number"),
    }
}
