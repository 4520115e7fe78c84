//! The solver lifecycle every variant implements.

use nalgebra::DVector;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, SolverError};
use crate::matrix::SparseMatrixView;

/// Outcome of the most recent solve.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Diagnostics {
    pub iterations: usize,
    pub final_residual_norm: f64,
    pub converged: bool,
}

impl Diagnostics {
    pub fn to_json(&self) -> Value {
        serde_json::json!({
            "iterations": self.iterations,
            "final_residual_norm": self.final_residual_norm,
            "converged": self.converged,
        })
    }
}

/// Uniform interface over direct, iterative and composite solvers.
///
/// Call order: `set_parameters` (optional, repeatable) → `analyze_pattern`
/// → `factorize` → `solve`, with `info` readable at any time. Analysis may be
/// repeated with a new matrix; everything derived from the previous one is
/// discarded.
pub trait LinearSolver: Send {
    /// Apply a JSON parameter mapping. Unknown keys are ignored and invalid
    /// values are corrected; this never fails.
    fn set_parameters(&mut self, params: &Value);

    /// Diagnostics of the last solve, zeroed before the first one.
    fn info(&self) -> Diagnostics;

    /// Validate `matrix` and build everything that depends on its structure.
    ///
    /// `precond_hint` is solver specific: the block split index for the
    /// saddle-point solver, unused elsewhere.
    fn analyze_pattern(&mut self, matrix: &SparseMatrixView, precond_hint: usize) -> Result<()>;

    /// Value-dependent preparation. Iterative solvers do nothing here.
    fn factorize(&mut self, matrix: &SparseMatrixView) -> Result<()>;

    /// Solve `A x = rhs` in place. On input `x` is the initial guess for
    /// iterative variants; on a convergence failure it holds the best
    /// approximation found.
    fn solve(&mut self, rhs: &DVector<f64>, x: &mut DVector<f64>) -> Result<()>;

    fn name(&self) -> &str;
}

/// Check that `rhs` and `x` both have length `n`.
pub(crate) fn check_lengths(n: usize, rhs: &DVector<f64>, x: &DVector<f64>) -> Result<()> {
    for found in [rhs.len(), x.len()] {
        if found != n {
            return Err(SolverError::DimensionMismatch { expected: n, found });
        }
    }
    Ok(())
}
