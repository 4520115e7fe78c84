//! Error types for linsolve

use thiserror::Error;

use crate::backend::BackendError;

pub type Result<T> = std::result::Result<T, SolverError>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SolverError {
    /// Malformed or unsupported sparsity pattern. The solver stays reusable.
    #[error("Structural error: {0}")]
    Structural(String),

    #[error("solve called before a successful analyze_pattern")]
    NotAnalyzed,

    /// The backend rejected matrix construction or factorization.
    #[error("Backend assembly error: {0}")]
    BackendAssembly(String),

    /// Iteration budget exhausted. The approximate solution and diagnostics
    /// are left in place.
    #[error(
        "did not converge after {iterations} iterations (residual={residual:.3e}, tol={tolerance:.3e})"
    )]
    ConvergenceFailure {
        iterations: usize,
        residual: f64,
        tolerance: f64,
    },

    #[error("Dimension mismatch: expected length {expected}, found {found}")]
    DimensionMismatch { expected: usize, found: usize },

    #[error("Unknown solver: {0}")]
    UnknownSolver(String),
}

impl SolverError {
    pub fn is_convergence_failure(&self) -> bool {
        matches!(self, SolverError::ConvergenceFailure { .. })
    }
}

impl From<BackendError> for SolverError {
    fn from(err: BackendError) -> Self {
        SolverError::BackendAssembly(err.0)
    }
}
