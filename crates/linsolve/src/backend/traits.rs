//! Backend contract for Krylov solvers.
//!
//! The adapter layer only ever talks to a backend through [`KrylovBackend`]:
//! push parameters, run setup on an assembled matrix, iterate, read back the
//! iteration count and residual. Everything behind that call boundary is the
//! backend's business.

use serde::{Deserialize, Serialize};

use super::par_csr::ParCsrMatrix;
use crate::config::{
    DEFAULT_DIMENSION, DEFAULT_GMRES_RESTART, DEFAULT_MAX_ITERATIONS, DEFAULT_PRE_MAX_ITERATIONS,
    DEFAULT_TOLERANCE,
};

/// Error type for backend operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendError(pub String);

impl std::fmt::Display for BackendError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for BackendError {}

impl From<String> for BackendError {
    fn from(s: String) -> Self {
        BackendError(s)
    }
}

impl From<&str> for BackendError {
    fn from(s: &str) -> Self {
        BackendError(s.to_string())
    }
}

/// Krylov subspace methods provided by the native backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KrylovMethod {
    /// Conjugate Gradient (SPD systems)
    CG,
    /// Restarted Generalized Minimal Residual (general systems)
    GMRES,
    /// Biconjugate Gradient Stabilized (general systems)
    BiCGSTAB,
}

impl Default for KrylovMethod {
    fn default() -> Self {
        KrylovMethod::GMRES
    }
}

impl KrylovMethod {
    /// Solver name under which the factory exposes this method.
    pub fn solver_name(&self) -> &'static str {
        match self {
            KrylovMethod::CG => "CG",
            KrylovMethod::GMRES => "GMRES",
            KrylovMethod::BiCGSTAB => "BiCGSTAB",
        }
    }
}

/// Preconditioner built during backend setup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PreconditionerKind {
    /// No preconditioner
    None,
    /// Point Jacobi (diagonal scaling), ignores the block dimension
    Jacobi,
    /// Block Jacobi with blocks of `dimension` unknowns
    BlockJacobi,
}

impl Default for PreconditionerKind {
    fn default() -> Self {
        PreconditionerKind::BlockJacobi
    }
}

impl PreconditionerKind {
    pub fn name(&self) -> &'static str {
        match self {
            PreconditionerKind::None => "none",
            PreconditionerKind::Jacobi => "jacobi",
            PreconditionerKind::BlockJacobi => "block_jacobi",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "none" | "identity" => Some(PreconditionerKind::None),
            "jacobi" => Some(PreconditionerKind::Jacobi),
            "block_jacobi" | "bjacobi" => Some(PreconditionerKind::BlockJacobi),
            _ => None,
        }
    }
}

/// Parameter set pushed to the backend before every solve.
#[derive(Debug, Clone, PartialEq)]
pub struct KrylovParams {
    /// Unknowns per node; blocks of this size are kept together by the
    /// preconditioner
    pub dimension: usize,
    /// Hard cap on Krylov iterations (always at least 1)
    pub max_iterations: usize,
    /// Stationary sweeps of the preconditioner per application
    pub pre_max_iterations: usize,
    /// Relative residual threshold ||b - Ax|| / ||b||
    pub tolerance: f64,
    /// GMRES restart length
    pub restart: usize,
    pub preconditioner: PreconditionerKind,
}

impl Default for KrylovParams {
    fn default() -> Self {
        Self {
            dimension: DEFAULT_DIMENSION,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            pre_max_iterations: DEFAULT_PRE_MAX_ITERATIONS,
            tolerance: DEFAULT_TOLERANCE,
            restart: DEFAULT_GMRES_RESTART,
            preconditioner: PreconditionerKind::default(),
        }
    }
}

/// Termination status reported by a backend solve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KrylovStatus {
    Converged,
    /// Iteration cap reached before meeting the tolerance
    MaxIterations,
    /// The recurrence broke down (zero pivot, non-finite value)
    Breakdown,
}

impl KrylovStatus {
    pub fn is_converged(&self) -> bool {
        matches!(self, KrylovStatus::Converged)
    }
}

/// What a backend hands back after iterating.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KrylovOutcome {
    pub status: KrylovStatus,
    pub iterations: usize,
    /// Final relative residual norm as computed by the backend
    pub relative_residual: f64,
}

/// Narrow contract every Krylov backend satisfies.
///
/// The caller guarantees `setup` has been run on `matrix` before `solve` is
/// called with it. `x` carries the initial guess in and the best available
/// approximation out, whatever the returned status.
pub trait KrylovBackend: Send {
    fn method(&self) -> KrylovMethod;

    fn set_params(&mut self, params: &KrylovParams);

    /// Per-matrix preparation (preconditioner construction).
    fn setup(&mut self, matrix: &ParCsrMatrix) -> Result<(), BackendError>;

    /// Iterate until convergence or until `max_iterations` is exhausted.
    fn solve(&mut self, matrix: &ParCsrMatrix, b: &[f64], x: &mut [f64]) -> KrylovOutcome;
}
