//! Solver selection by name.

use tracing::debug;

use crate::direct::{DenseLu, SparseCholesky};
use crate::error::{Result, SolverError};
use crate::iterative::IterativeSolver;
use crate::saddle_point::SaddlePointSolver;
use crate::traits::LinearSolver;

pub const GMRES: &str = "GMRES";
pub const CG: &str = "CG";
pub const BICGSTAB: &str = "BiCGSTAB";
pub const DENSE_LU: &str = "DenseLU";
pub const SPARSE_CHOLESKY: &str = "SparseCholesky";
pub const SADDLE_POINT: &str = "SaddlePoint";
#[cfg(feature = "lapack")]
pub const LAPACK_CHOLESKY: &str = "LapackCholesky";

/// Names accepted by [`create`], default first.
pub fn available_solvers() -> Vec<&'static str> {
    vec![
        SPARSE_CHOLESKY,
        DENSE_LU,
        GMRES,
        CG,
        BICGSTAB,
        SADDLE_POINT,
        #[cfg(feature = "lapack")]
        LAPACK_CHOLESKY,
    ]
}

pub fn default_solver() -> &'static str {
    SPARSE_CHOLESKY
}

/// Instantiate a solver by its case-sensitive name. The empty name selects
/// [`default_solver`].
pub fn create(name: &str) -> Result<Box<dyn LinearSolver>> {
    let name = if name.is_empty() { default_solver() } else { name };
    let solver: Box<dyn LinearSolver> = match name {
        GMRES => Box::new(IterativeSolver::gmres()),
        CG => Box::new(IterativeSolver::cg()),
        BICGSTAB => Box::new(IterativeSolver::bicgstab()),
        DENSE_LU => Box::new(DenseLu::new()),
        SPARSE_CHOLESKY => Box::new(SparseCholesky::new()),
        SADDLE_POINT => Box::new(SaddlePointSolver::new()),
        #[cfg(feature = "lapack")]
        LAPACK_CHOLESKY => Box::new(crate::direct::LapackCholesky::new()),
        other => return Err(SolverError::UnknownSolver(other.to_string())),
    };
    debug!(solver = name, "solver created");
    Ok(solver)
}
