//! Direct solvers.
//!
//! Unlike the iterative adapters these do real work in `factorize`: the
//! numeric factorization is computed there and reused by every subsequent
//! `solve`. If `solve` is reached without a factorization, one is computed
//! on the spot from the analyzed matrix.

use nalgebra::{DMatrix, DVector, Dyn, LU};
use nalgebra_sparse::factorization::{CscCholesky, CscSymbolicCholesky};
use nalgebra_sparse::pattern::SparsityPattern;
use serde_json::Value;
use tracing::{debug, trace};

use crate::error::{Result, SolverError};
use crate::matrix::SparseMatrixView;
use crate::traits::{check_lengths, Diagnostics, LinearSolver};

/// Relative asymmetry above which a matrix is refused by the Cholesky solvers.
const SYMMETRY_TOLERANCE: f64 = 1e-10;

fn converged_diagnostics(matrix: &SparseMatrixView, x: &DVector<f64>, b: &DVector<f64>) -> Diagnostics {
    let b_norm = b.norm();
    let residual = matrix.residual_norm(x, b);
    Diagnostics {
        iterations: 1,
        final_residual_norm: if b_norm > 0.0 { residual / b_norm } else { residual },
        converged: true,
    }
}

fn ensure_same_shape(analyzed: &SparseMatrixView, matrix: &SparseMatrixView) -> Result<()> {
    if analyzed.nrows() != matrix.nrows() || analyzed.ncols() != matrix.ncols() {
        return Err(SolverError::Structural(format!(
            "Matrix is {}x{} but {}x{} was analyzed",
            matrix.nrows(),
            matrix.ncols(),
            analyzed.nrows(),
            analyzed.ncols()
        )));
    }
    Ok(())
}

fn ensure_symmetric(matrix: &SparseMatrixView) -> Result<()> {
    let scale = matrix
        .triplet_iter()
        .map(|(_, _, v)| v.abs())
        .fold(0.0, f64::max);
    for (i, j, v) in matrix.triplet_iter() {
        if j > i && (v - matrix.get(j, i)).abs() > SYMMETRY_TOLERANCE * scale {
            return Err(SolverError::BackendAssembly(format!(
                "Cholesky needs a symmetric matrix, entry ({}, {}) differs from ({}, {})",
                i, j, j, i
            )));
        }
    }
    Ok(())
}

/// Dense LU with partial pivoting (nalgebra).
#[derive(Default)]
pub struct DenseLu {
    matrix: Option<SparseMatrixView>,
    lu: Option<LU<f64, Dyn, Dyn>>,
    diagnostics: Diagnostics,
}

impl DenseLu {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_factorized(&self) -> bool {
        self.lu.is_some()
    }
}

impl LinearSolver for DenseLu {
    fn set_parameters(&mut self, params: &Value) {
        trace!(solver = "DenseLU", %params, "direct solver has no parameters");
    }

    fn info(&self) -> Diagnostics {
        self.diagnostics
    }

    fn analyze_pattern(&mut self, matrix: &SparseMatrixView, _precond_hint: usize) -> Result<()> {
        self.matrix = None;
        self.lu = None;
        self.diagnostics = Diagnostics::default();
        matrix.ensure_solvable()?;
        self.matrix = Some(matrix.clone());
        Ok(())
    }

    fn factorize(&mut self, matrix: &SparseMatrixView) -> Result<()> {
        let Some(analyzed) = &self.matrix else {
            return Err(SolverError::NotAnalyzed);
        };
        ensure_same_shape(analyzed, matrix)?;

        self.lu = None;
        let lu = matrix.to_dense().lu();
        if !lu.is_invertible() {
            return Err(SolverError::BackendAssembly(
                "LU factorization failed: matrix is singular".into(),
            ));
        }
        debug!(n = matrix.nrows(), "dense LU factorized");
        self.lu = Some(lu);
        self.matrix = Some(matrix.clone());
        Ok(())
    }

    fn solve(&mut self, rhs: &DVector<f64>, x: &mut DVector<f64>) -> Result<()> {
        let Some(matrix) = self.matrix.clone() else {
            return Err(SolverError::NotAnalyzed);
        };
        check_lengths(matrix.nrows(), rhs, x)?;
        if self.lu.is_none() {
            self.factorize(&matrix)?;
        }
        let Some(lu) = &self.lu else {
            return Err(SolverError::NotAnalyzed);
        };

        let solution = lu
            .solve(rhs)
            .ok_or_else(|| SolverError::BackendAssembly("LU back-substitution failed".into()))?;
        x.copy_from(&solution);
        self.diagnostics = converged_diagnostics(&matrix, x, rhs);
        Ok(())
    }

    fn name(&self) -> &str {
        "DenseLU"
    }
}

/// Sparse Cholesky (nalgebra-sparse) for SPD matrices.
///
/// The elimination tree and the pattern of the factor are computed once in
/// `analyze_pattern`; `factorize` only redoes the numeric part, so matrices
/// that keep their sparsity pattern are cheap to refactorize.
#[derive(Default)]
pub struct SparseCholesky {
    matrix: Option<SparseMatrixView>,
    pattern: Option<SparsityPattern>,
    symbolic: Option<CscSymbolicCholesky>,
    factor: Option<CscCholesky<f64>>,
    diagnostics: Diagnostics,
}

impl SparseCholesky {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_factorized(&self) -> bool {
        self.factor.is_some()
    }
}

impl LinearSolver for SparseCholesky {
    fn set_parameters(&mut self, params: &Value) {
        trace!(solver = "SparseCholesky", %params, "direct solver has no parameters");
    }

    fn info(&self) -> Diagnostics {
        self.diagnostics
    }

    fn analyze_pattern(&mut self, matrix: &SparseMatrixView, _precond_hint: usize) -> Result<()> {
        self.matrix = None;
        self.pattern = None;
        self.symbolic = None;
        self.factor = None;
        self.diagnostics = Diagnostics::default();
        matrix.ensure_solvable()?;

        let pattern = matrix.to_csc().pattern().clone();
        self.symbolic = Some(CscSymbolicCholesky::factor(pattern.clone()));
        debug!(n = matrix.nrows(), nnz = matrix.nnz(), "symbolic Cholesky analysis done");
        self.pattern = Some(pattern);
        self.matrix = Some(matrix.clone());
        Ok(())
    }

    fn factorize(&mut self, matrix: &SparseMatrixView) -> Result<()> {
        let (Some(analyzed), Some(pattern)) = (&self.matrix, &self.pattern) else {
            return Err(SolverError::NotAnalyzed);
        };
        ensure_same_shape(analyzed, matrix)?;
        let csc = matrix.to_csc();
        if csc.pattern() != pattern {
            return Err(SolverError::Structural(
                "Sparsity pattern differs from the analyzed one".into(),
            ));
        }
        ensure_symmetric(matrix)?;

        let result = match self.factor.as_mut() {
            Some(factor) => factor.refactor(csc.values()),
            None => {
                let symbolic = self
                    .symbolic
                    .take()
                    .unwrap_or_else(|| CscSymbolicCholesky::factor(pattern.clone()));
                CscCholesky::factor_numerical(symbolic, csc.values()).map(|f| {
                    self.factor = Some(f);
                })
            }
        };
        if let Err(e) = result {
            self.factor = None;
            return Err(SolverError::BackendAssembly(format!(
                "Cholesky factorization failed: {:?}",
                e
            )));
        }

        debug!(n = matrix.nrows(), "sparse Cholesky factorized");
        self.matrix = Some(matrix.clone());
        Ok(())
    }

    fn solve(&mut self, rhs: &DVector<f64>, x: &mut DVector<f64>) -> Result<()> {
        let Some(matrix) = self.matrix.clone() else {
            return Err(SolverError::NotAnalyzed);
        };
        check_lengths(matrix.nrows(), rhs, x)?;
        if self.factor.is_none() {
            self.factorize(&matrix)?;
        }
        let Some(factor) = &self.factor else {
            return Err(SolverError::NotAnalyzed);
        };

        let b = DMatrix::from_column_slice(rhs.len(), 1, rhs.as_slice());
        let solution = factor.solve(&b);
        x.copy_from_slice(solution.as_slice());
        self.diagnostics = converged_diagnostics(&matrix, x, rhs);
        Ok(())
    }

    fn name(&self) -> &str {
        "SparseCholesky"
    }
}

/// Dense Cholesky through LAPACK (`potrf`/`potrs`).
#[cfg(feature = "lapack")]
#[derive(Default)]
pub struct LapackCholesky {
    matrix: Option<SparseMatrixView>,
    factor: Option<nalgebra_lapack::Cholesky<f64, Dyn>>,
    diagnostics: Diagnostics,
}

#[cfg(feature = "lapack")]
impl LapackCholesky {
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(feature = "lapack")]
impl LinearSolver for LapackCholesky {
    fn set_parameters(&mut self, params: &Value) {
        trace!(solver = "LapackCholesky", %params, "direct solver has no parameters");
    }

    fn info(&self) -> Diagnostics {
        self.diagnostics
    }

    fn analyze_pattern(&mut self, matrix: &SparseMatrixView, _precond_hint: usize) -> Result<()> {
        self.matrix = None;
        self.factor = None;
        self.diagnostics = Diagnostics::default();
        matrix.ensure_solvable()?;
        self.matrix = Some(matrix.clone());
        Ok(())
    }

    fn factorize(&mut self, matrix: &SparseMatrixView) -> Result<()> {
        let Some(analyzed) = &self.matrix else {
            return Err(SolverError::NotAnalyzed);
        };
        ensure_same_shape(analyzed, matrix)?;
        ensure_symmetric(matrix)?;

        self.factor = nalgebra_lapack::Cholesky::new(matrix.to_dense());
        if self.factor.is_none() {
            return Err(SolverError::BackendAssembly(
                "LAPACK Cholesky failed: matrix is not positive definite".into(),
            ));
        }
        debug!(n = matrix.nrows(), "LAPACK Cholesky factorized");
        self.matrix = Some(matrix.clone());
        Ok(())
    }

    fn solve(&mut self, rhs: &DVector<f64>, x: &mut DVector<f64>) -> Result<()> {
        let Some(matrix) = self.matrix.clone() else {
            return Err(SolverError::NotAnalyzed);
        };
        check_lengths(matrix.nrows(), rhs, x)?;
        if self.factor.is_none() {
            self.factorize(&matrix)?;
        }
        let Some(factor) = &self.factor else {
            return Err(SolverError::NotAnalyzed);
        };

        let solution = factor
            .solve(rhs)
            .ok_or_else(|| SolverError::BackendAssembly("LAPACK potrs failed".into()))?;
        x.copy_from(&solution);
        self.diagnostics = converged_diagnostics(&matrix, x, rhs);
        Ok(())
    }

    fn name(&self) -> &str {
        "LapackCholesky"
    }
}
