//! Krylov solver adapter.
//!
//! ```text
//!               analyze_pattern            solve converged
//! Unconfigured ────────────────▶ Analyzed ────────────────▶ Solved
//!                                  ▲  ▲                        │
//!            failed solve,         │  └────────────────────────┘
//!            analyze_pattern ──────┘        analyze_pattern
//! ```
//!
//! Parameters are pushed to the backend right before every solve. Backend
//! setup (preconditioner construction) runs once per analyzed matrix and is
//! repeated only when `dimension` or the preconditioner kind changes.

use nalgebra::DVector;
use serde_json::Value;
use tracing::{debug, trace, warn};

use crate::adapter::BackendMatrixAdapter;
use crate::backend::{KrylovBackend, KrylovMethod, NativeKrylov, PreconditionerKind};
use crate::config::SolverConfig;
use crate::error::{Result, SolverError};
use crate::matrix::SparseMatrixView;
use crate::traits::{check_lengths, Diagnostics, LinearSolver};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterState {
    Unconfigured,
    Analyzed,
    Solved,
}

/// Iterative solver driving a [`KrylovBackend`].
pub struct IterativeSolver<B: KrylovBackend = NativeKrylov> {
    config: SolverConfig,
    backend: B,
    matrix: BackendMatrixAdapter,
    state: AdapterState,
    precond_hint: usize,
    /// (dimension, preconditioner) the backend was last set up with
    setup_key: Option<(usize, PreconditionerKind)>,
    diagnostics: Diagnostics,
}

impl IterativeSolver<NativeKrylov> {
    pub fn new(method: KrylovMethod) -> Self {
        Self::with_backend(NativeKrylov::new(method))
    }

    pub fn gmres() -> Self {
        Self::new(KrylovMethod::GMRES)
    }

    pub fn cg() -> Self {
        Self::new(KrylovMethod::CG)
    }

    pub fn bicgstab() -> Self {
        Self::new(KrylovMethod::BiCGSTAB)
    }
}

impl<B: KrylovBackend> IterativeSolver<B> {
    pub fn with_backend(backend: B) -> Self {
        Self {
            config: SolverConfig::default(),
            backend,
            matrix: BackendMatrixAdapter::new(),
            state: AdapterState::Unconfigured,
            precond_hint: 0,
            setup_key: None,
            diagnostics: Diagnostics::default(),
        }
    }

    pub fn config(&self) -> &SolverConfig {
        &self.config
    }

    pub fn state(&self) -> AdapterState {
        self.state
    }

    pub fn has_matrix(&self) -> bool {
        self.matrix.has_matrix()
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Hint passed to the last successful `analyze_pattern`.
    pub fn precond_hint(&self) -> usize {
        self.precond_hint
    }
}

impl<B: KrylovBackend> LinearSolver for IterativeSolver<B> {
    fn set_parameters(&mut self, params: &Value) {
        self.config.apply_json(params);
        debug!(
            solver = self.backend.method().solver_name(),
            config = %self.config.to_json(),
            "solver parameters applied"
        );
    }

    fn info(&self) -> Diagnostics {
        self.diagnostics
    }

    fn analyze_pattern(&mut self, matrix: &SparseMatrixView, precond_hint: usize) -> Result<()> {
        self.state = AdapterState::Unconfigured;
        self.setup_key = None;
        self.diagnostics = Diagnostics::default();

        self.matrix.assemble(matrix, self.config.partitions)?;
        self.precond_hint = precond_hint;
        self.state = AdapterState::Analyzed;
        Ok(())
    }

    fn factorize(&mut self, _matrix: &SparseMatrixView) -> Result<()> {
        trace!(
            solver = self.backend.method().solver_name(),
            "factorize is a no-op for iterative solvers"
        );
        Ok(())
    }

    fn solve(&mut self, rhs: &DVector<f64>, x: &mut DVector<f64>) -> Result<()> {
        let Some(matrix) = self.matrix.matrix() else {
            return Err(SolverError::NotAnalyzed);
        };
        check_lengths(matrix.nrows(), rhs, x)?;

        let params = self.config.krylov_params();
        self.backend.set_params(&params);

        let key = (params.dimension, params.preconditioner);
        if self.setup_key != Some(key) {
            self.backend.setup(matrix)?;
            self.setup_key = Some(key);
        }

        let outcome = self.backend.solve(matrix, rhs.as_slice(), x.as_mut_slice());
        self.diagnostics = Diagnostics {
            iterations: outcome.iterations,
            final_residual_norm: outcome.relative_residual,
            converged: outcome.status.is_converged(),
        };

        if outcome.status.is_converged() {
            self.state = AdapterState::Solved;
            Ok(())
        } else {
            warn!(
                solver = self.backend.method().solver_name(),
                status = ?outcome.status,
                iterations = outcome.iterations,
                residual = outcome.relative_residual,
                "iterative solve did not converge"
            );
            self.state = AdapterState::Analyzed;
            Err(SolverError::ConvergenceFailure {
                iterations: outcome.iterations,
                residual: outcome.relative_residual,
                tolerance: params.tolerance,
            })
        }
    }

    fn name(&self) -> &str {
        self.backend.method().solver_name()
    }
}
