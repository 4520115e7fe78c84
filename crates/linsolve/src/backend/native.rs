//! Native Krylov backend.
//!
//! Pure Rust stand-in for an external solver library. It follows the same
//! call sequence an external library would require: parameters are pushed,
//! `setup` builds the preconditioner for an assembled matrix, `solve`
//! iterates and reports its own status and residual.

use tracing::debug;

use super::krylov;
use super::par_csr::ParCsrMatrix;
use super::precond::{self, IdentityPreconditioner, Preconditioner};
use super::traits::*;

pub struct NativeKrylov {
    method: KrylovMethod,
    params: KrylovParams,
    precond: Option<Box<dyn Preconditioner>>,
}

impl NativeKrylov {
    pub fn new(method: KrylovMethod) -> Self {
        Self {
            method,
            params: KrylovParams::default(),
            precond: None,
        }
    }

    pub fn params(&self) -> &KrylovParams {
        &self.params
    }

    /// Name of the preconditioner built by the last `setup`, if any.
    pub fn preconditioner_name(&self) -> Option<&'static str> {
        self.precond.as_ref().map(|pc| pc.name())
    }
}

impl KrylovBackend for NativeKrylov {
    fn method(&self) -> KrylovMethod {
        self.method
    }

    fn set_params(&mut self, params: &KrylovParams) {
        self.params = params.clone();
        if let Some(pc) = self.precond.as_mut() {
            pc.set_sweeps(params.pre_max_iterations);
        }
    }

    fn setup(&mut self, matrix: &ParCsrMatrix) -> Result<(), BackendError> {
        if matrix.nrows() != matrix.ncols() {
            return Err(BackendError(format!(
                "Krylov setup needs a square matrix, got {}x{}",
                matrix.nrows(),
                matrix.ncols()
            )));
        }
        let pc = precond::build(
            self.params.preconditioner,
            matrix,
            self.params.dimension,
            self.params.pre_max_iterations,
        );
        debug!(
            method = self.method.solver_name(),
            preconditioner = pc.name(),
            n = matrix.nrows(),
            "native Krylov setup"
        );
        self.precond = Some(pc);
        Ok(())
    }

    fn solve(&mut self, matrix: &ParCsrMatrix, b: &[f64], x: &mut [f64]) -> KrylovOutcome {
        match self.precond.as_deref() {
            Some(pc) => krylov::solve(self.method, matrix, pc, b, x, &self.params),
            None => krylov::solve(
                self.method,
                matrix,
                &IdentityPreconditioner,
                b,
                x,
                &self.params,
            ),
        }
    }
}
