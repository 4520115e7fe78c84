//! Preconditioners of the native backend.
//!
//! A preconditioner approximates `z = M^-1 r`. The block Jacobi variant keeps
//! the `dimension` unknowns of a node together, which matters for vector
//! valued problems (elasticity) where the coupling inside a node dominates.

use nalgebra::DMatrix;
use tracing::{debug, warn};

use super::par_csr::ParCsrMatrix;
use super::traits::PreconditionerKind;

pub trait Preconditioner: Send + Sync {
    /// z = M^-1 * r
    fn apply(&self, matrix: &ParCsrMatrix, r: &[f64], z: &mut [f64]);

    fn name(&self) -> &'static str;

    /// Number of stationary sweeps per application. Ignored by
    /// preconditioners without an inner iteration.
    fn set_sweeps(&mut self, _sweeps: usize) {}
}

/// M = I
#[derive(Debug, Clone, Default)]
pub struct IdentityPreconditioner;

impl Preconditioner for IdentityPreconditioner {
    fn apply(&self, _matrix: &ParCsrMatrix, r: &[f64], z: &mut [f64]) {
        z.copy_from_slice(r);
    }

    fn name(&self) -> &'static str {
        "identity"
    }
}

/// Block Jacobi preconditioner.
///
/// Diagonal blocks of `block_size` rows are inverted once at construction.
/// Each application runs `sweeps` Jacobi iterations on `A z = r` starting
/// from `z = 0`; one sweep is plain block-diagonal scaling. A block size of
/// one gives point Jacobi.
#[derive(Debug, Clone)]
pub struct BlockJacobi {
    block_size: usize,
    inv_blocks: Vec<DMatrix<f64>>,
    sweeps: usize,
}

impl BlockJacobi {
    pub fn from_matrix(matrix: &ParCsrMatrix, block_size: usize, sweeps: usize) -> Self {
        let n = matrix.nrows();
        let block_size = block_size.clamp(1, n.max(1));
        let mut inv_blocks = Vec::with_capacity(n.div_ceil(block_size));
        let mut singular = 0usize;

        for start in (0..n).step_by(block_size) {
            let size = block_size.min(n - start);
            let block = DMatrix::from_fn(size, size, |i, j| matrix.get(start + i, start + j));
            match block.try_inverse() {
                Some(inv) if inv.iter().all(|v| v.is_finite()) => inv_blocks.push(inv),
                _ => {
                    singular += 1;
                    inv_blocks.push(DMatrix::identity(size, size));
                }
            }
        }

        if singular > 0 {
            warn!(
                singular,
                block_size, "singular diagonal blocks replaced by identity in block Jacobi"
            );
        }
        debug!(blocks = inv_blocks.len(), block_size, sweeps, "block Jacobi set up");

        Self {
            block_size,
            inv_blocks,
            sweeps: sweeps.max(1),
        }
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn sweeps(&self) -> usize {
        self.sweeps
    }

    /// z += D^-1 * t, block by block.
    fn scale_add(&self, t: &[f64], z: &mut [f64]) {
        for (k, inv) in self.inv_blocks.iter().enumerate() {
            let start = k * self.block_size;
            let size = inv.nrows();
            for i in 0..size {
                let mut acc = 0.0;
                for j in 0..size {
                    acc += inv[(i, j)] * t[start + j];
                }
                z[start + i] += acc;
            }
        }
    }
}

impl Preconditioner for BlockJacobi {
    fn apply(&self, matrix: &ParCsrMatrix, r: &[f64], z: &mut [f64]) {
        z.fill(0.0);
        self.scale_add(r, z);
        if self.sweeps == 1 {
            return;
        }

        let mut t = vec![0.0; r.len()];
        for _ in 1..self.sweeps {
            matrix.residual(r, z, &mut t);
            self.scale_add(&t, z);
        }
    }

    fn name(&self) -> &'static str {
        if self.block_size == 1 {
            "jacobi"
        } else {
            "block_jacobi"
        }
    }

    fn set_sweeps(&mut self, sweeps: usize) {
        self.sweeps = sweeps.max(1);
    }
}

/// Build the preconditioner selected by `kind` for `matrix`.
pub fn build(
    kind: PreconditionerKind,
    matrix: &ParCsrMatrix,
    dimension: usize,
    sweeps: usize,
) -> Box<dyn Preconditioner> {
    match kind {
        PreconditionerKind::None => Box::new(IdentityPreconditioner),
        PreconditionerKind::Jacobi => Box::new(BlockJacobi::from_matrix(matrix, 1, sweeps)),
        PreconditionerKind::BlockJacobi => {
            Box::new(BlockJacobi::from_matrix(matrix, dimension, sweeps))
        }
    }
}
