//! Shared matrix generators for the integration tests.

#![allow(dead_code)]

use linsolve::SparseMatrixView;
use nalgebra::DVector;

/// Deterministic LCG so every run sees the same matrices.
pub struct Lcg {
    state: u64,
}

impl Lcg {
    pub fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    pub fn next_f64(&mut self) -> f64 {
        self.state = self
            .state
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        (self.state >> 11) as f64 / (1u64 << 53) as f64
    }

    pub fn range(&mut self, lo: f64, hi: f64) -> f64 {
        lo + (hi - lo) * self.next_f64()
    }
}

/// tridiag(-1, 2, -1): SPD, condition number grows like n^2.
pub fn laplacian_1d(n: usize) -> SparseMatrixView {
    tridiagonal(n, 2.0, -1.0)
}

/// tridiag(off, diag, off)
pub fn tridiagonal(n: usize, diag: f64, off: f64) -> SparseMatrixView {
    let mut entries = Vec::with_capacity(3 * n);
    for i in 0..n {
        entries.push((i, i, diag));
        if i > 0 {
            entries.push((i, i - 1, off));
        }
        if i + 1 < n {
            entries.push((i, i + 1, off));
        }
    }
    SparseMatrixView::from_entries(n, &entries).unwrap()
}

/// Elasticity-like SPD matrix with 3 unknowns per node: dense coupled 3x3
/// diagonal blocks, -I coupling to the neighbouring nodes of a chain.
pub fn block_chain(nodes: usize) -> SparseMatrixView {
    let n = 3 * nodes;
    let mut entries = Vec::new();
    for node in 0..nodes {
        let base = 3 * node;
        for i in 0..3 {
            for j in 0..3 {
                let v = if i == j { 6.0 } else { 1.0 };
                entries.push((base + i, base + j, v));
            }
        }
        if node + 1 < nodes {
            for i in 0..3 {
                entries.push((base + i, base + 3 + i, -1.0));
                entries.push((base + 3 + i, base + i, -1.0));
            }
        }
    }
    SparseMatrixView::from_entries(n, &entries).unwrap()
}

/// Nonsymmetric, strictly diagonally dominant matrix.
pub fn random_diag_dominant(n: usize, seed: u64) -> SparseMatrixView {
    let mut rng = Lcg::new(seed);
    let mut entries = Vec::new();
    for i in 0..n {
        let mut off_sum = 0.0;
        for j in [i.wrapping_sub(2), i.wrapping_sub(1), i + 1, i + 3] {
            if j < n {
                let v = rng.range(-1.0, 1.0);
                off_sum += v.abs();
                entries.push((i, j, v));
            }
        }
        entries.push((i, i, 1.0 + off_sum));
    }
    SparseMatrixView::from_entries(n, &entries).unwrap()
}

pub fn random_vector(n: usize, seed: u64) -> DVector<f64> {
    let mut rng = Lcg::new(seed);
    DVector::from_fn(n, |_, _| rng.range(-1.0, 1.0))
}

/// ||b - A x|| / ||b||
pub fn relative_residual(a: &SparseMatrixView, x: &DVector<f64>, b: &DVector<f64>) -> f64 {
    a.residual_norm(x, b) / b.norm()
}
