//! Format-neutral sparse matrix consumed by every solver.
//!
//! Input may arrive as COO triplets or as compressed row/column arrays; all
//! of it is normalised into CSR with duplicates summed, indices 0-based and
//! sorted within each row. After construction the view is read-only.

use std::ops::Range;

use nalgebra::{DMatrix, DVector};
use nalgebra_sparse::{CooMatrix, CscMatrix, CsrMatrix};

use crate::error::{Result, SolverError};

#[derive(Debug, Clone, PartialEq)]
pub struct SparseMatrixView {
    csr: CsrMatrix<f64>,
}

impl SparseMatrixView {
    /// Build from COO triplets. Repeated `(row, col)` pairs are summed.
    pub fn from_triplets(
        nrows: usize,
        ncols: usize,
        row_indices: Vec<usize>,
        col_indices: Vec<usize>,
        values: Vec<f64>,
    ) -> Result<Self> {
        ensure_finite(&values)?;
        let coo = CooMatrix::try_from_triplets(nrows, ncols, row_indices, col_indices, values)
            .map_err(|e| SolverError::Structural(format!("Invalid triplets: {}", e)))?;
        Ok(Self {
            csr: CsrMatrix::from(&coo),
        })
    }

    /// Square matrix from `(row, col, value)` entries.
    pub fn from_entries(n: usize, entries: &[(usize, usize, f64)]) -> Result<Self> {
        let rows = entries.iter().map(|e| e.0).collect();
        let cols = entries.iter().map(|e| e.1).collect();
        let vals = entries.iter().map(|e| e.2).collect();
        Self::from_triplets(n, n, rows, cols, vals)
    }

    /// Build from compressed-row arrays. Column indices within a row need
    /// not be sorted and may repeat.
    pub fn from_csr_data(
        nrows: usize,
        ncols: usize,
        row_offsets: &[usize],
        col_indices: &[usize],
        values: &[f64],
    ) -> Result<Self> {
        let majors = expand_offsets(nrows, row_offsets, col_indices.len(), values.len())?;
        Self::from_triplets(nrows, ncols, majors, col_indices.to_vec(), values.to_vec())
    }

    /// Build from compressed-column arrays.
    pub fn from_csc_data(
        nrows: usize,
        ncols: usize,
        col_offsets: &[usize],
        row_indices: &[usize],
        values: &[f64],
    ) -> Result<Self> {
        let majors = expand_offsets(ncols, col_offsets, row_indices.len(), values.len())?;
        Self::from_triplets(nrows, ncols, row_indices.to_vec(), majors, values.to_vec())
    }

    pub fn from_dense(matrix: &DMatrix<f64>) -> Result<Self> {
        ensure_finite(matrix.as_slice())?;
        let mut coo = CooMatrix::new(matrix.nrows(), matrix.ncols());
        for j in 0..matrix.ncols() {
            for i in 0..matrix.nrows() {
                let v = matrix[(i, j)];
                if v != 0.0 {
                    coo.push(i, j, v);
                }
            }
        }
        Ok(Self {
            csr: CsrMatrix::from(&coo),
        })
    }

    pub fn as_csr(&self) -> &CsrMatrix<f64> {
        &self.csr
    }

    pub fn into_csr(self) -> CsrMatrix<f64> {
        self.csr
    }

    pub fn to_csc(&self) -> CscMatrix<f64> {
        CscMatrix::from(&self.csr)
    }

    pub fn nrows(&self) -> usize {
        self.csr.nrows()
    }

    pub fn ncols(&self) -> usize {
        self.csr.ncols()
    }

    /// Order N of a square matrix (number of rows).
    pub fn order(&self) -> usize {
        self.csr.nrows()
    }

    pub fn is_square(&self) -> bool {
        self.csr.nrows() == self.csr.ncols()
    }

    pub fn nnz(&self) -> usize {
        self.csr.nnz()
    }

    /// Check the preconditions every solver places on its input: square,
    /// non-zero order, at least one stored entry.
    pub fn ensure_solvable(&self) -> Result<()> {
        if !self.is_square() {
            return Err(SolverError::Structural(format!(
                "Matrix must be square, got {}x{}",
                self.nrows(),
                self.ncols()
            )));
        }
        if self.order() == 0 {
            return Err(SolverError::Structural("Matrix has order 0".into()));
        }
        if self.nnz() == 0 {
            return Err(SolverError::Structural(
                "Matrix has no non-zero entries".into(),
            ));
        }
        Ok(())
    }

    /// Sorted column indices and values of row `i`.
    pub fn row(&self, i: usize) -> (&[usize], &[f64]) {
        let offsets = self.csr.row_offsets();
        let span = offsets[i]..offsets[i + 1];
        (&self.csr.col_indices()[span.clone()], &self.csr.values()[span])
    }

    /// Number of stored entries in each row of `rows`.
    pub fn row_counts(&self, rows: Range<usize>) -> Vec<usize> {
        let offsets = self.csr.row_offsets();
        rows.map(|i| offsets[i + 1] - offsets[i]).collect()
    }

    pub fn triplet_iter(&self) -> impl Iterator<Item = (usize, usize, f64)> + '_ {
        self.csr.triplet_iter().map(|(i, j, &v)| (i, j, v))
    }

    pub fn get(&self, i: usize, j: usize) -> f64 {
        let (cols, vals) = self.row(i);
        cols.binary_search(&j).map(|k| vals[k]).unwrap_or(0.0)
    }

    /// Main diagonal; missing entries read as zero.
    pub fn diagonal(&self) -> DVector<f64> {
        let n = self.nrows().min(self.ncols());
        DVector::from_fn(n, |i, _| self.get(i, i))
    }

    /// A * x
    pub fn mul_vec(&self, x: &DVector<f64>) -> DVector<f64> {
        assert_eq!(x.len(), self.ncols(), "mul_vec: length mismatch");
        DVector::from_fn(self.nrows(), |i, _| {
            let (cols, vals) = self.row(i);
            cols.iter().zip(vals).map(|(&c, &v)| v * x[c]).sum()
        })
    }

    /// ||A * x - b||
    pub fn residual_norm(&self, x: &DVector<f64>, b: &DVector<f64>) -> f64 {
        (self.mul_vec(x) - b).norm()
    }

    /// Rectangular sub-block starting at `(row0, col0)`.
    pub fn block(&self, row0: usize, col0: usize, nrows: usize, ncols: usize) -> Self {
        let mut coo = CooMatrix::new(nrows, ncols);
        for i in row0..row0 + nrows {
            let (cols, vals) = self.row(i);
            for (&c, &v) in cols.iter().zip(vals) {
                if (col0..col0 + ncols).contains(&c) {
                    coo.push(i - row0, c - col0, v);
                }
            }
        }
        Self {
            csr: CsrMatrix::from(&coo),
        }
    }

    pub fn transpose(&self) -> Self {
        Self {
            csr: self.csr.transpose(),
        }
    }

    /// diag(left) * A * diag(right)
    pub fn scale(&self, left: &DVector<f64>, right: &DVector<f64>) -> Self {
        assert_eq!(left.len(), self.nrows(), "scale: left length mismatch");
        assert_eq!(right.len(), self.ncols(), "scale: right length mismatch");
        let mut csr = self.csr.clone();
        let offsets = csr.row_offsets().to_vec();
        let cols = csr.col_indices().to_vec();
        let values = csr.values_mut();
        for i in 0..offsets.len() - 1 {
            for k in offsets[i]..offsets[i + 1] {
                values[k] *= left[i] * right[cols[k]];
            }
        }
        Self { csr }
    }

    /// self * rhs
    pub fn matmul(&self, rhs: &Self) -> Result<Self> {
        if self.ncols() != rhs.nrows() {
            return Err(SolverError::Structural(format!(
                "Cannot multiply {}x{} by {}x{}",
                self.nrows(),
                self.ncols(),
                rhs.nrows(),
                rhs.ncols()
            )));
        }
        Ok(Self {
            csr: &self.csr * &rhs.csr,
        })
    }

    /// self - rhs
    pub fn sub(&self, rhs: &Self) -> Result<Self> {
        if self.nrows() != rhs.nrows() || self.ncols() != rhs.ncols() {
            return Err(SolverError::Structural(format!(
                "Cannot subtract {}x{} from {}x{}",
                rhs.nrows(),
                rhs.ncols(),
                self.nrows(),
                self.ncols()
            )));
        }
        let mut coo = CooMatrix::new(self.nrows(), self.ncols());
        for (i, j, v) in self.triplet_iter() {
            coo.push(i, j, v);
        }
        for (i, j, v) in rhs.triplet_iter() {
            coo.push(i, j, -v);
        }
        Ok(Self {
            csr: CsrMatrix::from(&coo),
        })
    }

    /// Dense copy (small matrices and direct solvers only).
    pub fn to_dense(&self) -> DMatrix<f64> {
        let mut dense = DMatrix::zeros(self.nrows(), self.ncols());
        for (i, j, v) in self.triplet_iter() {
            dense[(i, j)] += v;
        }
        dense
    }
}

impl TryFrom<CsrMatrix<f64>> for SparseMatrixView {
    type Error = SolverError;

    fn try_from(csr: CsrMatrix<f64>) -> Result<Self> {
        ensure_finite(csr.values())?;
        Ok(Self { csr })
    }
}

fn ensure_finite(values: &[f64]) -> Result<()> {
    match values.iter().find(|v| !v.is_finite()) {
        Some(v) => Err(SolverError::Structural(format!(
            "Non-finite matrix value {}",
            v
        ))),
        None => Ok(()),
    }
}

/// Turn compressed offsets into one major index per stored entry.
fn expand_offsets(
    n_major: usize,
    offsets: &[usize],
    n_minor: usize,
    n_values: usize,
) -> Result<Vec<usize>> {
    if offsets.len() != n_major + 1 {
        return Err(SolverError::Structural(format!(
            "Expected {} offsets, got {}",
            n_major + 1,
            offsets.len()
        )));
    }
    if offsets[0] != 0 {
        return Err(SolverError::Structural("Offsets must start at 0".into()));
    }
    if let Some(pos) = offsets.windows(2).position(|w| w[1] < w[0]) {
        return Err(SolverError::Structural(format!(
            "Offsets decrease at position {}",
            pos + 1
        )));
    }
    let nnz = offsets[n_major];
    if nnz != n_minor || nnz != n_values {
        return Err(SolverError::Structural(format!(
            "Offsets describe {} entries, got {} indices and {} values",
            nnz, n_minor, n_values
        )));
    }

    let mut majors = Vec::with_capacity(nnz);
    for (major, w) in offsets.windows(2).enumerate() {
        majors.extend(std::iter::repeat_n(major, w[1] - w[0]));
    }
    Ok(majors)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicates_are_summed() {
        let m = SparseMatrixView::from_triplets(
            2,
            2,
            vec![0, 0, 1, 0],
            vec![0, 1, 1, 0],
            vec![1.0, 2.0, 3.0, 4.0],
        )
        .unwrap();
        assert_eq!(m.nnz(), 3);
        assert_eq!(m.get(0, 0), 5.0);
        assert_eq!(m.row(0), (&[0usize, 1][..], &[5.0, 2.0][..]));
    }

    #[test]
    fn out_of_range_index_is_structural() {
        let err = SparseMatrixView::from_triplets(2, 2, vec![0, 2], vec![0, 0], vec![1.0, 1.0])
            .unwrap_err();
        assert!(matches!(err, SolverError::Structural(_)));
    }

    #[test]
    fn non_finite_value_is_structural() {
        let err = SparseMatrixView::from_entries(1, &[(0, 0, f64::NAN)]).unwrap_err();
        assert!(matches!(err, SolverError::Structural(_)));
    }

    #[test]
    fn dense_and_csr_inputs_reject_non_finite_values() {
        let dense = DMatrix::from_row_slice(2, 2, &[1.0, f64::INFINITY, 0.0, 2.0]);
        assert!(matches!(
            SparseMatrixView::from_dense(&dense),
            Err(SolverError::Structural(_))
        ));

        let csr = CsrMatrix::try_from_csr_data(2, 2, vec![0, 1, 2], vec![0, 1], vec![1.0, f64::NAN])
            .unwrap();
        assert!(matches!(
            SparseMatrixView::try_from(csr),
            Err(SolverError::Structural(_))
        ));

        let ok = SparseMatrixView::from_dense(&DMatrix::from_row_slice(2, 2, &[1.0, 0.0, 0.0, 2.0]))
            .unwrap();
        assert_eq!(ok.nnz(), 2);
        assert_eq!(SparseMatrixView::try_from(ok.as_csr().clone()).unwrap(), ok);
    }

    #[test]
    fn csr_and_csc_inputs_agree() {
        // [[1, 2], [0, 3]]
        let by_rows =
            SparseMatrixView::from_csr_data(2, 2, &[0, 2, 3], &[1, 0, 1], &[2.0, 1.0, 3.0])
                .unwrap();
        let by_cols =
            SparseMatrixView::from_csc_data(2, 2, &[0, 1, 3], &[0, 0, 1], &[1.0, 2.0, 3.0])
                .unwrap();
        assert_eq!(by_rows, by_cols);
        assert_eq!(by_rows.to_dense(), DMatrix::from_row_slice(2, 2, &[1.0, 2.0, 0.0, 3.0]));
    }

    #[test]
    fn bad_offsets_are_rejected() {
        assert!(SparseMatrixView::from_csr_data(2, 2, &[0, 2], &[0, 1], &[1.0, 1.0]).is_err());
        assert!(SparseMatrixView::from_csr_data(2, 2, &[0, 2, 1], &[0, 1], &[1.0, 1.0]).is_err());
        assert!(SparseMatrixView::from_csr_data(2, 2, &[0, 1, 2], &[0, 1], &[1.0]).is_err());
    }

    #[test]
    fn solvability_checks() {
        let rect = SparseMatrixView::from_triplets(2, 3, vec![0], vec![2], vec![1.0]).unwrap();
        assert!(rect.ensure_solvable().is_err());
        let empty = SparseMatrixView::from_entries(0, &[]).unwrap();
        assert!(empty.ensure_solvable().is_err());
        let zero = SparseMatrixView::from_entries(3, &[]).unwrap();
        assert!(zero.ensure_solvable().is_err());
        let ok = SparseMatrixView::from_entries(1, &[(0, 0, 1.0)]).unwrap();
        assert!(ok.ensure_solvable().is_ok());
    }

    #[test]
    fn block_transpose_and_scaling() {
        let m = SparseMatrixView::from_entries(
            3,
            &[(0, 0, 4.0), (0, 2, 1.0), (1, 1, 9.0), (2, 0, 1.0), (2, 2, 2.0)],
        )
        .unwrap();

        let b = m.block(0, 2, 2, 1);
        assert_eq!((b.nrows(), b.ncols()), (2, 1));
        assert_eq!(b.get(0, 0), 1.0);
        assert_eq!(b.transpose().get(0, 0), 1.0);

        let d = DVector::from_vec(vec![0.5, 1.0 / 3.0, 1.0]);
        let s = m.scale(&d, &d);
        assert!((s.get(0, 0) - 1.0).abs() < 1e-15);
        assert!((s.get(1, 1) - 1.0).abs() < 1e-15);
        assert!((s.get(0, 2) - 0.5).abs() < 1e-15);
    }

    #[test]
    fn products_and_differences() {
        let a = SparseMatrixView::from_entries(2, &[(0, 0, 1.0), (0, 1, 2.0), (1, 1, 3.0)]).unwrap();
        let at_a = a.transpose().matmul(&a).unwrap();
        assert_eq!(
            at_a.to_dense(),
            DMatrix::from_row_slice(2, 2, &[1.0, 2.0, 2.0, 13.0])
        );
        let diff = at_a.sub(&a).unwrap();
        assert_eq!(
            diff.to_dense(),
            DMatrix::from_row_slice(2, 2, &[0.0, 0.0, 2.0, 10.0])
        );
        assert!(a.matmul(&a.block(0, 0, 1, 2)).is_err());
    }

    #[test]
    fn mul_vec_and_residual() {
        let a = SparseMatrixView::from_entries(2, &[(0, 0, 2.0), (1, 0, 1.0), (1, 1, 1.0)]).unwrap();
        let x = DVector::from_vec(vec![1.0, 2.0]);
        assert_eq!(a.mul_vec(&x), DVector::from_vec(vec![2.0, 3.0]));
        assert_eq!(a.residual_norm(&x, &DVector::from_vec(vec![2.0, 3.0])), 0.0);
        assert_eq!(a.diagonal(), DVector::from_vec(vec![2.0, 1.0]));
    }
}
