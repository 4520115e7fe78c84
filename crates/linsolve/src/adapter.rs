//! Translation of a [`SparseMatrixView`] into the backend's assembled matrix.

use std::ops::Range;

use tracing::{debug, trace};

use crate::backend::{BackendError, IjMatrix, LocalCsr, ParCsrMatrix};
use crate::error::Result;
use crate::matrix::SparseMatrixView;

/// Owns the assembled backend matrix of one solver instance.
///
/// At most one handle is alive at a time. A new assembly drops the previous
/// handle before building, so a failed assembly leaves the adapter empty.
#[derive(Debug, Default)]
pub struct BackendMatrixAdapter {
    handle: Option<ParCsrMatrix>,
}

impl BackendMatrixAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_matrix(&self) -> bool {
        self.handle.is_some()
    }

    pub fn matrix(&self) -> Option<&ParCsrMatrix> {
        self.handle.as_ref()
    }

    /// Drop the assembled matrix, if any.
    pub fn release(&mut self) {
        if let Some(old) = self.handle.take() {
            trace!(n = old.nrows(), nnz = old.nnz(), "released backend matrix");
        }
    }

    /// Assemble `view` into `partitions` contiguous row blocks.
    ///
    /// Each block goes through the IJ sequence: declare row sizes, insert
    /// rows, commit. Partitions are then stitched into one parallel matrix.
    pub fn assemble(
        &mut self,
        view: &SparseMatrixView,
        partitions: usize,
    ) -> Result<&ParCsrMatrix> {
        let ranges = partition_rows(view.nrows(), partitions);
        self.assemble_rows(view, ranges)
    }

    /// Assemble `view` with explicitly owned row ranges, one per partition.
    ///
    /// The ranges must tile `0..n`; gaps, overlaps and rows past the end are
    /// backend assembly errors.
    pub fn assemble_rows(
        &mut self,
        view: &SparseMatrixView,
        ranges: Vec<Range<usize>>,
    ) -> Result<&ParCsrMatrix> {
        self.release();
        view.ensure_solvable()?;

        let n = view.nrows();
        let mut blocks = Vec::with_capacity(ranges.len());
        for rows in ranges {
            blocks.push(assemble_partition(view, rows)?);
        }
        let matrix = ParCsrMatrix::from_partitions(n, view.ncols(), blocks)?;

        debug!(
            n,
            nnz = matrix.nnz(),
            partitions = matrix.num_partitions(),
            "backend matrix assembled"
        );
        Ok(&*self.handle.insert(matrix))
    }
}

impl Drop for BackendMatrixAdapter {
    fn drop(&mut self) {
        self.release();
    }
}

fn assemble_partition(
    view: &SparseMatrixView,
    rows: Range<usize>,
) -> std::result::Result<LocalCsr, BackendError> {
    if rows.end > view.nrows() {
        return Err(BackendError(format!(
            "Row range {}..{} exceeds {} rows",
            rows.start,
            rows.end,
            view.nrows()
        )));
    }
    let mut ij = IjMatrix::create(rows.clone(), view.ncols())?;
    ij.set_row_sizes(&view.row_counts(rows.clone()))?;
    for i in rows {
        let (cols, vals) = view.row(i);
        ij.set_values(i, cols, vals)?;
    }
    ij.assemble()
}

/// Split `0..n` into `parts` contiguous, nearly equal row ranges.
///
/// `parts` is clamped to `1..=n`; earlier ranges get the remainder rows.
pub fn partition_rows(n: usize, parts: usize) -> Vec<Range<usize>> {
    if n == 0 {
        return Vec::new();
    }
    let parts = parts.clamp(1, n);
    let base = n / parts;
    let extra = n % parts;
    let mut start = 0;
    (0..parts)
        .map(|p| {
            let len = base + usize::from(p < extra);
            let range = start..start + len;
            start += len;
            range
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SolverError;

    fn tridiag(n: usize) -> SparseMatrixView {
        let mut entries = Vec::new();
        for i in 0..n {
            entries.push((i, i, 2.0));
            if i > 0 {
                entries.push((i, i - 1, -1.0));
            }
            if i + 1 < n {
                entries.push((i, i + 1, -1.0));
            }
        }
        SparseMatrixView::from_entries(n, &entries).unwrap()
    }

    #[test]
    fn partitions_cover_all_rows() {
        assert_eq!(partition_rows(10, 3), vec![0..4, 4..7, 7..10]);
        assert_eq!(partition_rows(2, 5), vec![0..1, 1..2]);
        assert_eq!(partition_rows(4, 0), vec![0..4]);
        assert!(partition_rows(0, 2).is_empty());
    }

    #[test]
    fn assembled_matrix_matches_view() {
        let view = tridiag(7);
        let mut adapter = BackendMatrixAdapter::new();
        let m = adapter.assemble(&view, 3).unwrap();
        assert_eq!(m.num_partitions(), 3);
        assert_eq!(m.nnz(), view.nnz());
        for i in 0..7 {
            for j in 0..7 {
                assert_eq!(m.get(i, j), view.get(i, j));
            }
        }
        assert!(adapter.has_matrix());
    }

    #[test]
    fn failed_assembly_leaves_no_handle() {
        let mut adapter = BackendMatrixAdapter::new();
        adapter.assemble(&tridiag(3), 1).unwrap();

        let rect = SparseMatrixView::from_triplets(2, 3, vec![0], vec![2], vec![1.0]).unwrap();
        let err = adapter.assemble(&rect, 1).unwrap_err();
        assert!(matches!(err, SolverError::Structural(_)));
        assert!(!adapter.has_matrix());
    }

    #[test]
    fn rejected_row_ownership_is_a_backend_error() {
        let view = tridiag(4);
        let mut adapter = BackendMatrixAdapter::new();
        adapter.assemble(&view, 2).unwrap();

        for ranges in [
            vec![0..1, 2..4],
            vec![0..3, 2..4],
            vec![0..2, 2..5],
            vec![0..2],
            vec![],
        ] {
            let err = adapter.assemble_rows(&view, ranges.clone()).unwrap_err();
            assert!(
                matches!(err, SolverError::BackendAssembly(_)),
                "{ranges:?}: {err}"
            );
            assert!(!adapter.has_matrix(), "{ranges:?}");
        }

        let m = adapter.assemble_rows(&view, vec![2..4, 0..2]).unwrap();
        assert_eq!(m.num_partitions(), 2);
        assert_eq!(m.get(2, 1), -1.0);
    }

    #[test]
    fn release_is_idempotent() {
        let mut adapter = BackendMatrixAdapter::new();
        adapter.release();
        adapter.assemble(&tridiag(2), 1).unwrap();
        adapter.release();
        adapter.release();
        assert!(adapter.matrix().is_none());
    }
}
