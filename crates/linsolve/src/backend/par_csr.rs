//! Row-partitioned CSR matrix produced by IJ assembly.
//!
//! Each partition owns a contiguous range of global rows and stores them in
//! its own compressed-row arrays with global column indices. Matrix-vector
//! products run the partitions in parallel; every row is still summed
//! sequentially, so results do not depend on scheduling.

use std::ops::Range;

use rayon::prelude::*;

use super::traits::BackendError;

/// Compressed rows owned by one partition.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalCsr {
    pub(crate) rows: Range<usize>,
    pub(crate) row_offsets: Vec<usize>,
    pub(crate) col_indices: Vec<usize>,
    pub(crate) values: Vec<f64>,
}

impl LocalCsr {
    /// Global row range owned by this partition.
    pub fn rows(&self) -> Range<usize> {
        self.rows.clone()
    }

    pub fn nnz(&self) -> usize {
        self.values.len()
    }

    /// Column indices and values of global row `row`.
    fn row(&self, row: usize) -> (&[usize], &[f64]) {
        let local = row - self.rows.start;
        let span = self.row_offsets[local]..self.row_offsets[local + 1];
        (&self.col_indices[span.clone()], &self.values[span])
    }

    fn mul_vec_into(&self, x: &[f64], out: &mut [f64]) {
        for (local, y) in out.iter_mut().enumerate() {
            let span = self.row_offsets[local]..self.row_offsets[local + 1];
            *y = self.col_indices[span.clone()]
                .iter()
                .zip(&self.values[span])
                .map(|(&c, &v)| v * x[c])
                .sum();
        }
    }
}

/// Assembled, partitioned matrix handle used by the Krylov kernels.
#[derive(Debug, Clone, PartialEq)]
pub struct ParCsrMatrix {
    nrows: usize,
    ncols: usize,
    parts: Vec<LocalCsr>,
}

impl ParCsrMatrix {
    /// Glue assembled partitions together.
    ///
    /// Partitions may arrive in any order but must tile `0..nrows` without
    /// gaps or overlaps.
    pub fn from_partitions(
        nrows: usize,
        ncols: usize,
        mut parts: Vec<LocalCsr>,
    ) -> Result<Self, BackendError> {
        if parts.is_empty() {
            return Err("No partitions to assemble".into());
        }
        parts.sort_by_key(|p| p.rows.start);

        let mut next = 0;
        for part in &parts {
            if part.rows.start != next {
                return Err(BackendError(format!(
                    "Partition row ranges are not contiguous: expected start {}, found {}",
                    next, part.rows.start
                )));
            }
            next = part.rows.end;
        }
        if next != nrows {
            return Err(BackendError(format!(
                "Partitions cover {} rows, matrix has {}",
                next, nrows
            )));
        }

        Ok(Self {
            nrows,
            ncols,
            parts,
        })
    }

    pub fn nrows(&self) -> usize {
        self.nrows
    }

    pub fn ncols(&self) -> usize {
        self.ncols
    }

    pub fn nnz(&self) -> usize {
        self.parts.iter().map(LocalCsr::nnz).sum()
    }

    pub fn num_partitions(&self) -> usize {
        self.parts.len()
    }

    pub fn partitions(&self) -> &[LocalCsr] {
        &self.parts
    }

    /// Column indices and values of global row `row`.
    pub fn row(&self, row: usize) -> (&[usize], &[f64]) {
        let idx = self.parts.partition_point(|p| p.rows.end <= row);
        self.parts[idx].row(row)
    }

    /// Entry `(row, col)`, zero when not stored.
    pub fn get(&self, row: usize, col: usize) -> f64 {
        let (cols, vals) = self.row(row);
        cols.binary_search(&col).map(|k| vals[k]).unwrap_or(0.0)
    }

    pub fn diagonal(&self) -> Vec<f64> {
        (0..self.nrows).map(|i| self.get(i, i)).collect()
    }

    /// y = A * x
    pub fn mul_vec(&self, x: &[f64], y: &mut [f64]) {
        assert_eq!(x.len(), self.ncols, "mul_vec: x length mismatch");
        assert_eq!(y.len(), self.nrows, "mul_vec: y length mismatch");

        if self.parts.len() == 1 {
            self.parts[0].mul_vec_into(x, y);
            return;
        }

        let mut chunks = Vec::with_capacity(self.parts.len());
        let mut rest: &mut [f64] = y;
        for part in &self.parts {
            let (head, tail) = std::mem::take(&mut rest).split_at_mut(part.rows.len());
            chunks.push((part, head));
            rest = tail;
        }
        chunks
            .into_par_iter()
            .for_each(|(part, out)| part.mul_vec_into(x, out));
    }

    /// r = b - A * x
    pub fn residual(&self, b: &[f64], x: &[f64], r: &mut [f64]) {
        self.mul_vec(x, r);
        for (ri, bi) in r.iter_mut().zip(b) {
            *ri = bi - *ri;
        }
    }
}
