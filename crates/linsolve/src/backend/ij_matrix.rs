//! IJ (row/column indexed) assembly interface of the native backend.
//!
//! Assembly follows a fixed sequence per partition:
//!
//! 1. `IjMatrix::create(rows, global_cols)` claims a contiguous range of
//!    global rows.
//! 2. `set_row_sizes` declares the number of non-zeros of every owned row.
//! 3. `set_values` inserts (column, value) pairs row by row. Repeated columns
//!    within a row are added together.
//! 4. `assemble` freezes the object into a [`LocalCsr`] block. The IJ object
//!    is consumed, so nothing can be inserted after the commit.
//!
//! Any attempt to insert before step 2, outside the owned rows, outside the
//! column range, or beyond the declared row size is rejected.

use std::ops::Range;

use tracing::trace;

use super::par_csr::LocalCsr;
use super::traits::BackendError;

#[derive(Debug)]
pub struct IjMatrix {
    rows: Range<usize>,
    global_cols: usize,
    row_sizes: Option<Vec<usize>>,
    entries: Vec<Vec<(usize, f64)>>,
}

impl IjMatrix {
    /// Create an IJ matrix owning global rows `rows` of a matrix with
    /// `global_cols` columns.
    pub fn create(rows: Range<usize>, global_cols: usize) -> Result<Self, BackendError> {
        if rows.is_empty() {
            return Err(BackendError(format!(
                "Empty or inverted row range {}..{}",
                rows.start, rows.end
            )));
        }
        if global_cols == 0 {
            return Err("Matrix must have at least one column".into());
        }
        let n_local = rows.len();
        Ok(Self {
            rows,
            global_cols,
            row_sizes: None,
            entries: vec![Vec::new(); n_local],
        })
    }

    pub fn rows(&self) -> Range<usize> {
        self.rows.clone()
    }

    /// Declare how many distinct columns each owned row will hold.
    pub fn set_row_sizes(&mut self, sizes: &[usize]) -> Result<(), BackendError> {
        if sizes.len() != self.rows.len() {
            return Err(BackendError(format!(
                "Expected {} row sizes, got {}",
                self.rows.len(),
                sizes.len()
            )));
        }
        for (row, &size) in self.entries.iter_mut().zip(sizes) {
            row.reserve_exact(size);
        }
        self.row_sizes = Some(sizes.to_vec());
        Ok(())
    }

    /// Add `values[k]` at `(row, cols[k])` for every k.
    pub fn set_values(&mut self, row: usize, cols: &[usize], values: &[f64]) -> Result<(), BackendError> {
        let Some(sizes) = &self.row_sizes else {
            return Err("Row sizes must be declared before inserting values".into());
        };
        if !self.rows.contains(&row) {
            return Err(BackendError(format!(
                "Row {} outside owned range {}..{}",
                row, self.rows.start, self.rows.end
            )));
        }
        if cols.len() != values.len() {
            return Err(BackendError(format!(
                "Row {}: {} column indices but {} values",
                row,
                cols.len(),
                values.len()
            )));
        }

        let local = row - self.rows.start;
        let capacity = sizes[local];
        let entries = &mut self.entries[local];
        for (&col, &value) in cols.iter().zip(values) {
            if col >= self.global_cols {
                return Err(BackendError(format!(
                    "Column {} out of bounds for {} columns (row {})",
                    col, self.global_cols, row
                )));
            }
            if let Some(entry) = entries.iter_mut().find(|(c, _)| *c == col) {
                entry.1 += value;
            } else if entries.len() < capacity {
                entries.push((col, value));
            } else {
                return Err(BackendError(format!(
                    "Row {} exceeds its declared size of {} entries",
                    row, capacity
                )));
            }
        }
        Ok(())
    }

    /// Commit the insertions and produce the compressed block.
    pub fn assemble(self) -> Result<LocalCsr, BackendError> {
        if self.row_sizes.is_none() {
            return Err("Cannot assemble before row sizes are declared".into());
        }

        let nnz: usize = self.entries.iter().map(Vec::len).sum();
        let mut row_offsets = Vec::with_capacity(self.entries.len() + 1);
        let mut col_indices = Vec::with_capacity(nnz);
        let mut values = Vec::with_capacity(nnz);
        row_offsets.push(0);

        for mut row in self.entries {
            row.sort_unstable_by_key(|&(c, _)| c);
            for (c, v) in row {
                col_indices.push(c);
                values.push(v);
            }
            row_offsets.push(col_indices.len());
        }

        trace!(
            rows = ?self.rows,
            nnz,
            "IJ partition assembled"
        );

        Ok(LocalCsr {
            rows: self.rows,
            row_offsets,
            col_indices,
            values,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn two_phase_assembly_sorts_and_sums() {
        let mut ij = IjMatrix::create(2..4, 4).unwrap();
        ij.set_row_sizes(&[2, 1]).unwrap();
        ij.set_values(2, &[3, 1], &[5.0, 1.0]).unwrap();
        ij.set_values(2, &[3], &[0.5]).unwrap();
        ij.set_values(3, &[0], &[7.0]).unwrap();

        let local = ij.assemble().unwrap();
        assert_eq!(local.rows(), 2..4);
        assert_eq!(local.row_offsets, vec![0, 2, 3]);
        assert_eq!(local.col_indices, vec![1, 3, 0]);
        assert_eq!(local.values, vec![1.0, 5.5, 7.0]);
    }

    #[test]
    fn inserting_before_row_sizes_fails() {
        let mut ij = IjMatrix::create(0..2, 2).unwrap();
        assert!(ij.set_values(0, &[0], &[1.0]).is_err());
    }

    #[test]
    fn assembling_before_row_sizes_fails() {
        let ij = IjMatrix::create(0..2, 2).unwrap();
        assert!(ij.assemble().is_err());
    }

    #[test]
    fn foreign_rows_and_columns_are_rejected() {
        let mut ij = IjMatrix::create(0..2, 2).unwrap();
        ij.set_row_sizes(&[1, 1]).unwrap();
        assert!(ij.set_values(2, &[0], &[1.0]).is_err());
        assert!(ij.set_values(0, &[2], &[1.0]).is_err());
        assert!(ij.set_values(0, &[0, 1], &[1.0]).is_err());
    }

    #[test]
    fn declared_row_size_is_a_hard_limit() {
        let mut ij = IjMatrix::create(0..1, 3).unwrap();
        ij.set_row_sizes(&[1]).unwrap();
        ij.set_values(0, &[0], &[1.0]).unwrap();
        assert!(ij.set_values(0, &[1], &[1.0]).is_err());
    }

    #[test]
    fn empty_row_range_is_rejected() {
        assert!(IjMatrix::create(3..3, 4).is_err());
    }
}
