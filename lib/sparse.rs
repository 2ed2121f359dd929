//! Compressed sparse row matrices for block operators and sector matrices.

use ndarray as nd;
use num_complex::Complex64 as C64;
use num_traits::Zero;
use crate::error::{ DiagError, DiagResult };

/// Sparse complex matrix in compressed sparse row format.
#[derive(Clone, Debug, PartialEq)]
pub struct CsrMatrix {
    pub nrows: usize,
    pub ncols: usize,
    pub row_ptr: Vec<usize>,
    pub col_indices: Vec<usize>,
    pub values: Vec<C64>,
}

impl CsrMatrix {
    /// An all-zero matrix.
    pub fn zeros(nrows: usize, ncols: usize) -> Self {
        Self {
            nrows,
            ncols,
            row_ptr: vec![0; nrows + 1],
            col_indices: Vec::new(),
            values: Vec::new(),
        }
    }

    /// Build from `(row, col, value)` triplets.
    ///
    /// Duplicate entries are summed and exact zeros are dropped.
    pub fn from_triplets(
        nrows: usize,
        ncols: usize,
        triplets: Vec<(usize, usize, C64)>,
    ) -> DiagResult<Self>
    {
        let mut rows: Vec<Vec<(usize, C64)>> = vec![Vec::new(); nrows];
        for (i, j, a) in triplets.into_iter() {
            if i >= nrows || j >= ncols {
                return Err(DiagError::Shape(format!(
                    "entry ({}, {}) outside of a {}x{} matrix", i, j, nrows, ncols
                )));
            }
            rows[i].push((j, a));
        }
        let mut row_ptr: Vec<usize> = Vec::with_capacity(nrows + 1);
        let mut col_indices: Vec<usize> = Vec::new();
        let mut values: Vec<C64> = Vec::new();
        row_ptr.push(0);
        for row in rows.iter_mut() {
            row.sort_by_key(|(j, _)| *j);
            let mut merged: Vec<(usize, C64)> = Vec::with_capacity(row.len());
            for (j, a) in row.drain(..) {
                match merged.last_mut() {
                    Some(last) if last.0 == j => { last.1 += a; },
                    _ => { merged.push((j, a)); },
                }
            }
            for (j, a) in merged.into_iter() {
                if a.is_zero() { continue; }
                col_indices.push(j);
                values.push(a);
            }
            row_ptr.push(values.len());
        }
        Ok(Self { nrows, ncols, row_ptr, col_indices, values })
    }

    /// Convert a dense matrix, keeping only non-zero elements.
    pub fn from_dense(A: &nd::Array2<C64>) -> Self {
        let (nrows, ncols) = A.dim();
        let mut row_ptr: Vec<usize> = Vec::with_capacity(nrows + 1);
        let mut col_indices: Vec<usize> = Vec::new();
        let mut values: Vec<C64> = Vec::new();
        row_ptr.push(0);
        for row in A.rows() {
            for (j, a) in row.iter().enumerate() {
                if a.is_zero() { continue; }
                col_indices.push(j);
                values.push(*a);
            }
            row_ptr.push(values.len());
        }
        Self { nrows, ncols, row_ptr, col_indices, values }
    }

    pub fn to_dense(&self) -> nd::Array2<C64> {
        let mut A: nd::Array2<C64> = nd::Array2::zeros((self.nrows, self.ncols));
        for i in 0..self.nrows {
            for (j, a) in self.row(i) {
                A[[i, j]] += a;
            }
        }
        A
    }

    pub fn shape(&self) -> (usize, usize) { (self.nrows, self.ncols) }

    /// Number of stored elements.
    pub fn nnz(&self) -> usize { self.values.len() }

    /// Stored `(column, value)` pairs of row `i`.
    pub fn row(&self, i: usize) -> impl Iterator<Item = (usize, C64)> + '_ {
        let range = self.row_ptr[i]..self.row_ptr[i + 1];
        self.col_indices[range.clone()].iter().copied()
            .zip(self.values[range].iter().copied())
    }

    /// Structural consistency: monotone row pointers covering all stored
    /// elements and in-range column indices.
    pub fn is_valid(&self) -> bool {
        self.row_ptr.len() == self.nrows + 1
            && self.row_ptr.first() == Some(&0)
            && self.row_ptr.last() == Some(&self.values.len())
            && self.col_indices.len() == self.values.len()
            && self.row_ptr.windows(2).all(|w| w[0] <= w[1])
            && self.col_indices.iter().all(|j| *j < self.ncols)
    }

    /// Conjugate transpose.
    pub fn dagger(&self) -> Self {
        let mut counts: Vec<usize> = vec![0; self.ncols + 1];
        self.col_indices.iter().for_each(|j| { counts[j + 1] += 1; });
        for j in 0..self.ncols { counts[j + 1] += counts[j]; }
        let row_ptr = counts.clone();
        let mut cursor = counts;
        let mut col_indices: Vec<usize> = vec![0; self.nnz()];
        let mut values: Vec<C64> = vec![C64::zero(); self.nnz()];
        for i in 0..self.nrows {
            for (j, a) in self.row(i) {
                let k = cursor[j];
                cursor[j] += 1;
                col_indices[k] = i;
                values[k] = a.conj();
            }
        }
        Self {
            nrows: self.ncols,
            ncols: self.nrows,
            row_ptr,
            col_indices,
            values,
        }
    }

    /// Symmetric reordering `B[a, b] = A[perm[a], perm[b]]` of a square
    /// matrix.
    pub fn permuted(&self, perm: &[usize]) -> DiagResult<Self> {
        if self.nrows != self.ncols || perm.len() != self.nrows {
            return Err(DiagError::Shape(format!(
                "cannot permute a {}x{} matrix by {} indices",
                self.nrows, self.ncols, perm.len(),
            )));
        }
        let mut inverse: Vec<usize> = vec![0; perm.len()];
        perm.iter().enumerate().for_each(|(a, i)| { inverse[*i] = a; });
        let inverse = &inverse;
        let triplets: Vec<(usize, usize, C64)>
            = perm.iter().enumerate()
            .flat_map(move |(a, i)| {
                self.row(*i).map(move |(j, x)| (a, inverse[j], x))
            })
            .collect();
        Self::from_triplets(self.nrows, self.ncols, triplets)
    }

    /// Accumulate `out += self · x`.
    pub fn matvec_into(&self, out: &mut nd::Array1<C64>, x: &nd::Array1<C64>) {
        for (i, out_i) in out.iter_mut().enumerate().take(self.nrows) {
            *out_i += self.row(i).map(|(j, a)| a * x[j]).sum::<C64>();
        }
    }
}
