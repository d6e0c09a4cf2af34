use sprs::TriMat;

use crate::types::SparseMat;

/// Incremental sparse matrix builder using triplet (COO) format.
///
/// Every design matrix here has at most one entry per (row, col), so the
/// triplets convert to CSR without any summing.
#[derive(Debug)]
pub struct TripletBuilder {
    triplet: TriMat<f64>,
}

impl TripletBuilder {
    /// Create a builder for an (nrow x ncol) matrix with room for `nnz` entries.
    pub fn with_capacity(nrow: usize, ncol: usize, nnz: usize) -> Self {
        Self {
            triplet: TriMat::with_capacity((nrow, ncol), nnz),
        }
    }

    /// Add a value at (row, col).
    pub fn add(&mut self, row: usize, col: usize, val: f64) {
        self.triplet.add_triplet(row, col, val);
    }

    /// Convert to a CSR (Compressed Sparse Row) matrix.
    pub fn to_csr(&self) -> SparseMat {
        self.triplet.to_csr()
    }
}

/// Multiply a sparse matrix by a dense vector: result = A * x.
pub fn spmv(a: &SparseMat, x: &[f64]) -> Vec<f64> {
    assert_eq!(a.cols(), x.len());

    let mut result = vec![0.0; a.rows()];
    for (val, (row, col)) in a.iter() {
        result[row] += val * x[col];
    }
    result
}

/// Number of stored entries in each row.
pub fn row_nnz(a: &SparseMat) -> Vec<usize> {
    let mut counts = vec![0; a.rows()];
    for (_, (row, _)) in a.iter() {
        counts[row] += 1;
    }
    counts
}
