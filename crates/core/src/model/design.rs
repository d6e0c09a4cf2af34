use crate::data::GroupingFactor;
use crate::matrix::TripletBuilder;
use crate::types::{DenseMatrix, SparseMat};

use super::term::RandomEffectTerm;

/// Build the grouping-factor indicator matrix for one factor.
///
/// The result is an (n x l) CSR matrix with a single 1 per row: for sample
/// i with level code k, J[i, k] = 1.
pub fn build_grouping_factor_matrix(factor: &GroupingFactor) -> SparseMat {
    let n = factor.len();
    let mut builder = TripletBuilder::with_capacity(n, factor.n_levels(), n);
    for (i, &code) in factor.codes().iter().enumerate() {
        builder.add(i, code, 1.0);
    }
    builder.to_csr()
}

/// Build the random-effects model matrix (Z_i) for one term.
///
/// Z_i is (n x p*l), laid out in blocks of p columns per level: for sample i
/// with level code k, Z_i[i, k*p + j] = raw[i, j]. Exact zeros in the raw
/// matrix are not stored. For a random intercept this equals the
/// grouping-factor indicator matrix.
pub fn build_random_effects_matrix(term: &RandomEffectTerm) -> SparseMat {
    let raw: &DenseMatrix = term.raw_matrix();
    let factor = term.grouping();
    let n = factor.len();
    let p = term.number_raw_columns();

    let mut builder =
        TripletBuilder::with_capacity(n, term.number_random_effects_columns(), n * p);
    for (i, &code) in factor.codes().iter().enumerate() {
        for j in 0..p {
            let val = raw[(i, j)];
            if val != 0.0 {
                builder.add(i, code * p + j, val);
            }
        }
    }
    builder.to_csr()
}

/// Build the combined Z matrix from per-term blocks.
/// Z = [Z1 | Z2 | ... | Zk] (horizontal concatenation).
pub fn build_combined_random_design<'a, I>(z_blocks: I, n: usize) -> SparseMat
where
    I: IntoIterator<Item = &'a SparseMat>,
    I::IntoIter: Clone,
{
    let blocks = z_blocks.into_iter();
    let total_cols: usize = blocks.clone().map(|z| z.cols()).sum();
    let total_nnz: usize = blocks.clone().map(|z| z.nnz()).sum();

    let mut builder = TripletBuilder::with_capacity(n, total_cols, total_nnz);
    let mut col_offset = 0;
    for z in blocks {
        for (val, (row, col)) in z.iter() {
            builder.add(row, col_offset + col, *val);
        }
        col_offset += z.cols();
    }

    builder.to_csr()
}
