use crate::data::GroupingFactor;
use crate::types::DenseMatrix;

/// One random-effects term: a raw model matrix paired with the grouping
/// factor its columns vary over.
///
/// A random intercept has a single column of ones; an intercept plus slope
/// has two columns. The term contributes `p * l` columns to the random
/// effects model matrix and `p * (p + 1) / 2` covariance parameters, where
/// `p` is the raw column count and `l` the number of grouping levels.
#[derive(Debug, Clone, PartialEq)]
pub struct RandomEffectTerm {
    raw_matrix: DenseMatrix,
    grouping: GroupingFactor,
}

impl RandomEffectTerm {
    pub fn new(raw_matrix: DenseMatrix, grouping_indices: Vec<usize>) -> Self {
        Self {
            raw_matrix,
            grouping: GroupingFactor::new(grouping_indices),
        }
    }

    /// Build a random intercept term (a single column of ones).
    pub fn intercept(grouping_indices: Vec<usize>) -> Self {
        let n = grouping_indices.len();
        Self::new(DenseMatrix::from_element(n, 1, 1.0), grouping_indices)
    }

    pub fn raw_matrix(&self) -> &DenseMatrix {
        &self.raw_matrix
    }

    pub fn grouping(&self) -> &GroupingFactor {
        &self.grouping
    }

    /// Raw random-effects columns, p_i.
    pub fn number_raw_columns(&self) -> usize {
        self.raw_matrix.ncols()
    }

    /// Grouping-factor levels, l_i.
    pub fn number_levels(&self) -> usize {
        self.grouping.n_levels()
    }

    /// Columns in this term's random-effects model matrix, q_i = p_i * l_i.
    pub fn number_random_effects_columns(&self) -> usize {
        self.number_raw_columns() * self.number_levels()
    }

    /// Free entries in a symmetric p_i x p_i covariance matrix.
    pub fn number_covariance_parameters(&self) -> usize {
        let p = self.number_raw_columns();
        p * (p + 1) / 2
    }

    /// (row, col) of each covariance parameter within the lower triangle of
    /// the p_i x p_i covariance factor, in column-major order.
    pub fn covariance_parameter_positions(&self) -> Vec<(usize, usize)> {
        let p = self.number_raw_columns();
        let mut positions = Vec::with_capacity(self.number_covariance_parameters());
        for col in 0..p {
            for row in col..p {
                positions.push((row, col));
            }
        }
        positions
    }
}
