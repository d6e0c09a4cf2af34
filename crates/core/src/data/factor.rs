use std::collections::BTreeSet;

use indexmap::IndexMap;

/// A grouping factor: one raw level index per sample, normalised to dense
/// 0-based codes.
///
/// Distinct observed indices are sorted ascending and assigned consecutive
/// codes, so an index vector that already covers `0..l` is left unchanged
/// while a sparse one such as `[10, 3, 10, 7]` becomes `[2, 0, 2, 1]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupingFactor {
    /// The caller-supplied index for each sample.
    indices: Vec<usize>,
    /// Maps observed index -> code, ordered by code.
    levels: IndexMap<usize, usize>,
    /// The code for each sample.
    codes: Vec<usize>,
}

impl GroupingFactor {
    /// Create a `GroupingFactor` from raw per-sample level indices.
    ///
    /// # Examples
    /// ```
    /// use mixed_model_core::data::GroupingFactor;
    ///
    /// let factor = GroupingFactor::new(vec![0, 1, 1, 0, 0]);
    /// assert_eq!(factor.n_levels(), 2);
    /// assert_eq!(factor.codes(), &[0, 1, 1, 0, 0]);
    /// ```
    pub fn new(indices: Vec<usize>) -> Self {
        let distinct: BTreeSet<usize> = indices.iter().copied().collect();
        let levels: IndexMap<usize, usize> = distinct
            .into_iter()
            .enumerate()
            .map(|(code, value)| (value, code))
            .collect();
        let codes = indices.iter().map(|value| levels[value]).collect();

        GroupingFactor {
            indices,
            levels,
            codes,
        }
    }

    /// Number of distinct levels, l.
    pub fn n_levels(&self) -> usize {
        self.levels.len()
    }

    /// The original indices, as supplied.
    pub fn indices(&self) -> &[usize] {
        &self.indices
    }

    /// Dense 0-based level code per sample.
    pub fn codes(&self) -> &[usize] {
        &self.codes
    }

    /// Ordered map of observed index -> code.
    pub fn levels(&self) -> &IndexMap<usize, usize> {
        &self.levels
    }

    /// Returns the observed index behind a code, or `None` if the code is
    /// out of range.
    pub fn level_value(&self, code: usize) -> Option<usize> {
        self.levels.get_index(code).map(|(&value, _)| value)
    }

    /// `true` when the observed indices are exactly `0..n_levels()`, i.e.
    /// normalisation did not change anything.
    pub fn is_dense(&self) -> bool {
        self.levels.iter().all(|(&value, &code)| value == code)
    }

    /// Number of samples.
    pub fn len(&self) -> usize {
        self.codes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }
}
