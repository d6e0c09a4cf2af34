use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Every structural dimension of a mixed model, captured at once.
///
/// Per-term maps are keyed by term name in term order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelDimensions {
    /// n
    pub number_samples: usize,
    /// p
    pub number_fixed_effect_columns: usize,
    pub number_random_effect_terms: usize,
    /// p_i
    pub number_raw_random_effects_columns_per_term: IndexMap<String, usize>,
    /// l_i
    pub number_grouping_factor_levels_per_term: IndexMap<String, usize>,
    /// q_i = p_i * l_i
    pub number_random_effects_columns_per_term: IndexMap<String, usize>,
    /// q
    pub number_random_effects_columns: usize,
    pub number_covariance_parameters_per_term: IndexMap<String, usize>,
    pub number_covariance_parameters: usize,
}
