use std::sync::OnceLock;

use indexmap::IndexMap;
use tracing::{debug, trace, warn};

use crate::error::{ModelError, Result};
use crate::types::{DenseMatrix, DenseVector, SparseMat};

use super::design::{
    build_combined_random_design, build_grouping_factor_matrix, build_random_effects_matrix,
};
use super::dimensions::ModelDimensions;
use super::term::RandomEffectTerm;

/// The structural description of a linear mixed model
/// `y = X*beta + Z*b + e`.
///
/// Holds the response, the fixed-effects matrix and the random-effects terms,
/// and derives every dimension a fitting routine needs. Inputs are validated
/// once at construction and never change afterwards, so the sparse design
/// matrices are built on first use and cached on the instance.
#[derive(Debug, Clone)]
pub struct MixedModelSpec {
    response: DenseVector,
    fixed_effects: DenseMatrix,
    terms: IndexMap<String, RandomEffectTerm>,
    grouping_factor_matrices: OnceLock<IndexMap<String, SparseMat>>,
    random_effects_matrices: OnceLock<IndexMap<String, SparseMat>>,
}

impl MixedModelSpec {
    /// Create a model from a response vector, a fixed-effects matrix and an
    /// ordered mapping of term name to term.
    ///
    /// Fails with [`ModelError::DimensionMismatch`] when any matrix row count
    /// or grouping vector length differs from the response length, and with
    /// [`ModelError::ModelSpec`] when there are no samples, no fixed-effect
    /// columns, or a term without raw columns.
    pub fn new(
        response: DenseVector,
        fixed_effects: DenseMatrix,
        terms: IndexMap<String, RandomEffectTerm>,
    ) -> Result<Self> {
        let n = response.len();
        if n == 0 {
            return Err(ModelError::ModelSpec("Response vector is empty".into()));
        }
        if fixed_effects.nrows() != n {
            return Err(ModelError::DimensionMismatch {
                expected: n,
                got: fixed_effects.nrows(),
                context: "fixed effects matrix rows".into(),
            });
        }
        if fixed_effects.ncols() == 0 {
            return Err(ModelError::ModelSpec(
                "Fixed effects matrix has no columns".into(),
            ));
        }
        for (name, term) in &terms {
            validate_term(name, term, n)?;
        }

        debug!(
            n,
            p = fixed_effects.ncols(),
            terms = terms.len(),
            "Constructed mixed model specification"
        );

        Ok(Self {
            response,
            fixed_effects,
            terms,
            grouping_factor_matrices: OnceLock::new(),
            random_effects_matrices: OnceLock::new(),
        })
    }

    /// Create a model from two parallel mappings keyed by term name: raw
    /// random-effects matrices and grouping-factor indices.
    ///
    /// Both mappings must name exactly the same terms; otherwise this fails
    /// with [`ModelError::TermKeySetMismatch`]. Term order follows
    /// `raw_matrices`.
    pub fn from_term_maps(
        response: DenseVector,
        fixed_effects: DenseMatrix,
        raw_matrices: IndexMap<String, DenseMatrix>,
        mut grouping_indices: IndexMap<String, Vec<usize>>,
    ) -> Result<Self> {
        let mut terms = IndexMap::with_capacity(raw_matrices.len());
        let mut missing_indices = Vec::new();

        for (name, raw) in raw_matrices {
            match grouping_indices.shift_remove(&name) {
                Some(indices) => {
                    terms.insert(name, RandomEffectTerm::new(raw, indices));
                }
                None => missing_indices.push(name),
            }
        }
        let missing_matrices: Vec<String> = grouping_indices.into_keys().collect();

        if !missing_indices.is_empty() || !missing_matrices.is_empty() {
            return Err(ModelError::TermKeySetMismatch {
                missing_indices,
                missing_matrices,
            });
        }

        Self::new(response, fixed_effects, terms)
    }

    pub fn response_vector(&self) -> &DenseVector {
        &self.response
    }

    pub fn fixed_effects_matrix(&self) -> &DenseMatrix {
        &self.fixed_effects
    }

    pub fn terms(&self) -> &IndexMap<String, RandomEffectTerm> {
        &self.terms
    }

    pub fn term(&self, name: &str) -> Option<&RandomEffectTerm> {
        self.terms.get(name)
    }

    /// Raw random-effects matrix per term.
    pub fn raw_random_effects_matrices(&self) -> IndexMap<&str, &DenseMatrix> {
        self.terms
            .iter()
            .map(|(name, term)| (name.as_str(), term.raw_matrix()))
            .collect()
    }

    /// Grouping-factor indices per term, as supplied.
    pub fn grouping_factor_indices(&self) -> IndexMap<&str, &[usize]> {
        self.terms
            .iter()
            .map(|(name, term)| (name.as_str(), term.grouping().indices()))
            .collect()
    }

    /// Number of samples, n.
    pub fn number_samples(&self) -> usize {
        self.response.len()
    }

    /// Number of columns, p, of the fixed-effects model matrix.
    pub fn number_fixed_effect_columns(&self) -> usize {
        self.fixed_effects.ncols()
    }

    pub fn number_random_effect_terms(&self) -> usize {
        self.terms.len()
    }

    /// Number of columns, p_i, in each raw random-effects matrix.
    pub fn number_raw_random_effects_columns_per_term(&self) -> IndexMap<String, usize> {
        self.per_term(RandomEffectTerm::number_raw_columns)
    }

    /// Number of levels, l_i, of each term's grouping factor.
    pub fn number_grouping_factor_levels_per_term(&self) -> IndexMap<String, usize> {
        self.per_term(RandomEffectTerm::number_levels)
    }

    /// Number of columns, q_i = p_i * l_i, of each term's random-effects matrix.
    pub fn number_random_effects_columns_per_term(&self) -> IndexMap<String, usize> {
        self.per_term(RandomEffectTerm::number_random_effects_columns)
    }

    /// Number of columns, q, of the random-effects model matrix.
    pub fn number_random_effects_columns(&self) -> usize {
        self.terms
            .values()
            .map(RandomEffectTerm::number_random_effects_columns)
            .sum()
    }

    /// Covariance parameters per term, p_i * (p_i + 1) / 2.
    pub fn number_covariance_parameters_per_term(&self) -> IndexMap<String, usize> {
        self.per_term(RandomEffectTerm::number_covariance_parameters)
    }

    pub fn number_covariance_parameters(&self) -> usize {
        self.terms
            .values()
            .map(RandomEffectTerm::number_covariance_parameters)
            .sum()
    }

    /// Snapshot of all dimensions.
    pub fn dimensions(&self) -> ModelDimensions {
        ModelDimensions {
            number_samples: self.number_samples(),
            number_fixed_effect_columns: self.number_fixed_effect_columns(),
            number_random_effect_terms: self.number_random_effect_terms(),
            number_raw_random_effects_columns_per_term: self
                .number_raw_random_effects_columns_per_term(),
            number_grouping_factor_levels_per_term: self.number_grouping_factor_levels_per_term(),
            number_random_effects_columns_per_term: self.number_random_effects_columns_per_term(),
            number_random_effects_columns: self.number_random_effects_columns(),
            number_covariance_parameters_per_term: self.number_covariance_parameters_per_term(),
            number_covariance_parameters: self.number_covariance_parameters(),
        }
    }

    /// Grouping-factor indicator matrix per term: (n x l_i) CSR with a single
    /// 1 per row at the sample's level.
    ///
    /// Built on the first call; later calls return the cached matrices.
    pub fn grouping_factor_matrices(&self) -> &IndexMap<String, SparseMat> {
        self.grouping_factor_matrices.get_or_init(|| {
            debug!(terms = self.terms.len(), "Building grouping factor matrices");
            self.terms
                .iter()
                .map(|(name, term)| {
                    trace!(term = %name, levels = term.number_levels(), "Indicator matrix");
                    (name.clone(), build_grouping_factor_matrix(term.grouping()))
                })
                .collect()
        })
    }

    pub fn grouping_factor_matrix(&self, name: &str) -> Option<&SparseMat> {
        self.grouping_factor_matrices().get(name)
    }

    /// Random-effects model matrix per term: (n x q_i) CSR, one block of p_i
    /// columns per grouping level.
    ///
    /// Built on the first call; later calls return the cached matrices.
    pub fn random_effects_matrices(&self) -> &IndexMap<String, SparseMat> {
        self.random_effects_matrices.get_or_init(|| {
            debug!(
                terms = self.terms.len(),
                q = self.number_random_effects_columns(),
                "Building random effects matrices"
            );
            self.terms
                .iter()
                .map(|(name, term)| {
                    trace!(
                        term = %name,
                        columns = term.number_random_effects_columns(),
                        "Random effects matrix"
                    );
                    (name.clone(), build_random_effects_matrix(term))
                })
                .collect()
        })
    }

    /// Combined random-effects model matrix Z = [Z_1 | Z_2 | ...], (n x q).
    pub fn random_effects_matrix(&self) -> SparseMat {
        build_combined_random_design(self.random_effects_matrices().values(), self.number_samples())
    }

    fn per_term(&self, f: impl Fn(&RandomEffectTerm) -> usize) -> IndexMap<String, usize> {
        self.terms
            .iter()
            .map(|(name, term)| (name.clone(), f(term)))
            .collect()
    }
}

fn validate_term(name: &str, term: &RandomEffectTerm, n: usize) -> Result<()> {
    let raw = term.raw_matrix();
    if raw.nrows() != n {
        return Err(ModelError::DimensionMismatch {
            expected: n,
            got: raw.nrows(),
            context: format!("raw random effects matrix rows for term '{}'", name),
        });
    }
    if raw.ncols() == 0 {
        return Err(ModelError::ModelSpec(format!(
            "Random term '{}' has no raw random effects columns",
            name
        )));
    }
    let grouping = term.grouping();
    if grouping.len() != n {
        return Err(ModelError::DimensionMismatch {
            expected: n,
            got: grouping.len(),
            context: format!("grouping factor indices for term '{}'", name),
        });
    }
    if !grouping.is_dense() {
        warn!(
            term = %name,
            levels = grouping.n_levels(),
            "Grouping factor indices are not 0..levels; remapping to dense codes"
        );
    }
    Ok(())
}

/// Builder for constructing a [`MixedModelSpec`].
#[derive(Debug, Default)]
pub struct MixedModelSpecBuilder {
    response: Option<DenseVector>,
    fixed_effects: Option<DenseMatrix>,
    terms: IndexMap<String, RandomEffectTerm>,
    duplicate_term: Option<String>,
}

impl MixedModelSpecBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the response vector (y).
    pub fn response(mut self, y: Vec<f64>) -> Self {
        self.response = Some(DenseVector::from_vec(y));
        self
    }

    /// Set the fixed-effects model matrix (X).
    pub fn fixed(mut self, x: DenseMatrix) -> Self {
        self.fixed_effects = Some(x);
        self
    }

    /// Add a random-effects term.
    ///
    /// - `name`: term identifier, unique within the model
    /// - `raw_matrix`: the (n x p_i) raw random-effects matrix
    /// - `grouping_indices`: the grouping level of each sample
    pub fn random(self, name: &str, raw_matrix: DenseMatrix, grouping_indices: Vec<usize>) -> Self {
        self.random_term(name, RandomEffectTerm::new(raw_matrix, grouping_indices))
    }

    /// Add a random intercept grouped by `grouping_indices`.
    pub fn random_intercept(self, name: &str, grouping_indices: Vec<usize>) -> Self {
        self.random_term(name, RandomEffectTerm::intercept(grouping_indices))
    }

    /// Add a pre-built random-effects term.
    pub fn random_term(mut self, name: &str, term: RandomEffectTerm) -> Self {
        if self.terms.contains_key(name) {
            self.duplicate_term.get_or_insert_with(|| name.to_string());
        } else {
            self.terms.insert(name.to_string(), term);
        }
        self
    }

    /// Build the model, validating all inputs.
    pub fn build(self) -> Result<MixedModelSpec> {
        if let Some(name) = self.duplicate_term {
            return Err(ModelError::DuplicateTerm(name));
        }
        let response = self
            .response
            .ok_or_else(|| ModelError::ModelSpec("No response vector provided".into()))?;
        let fixed_effects = self
            .fixed_effects
            .ok_or_else(|| ModelError::ModelSpec("No fixed effects matrix provided".into()))?;

        MixedModelSpec::new(response, fixed_effects, self.terms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::sparse::{row_nnz, spmv};

    fn intercept_and_covariate(n: usize) -> DenseMatrix {
        DenseMatrix::from_fn(n, 2, |i, j| if j == 0 { 1.0 } else { i as f64 })
    }

    fn two_term_model() -> MixedModelSpec {
        let n = 6;
        let slope = DenseMatrix::from_fn(n, 2, |i, j| if j == 0 { 1.0 } else { 0.5 * i as f64 });
        MixedModelSpecBuilder::new()
            .response(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0])
            .fixed(intercept_and_covariate(n))
            .random_intercept("block", vec![0, 0, 1, 1, 2, 2])
            .random("subject", slope, vec![0, 1, 0, 1, 0, 1])
            .build()
            .unwrap()
    }

    #[test]
    fn test_builder_basic() {
        let model = two_term_model();
        assert_eq!(model.number_samples(), 6);
        assert_eq!(model.number_fixed_effect_columns(), 2);
        assert_eq!(model.number_random_effect_terms(), 2);
        let names: Vec<&str> = model.terms().keys().map(|s| s.as_str()).collect();
        assert_eq!(names, vec!["block", "subject"]);
    }

    #[test]
    fn test_derived_counts() {
        let model = two_term_model();
        let p = model.number_raw_random_effects_columns_per_term();
        let l = model.number_grouping_factor_levels_per_term();
        let q = model.number_random_effects_columns_per_term();
        assert_eq!(p["block"], 1);
        assert_eq!(p["subject"], 2);
        assert_eq!(l["block"], 3);
        assert_eq!(l["subject"], 2);
        assert_eq!(q["block"], 3);
        assert_eq!(q["subject"], 4);
        assert_eq!(model.number_random_effects_columns(), 7);

        let cov = model.number_covariance_parameters_per_term();
        assert_eq!(cov["block"], 1);
        assert_eq!(cov["subject"], 3);
        assert_eq!(model.number_covariance_parameters(), 4);
    }

    #[test]
    fn test_total_columns_is_sum_of_products() {
        let model = two_term_model();
        let p = model.number_raw_random_effects_columns_per_term();
        let l = model.number_grouping_factor_levels_per_term();
        let expected: usize = p.keys().map(|t| p[t] * l[t]).sum();
        assert_eq!(model.number_random_effects_columns(), expected);
    }

    #[test]
    fn test_grouping_factor_matrices_shape() {
        let model = two_term_model();
        let mats = model.grouping_factor_matrices();
        assert_eq!(mats.len(), 2);
        for (name, j) in mats {
            assert!(j.is_csr());
            assert_eq!(j.rows(), 6);
            assert_eq!(j.cols(), model.term(name).unwrap().number_levels());
            assert_eq!(row_nnz(j), vec![1; 6]);
            assert!(j.data().iter().all(|&v| v == 1.0));
        }
    }

    #[test]
    fn test_grouping_factor_matrices_cached() {
        let model = two_term_model();
        let first = model.grouping_factor_matrices();
        let second = model.grouping_factor_matrices();
        assert!(std::ptr::eq(first, second));
        assert!(std::ptr::eq(
            model.grouping_factor_matrix("block").unwrap(),
            &first["block"]
        ));
        assert!(model.grouping_factor_matrix("missing").is_none());
    }

    #[test]
    fn test_random_effects_matrices_cached() {
        let model = two_term_model();
        assert!(std::ptr::eq(
            model.random_effects_matrices(),
            model.random_effects_matrices()
        ));
    }

    #[test]
    fn test_caches_are_per_instance() {
        let a = MixedModelSpecBuilder::new()
            .response(vec![0.0; 4])
            .fixed(DenseMatrix::from_element(4, 1, 1.0))
            .random_intercept("g", vec![0, 1, 0, 1])
            .build()
            .unwrap();
        let b = MixedModelSpecBuilder::new()
            .response(vec![0.0; 4])
            .fixed(DenseMatrix::from_element(4, 1, 1.0))
            .random_intercept("g", vec![0, 1, 2, 2])
            .build()
            .unwrap();

        let ja = &a.grouping_factor_matrices()["g"];
        let jb = &b.grouping_factor_matrices()["g"];
        assert_eq!(ja.cols(), 2);
        assert_eq!(jb.cols(), 3);
        assert_eq!(spmv(ja, &[1.0, 2.0]), vec![1.0, 2.0, 1.0, 2.0]);
        assert_eq!(spmv(jb, &[1.0, 2.0, 3.0]), vec![1.0, 2.0, 3.0, 3.0]);
    }

    #[test]
    fn test_clone_keeps_inputs() {
        let model = two_term_model();
        model.grouping_factor_matrices();
        let copy = model.clone();
        assert_eq!(copy.dimensions(), model.dimensions());
        assert_eq!(copy.grouping_factor_matrices(), model.grouping_factor_matrices());
    }

    #[test]
    fn test_combined_random_effects_matrix() {
        let model = two_term_model();
        let z = model.random_effects_matrix();
        assert_eq!(z.rows(), 6);
        assert_eq!(z.cols(), 7);
        // Block intercept (1) + subject intercept (1) + subject slope when nonzero.
        assert_eq!(row_nnz(&z), vec![2, 3, 3, 3, 3, 3]);
    }

    #[test]
    fn test_no_random_terms() {
        let model = MixedModelSpecBuilder::new()
            .response(vec![1.0, 2.0, 3.0])
            .fixed(DenseMatrix::from_element(3, 1, 1.0))
            .build()
            .unwrap();
        assert_eq!(model.number_random_effect_terms(), 0);
        assert_eq!(model.number_random_effects_columns(), 0);
        assert_eq!(model.number_covariance_parameters(), 0);
        assert!(model.grouping_factor_matrices().is_empty());
        let z = model.random_effects_matrix();
        assert_eq!((z.rows(), z.cols()), (3, 0));
    }

    #[test]
    fn test_accessors_return_inputs() {
        let model = two_term_model();
        assert_eq!(model.response_vector().len(), 6);
        assert_eq!(model.fixed_effects_matrix().shape(), (6, 2));
        let raw = model.raw_random_effects_matrices();
        assert_eq!(raw["subject"].ncols(), 2);
        let idx = model.grouping_factor_indices();
        assert_eq!(idx["block"], &[0, 0, 1, 1, 2, 2]);
    }

    #[test]
    fn test_fixed_rows_mismatch() {
        let err = MixedModelSpecBuilder::new()
            .response(vec![1.0, 2.0, 3.0])
            .fixed(DenseMatrix::from_element(4, 1, 1.0))
            .build()
            .unwrap_err();
        assert!(matches!(
            err,
            ModelError::DimensionMismatch { expected: 3, got: 4, .. }
        ));
    }

    #[test]
    fn test_grouping_length_mismatch() {
        let err = MixedModelSpecBuilder::new()
            .response(vec![1.0, 2.0, 3.0])
            .fixed(DenseMatrix::from_element(3, 1, 1.0))
            .random("g", DenseMatrix::from_element(3, 1, 1.0), vec![0, 1])
            .build()
            .unwrap_err();
        match err {
            ModelError::DimensionMismatch { expected, got, context } => {
                assert_eq!((expected, got), (3, 2));
                assert!(context.contains("'g'"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_raw_rows_mismatch() {
        let err = MixedModelSpecBuilder::new()
            .response(vec![1.0, 2.0, 3.0])
            .fixed(DenseMatrix::from_element(3, 1, 1.0))
            .random("g", DenseMatrix::from_element(2, 1, 1.0), vec![0, 1, 1])
            .build()
            .unwrap_err();
        assert!(matches!(
            err,
            ModelError::DimensionMismatch { expected: 3, got: 2, .. }
        ));
    }

    #[test]
    fn test_term_without_columns_rejected() {
        let err = MixedModelSpecBuilder::new()
            .response(vec![1.0, 2.0])
            .fixed(DenseMatrix::from_element(2, 1, 1.0))
            .random("g", DenseMatrix::zeros(2, 0), vec![0, 1])
            .build()
            .unwrap_err();
        assert!(matches!(err, ModelError::ModelSpec(_)));
    }

    #[test]
    fn test_empty_response_rejected() {
        let err = MixedModelSpecBuilder::new()
            .response(Vec::new())
            .fixed(DenseMatrix::zeros(0, 1))
            .build()
            .unwrap_err();
        assert!(matches!(err, ModelError::ModelSpec(_)));
    }

    #[test]
    fn test_no_fixed_columns_rejected() {
        let err = MixedModelSpecBuilder::new()
            .response(vec![1.0, 2.0])
            .fixed(DenseMatrix::zeros(2, 0))
            .build()
            .unwrap_err();
        assert!(matches!(err, ModelError::ModelSpec(_)));
    }

    #[test]
    fn test_builder_missing_inputs() {
        let no_response = MixedModelSpecBuilder::new()
            .fixed(DenseMatrix::from_element(2, 1, 1.0))
            .build();
        assert!(matches!(no_response, Err(ModelError::ModelSpec(_))));

        let no_fixed = MixedModelSpecBuilder::new().response(vec![1.0]).build();
        assert!(matches!(no_fixed, Err(ModelError::ModelSpec(_))));
    }

    #[test]
    fn test_builder_duplicate_term() {
        let err = MixedModelSpecBuilder::new()
            .response(vec![1.0, 2.0])
            .fixed(DenseMatrix::from_element(2, 1, 1.0))
            .random_intercept("g", vec![0, 1])
            .random_intercept("g", vec![0, 0])
            .build()
            .unwrap_err();
        assert_eq!(err, ModelError::DuplicateTerm("g".into()));
    }

    #[test]
    fn test_from_term_maps_key_mismatch() {
        let mut raw = IndexMap::new();
        raw.insert("a".to_string(), DenseMatrix::from_element(2, 1, 1.0));
        raw.insert("b".to_string(), DenseMatrix::from_element(2, 1, 1.0));
        let mut indices = IndexMap::new();
        indices.insert("a".to_string(), vec![0, 1]);
        indices.insert("c".to_string(), vec![0, 1]);

        let err = MixedModelSpec::from_term_maps(
            DenseVector::from_vec(vec![1.0, 2.0]),
            DenseMatrix::from_element(2, 1, 1.0),
            raw,
            indices,
        )
        .unwrap_err();
        assert_eq!(
            err,
            ModelError::TermKeySetMismatch {
                missing_indices: vec!["b".into()],
                missing_matrices: vec!["c".into()],
            }
        );
    }

    #[test]
    fn test_from_term_maps_follows_raw_order() {
        let mut raw = IndexMap::new();
        raw.insert("second".to_string(), DenseMatrix::from_element(3, 1, 1.0));
        raw.insert("first".to_string(), DenseMatrix::from_element(3, 2, 1.0));
        let mut indices = IndexMap::new();
        indices.insert("first".to_string(), vec![0, 0, 1]);
        indices.insert("second".to_string(), vec![0, 1, 2]);

        let model = MixedModelSpec::from_term_maps(
            DenseVector::from_vec(vec![1.0, 2.0, 3.0]),
            DenseMatrix::from_element(3, 1, 1.0),
            raw,
            indices,
        )
        .unwrap();
        let names: Vec<&str> = model.terms().keys().map(|s| s.as_str()).collect();
        assert_eq!(names, vec!["second", "first"]);
        assert_eq!(model.number_random_effects_columns(), 3 + 4);
    }

    #[test]
    fn test_model_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<MixedModelSpec>();
    }
}
