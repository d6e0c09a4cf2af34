use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ModelError {
    #[error("Dimension mismatch: expected {expected}, got {got} in {context}")]
    DimensionMismatch {
        expected: usize,
        got: usize,
        context: String,
    },

    #[error(
        "Random term names differ between raw matrices and grouping indices \
         (without indices: {missing_indices:?}, without raw matrix: {missing_matrices:?})"
    )]
    TermKeySetMismatch {
        /// Terms that have a raw matrix but no grouping indices.
        missing_indices: Vec<String>,
        /// Terms that have grouping indices but no raw matrix.
        missing_matrices: Vec<String>,
    },

    #[error("Random term '{0}' specified more than once")]
    DuplicateTerm(String),

    #[error("Model specification error: {0}")]
    ModelSpec(String),
}

pub type Result<T> = std::result::Result<T, ModelError>;
