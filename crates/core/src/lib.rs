pub mod data;
pub mod error;
pub mod matrix;
pub mod model;
pub mod types;

pub use error::{ModelError, Result};
pub use model::{MixedModelSpec, MixedModelSpecBuilder, ModelDimensions, RandomEffectTerm};
