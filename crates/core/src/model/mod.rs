mod design;
mod dimensions;
mod spec;
mod term;

pub use design::{
    build_combined_random_design, build_grouping_factor_matrix, build_random_effects_matrix,
};
pub use dimensions::ModelDimensions;
pub use spec::{MixedModelSpec, MixedModelSpecBuilder};
pub use term::RandomEffectTerm;
