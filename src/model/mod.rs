//! Model specification and mixed-model fitting.

pub mod backend;
pub mod ml;
pub mod spec;

pub use backend::{ConvergenceCode, FittedModel, LikelihoodMode, MixedModelBackend};
pub use ml::{MlBackend, MlConfig};
pub use spec::{
    build_model_specs, FixedTerm, GroupingMode, HypothesisPair, InteractWith, ModelSpec,
    ModelSpecs, RandomGrouping, RandomSlope, RandomStructure, RandomTerm, TimeColumn,
};
