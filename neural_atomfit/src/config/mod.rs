//! Configuration types for neural_atomfit.
//!
//! Burn-style configuration structs, loadable from and savable to JSON.

mod training;

pub use crate::data::SamplingStrategy;
pub use crate::model::CompositionModelConfig;
pub use training::TrainingConfig;
