pub mod cli;
pub mod database_ops;
pub mod engine;
pub mod error;
pub mod logging;
pub mod normalization;

pub mod util {
    pub mod env;
}

pub use engine::{RefreshReport, VariationEngine};
pub use error::{VariationError, VariationResult};
pub use normalization::variation::{
    normalize, CanonicalVariationKey, Dimension, MatchField, RawPrintingAttributes,
    VariationMatcher,
};
