pub mod printing;
pub mod variation;

pub use variation::{normalize, CanonicalVariationKey, Dimension, RawPrintingAttributes};
