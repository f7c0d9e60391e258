use thiserror::Error;

use crate::database_ops::overrides::OverrideScope;
use crate::normalization::variation::VariationMatcher;

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors surfaced by the variation engine.
///
/// None of these are retried internally; callers decide whether to re-run.
#[derive(Debug, Error)]
pub enum VariationError {
    /// An override with an identical five-field matcher already exists in the scope.
    #[error("override already exists in scope {scope} for matcher {matcher}")]
    Conflict {
        scope: OverrideScope,
        matcher: VariationMatcher,
    },

    #[error("{0} not found")]
    NotFound(String),

    /// Rejected input (blank matcher value, empty display text, ...).
    #[error("invalid override: {0}")]
    Invalid(String),

    /// The catalog read failed; discovery and aggregation cannot proceed.
    #[error("catalog data unavailable: {0}")]
    DataUnavailable(#[source] BoxError),

    /// Engine-owned storage (overrides, metadata, filter index) failed.
    #[error("storage failure: {0}")]
    Storage(#[source] BoxError),
}

pub type VariationResult<T> = Result<T, VariationError>;

impl VariationError {
    pub fn unavailable(err: impl Into<BoxError>) -> Self {
        Self::DataUnavailable(err.into())
    }

    pub fn storage(err: impl Into<BoxError>) -> Self {
        Self::Storage(err.into())
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

impl From<sqlx::Error> for VariationError {
    fn from(err: sqlx::Error) -> Self {
        Self::Storage(Box::new(err))
    }
}

impl From<serde_json::Error> for VariationError {
    fn from(err: serde_json::Error) -> Self {
        Self::Storage(Box::new(err))
    }
}
