//! Error types for relsql.

use thiserror::Error;

/// The result type for lowering operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while lowering a plan to SQL.
///
/// Every failure here is deterministic in the input tree: re-running the
/// pipeline on the same input reports the same error. There is no retry or
/// recovery inside the pipeline; callers own any fallback.
#[derive(Debug, Error)]
pub enum Error {
    /// A tree shape the dialect cannot express at all.
    #[error("Unsupported: {construct}")]
    Unsupported { construct: String },

    /// An operator combination with no known dialect translation.
    #[error("No translation for {operator} over {operand_type}")]
    AmbiguousOperator {
        operator: String,
        operand_type: String,
    },

    /// A pipeline invariant was violated; indicates a bug, never recovered.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create an unsupported-construct error.
    pub fn unsupported(construct: impl Into<String>) -> Self {
        Error::Unsupported {
            construct: construct.into(),
        }
    }

    /// Create an ambiguous-operator error.
    pub fn ambiguous_operator(
        operator: impl Into<String>,
        operand_type: impl Into<String>,
    ) -> Self {
        Error::AmbiguousOperator {
            operator: operator.into(),
            operand_type: operand_type.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Error::Internal(message.into())
    }
}
