//! Domain error model.

use thiserror::Error;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Deterministic failures of the prediction data model (validation,
/// invariants, identifiers). Runtime failures of the pipeline live in
/// `foresight-infra`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A value failed validation (e.g. out-of-range confidence).
    #[error("validation failed: {0}")]
    Validation(String),

    /// A domain invariant was violated (e.g. accuracy stamped twice).
    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    /// An identifier or enum tag could not be parsed.
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// A requested model or prediction was not found.
    #[error("not found: {0}")]
    NotFound(String),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::InvariantViolation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }
}
