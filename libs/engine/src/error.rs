//! Error types for the allocation engine.

use serde::Serialize;
use thiserror::Error;

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// A single malformed field in an `UpdateStreams` batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldViolation {
    /// Path to the offending field, e.g. `requests[2].max_weight`.
    pub field: String,

    /// Human readable description of the problem.
    pub message: String,
}

impl FieldViolation {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for FieldViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Errors that can occur while recomputing an allocation.
///
/// Capacity outcomes (rejection, downsizing, demotion) are never errors; they
/// are reported per stream in the response.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// The batch is malformed. Nothing was committed.
    #[error("invalid request: {}", format_violations(.violations))]
    Validation { violations: Vec<FieldViolation> },

    /// The recomputed allocation broke an invariant. Nothing was committed.
    #[error("internal error: {0}")]
    Internal(String),

    /// A commit raced with another writer on the same namespace.
    #[error("commit conflict: expected version {expected}, found {actual}")]
    Conflict { expected: u64, actual: u64 },

    /// The configuration for a namespace is unusable.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl EngineError {
    /// Returns true if this error was caused by the caller's input.
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation { .. })
    }

    /// Returns the field violations for a validation error.
    pub fn violations(&self) -> &[FieldViolation] {
        match self {
            Self::Validation { violations } => violations,
            _ => &[],
        }
    }
}

fn format_violations(violations: &[FieldViolation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
