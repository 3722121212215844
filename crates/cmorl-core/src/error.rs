//! Error types for CMORL

use thiserror::Error;

/// Result type for CMORL operations
pub type Result<T> = std::result::Result<T, CmorlError>;

/// CMORL error types
#[derive(Debug, Error)]
pub enum CmorlError {
    /// Objective vector width does not match the composer
    #[error("Dimension mismatch: expected {expected} objectives, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Objective value outside the domain the engine can consume
    #[error("Domain violation: objective {index} is {value}, expected a finite value >= 0")]
    DomainViolation { index: usize, value: f64 },

    /// Tensor shape is not valid for the requested operation
    #[error("Shape error: {0}")]
    ShapeError(String),

    /// Hyper-parameter or operator argument out of range
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Environment name not present in the registry
    #[error("Unknown environment: {0}")]
    UnknownEnvironment(String),

    /// Filesystem error
    #[error("IO error: {0}")]
    Io(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// An evaluation task failed
    #[error("Evaluation of {task} failed: {reason}")]
    EvaluationFailed { task: String, reason: String },
}

impl From<serde_json::Error> for CmorlError {
    fn from(err: serde_json::Error) -> Self {
        CmorlError::SerializationError(err.to_string())
    }
}

impl From<std::io::Error> for CmorlError {
    fn from(err: std::io::Error) -> Self {
        CmorlError::Io(err.to_string())
    }
}
