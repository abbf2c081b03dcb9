use thiserror::Error;

/// Core error type for the backstop task coordinator.
///
/// Raised when persisted values cannot be mapped back onto the domain
/// model, e.g. a state string written by a newer version of the schema.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum CoreError {
    /// An unknown task state string was encountered during parsing.
    #[error("invalid task state: {0}")]
    InvalidState(String),

    /// An unknown task type string was encountered during parsing.
    #[error("invalid task type: {0}")]
    InvalidTaskType(String),

    /// An unknown run kind string was encountered during parsing.
    #[error("invalid run kind: {0}")]
    InvalidRunKind(String),

    /// An unknown planned task state string was encountered during parsing.
    #[error("invalid planned task state: {0}")]
    InvalidPlannedState(String),
}

pub type Result<T> = std::result::Result<T, CoreError>;
