use thiserror::Error;

/// Error taxonomy for the core operations. Validation, NotFound, Conflict
/// and Forbidden carry caller-facing detail; Store wraps persistence
/// failures and is surfaced opaque. Nothing here is retried automatically.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("storage failure: {0}")]
    Store(#[from] anyhow::Error),
}

impl CoreError {
    pub fn validation(message: impl Into<String>) -> Self {
        CoreError::Validation(message.into())
    }

    pub fn not_found(what: &str, id: &str) -> Self {
        CoreError::NotFound(format!("{} '{}'", what, id))
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        CoreError::Conflict(message.into())
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        CoreError::Forbidden(message.into())
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
