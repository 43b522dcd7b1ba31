// Central Error Type for the Application

use thiserror::Error;

/// Application-level error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Database error: {0}")]
    Database(String),

    /// Store backend unreachable; callers surface a degraded-service signal
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// Compare-and-swap lost against a concurrent writer
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Errors that say nothing about the job itself, only about reaching the store
    pub fn is_store_unavailable(&self) -> bool {
        matches!(self, AppError::StoreUnavailable(_))
    }

    /// Errors a worker treats as "somebody else got there first"
    pub fn is_lost_race(&self) -> bool {
        matches!(
            self,
            AppError::Conflict(_) | AppError::NotFound(_) | AppError::InvalidState(_)
        )
    }
}

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;

// Illegal transitions and validation failures keep their own category
impl From<crate::domain::DomainError> for AppError {
    fn from(err: crate::domain::DomainError) -> Self {
        use crate::domain::DomainError;
        match err {
            DomainError::InvalidStateTransition { .. } => AppError::InvalidState(err.to_string()),
            DomainError::ValidationError(msg) => AppError::Validation(msg),
        }
    }
}
