use thiserror::Error;

use crate::types::BookingStatus;

/// Errors that can occur during booking operations.
#[derive(Debug, Error)]
pub enum BookingError {
    /// The request was rejected before touching the store.
    #[error("validation failed: {0}")]
    Validation(String),

    /// The requested booking does not exist.
    #[error("booking not found: {id}")]
    NotFound { id: String },

    /// The booking is in a state the requested transition cannot leave.
    #[error("booking {id} cannot move from {from} to {to}")]
    IllegalTransition {
        id: String,
        from: BookingStatus,
        to: BookingStatus,
    },

    /// A SQLite operation failed.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Scheduling the auto-cancel job failed; the booking was rolled back.
    #[error("scheduling error: {0}")]
    Scheduling(#[from] lapse_jobs::JobError),
}

impl BookingError {
    /// Whether the same call may succeed if repeated later.
    pub fn is_retryable(&self) -> bool {
        match self {
            BookingError::Database(_) => true,
            BookingError::Scheduling(e) => e.is_retryable(),
            _ => false,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            BookingError::Validation(_) => "VALIDATION_ERROR",
            BookingError::NotFound { .. } => "NOT_FOUND",
            BookingError::IllegalTransition { .. } => "ILLEGAL_TRANSITION",
            BookingError::Database(_) => "DATABASE_ERROR",
            BookingError::Scheduling(_) => "SCHEDULING_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, BookingError>;
