use lapse_bookings::BookingError;
use lapse_jobs::JobError;
use thiserror::Error;

/// Why running a job did not succeed.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// The stored job type has no registered handler.
    #[error("No handler registered for job type {0}")]
    NoHandler(String),

    /// Decoding the payload or updating the job row failed.
    #[error("Job queue error: {0}")]
    Queue(#[from] JobError),

    #[error("Booking error: {0}")]
    Booking(#[from] BookingError),

    /// A single attempt exceeded the handler budget.
    #[error("Handler timed out after {ms}ms")]
    Timeout { ms: u64 },

    /// Free-form failure reported by a handler. Treated as transient.
    #[error("Handler failed: {0}")]
    Failed(String),
}

impl HandlerError {
    /// Whether another attempt in the same tick may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            HandlerError::NoHandler(_) => false,
            HandlerError::Queue(e) => e.is_retryable(),
            HandlerError::Booking(e) => e.is_retryable(),
            HandlerError::Timeout { .. } | HandlerError::Failed(_) => true,
        }
    }
}

pub type Result<T> = std::result::Result<T, HandlerError>;
