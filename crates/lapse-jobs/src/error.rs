use thiserror::Error;

/// Errors that can occur within the job queue.
#[derive(Debug, Error)]
pub enum JobError {
    /// Underlying SQLite / rusqlite error.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// The payload does not match the schema of its job kind.
    #[error("Invalid payload for {kind}: {reason}")]
    InvalidPayload { kind: String, reason: String },

    /// The stored type string has no corresponding job kind.
    #[error("Unknown job type: {0}")]
    UnknownKind(String),

    /// Scheduling options are inconsistent (e.g. a non-positive interval).
    #[error("Invalid schedule: {0}")]
    InvalidSchedule(String),

    /// No job with the given ID exists in the store.
    #[error("Job not found: {id}")]
    NotFound { id: String },

    /// The job already reached a terminal status and cannot change any more.
    #[error("Job {id} is already {status}")]
    Terminal { id: String, status: String },

    /// The caller's claim expired and was released (and maybe re-claimed)
    /// before it settled the job.
    #[error("Lease on job {id} was lost (now held by {})", .holder.as_deref().unwrap_or("nobody"))]
    LeaseLost { id: String, holder: Option<String> },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl JobError {
    /// Whether repeating the same operation later may succeed.
    ///
    /// Only store failures qualify; everything else is a logic or data error.
    pub fn is_retryable(&self) -> bool {
        matches!(self, JobError::Database(_))
    }
}

pub type Result<T> = std::result::Result<T, JobError>;
