use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{JobError, Result};

/// Closed set of job types the scheduler knows how to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobKind {
    /// Cancel a booking that was not confirmed within its grace period.
    CancelBooking,
}

impl JobKind {
    pub const ALL: &'static [JobKind] = &[JobKind::CancelBooking];

    /// The tag stored in the `job_type` column.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::CancelBooking => "cancel-booking",
        }
    }
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobKind {
    type Err = JobError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        JobKind::ALL
            .iter()
            .copied()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| JobError::UnknownKind(s.to_string()))
    }
}

/// Payload of a `cancel-booking` job. Stored as `{"bookingId": "..."}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelBookingPayload {
    pub booking_id: String,
}

/// Typed payload, one variant per [`JobKind`].
///
/// Validated when a job is scheduled and again when it is dispatched, so a
/// row edited by hand cannot reach a handler with the wrong shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobPayload {
    CancelBooking(CancelBookingPayload),
}

impl JobPayload {
    pub fn cancel_booking(booking_id: impl Into<String>) -> Self {
        JobPayload::CancelBooking(CancelBookingPayload {
            booking_id: booking_id.into(),
        })
    }

    pub fn kind(&self) -> JobKind {
        match self {
            JobPayload::CancelBooking(_) => JobKind::CancelBooking,
        }
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            JobPayload::CancelBooking(p) if p.booking_id.trim().is_empty() => {
                Err(JobError::InvalidPayload {
                    kind: self.kind().to_string(),
                    reason: "bookingId must not be empty".to_string(),
                })
            }
            JobPayload::CancelBooking(_) => Ok(()),
        }
    }

    /// Serialise the variant body (without any tag) for the `payload` column.
    pub fn to_value(&self) -> Result<Value> {
        let value = match self {
            JobPayload::CancelBooking(p) => serde_json::to_value(p)?,
        };
        Ok(value)
    }

    /// Decode and validate a stored payload for `kind`.
    pub fn decode(kind: JobKind, value: &Value) -> Result<Self> {
        let payload = match kind {
            JobKind::CancelBooking => {
                let p: CancelBookingPayload =
                    serde_json::from_value(value.clone()).map_err(|e| JobError::InvalidPayload {
                        kind: kind.to_string(),
                        reason: e.to_string(),
                    })?;
                JobPayload::CancelBooking(p)
            }
        };
        payload.validate()?;
        Ok(payload)
    }
}

/// Lifecycle state of a job row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting for `run_at`, or currently claimed (see `locked`).
    Pending,
    /// Finished successfully. Terminal; recurring jobs never get here.
    Completed,
    /// Ran out of persisted retries. Terminal.
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobStatus::Pending)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(format!("unknown job status: {other}")),
        }
    }
}

/// Optional knobs for [`crate::JobQueue::schedule_job`].
#[derive(Debug, Clone, Default)]
pub struct ScheduleOptions {
    pub is_recurring: bool,
    /// Delay between two runs of a recurring job. Falls back to the queue's
    /// default interval when unset.
    pub recurring_interval: Option<Duration>,
    pub metadata: Map<String, Value>,
    /// Persisted failures tolerated before the job is marked failed.
    pub max_retries: Option<u32>,
}

impl ScheduleOptions {
    pub fn recurring(every: Duration) -> Self {
        Self {
            is_recurring: true,
            recurring_interval: Some(every),
            ..Self::default()
        }
    }

    pub fn with_metadata(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }
}

/// A persisted job record. Serializes with camelCase keys, like bookings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    /// UUIDv7 string, primary key.
    pub id: String,
    /// Handler selector, normally a [`JobKind`] tag.
    pub job_type: String,
    /// Due when `run_at <= now`.
    pub run_at: DateTime<Utc>,
    /// Raw JSON payload; decode with [`Job::typed_payload`].
    pub payload: Value,
    pub status: JobStatus,
    pub is_recurring: bool,
    pub recurring_interval_secs: Option<i64>,
    /// Start of the most recent claim.
    pub last_run_at: Option<DateTime<Utc>>,
    pub locked: bool,
    /// Owner of the current claim, if any.
    pub locked_by: Option<String>,
    /// After this instant the claim may be reclaimed.
    pub lock_expires_at: Option<DateTime<Utc>>,
    pub retry_count: u32,
    pub max_retries: u32,
    pub last_error: Option<String>,
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    pub fn kind(&self) -> Result<JobKind> {
        self.job_type.parse()
    }

    pub fn typed_payload(&self) -> Result<JobPayload> {
        JobPayload::decode(self.kind()?, &self.payload)
    }

    pub fn recurring_interval(&self) -> Option<Duration> {
        self.recurring_interval_secs.map(Duration::seconds)
    }

    /// Matches the due-job query: pending, unlocked and `run_at <= now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == JobStatus::Pending && !self.locked && self.run_at <= now
    }
}
