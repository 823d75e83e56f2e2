//! `lapse-jobs`: persistent job queue on SQLite.
//!
//! # Overview
//!
//! Jobs live in a `jobs` table. A job is *due* when it is `pending`, not
//! `locked`, and its `run_at` has passed. [`JobQueue::get_and_lock_due_job`]
//! claims one due job atomically; the caller then either calls
//! [`JobQueue::mark_completed`] or [`JobQueue::record_failure`], passing the
//! owner it claimed with. Once a lease has been reclaimed the old owner can no
//! longer settle the row.
//!
//! # Job lifecycle
//!
//! | From      | Event                         | To                          |
//! |-----------|-------------------------------|-----------------------------|
//! | pending   | claimed                       | pending, locked             |
//! | locked    | completed, one-shot           | completed                   |
//! | locked    | completed, recurring          | pending at next `run_at`    |
//! | locked    | failure, retries left         | locked until backoff ends   |
//! | locked    | failure, out of retries       | failed                      |
//! | locked    | lease expired                 | pending, unlocked           |

pub mod backoff;
pub mod db;
pub mod error;
pub mod queue;
pub mod types;

pub use backoff::RetryPolicy;
pub use error::{JobError, Result};
pub use queue::{FailureOutcome, JobQueue, QueueSettings, DEFAULT_MAX_RETRIES};
pub use types::{CancelBookingPayload, Job, JobKind, JobPayload, JobStatus, ScheduleOptions};
