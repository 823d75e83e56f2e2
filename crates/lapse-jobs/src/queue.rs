use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use lapse_core::config::SchedulerConfig;
use lapse_core::{format_ts, parse_ts, Clock};
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    backoff::RetryPolicy,
    db::init_db,
    error::{JobError, Result},
    types::{Job, JobPayload, JobStatus, ScheduleOptions},
};

pub const DEFAULT_MAX_RETRIES: u32 = 3;

const JOB_COLUMNS: &str = "id, job_type, run_at, payload, status, is_recurring,
    recurring_interval_secs, last_run_at, locked, locked_by, lock_expires_at,
    retry_count, max_retries, last_error, metadata, created_at, updated_at";

/// Lease and rescheduling parameters of a [`JobQueue`].
#[derive(Debug, Clone)]
pub struct QueueSettings {
    /// Validity of a claim made by `get_and_lock_due_job`.
    pub lease: Duration,
    /// Lease extension applied by `record_failure`, keyed by the new retry count.
    pub failure_backoff: RetryPolicy,
    /// Interval used when a recurring job completes without one.
    pub default_recurring_interval: Duration,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self::from_config(&SchedulerConfig::default())
    }
}

impl QueueSettings {
    pub fn from_config(cfg: &SchedulerConfig) -> Self {
        Self {
            lease: cfg.lease(),
            failure_backoff: RetryPolicy::exponential(
                std::time::Duration::from_secs(cfg.failure_backoff_base_secs),
                std::time::Duration::from_secs(cfg.failure_backoff_max_secs),
            ),
            default_recurring_interval: cfg.default_recurring_interval(),
        }
    }
}

/// What `record_failure` did with the job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureOutcome {
    /// Still pending and locked; the reclamation sweep releases it at `retry_at`.
    Retrying {
        retry_count: u32,
        retry_at: DateTime<Utc>,
    },
    /// Out of retries; the job is now `failed` and unlocked.
    Failed { retry_count: u32 },
}

/// Schedule / claim / complete operations over the `jobs` table.
///
/// Holds its connection behind `Arc<Mutex<_>>` so the booking state machine
/// can share it and insert a booking plus its cancellation job in one
/// transaction.
pub struct JobQueue {
    conn: Arc<Mutex<Connection>>,
    clock: Arc<dyn Clock>,
    settings: QueueSettings,
}

impl JobQueue {
    /// Take ownership of `conn`, initialising the schema if needed.
    pub fn new(conn: Connection, clock: Arc<dyn Clock>) -> Result<Self> {
        Self::with_shared(Arc::new(Mutex::new(conn)), clock)
    }

    /// Use a connection that other components also hold.
    pub fn with_shared(conn: Arc<Mutex<Connection>>, clock: Arc<dyn Clock>) -> Result<Self> {
        init_db(&conn.lock().unwrap())?;
        Ok(Self {
            conn,
            clock,
            settings: QueueSettings::default(),
        })
    }

    pub fn with_settings(mut self, settings: QueueSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn connection(&self) -> Arc<Mutex<Connection>> {
        Arc::clone(&self.conn)
    }

    pub fn settings(&self) -> &QueueSettings {
        &self.settings
    }

    /// Persist a new pending, unlocked job. `run_at` may lie in the past.
    pub fn schedule_job(
        &self,
        payload: JobPayload,
        run_at: DateTime<Utc>,
        options: ScheduleOptions,
    ) -> Result<Job> {
        let conn = self.conn.lock().unwrap();
        self.schedule_job_on(&conn, payload, run_at, options)
    }

    /// Same as [`schedule_job`](Self::schedule_job) but on a connection (or
    /// open transaction) the caller already holds. Does not touch the queue's
    /// own mutex.
    pub fn schedule_job_on(
        &self,
        conn: &Connection,
        payload: JobPayload,
        run_at: DateTime<Utc>,
        options: ScheduleOptions,
    ) -> Result<Job> {
        payload.validate()?;
        if let Some(every) = options.recurring_interval {
            if every < Duration::seconds(1) {
                return Err(JobError::InvalidSchedule(format!(
                    "recurring interval must be at least one second, got {}s",
                    every.num_seconds()
                )));
            }
        }

        let now = self.clock.now();
        let job = Job {
            id: Uuid::now_v7().to_string(),
            job_type: payload.kind().as_str().to_string(),
            run_at,
            payload: payload.to_value()?,
            status: JobStatus::Pending,
            is_recurring: options.is_recurring,
            recurring_interval_secs: options.recurring_interval.map(|d| d.num_seconds()),
            last_run_at: None,
            locked: false,
            locked_by: None,
            lock_expires_at: None,
            retry_count: 0,
            max_retries: options.max_retries.unwrap_or(DEFAULT_MAX_RETRIES),
            last_error: None,
            metadata: Value::Object(options.metadata),
            created_at: now,
            updated_at: now,
        };

        conn.execute(
            "INSERT INTO jobs
             (id, job_type, run_at, payload, status, is_recurring, recurring_interval_secs,
              last_run_at, locked, locked_by, lock_expires_at, retry_count, max_retries,
              last_error, metadata, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, 'pending', ?5, ?6, NULL, 0, NULL, NULL, 0, ?7, NULL, ?8, ?9, ?9)",
            params![
                job.id,
                job.job_type,
                format_ts(job.run_at),
                job.payload.to_string(),
                job.is_recurring,
                job.recurring_interval_secs,
                job.max_retries,
                job.metadata.to_string(),
                format_ts(now),
            ],
        )?;

        info!(
            job_id = %job.id,
            job_type = %job.job_type,
            run_at = %format_ts(job.run_at),
            recurring = job.is_recurring,
            "job scheduled"
        );
        Ok(job)
    }

    /// All pending, unlocked jobs with `run_at <= now`, earliest first.
    ///
    /// Read-only; use [`get_and_lock_due_job`](Self::get_and_lock_due_job)
    /// to actually take one.
    pub fn get_due_jobs(&self) -> Result<Vec<Job>> {
        let now = format_ts(self.clock.now());
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs
             WHERE status = 'pending' AND locked = 0 AND run_at <= ?1
             ORDER BY run_at, created_at"
        ))?;
        let jobs = stmt
            .query_map([&now], row_to_job)?
            .filter_map(|r| match r {
                Ok(job) => Some(job),
                Err(e) => {
                    warn!("skipping unreadable job row: {e}");
                    None
                }
            })
            .collect();
        Ok(jobs)
    }

    /// Claim the earliest due job for `owner`.
    ///
    /// Selection and lock are a single `UPDATE … RETURNING` inside an
    /// IMMEDIATE transaction, so concurrent callers (other connections or
    /// other processes) can never both get the same row.
    pub fn get_and_lock_due_job(&self, owner: &str) -> Result<Option<Job>> {
        let now = self.clock.now();
        let now_str = format_ts(now);
        let expires = format_ts(now + self.settings.lease);

        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let job = tx
            .query_row(
                &format!(
                    "UPDATE jobs
                     SET locked = 1, locked_by = ?1, lock_expires_at = ?2,
                         last_run_at = ?3, updated_at = ?3
                     WHERE id = (
                         SELECT id FROM jobs
                         WHERE status = 'pending' AND locked = 0 AND run_at <= ?3
                         ORDER BY run_at, created_at
                         LIMIT 1
                     )
                       AND locked = 0
                     RETURNING {JOB_COLUMNS}"
                ),
                params![owner, expires, now_str],
                row_to_job,
            )
            .optional()?;
        tx.commit()?;

        if let Some(ref job) = job {
            debug!(job_id = %job.id, owner, lease_until = %expires, "job claimed");
        }
        Ok(job)
    }

    /// Set `locked` on a pending job without claiming it.
    ///
    /// Gives no exclusivity: two callers may both "lock" the same row. The
    /// lease expiry is still set so the sweep can release it.
    pub fn lock_job(&self, id: &str) -> Result<()> {
        let now = self.clock.now();
        let conn = self.conn.lock().unwrap();
        let n = conn.execute(
            "UPDATE jobs SET locked = 1, lock_expires_at = ?1, updated_at = ?2
             WHERE id = ?3 AND status = 'pending'",
            params![format_ts(now + self.settings.lease), format_ts(now), id],
        )?;
        if n == 0 {
            return Err(explain_unchanged(&conn, id));
        }
        Ok(())
    }

    /// Finish a run successfully. This is the only path that clears a lock on
    /// success.
    ///
    /// `owner` must be the `locked_by` the caller claimed the job with, or
    /// `None` for a job that was never claimed (or only [`lock_job`]-ed). A
    /// claimant whose lease was reclaimed gets [`JobError::LeaseLost`] and the
    /// row is left to its new holder.
    ///
    /// Recurring jobs go back to `pending` with `run_at = next_run_at`, or
    /// `now + recurring_interval`, or `now + default interval`. Everything
    /// else becomes `completed` for good.
    ///
    /// [`lock_job`]: Self::lock_job
    pub fn mark_completed(
        &self,
        id: &str,
        owner: Option<&str>,
        is_recurring: bool,
        next_run_at: Option<DateTime<Utc>>,
        recurring_interval: Option<Duration>,
    ) -> Result<()> {
        let now = self.clock.now();
        let now_str = format_ts(now);
        let conn = self.conn.lock().unwrap();

        let n = if is_recurring {
            let next = next_run_at.unwrap_or_else(|| {
                now + recurring_interval.unwrap_or(self.settings.default_recurring_interval)
            });
            let n = conn.execute(
                "UPDATE jobs
                 SET status = 'pending', locked = 0, locked_by = NULL, lock_expires_at = NULL,
                     last_run_at = ?1, run_at = ?2, retry_count = 0, last_error = NULL,
                     updated_at = ?1
                 WHERE id = ?3 AND status = 'pending'
                   AND locked_by IS ?4 AND (?4 IS NULL OR locked = 1)",
                params![now_str, format_ts(next), id, owner],
            )?;
            if n > 0 {
                info!(job_id = %id, next_run = %format_ts(next), "recurring job rescheduled");
            }
            n
        } else {
            let n = conn.execute(
                "UPDATE jobs
                 SET status = 'completed', locked = 0, locked_by = NULL, lock_expires_at = NULL,
                     last_run_at = ?1, updated_at = ?1
                 WHERE id = ?2 AND status = 'pending'
                   AND locked_by IS ?3 AND (?3 IS NULL OR locked = 1)",
                params![now_str, id, owner],
            )?;
            if n > 0 {
                info!(job_id = %id, "job completed");
            }
            n
        };

        if n == 0 {
            return Err(explain_unchanged(&conn, id));
        }
        Ok(())
    }

    /// Count one failed run against the job's persisted retry budget.
    ///
    /// Below `max_retries` the job stays pending and locked, with its lease
    /// pushed out by the failure backoff. At `max_retries` it becomes
    /// `failed` and is unlocked. `owner` is checked the same way as in
    /// [`mark_completed`](Self::mark_completed).
    pub fn record_failure(
        &self,
        id: &str,
        owner: Option<&str>,
        error: &str,
    ) -> Result<FailureOutcome> {
        let now = self.clock.now();
        let now_str = format_ts(now);

        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let row: Option<(String, Option<String>, u32, u32)> = tx
            .query_row(
                "SELECT status, locked_by, retry_count, max_retries FROM jobs WHERE id = ?1",
                [id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )
            .optional()?;
        let Some((status, locked_by, retry_count, max_retries)) = row else {
            return Err(JobError::NotFound { id: id.to_string() });
        };
        if status != JobStatus::Pending.as_str() {
            return Err(JobError::Terminal {
                id: id.to_string(),
                status,
            });
        }
        if locked_by.as_deref() != owner {
            warn!(job_id = %id, ?owner, holder = ?locked_by, "failure not recorded, lease lost");
            return Err(JobError::LeaseLost {
                id: id.to_string(),
                holder: locked_by,
            });
        }

        let retry_count = retry_count.saturating_add(1);
        let outcome = if retry_count >= max_retries {
            tx.execute(
                "UPDATE jobs
                 SET status = 'failed', locked = 0, locked_by = NULL, lock_expires_at = NULL,
                     retry_count = ?1, last_error = ?2, updated_at = ?3
                 WHERE id = ?4",
                params![retry_count, error, now_str, id],
            )?;
            warn!(job_id = %id, retry_count, error, "job failed permanently");
            FailureOutcome::Failed { retry_count }
        } else {
            let delay = self.settings.failure_backoff.delay_for_attempt(retry_count);
            let retry_at = now + Duration::from_std(delay).unwrap_or(self.settings.lease);
            tx.execute(
                "UPDATE jobs
                 SET locked = 1, lock_expires_at = ?1, retry_count = ?2, last_error = ?3,
                     updated_at = ?4
                 WHERE id = ?5",
                params![format_ts(retry_at), retry_count, error, now_str, id],
            )?;
            warn!(
                job_id = %id,
                retry_count,
                max_retries,
                retry_at = %format_ts(retry_at),
                error,
                "job failed; held until lease expiry"
            );
            FailureOutcome::Retrying {
                retry_count,
                retry_at,
            }
        };
        tx.commit()?;
        Ok(outcome)
    }

    /// Unlock every pending job whose lease has expired. Returns how many.
    pub fn reclaim_expired_leases(&self) -> Result<usize> {
        let now = format_ts(self.clock.now());
        let conn = self.conn.lock().unwrap();
        let n = conn.execute(
            "UPDATE jobs
             SET locked = 0, locked_by = NULL, lock_expires_at = NULL, updated_at = ?1
             WHERE status = 'pending' AND locked = 1
               AND lock_expires_at IS NOT NULL AND lock_expires_at < ?1",
            [&now],
        )?;
        if n > 0 {
            warn!(count = n, "expired job leases reclaimed");
        }
        Ok(n)
    }

    pub fn get(&self, id: &str) -> Result<Option<Job>> {
        let conn = self.conn.lock().unwrap();
        find_job(&conn, id)
    }

    /// Most recently created jobs first.
    pub fn list_jobs(&self, limit: usize) -> Result<Vec<Job>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs ORDER BY created_at DESC LIMIT ?1"
        ))?;
        let rows = stmt.query_map([limit as i64], row_to_job)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Jobs whose payload references `booking_id`, oldest first.
    pub fn jobs_for_booking(&self, booking_id: &str) -> Result<Vec<Job>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs
             WHERE json_extract(payload, '$.bookingId') = ?1
             ORDER BY created_at"
        ))?;
        let rows = stmt.query_map([booking_id], row_to_job)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }
}

fn find_job(conn: &Connection, id: &str) -> Result<Option<Job>> {
    let job = conn
        .query_row(
            &format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?1"),
            [id],
            row_to_job,
        )
        .optional()?;
    Ok(job)
}

/// Turn a zero-row conditional update into the right error.
fn explain_unchanged(conn: &Connection, id: &str) -> JobError {
    match find_job(conn, id) {
        Ok(Some(job)) if job.status == JobStatus::Pending => JobError::LeaseLost {
            id: id.to_string(),
            holder: job.locked_by,
        },
        Ok(Some(job)) => JobError::Terminal {
            id: id.to_string(),
            status: job.status.to_string(),
        },
        Ok(None) => JobError::NotFound { id: id.to_string() },
        Err(e) => e,
    }
}

fn conversion_error(idx: usize, err: Box<dyn std::error::Error + Send + Sync>) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, err)
}

fn ts_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    parse_ts(&raw).map_err(|e| conversion_error(idx, Box::new(e)))
}

fn opt_ts_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    match row.get::<_, Option<String>>(idx)? {
        Some(raw) => parse_ts(&raw)
            .map(Some)
            .map_err(|e| conversion_error(idx, Box::new(e))),
        None => Ok(None),
    }
}

fn json_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<Value> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw).map_err(|e| conversion_error(idx, Box::new(e)))
}

/// Map a SQLite row (selected with `JOB_COLUMNS`) to a `Job`.
fn row_to_job(row: &Row<'_>) -> rusqlite::Result<Job> {
    let status: String = row.get(4)?;
    Ok(Job {
        id: row.get(0)?,
        job_type: row.get(1)?,
        run_at: ts_col(row, 2)?,
        payload: json_col(row, 3)?,
        status: status
            .parse()
            .map_err(|e: String| conversion_error(4, e.into()))?,
        is_recurring: row.get(5)?,
        recurring_interval_secs: row.get(6)?,
        last_run_at: opt_ts_col(row, 7)?,
        locked: row.get(8)?,
        locked_by: row.get(9)?,
        lock_expires_at: opt_ts_col(row, 10)?,
        retry_count: row.get(11)?,
        max_retries: row.get(12)?,
        last_error: row.get(13)?,
        metadata: json_col(row, 14)?,
        created_at: ts_col(row, 15)?,
        updated_at: ts_col(row, 16)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use lapse_core::ManualClock;
    use serde_json::json;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap()
    }

    fn queue() -> (JobQueue, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(t0()));
        let q = JobQueue::new(Connection::open_in_memory().unwrap(), clock.clone()).unwrap();
        (q, clock)
    }

    fn cancel(id: &str) -> JobPayload {
        JobPayload::cancel_booking(id)
    }

    #[test]
    fn scheduled_job_starts_pending_and_unlocked() {
        let (q, _clock) = queue();
        let opts = ScheduleOptions::default().with_metadata("module", "booking");
        let job = q
            .schedule_job(cancel("b-1"), t0() + Duration::minutes(2), opts)
            .unwrap();

        let stored = q.get(&job.id).unwrap().unwrap();
        assert_eq!(stored.job_type, "cancel-booking");
        assert_eq!(stored.status, JobStatus::Pending);
        assert!(!stored.locked);
        assert_eq!(stored.retry_count, 0);
        assert_eq!(stored.max_retries, 3);
        assert_eq!(stored.run_at, t0() + Duration::minutes(2));
        assert_eq!(stored.payload, json!({"bookingId": "b-1"}));
        assert_eq!(stored.metadata, json!({"module": "booking"}));
        assert_eq!(stored.typed_payload().unwrap(), cancel("b-1"));
    }

    #[test]
    fn invalid_payload_is_not_persisted() {
        let (q, _clock) = queue();
        let err = q
            .schedule_job(cancel(""), t0(), ScheduleOptions::default())
            .unwrap_err();
        assert!(matches!(err, JobError::InvalidPayload { .. }));
        assert!(q.list_jobs(10).unwrap().is_empty());
    }

    #[test]
    fn sub_second_interval_is_rejected() {
        let (q, _clock) = queue();
        let opts = ScheduleOptions::recurring(Duration::milliseconds(10));
        assert!(matches!(
            q.schedule_job(cancel("b-1"), t0(), opts),
            Err(JobError::InvalidSchedule(_))
        ));
    }

    #[test]
    fn past_run_at_is_immediately_due() {
        let (q, _clock) = queue();
        q.schedule_job(cancel("b-1"), t0() - Duration::hours(1), ScheduleOptions::default())
            .unwrap();
        assert_eq!(q.get_due_jobs().unwrap().len(), 1);
    }

    #[test]
    fn due_jobs_exclude_future_and_locked() {
        let (q, clock) = queue();
        let future = q
            .schedule_job(cancel("future"), t0() + Duration::minutes(5), ScheduleOptions::default())
            .unwrap();
        let locked = q
            .schedule_job(cancel("locked"), t0(), ScheduleOptions::default())
            .unwrap();
        let due = q
            .schedule_job(cancel("due"), t0() - Duration::seconds(1), ScheduleOptions::default())
            .unwrap();
        q.lock_job(&locked.id).unwrap();

        let ids: Vec<_> = q.get_due_jobs().unwrap().into_iter().map(|j| j.id).collect();
        assert_eq!(ids, vec![due.id.clone()]);

        clock.advance(Duration::minutes(5));
        let ids: Vec<_> = q.get_due_jobs().unwrap().into_iter().map(|j| j.id).collect();
        assert_eq!(ids, vec![due.id, future.id]);
    }

    #[test]
    fn claim_takes_earliest_and_sets_lease() {
        let (q, _clock) = queue();
        let later = q
            .schedule_job(cancel("later"), t0() - Duration::seconds(10), ScheduleOptions::default())
            .unwrap();
        let earlier = q
            .schedule_job(cancel("earlier"), t0() - Duration::seconds(20), ScheduleOptions::default())
            .unwrap();

        let first = q.get_and_lock_due_job("worker-a").unwrap().unwrap();
        assert_eq!(first.id, earlier.id);
        assert!(first.locked);
        assert_eq!(first.locked_by.as_deref(), Some("worker-a"));
        assert_eq!(first.last_run_at, Some(t0()));
        assert_eq!(first.lock_expires_at, Some(t0() + Duration::minutes(5)));

        let second = q.get_and_lock_due_job("worker-a").unwrap().unwrap();
        assert_eq!(second.id, later.id);
        assert!(q.get_and_lock_due_job("worker-a").unwrap().is_none());
    }

    #[test]
    fn claim_returns_none_for_future_jobs() {
        let (q, _clock) = queue();
        q.schedule_job(cancel("b-1"), t0() + Duration::seconds(1), ScheduleOptions::default())
            .unwrap();
        assert!(q.get_and_lock_due_job("w").unwrap().is_none());
    }

    #[test]
    fn completed_job_is_terminal() {
        let (q, _clock) = queue();
        let job = q
            .schedule_job(cancel("b-1"), t0(), ScheduleOptions::default())
            .unwrap();
        q.get_and_lock_due_job("w").unwrap().unwrap();
        q.mark_completed(&job.id, Some("w"), false, None, None).unwrap();

        let stored = q.get(&job.id).unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Completed);
        assert!(!stored.locked);
        assert!(stored.locked_by.is_none());
        assert!(q.get_and_lock_due_job("w").unwrap().is_none());

        // completing again, even as recurring, never resurrects the row
        let err = q.mark_completed(&job.id, Some("w"), true, None, None).unwrap_err();
        assert!(matches!(err, JobError::Terminal { .. }));
        assert_eq!(q.get(&job.id).unwrap().unwrap().status, JobStatus::Completed);
    }

    #[test]
    fn recurring_job_advances_by_interval() {
        let (q, clock) = queue();
        let every = Duration::minutes(5);
        let job = q
            .schedule_job(cancel("b-1"), t0(), ScheduleOptions::recurring(every))
            .unwrap();

        let mut expected = t0();
        for _ in 0..3 {
            clock.set(expected);
            let claimed = q.get_and_lock_due_job("w").unwrap().unwrap();
            assert_eq!(claimed.id, job.id);
            q.mark_completed(&job.id, Some("w"), true, None, claimed.recurring_interval())
                .unwrap();

            expected += every;
            let stored = q.get(&job.id).unwrap().unwrap();
            assert_eq!(stored.status, JobStatus::Pending);
            assert!(!stored.locked);
            assert_eq!(stored.run_at, expected);
            assert_eq!(stored.last_run_at, Some(expected - every));
        }
    }

    #[test]
    fn recurring_without_interval_uses_default() {
        let (q, _clock) = queue();
        let job = q
            .schedule_job(
                cancel("b-1"),
                t0(),
                ScheduleOptions {
                    is_recurring: true,
                    ..ScheduleOptions::default()
                },
            )
            .unwrap();
        q.get_and_lock_due_job("w").unwrap();
        q.mark_completed(&job.id, Some("w"), true, None, None).unwrap();
        assert_eq!(
            q.get(&job.id).unwrap().unwrap().run_at,
            t0() + Duration::minutes(2)
        );
    }

    #[test]
    fn explicit_next_run_wins_over_interval() {
        let (q, _clock) = queue();
        let job = q
            .schedule_job(cancel("b-1"), t0(), ScheduleOptions::recurring(Duration::minutes(5)))
            .unwrap();
        let next = t0() + Duration::hours(1);
        q.mark_completed(&job.id, None, true, Some(next), Some(Duration::minutes(5)))
            .unwrap();
        assert_eq!(q.get(&job.id).unwrap().unwrap().run_at, next);
    }

    #[test]
    fn failures_back_off_then_fail() {
        let (q, _clock) = queue();
        let job = q
            .schedule_job(cancel("b-1"), t0(), ScheduleOptions::default())
            .unwrap();
        q.get_and_lock_due_job("w").unwrap().unwrap();

        let first = q.record_failure(&job.id, Some("w"), "db unreachable").unwrap();
        assert_eq!(
            first,
            FailureOutcome::Retrying {
                retry_count: 1,
                retry_at: t0() + Duration::seconds(60)
            }
        );
        let stored = q.get(&job.id).unwrap().unwrap();
        assert!(stored.locked);
        assert_eq!(stored.status, JobStatus::Pending);
        assert_eq!(stored.last_error.as_deref(), Some("db unreachable"));

        let second = q.record_failure(&job.id, Some("w"), "db unreachable").unwrap();
        assert_eq!(
            second,
            FailureOutcome::Retrying {
                retry_count: 2,
                retry_at: t0() + Duration::seconds(120)
            }
        );

        let third = q.record_failure(&job.id, Some("w"), "db unreachable").unwrap();
        assert_eq!(third, FailureOutcome::Failed { retry_count: 3 });
        let stored = q.get(&job.id).unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Failed);
        assert!(!stored.locked);

        assert!(matches!(
            q.record_failure(&job.id, Some("w"), "again"),
            Err(JobError::Terminal { .. })
        ));
    }

    #[test]
    fn expired_leases_are_reclaimed() {
        let (q, clock) = queue();
        let job = q
            .schedule_job(cancel("b-1"), t0(), ScheduleOptions::default())
            .unwrap();
        q.get_and_lock_due_job("crashed-worker").unwrap().unwrap();

        clock.advance(Duration::minutes(4));
        assert_eq!(q.reclaim_expired_leases().unwrap(), 0);
        assert!(q.get_and_lock_due_job("w").unwrap().is_none());

        clock.advance(Duration::minutes(2));
        assert_eq!(q.reclaim_expired_leases().unwrap(), 1);
        let stored = q.get(&job.id).unwrap().unwrap();
        assert!(!stored.locked);
        assert!(stored.locked_by.is_none());

        let reclaimed = q.get_and_lock_due_job("w").unwrap().unwrap();
        assert_eq!(reclaimed.id, job.id);
    }

    #[test]
    fn stale_owner_cannot_settle_reclaimed_job() {
        let (q, clock) = queue();
        let job = q
            .schedule_job(cancel("b-1"), t0(), ScheduleOptions::default())
            .unwrap();
        q.get_and_lock_due_job("worker-a").unwrap().unwrap();

        clock.advance(Duration::minutes(6));
        assert_eq!(q.reclaim_expired_leases().unwrap(), 1);
        let taken = q.get_and_lock_due_job("worker-b").unwrap().unwrap();
        assert_eq!(taken.id, job.id);

        let err = q
            .mark_completed(&job.id, Some("worker-a"), false, None, None)
            .unwrap_err();
        assert!(
            matches!(err, JobError::LeaseLost { ref holder, .. } if holder.as_deref() == Some("worker-b"))
        );
        assert!(matches!(
            q.record_failure(&job.id, Some("worker-a"), "late failure"),
            Err(JobError::LeaseLost { .. })
        ));

        let stored = q.get(&job.id).unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Pending);
        assert_eq!(stored.locked_by.as_deref(), Some("worker-b"));
        assert_eq!(stored.retry_count, 0);
        assert!(stored.last_error.is_none());

        q.mark_completed(&job.id, Some("worker-b"), false, None, None)
            .unwrap();
        assert_eq!(q.get(&job.id).unwrap().unwrap().status, JobStatus::Completed);
    }

    #[test]
    fn expired_but_unclaimed_lease_is_lost_too() {
        let (q, clock) = queue();
        let job = q
            .schedule_job(cancel("b-1"), t0(), ScheduleOptions::default())
            .unwrap();
        q.get_and_lock_due_job("worker-a").unwrap().unwrap();
        clock.advance(Duration::minutes(6));
        q.reclaim_expired_leases().unwrap();

        assert!(matches!(
            q.mark_completed(&job.id, Some("worker-a"), false, None, None),
            Err(JobError::LeaseLost { holder: None, .. })
        ));
        assert!(q.get_due_jobs().unwrap().iter().any(|j| j.id == job.id));
    }

    #[test]
    fn claimed_job_cannot_be_settled_without_its_owner() {
        let (q, _clock) = queue();
        let job = q
            .schedule_job(cancel("b-1"), t0(), ScheduleOptions::default())
            .unwrap();
        q.get_and_lock_due_job("worker-a").unwrap().unwrap();
        assert!(matches!(
            q.mark_completed(&job.id, None, false, None, None),
            Err(JobError::LeaseLost { .. })
        ));
        assert!(matches!(
            q.mark_completed(&job.id, Some("worker-z"), false, None, None),
            Err(JobError::LeaseLost { .. })
        ));
    }

    #[test]
    fn lock_job_rows_settle_without_owner() {
        let (q, _clock) = queue();
        let job = q
            .schedule_job(cancel("b-1"), t0(), ScheduleOptions::default())
            .unwrap();
        q.lock_job(&job.id).unwrap();
        assert!(q.get(&job.id).unwrap().unwrap().locked_by.is_none());

        q.mark_completed(&job.id, None, false, None, None).unwrap();
        assert_eq!(q.get(&job.id).unwrap().unwrap().status, JobStatus::Completed);
    }

    #[test]
    fn lock_job_on_missing_row_is_not_found() {
        let (q, _clock) = queue();
        assert!(matches!(q.lock_job("nope"), Err(JobError::NotFound { .. })));
        assert!(matches!(
            q.mark_completed("nope", None, false, None, None),
            Err(JobError::NotFound { .. })
        ));
    }

    #[test]
    fn jobs_for_booking_filters_by_payload() {
        let (q, _clock) = queue();
        q.schedule_job(cancel("b-1"), t0(), ScheduleOptions::default())
            .unwrap();
        q.schedule_job(cancel("b-2"), t0(), ScheduleOptions::default())
            .unwrap();
        let jobs = q.jobs_for_booking("b-2").unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].payload["bookingId"], "b-2");
    }
}
