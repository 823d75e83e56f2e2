use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use lapse_core::config::BookingConfig;
use lapse_core::{format_ts, parse_ts, Clock};
use lapse_jobs::{JobPayload, JobQueue, ScheduleOptions};
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::db::init_db;
use crate::error::{BookingError, Result};
use crate::types::{Booking, BookingStatus, CancelOutcome};

const BOOKING_COLUMNS: &str = "id, user_id, status, created_at, updated_at";

/// Booking lifecycle: `pending` to `confirmed` or `cancelled`, nothing else.
///
/// Shares the job queue's connection so that a booking and its auto-cancel
/// job are written in the same transaction.
pub struct BookingStateMachine {
    db: Arc<Mutex<Connection>>,
    queue: Arc<JobQueue>,
    clock: Arc<dyn Clock>,
    grace_period: Duration,
}

impl BookingStateMachine {
    pub fn new(queue: Arc<JobQueue>, clock: Arc<dyn Clock>) -> Result<Self> {
        let db = queue.connection();
        init_db(&db.lock().unwrap())?;
        Ok(Self {
            db,
            queue,
            clock,
            grace_period: BookingConfig::default().grace_period(),
        })
    }

    /// How long a booking may stay pending before it is auto-cancelled.
    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    pub fn grace_period(&self) -> Duration {
        self.grace_period
    }

    /// Create a pending booking and its `cancel-booking` job atomically.
    #[instrument(skip(self))]
    pub fn create(&self, user_id: &str) -> Result<Booking> {
        let user_id = user_id.trim();
        if user_id.is_empty() {
            return Err(BookingError::Validation("userId is required".to_string()));
        }

        let now = self.clock.now();
        let booking = Booking {
            id: Uuid::now_v7().to_string(),
            user_id: user_id.to_string(),
            status: BookingStatus::Pending,
            created_at: now,
            updated_at: now,
        };
        let options = ScheduleOptions::default()
            .with_metadata("createdBy", "BookingService")
            .with_metadata("module", "booking")
            .with_metadata(
                "description",
                format!(
                    "Auto-cancel booking if not confirmed in {}",
                    describe(self.grace_period)
                ),
            );

        let mut db = self.db.lock().unwrap();
        let tx = db.transaction()?;
        tx.execute(
            "INSERT INTO bookings (id, user_id, status, created_at, updated_at)
             VALUES (?1, ?2, 'pending', ?3, ?3)",
            params![booking.id, booking.user_id, format_ts(now)],
        )?;
        let job = self.queue.schedule_job_on(
            &tx,
            JobPayload::cancel_booking(&booking.id),
            now + self.grace_period,
            options,
        )?;
        tx.commit()?;

        info!(booking_id = %booking.id, job_id = %job.id, "booking created");
        Ok(booking)
    }

    /// Move a pending booking to `confirmed`.
    ///
    /// Confirming twice is a no-op that returns the stored booking untouched.
    /// A cancelled booking yields `IllegalTransition`.
    #[instrument(skip(self))]
    pub fn confirm(&self, id: &str) -> Result<Booking> {
        let (changed, booking) = self.transition(id, BookingStatus::Confirmed)?;
        match booking.status {
            BookingStatus::Confirmed if changed => {
                info!(booking_id = %id, "booking confirmed");
                Ok(booking)
            }
            BookingStatus::Confirmed => {
                debug!(booking_id = %id, "booking already confirmed");
                Ok(booking)
            }
            from => {
                warn!(booking_id = %id, %from, "refusing to confirm booking");
                Err(BookingError::IllegalTransition {
                    id: id.to_string(),
                    from,
                    to: BookingStatus::Confirmed,
                })
            }
        }
    }

    /// Move a pending booking to `cancelled`. Never touches a confirmed one.
    #[instrument(skip(self))]
    pub fn cancel(&self, id: &str) -> Result<CancelOutcome> {
        let (changed, booking) = self.transition(id, BookingStatus::Cancelled)?;
        let outcome = match booking.status {
            BookingStatus::Cancelled if changed => {
                info!(booking_id = %id, "booking cancelled");
                CancelOutcome::Cancelled(booking)
            }
            BookingStatus::Cancelled => {
                debug!(booking_id = %id, "booking already cancelled");
                CancelOutcome::AlreadyCancelled(booking)
            }
            BookingStatus::Confirmed => {
                info!(booking_id = %id, "booking confirmed, not cancelling");
                CancelOutcome::RefusedConfirmed(booking)
            }
            from => {
                return Err(BookingError::IllegalTransition {
                    id: id.to_string(),
                    from,
                    to: BookingStatus::Cancelled,
                })
            }
        };
        Ok(outcome)
    }

    pub fn get(&self, id: &str) -> Result<Option<Booking>> {
        let db = self.db.lock().unwrap();
        find_booking(&db, id)
    }

    /// Bookings of one user, newest first.
    #[instrument(skip(self), fields(user_id, limit))]
    pub fn list_for_user(&self, user_id: &str, limit: usize) -> Result<Vec<Booking>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(&format!(
            "SELECT {BOOKING_COLUMNS} FROM bookings
             WHERE user_id = ?1
             ORDER BY created_at DESC
             LIMIT ?2"
        ))?;
        let rows = stmt.query_map(params![user_id, limit as i64], row_to_booking)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Compare-and-swap out of `pending`, then re-read the row.
    ///
    /// Returns whether this call changed the row, and the row as it is now.
    fn transition(&self, id: &str, to: BookingStatus) -> Result<(bool, Booking)> {
        let now = format_ts(self.clock.now());
        let db = self.db.lock().unwrap();
        let n = db.execute(
            "UPDATE bookings SET status = ?1, updated_at = ?2
             WHERE id = ?3 AND status = 'pending'",
            params![to.as_str(), now, id],
        )?;
        let booking = find_booking(&db, id)?.ok_or_else(|| BookingError::NotFound {
            id: id.to_string(),
        })?;
        Ok((n > 0, booking))
    }
}

fn describe(d: Duration) -> String {
    let secs = d.num_seconds();
    match secs {
        60 => "1 minute".to_string(),
        s if s % 60 == 0 => format!("{} minutes", s / 60),
        1 => "1 second".to_string(),
        s => format!("{s} seconds"),
    }
}

fn find_booking(conn: &Connection, id: &str) -> Result<Option<Booking>> {
    let booking = conn
        .query_row(
            &format!("SELECT {BOOKING_COLUMNS} FROM bookings WHERE id = ?1"),
            [id],
            row_to_booking,
        )
        .optional()?;
    Ok(booking)
}

fn ts_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    parse_ts(&raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn row_to_booking(row: &Row<'_>) -> rusqlite::Result<Booking> {
    let status: String = row.get(2)?;
    Ok(Booking {
        id: row.get(0)?,
        user_id: row.get(1)?,
        status: status.parse().map_err(|e: String| {
            rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, e.into())
        })?,
        created_at: ts_col(row, 3)?,
        updated_at: ts_col(row, 4)?,
    })
}
