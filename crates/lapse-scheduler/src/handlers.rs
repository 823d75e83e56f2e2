use std::sync::Arc;

use async_trait::async_trait;
use lapse_bookings::{BookingError, BookingStateMachine, CancelOutcome};
use lapse_jobs::{Job, JobPayload};
use tracing::{info, warn};

use crate::error::{HandlerError, Result};
use crate::registry::JobHandler;

/// Runs `cancel-booking` jobs: cancels the booking if it is still pending.
///
/// Missing, confirmed and already-cancelled bookings all count as success so
/// the job completes and is not retried.
pub struct CancelBookingHandler {
    bookings: Arc<BookingStateMachine>,
}

impl CancelBookingHandler {
    pub fn new(bookings: Arc<BookingStateMachine>) -> Self {
        Self { bookings }
    }
}

#[async_trait]
impl JobHandler for CancelBookingHandler {
    async fn handle(&self, job: &Job, payload: &JobPayload) -> Result<()> {
        match payload {
            JobPayload::CancelBooking(p) => {
                // SQLite work runs on the blocking pool so the engine's timeout can fire
                let bookings = Arc::clone(&self.bookings);
                let booking_id = p.booking_id.clone();
                let outcome = tokio::task::spawn_blocking(move || bookings.cancel(&booking_id))
                    .await
                    .map_err(|e| HandlerError::Failed(format!("cancel task did not finish: {e}")))?;

                match outcome {
                    Ok(CancelOutcome::Cancelled(_)) => {
                        info!(job_id = %job.id, booking_id = %p.booking_id, "booking auto-cancelled");
                        Ok(())
                    }
                    Ok(CancelOutcome::AlreadyCancelled(_) | CancelOutcome::RefusedConfirmed(_)) => {
                        info!(job_id = %job.id, booking_id = %p.booking_id, "nothing to cancel");
                        Ok(())
                    }
                    Err(BookingError::NotFound { .. }) => {
                        warn!(job_id = %job.id, booking_id = %p.booking_id, "booking no longer exists");
                        Ok(())
                    }
                    Err(e) => Err(e.into()),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use lapse_bookings::BookingStatus;
    use lapse_core::ManualClock;
    use lapse_jobs::{JobQueue, ScheduleOptions};
    use rusqlite::Connection;

    fn setup() -> (CancelBookingHandler, Arc<BookingStateMachine>, Arc<JobQueue>) {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 2, 2, 8, 0, 0).unwrap(),
        ));
        let queue = Arc::new(
            JobQueue::new(Connection::open_in_memory().unwrap(), clock.clone()).unwrap(),
        );
        let bookings = Arc::new(BookingStateMachine::new(queue.clone(), clock).unwrap());
        (CancelBookingHandler::new(bookings.clone()), bookings, queue)
    }

    fn job_for(queue: &JobQueue, booking_id: &str) -> (Job, JobPayload) {
        let payload = JobPayload::cancel_booking(booking_id);
        let job = queue
            .schedule_job(payload.clone(), chrono::Utc::now(), ScheduleOptions::default())
            .unwrap();
        (job, payload)
    }

    #[tokio::test]
    async fn cancels_pending_booking() {
        let (handler, bookings, queue) = setup();
        let booking = bookings.create("u1").unwrap();
        let (job, payload) = job_for(&queue, &booking.id);

        handler.handle(&job, &payload).await.unwrap();
        assert_eq!(
            bookings.get(&booking.id).unwrap().unwrap().status,
            BookingStatus::Cancelled
        );
    }

    #[tokio::test]
    async fn confirmed_booking_is_left_alone() {
        let (handler, bookings, queue) = setup();
        let booking = bookings.create("u1").unwrap();
        let confirmed = bookings.confirm(&booking.id).unwrap();
        let (job, payload) = job_for(&queue, &booking.id);

        handler.handle(&job, &payload).await.unwrap();
        assert_eq!(bookings.get(&booking.id).unwrap().unwrap(), confirmed);
    }

    #[tokio::test]
    async fn missing_booking_is_success() {
        let (handler, _bookings, queue) = setup();
        let (job, payload) = job_for(&queue, "ghost");
        assert!(handler.handle(&job, &payload).await.is_ok());
    }
}
