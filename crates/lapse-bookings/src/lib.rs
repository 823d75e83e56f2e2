//! `lapse-bookings`: booking records and their lifecycle.
//!
//! Every booking starts `pending`. It is either confirmed by its owner or,
//! once the grace period passes, cancelled by the `cancel-booking` job that
//! [`BookingStateMachine::create`] schedules alongside it.

pub mod db;
pub mod error;
pub mod machine;
pub mod types;

pub use error::{BookingError, Result};
pub use machine::BookingStateMachine;
pub use types::{Booking, BookingStatus, CancelOutcome};
