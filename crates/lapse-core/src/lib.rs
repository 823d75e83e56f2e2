//! `lapse-core`: configuration, clock and shared error types used by every
//! other lapse crate.

pub mod clock;
pub mod config;
pub mod error;

pub use clock::{format_ts, parse_ts, Clock, ManualClock, SystemClock};
pub use config::LapseConfig;
pub use error::{LapseError, Result};
