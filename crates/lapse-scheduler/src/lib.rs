//! `lapse-scheduler`: Tokio polling loop that runs due jobs.
//!
//! # Overview
//!
//! [`SchedulerEngine`] wakes up every `tick_interval`, releases expired
//! leases, claims due jobs from the [`lapse_jobs::JobQueue`] and runs each
//! through the [`JobHandler`] registered for its kind. Successful jobs are
//! completed (or rescheduled when recurring); failures are counted against
//! the job's persisted retry budget.

pub mod engine;
pub mod error;
pub mod handlers;
pub mod registry;

pub use engine::{EngineSettings, SchedulerEngine, TickReport};
pub use error::{HandlerError, Result};
pub use handlers::CancelBookingHandler;
pub use registry::{JobHandler, JobHandlerRegistry};
