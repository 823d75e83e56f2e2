use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use lapse_jobs::{Job, JobKind, JobPayload};
use tracing::{debug, warn};

use crate::error::Result;

/// Code that runs one kind of job.
///
/// Handlers must be idempotent: a job can be delivered again after a crash,
/// a lease expiry or a retried attempt.
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// `payload` is already decoded and validated for `job.job_type`.
    async fn handle(&self, job: &Job, payload: &JobPayload) -> Result<()>;
}

/// Maps each [`JobKind`] to the handler that runs it.
///
/// Built once at startup and shared as `Arc<JobHandlerRegistry>`.
#[derive(Default)]
pub struct JobHandlerRegistry {
    handlers: HashMap<JobKind, Arc<dyn JobHandler>>,
}

impl JobHandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `kind`, replacing any previous one.
    pub fn register(&mut self, kind: JobKind, handler: Arc<dyn JobHandler>) {
        if self.handlers.insert(kind, handler).is_some() {
            warn!(job_type = %kind, "job handler replaced");
        } else {
            debug!(job_type = %kind, "job handler registered");
        }
    }

    pub fn get(&self, kind: JobKind) -> Option<Arc<dyn JobHandler>> {
        self.handlers.get(&kind).cloned()
    }

    /// Look up the handler for a stored type string.
    ///
    /// `None` when the string is not a known kind or nothing is registered
    /// for it.
    pub fn resolve(&self, job_type: &str) -> Option<(JobKind, Arc<dyn JobHandler>)> {
        let kind: JobKind = job_type.parse().ok()?;
        self.get(kind).map(|h| (kind, h))
    }

    pub fn kinds(&self) -> Vec<JobKind> {
        let mut kinds: Vec<_> = self.handlers.keys().copied().collect();
        kinds.sort_by_key(|k| k.as_str());
        kinds
    }
}
