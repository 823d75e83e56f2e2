use std::sync::Arc;
use std::time::Duration;

use lapse_core::config::SchedulerConfig;
use lapse_jobs::{FailureOutcome, Job, JobError, JobPayload, JobQueue, RetryPolicy};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::error::HandlerError;
use crate::registry::{JobHandler, JobHandlerRegistry};

/// Polling and retry parameters of a [`SchedulerEngine`].
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub tick_interval: Duration,
    /// Upper bound on jobs claimed per tick.
    pub batch_size: usize,
    /// Handler attempts per job per tick.
    pub max_attempts: u32,
    /// Delay between two attempts of the same job within a tick.
    pub retry: RetryPolicy,
    pub handler_timeout: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self::from_config(&SchedulerConfig::default())
    }
}

impl EngineSettings {
    pub fn from_config(cfg: &SchedulerConfig) -> Self {
        Self {
            tick_interval: cfg.tick_interval(),
            batch_size: cfg.batch_size,
            max_attempts: cfg.max_attempts,
            retry: RetryPolicy::exponential(
                Duration::from_millis(cfg.retry_base_delay_ms),
                Duration::from_millis(cfg.retry_max_delay_ms),
            ),
            handler_timeout: cfg.handler_timeout(),
        }
    }
}

/// Counters for one tick, mostly for tests and logs.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TickReport {
    /// Expired leases released at the start of the tick.
    pub reclaimed: usize,
    /// Jobs that were due when the tick started.
    pub due: usize,
    pub claimed: usize,
    pub completed: usize,
    pub failed: usize,
}

enum JobOutcome {
    Completed,
    Failed,
}

/// Polls the job queue and dispatches due jobs to their handlers.
pub struct SchedulerEngine {
    queue: Arc<JobQueue>,
    registry: Arc<JobHandlerRegistry>,
    settings: EngineSettings,
    worker_id: String,
}

impl SchedulerEngine {
    pub fn new(queue: Arc<JobQueue>, registry: Arc<JobHandlerRegistry>) -> Self {
        Self {
            queue,
            registry,
            settings: EngineSettings::default(),
            worker_id: format!("lapse-{}", Uuid::new_v4()),
        }
    }

    pub fn with_settings(mut self, settings: EngineSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Name recorded in `locked_by` for every claim this engine makes.
    pub fn with_worker_id(mut self, worker_id: impl Into<String>) -> Self {
        self.worker_id = worker_id.into();
        self
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// Main event loop. Ticks every `tick_interval` until `shutdown` becomes
    /// `true` or its sender is dropped.
    ///
    /// Shutdown is only observed between ticks, so a tick that has started
    /// always finishes, including the jobs it spawned.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            worker_id = %self.worker_id,
            tick_secs = self.settings.tick_interval.as_secs_f64(),
            handlers = ?self.registry.kinds(),
            "scheduler engine started"
        );

        let mut interval = tokio::time::interval(self.settings.tick_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.tick().await {
                        error!("scheduler tick error: {e}");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("scheduler engine stopped");
    }

    /// Run one polling cycle: reclaim leases, claim up to `batch_size` due
    /// jobs and process them concurrently.
    ///
    /// A failing job never affects the others. Only store errors from the
    /// lease sweep or the due scan abort the tick.
    pub async fn tick(&self) -> Result<TickReport, JobError> {
        let mut report = TickReport {
            reclaimed: self.queue.reclaim_expired_leases()?,
            ..TickReport::default()
        };

        report.due = self.queue.get_due_jobs()?.len();
        if report.due == 0 {
            debug!("no due jobs");
            return Ok(report);
        }
        info!(count = report.due, "processing due jobs");

        let mut tasks = JoinSet::new();
        while report.claimed < self.settings.batch_size {
            let job = match self.queue.get_and_lock_due_job(&self.worker_id) {
                Ok(Some(job)) => job,
                Ok(None) => break,
                Err(e) => {
                    // keep what was already claimed; those tasks still run to the end
                    error!("claiming due job failed: {e}");
                    break;
                }
            };
            report.claimed += 1;

            let span = info_span!("job", job_id = %job.id, job_type = %job.job_type);
            tasks.spawn(
                process_job(
                    Arc::clone(&self.queue),
                    Arc::clone(&self.registry),
                    self.settings.clone(),
                    job,
                )
                .instrument(span),
            );
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(JobOutcome::Completed) => report.completed += 1,
                Ok(JobOutcome::Failed) => report.failed += 1,
                Err(e) => {
                    error!("job task aborted: {e}");
                    report.failed += 1;
                }
            }
        }

        info!(
            claimed = report.claimed,
            completed = report.completed,
            failed = report.failed,
            "tick finished"
        );
        Ok(report)
    }
}

/// Dispatch one claimed job and settle its row.
async fn process_job(
    queue: Arc<JobQueue>,
    registry: Arc<JobHandlerRegistry>,
    settings: EngineSettings,
    job: Job,
) -> JobOutcome {
    let err = match dispatch(&queue, &registry, &settings, &job).await {
        Ok(()) => return JobOutcome::Completed,
        Err(e) => e,
    };

    match &err {
        HandlerError::Queue(JobError::LeaseLost { holder, .. }) => {
            warn!(?holder, "lease lost before the job settled; leaving it to the new holder");
            return JobOutcome::Failed;
        }
        HandlerError::NoHandler(_) | HandlerError::Queue(JobError::InvalidPayload { .. }) => {
            error!(error = %err, "job cannot be dispatched; not completing it");
        }
        _ => warn!(error = %err, "job failed"),
    }

    match queue.record_failure(&job.id, job.locked_by.as_deref(), &err.to_string()) {
        Ok(FailureOutcome::Retrying { retry_count, retry_at }) => {
            debug!(retry_count, %retry_at, "job held until its lease expires");
        }
        Ok(FailureOutcome::Failed { retry_count }) => {
            error!(retry_count, "job gave up after persisted retries");
        }
        Err(JobError::LeaseLost { holder, .. }) => {
            warn!(?holder, "lease lost before the failure was recorded");
        }
        Err(e) => error!("recording job failure failed: {e}"),
    }
    JobOutcome::Failed
}

/// Resolve the handler, then run handler + completion up to `max_attempts`
/// times. The claim is held across attempts.
async fn dispatch(
    queue: &JobQueue,
    registry: &JobHandlerRegistry,
    settings: &EngineSettings,
    job: &Job,
) -> Result<(), HandlerError> {
    let (kind, handler) = registry
        .resolve(&job.job_type)
        .ok_or_else(|| HandlerError::NoHandler(job.job_type.clone()))?;
    let payload = JobPayload::decode(kind, &job.payload)?;

    let mut attempt = 0;
    loop {
        attempt += 1;
        match attempt_once(queue, handler.as_ref(), settings, job, &payload).await {
            Ok(()) => {
                debug!(attempt, "job attempt succeeded");
                return Ok(());
            }
            Err(e) if e.is_retryable() && attempt < settings.max_attempts => {
                let delay = settings.retry.delay_for_attempt(attempt);
                warn!(
                    attempt,
                    max_attempts = settings.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "job attempt failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

async fn attempt_once(
    queue: &JobQueue,
    handler: &dyn JobHandler,
    settings: &EngineSettings,
    job: &Job,
    payload: &JobPayload,
) -> Result<(), HandlerError> {
    tokio::time::timeout(settings.handler_timeout, handler.handle(job, payload))
        .await
        .map_err(|_| HandlerError::Timeout {
            ms: settings.handler_timeout.as_millis() as u64,
        })??;
    queue.mark_completed(
        &job.id,
        job.locked_by.as_deref(),
        job.is_recurring,
        None,
        job.recurring_interval(),
    )?;
    Ok(())
}
