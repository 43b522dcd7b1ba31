// Worker - claim, execute and resolve jobs

pub mod constants;
mod shutdown;

use constants::*;
pub use shutdown::{shutdown_channel, ShutdownSender, ShutdownToken};

use crate::application::handler::{ensure_owned, HandlerError, HandlerRegistry, JobContext};
use crate::application::retry::{BackoffPolicy, RetryDecision};
use crate::domain::{Job, JobEvent, JobState};
use crate::error::Result;
use crate::port::{EventPublisher, JobStore, TimeProvider};
use futures::FutureExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

/// Worker tuning knobs
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Jobs processed at the same time
    pub concurrency: usize,
    /// Sleep between polls when nothing is claimable
    pub poll_interval: Duration,
    /// Limit for a single attempt
    pub job_timeout: Duration,
    /// How often `heartbeat_at` is refreshed while a handler runs
    pub heartbeat_interval: Duration,
    /// How long shutdown waits for in-flight jobs
    pub drain_timeout: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            poll_interval: IDLE_SLEEP_DURATION,
            job_timeout: DEFAULT_JOB_TIMEOUT,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
        }
    }
}

/// Normalised result of one attempt
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Success(serde_json::Value),
    Retryable(String),
    Fatal(String),
}

impl From<std::result::Result<serde_json::Value, HandlerError>> for Outcome {
    fn from(result: std::result::Result<serde_json::Value, HandlerError>) -> Self {
        match result {
            Ok(value) => Outcome::Success(value),
            Err(HandlerError::Retryable(msg)) => Outcome::Retryable(msg),
            Err(HandlerError::Fatal(msg)) => Outcome::Fatal(msg),
        }
    }
}

/// Processes jobs from the shared store. Cheap to clone, clones share state.
#[derive(Clone)]
pub struct Worker {
    store: Arc<dyn JobStore>,
    registry: Arc<HandlerRegistry>,
    publisher: Arc<dyn EventPublisher>,
    time_provider: Arc<dyn TimeProvider>,
    backoff: BackoffPolicy,
    config: WorkerConfig,
}

impl Worker {
    pub fn new(
        store: Arc<dyn JobStore>,
        registry: Arc<HandlerRegistry>,
        publisher: Arc<dyn EventPublisher>,
        time_provider: Arc<dyn TimeProvider>,
        backoff: BackoffPolicy,
        config: WorkerConfig,
    ) -> Self {
        Self {
            store,
            registry,
            publisher,
            time_provider,
            backoff,
            config,
        }
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Run the poll loop until `shutdown` fires, then drain in-flight jobs
    pub async fn run(&self, mut shutdown: ShutdownToken) -> Result<()> {
        let concurrency = self.config.concurrency.max(1);
        info!(concurrency, "Worker started");

        let mut in_flight: JoinSet<()> = JoinSet::new();

        loop {
            if shutdown.is_shutdown() {
                info!("Worker shutting down");
                break;
            }

            // Reap finished slots without blocking
            while let Some(Some(joined)) = in_flight.join_next().now_or_never() {
                if let Err(e) = joined {
                    error!(error = %e, "Job task aborted unexpectedly");
                }
            }

            let free = concurrency.saturating_sub(in_flight.len());
            if free == 0 {
                tokio::select! {
                    joined = in_flight.join_next() => {
                        if let Some(Err(e)) = joined {
                            error!(error = %e, "Job task aborted unexpectedly");
                        }
                    }
                    _ = shutdown.wait() => {
                        info!("Worker interrupted while saturated");
                        break;
                    }
                }
                continue;
            }

            match self.claim_batch(free).await {
                Ok(jobs) if jobs.is_empty() => {
                    tokio::select! {
                        _ = sleep(self.config.poll_interval) => {},
                        _ = shutdown.wait() => {
                            info!("Worker interrupted during idle");
                            break;
                        }
                    }
                }
                Ok(jobs) => {
                    for job in jobs {
                        let worker = self.clone();
                        in_flight.spawn(async move { worker.process_claimed(job).await });
                    }
                }
                Err(e) => {
                    error!(error = %e, "Worker error, backing off");
                    tokio::select! {
                        _ = sleep(ERROR_RECOVERY_SLEEP_DURATION) => {},
                        _ = shutdown.wait() => {
                            info!("Worker interrupted during error recovery");
                            break;
                        }
                    }
                }
            }
        }

        self.drain(in_flight).await;
        info!("Worker stopped");
        Ok(())
    }

    async fn drain(&self, mut in_flight: JoinSet<()>) {
        if in_flight.is_empty() {
            return;
        }
        info!(in_flight = in_flight.len(), "Waiting for in-flight jobs");

        let drained = tokio::time::timeout(self.config.drain_timeout, async {
            while in_flight.join_next().await.is_some() {}
        })
        .await;

        if drained.is_err() {
            warn!(
                remaining = in_flight.len(),
                drain_timeout_ms = self.config.drain_timeout.as_millis() as u64,
                "Drain timeout, abandoning in-flight jobs to stall recovery"
            );
            in_flight.abort_all();
        }
    }

    /// Claim and fully process one job inline (returns true if a job was processed)
    pub async fn process_next_job(&self) -> Result<bool> {
        match self.claim_batch(1).await?.into_iter().next() {
            Some(job) => {
                self.process_claimed(job).await;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Claim up to `limit` eligible jobs by compare-and-swap
    pub async fn claim_batch(&self, limit: usize) -> Result<Vec<Job>> {
        if self.store.is_paused().await? {
            return Ok(Vec::new());
        }

        let now = self.time_provider.now_millis();
        let candidates = self.store.next_candidates(now, limit as i64).await?;
        let mut claimed = Vec::with_capacity(candidates.len());

        for candidate in candidates {
            match self.store.claim(&candidate.id, candidate.state, now).await {
                Ok(job) => {
                    info!(
                        job_id = %job.id,
                        name = %job.name,
                        attempt = job.attempts_made,
                        "Job claimed"
                    );
                    self.publisher
                        .publish(JobEvent::transition(&job, Some(candidate.state), now));
                    claimed.push(job);
                }
                Err(e) if e.is_lost_race() => {
                    debug!(job_id = %candidate.id, error = %e, "Claim lost, trying next");
                }
                Err(e) => return Err(e),
            }
        }

        Ok(claimed)
    }

    async fn process_claimed(&self, job: Job) {
        let outcome = self.execute(&job).await;
        if let Err(e) = self.resolve_outcome(&job, outcome).await {
            // The job stays active; stall recovery picks it up
            error!(job_id = %job.id, error = %e, "Failed to persist job outcome");
        }
    }

    /// Run the handler for a claimed job on its own task
    pub async fn execute(&self, job: &Job) -> Outcome {
        let Some(handler) = self.registry.get(&job.name) else {
            return Outcome::Fatal(format!("no handler registered for '{}'", job.name));
        };

        let ctx = JobContext::new(
            job,
            Arc::clone(&self.store),
            Arc::clone(&self.publisher),
            Arc::clone(&self.time_provider),
        );

        let mut task = tokio::spawn(async move { handler.handle(ctx).await });
        let heartbeat = self.spawn_heartbeat(job);
        let finished = tokio::time::timeout(self.config.job_timeout, &mut task).await;
        heartbeat.abort();

        match finished {
            Err(_) => {
                task.abort();
                Outcome::Retryable(format!(
                    "job timed out after {}ms",
                    self.config.job_timeout.as_millis()
                ))
            }
            Ok(Ok(result)) => Outcome::from(result),
            Ok(Err(join_err)) if join_err.is_panic() => {
                let reason = panic_message(join_err.into_panic());
                error!(job_id = %job.id, panic = %reason, "Handler panicked");
                Outcome::Fatal(format!("handler panicked: {}", reason))
            }
            Ok(Err(_)) => Outcome::Fatal("handler task was cancelled".to_string()),
        }
    }

    fn spawn_heartbeat(&self, job: &Job) -> JoinHandle<()> {
        let store = Arc::clone(&self.store);
        let time_provider = Arc::clone(&self.time_provider);
        let job_id = job.id.clone();
        let attempt = job.attempts_made;
        let period = self.config.heartbeat_interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await; // first tick fires immediately

            loop {
                ticker.tick().await;
                let now = time_provider.now_millis();
                let beat = store
                    .update(&job_id, &|job: &mut Job| {
                        ensure_owned(job, attempt)?;
                        job.heartbeat_at = Some(now);
                        Ok(())
                    })
                    .await;

                match beat {
                    Ok(_) => {}
                    Err(e) if e.is_lost_race() => {
                        debug!(job_id = %job_id, "Heartbeat stopped, job moved on");
                        break;
                    }
                    Err(e) => warn!(job_id = %job_id, error = %e, "Heartbeat failed"),
                }
            }
        })
    }

    /// Persist the outcome of the attempt `claimed` started.
    ///
    /// Returns `None` when the result was discarded because the job was
    /// removed or moved on to another attempt in the meantime.
    pub async fn resolve_outcome(&self, claimed: &Job, outcome: Outcome) -> Result<Option<Job>> {
        let now = self.time_provider.now_millis();
        let attempt = claimed.attempts_made;
        let backoff = self.backoff;

        let persisted = self
            .store
            .update(&claimed.id, &|job: &mut Job| {
                ensure_owned(job, attempt)?;
                match &outcome {
                    Outcome::Success(value) => job.complete(value.clone(), now)?,
                    Outcome::Retryable(msg) => match backoff.decide(job) {
                        RetryDecision::Retry(delay_ms) => {
                            job.schedule_retry(msg.clone(), delay_ms, now)?
                        }
                        RetryDecision::Failed => job.fail(msg.clone(), now)?,
                    },
                    Outcome::Fatal(msg) => job.fail(msg.clone(), now)?,
                }
                Ok(())
            })
            .await;

        let job = match persisted {
            Ok(job) => job,
            Err(e) if e.is_lost_race() => {
                warn!(
                    job_id = %claimed.id,
                    attempt,
                    error = %e,
                    "Discarding result of an attempt that no longer owns the job"
                );
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        match job.state {
            JobState::Completed => info!(job_id = %job.id, attempt, "Job completed"),
            JobState::Delayed => warn!(
                job_id = %job.id,
                attempt,
                max_attempts = job.max_attempts,
                delay_until = ?job.delay_until,
                error = job.error_message.as_deref().unwrap_or_default(),
                "Job attempt failed, retry scheduled"
            ),
            _ => error!(
                job_id = %job.id,
                attempt,
                error = job.error_message.as_deref().unwrap_or_default(),
                "Job failed"
            ),
        }

        self.publisher
            .publish(JobEvent::transition(&job, Some(JobState::Active), now));
        Ok(Some(job))
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
