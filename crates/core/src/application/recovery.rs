// Stalled job recovery
use crate::application::retry::{BackoffPolicy, RetryDecision};
use crate::application::worker::constants::{
    DEFAULT_MAX_STALLED_COUNT, DEFAULT_STALL_CHECK_INTERVAL, DEFAULT_STALL_THRESHOLD_MS,
    STALLED_LIMIT_MESSAGE,
};
use crate::application::worker::ShutdownToken;
use crate::domain::{Job, JobEvent, JobState};
use crate::error::Result;
use crate::port::{EventPublisher, JobStore, TimeProvider};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct StallConfig {
    /// Active job without heartbeat for this long is stalled
    pub threshold_ms: i64,
    /// Recoveries allowed before the job is failed
    pub max_stalled_count: i32,
    /// Sweep period
    pub interval: Duration,
}

impl Default for StallConfig {
    fn default() -> Self {
        Self {
            threshold_ms: DEFAULT_STALL_THRESHOLD_MS,
            max_stalled_count: DEFAULT_MAX_STALLED_COUNT,
            interval: DEFAULT_STALL_CHECK_INTERVAL,
        }
    }
}

/// Finds active jobs whose worker stopped heartbeating (crash, hang, lost
/// connectivity) and hands them back to the state machine.
///
/// Runs once on startup for crash recovery, then periodically.
pub struct StalledJobSweeper {
    store: Arc<dyn JobStore>,
    publisher: Arc<dyn EventPublisher>,
    time_provider: Arc<dyn TimeProvider>,
    backoff: BackoffPolicy,
    config: StallConfig,
}

impl StalledJobSweeper {
    pub fn new(
        store: Arc<dyn JobStore>,
        publisher: Arc<dyn EventPublisher>,
        time_provider: Arc<dyn TimeProvider>,
        backoff: BackoffPolicy,
        config: StallConfig,
    ) -> Self {
        Self {
            store,
            publisher,
            time_provider,
            backoff,
            config,
        }
    }

    /// One sweep
    ///
    /// # Returns
    /// Number of jobs recovered
    pub async fn run_once(&self) -> Result<usize> {
        let now = self.time_provider.now_millis();
        let cutoff = now - self.config.threshold_ms;
        let stalled = self.store.find_stalled(cutoff).await?;

        if stalled.is_empty() {
            debug!(cutoff, "No stalled jobs");
            return Ok(0);
        }

        let mut recovered = 0;
        for job in stalled {
            match self.recover(&job, cutoff, now).await {
                Ok(Some(updated)) => {
                    recovered += 1;
                    if updated.state == JobState::Failed {
                        error!(
                            job_id = %updated.id,
                            stalled_count = updated.stalled_count,
                            attempts_made = updated.attempts_made,
                            "Stalled job failed"
                        );
                    } else {
                        warn!(
                            job_id = %updated.id,
                            stalled_count = updated.stalled_count,
                            delay_until = ?updated.delay_until,
                            "Stalled job requeued"
                        );
                    }
                    self.publisher
                        .publish(JobEvent::transition(&updated, Some(JobState::Active), now));
                }
                Ok(None) => {}
                Err(e) => error!(job_id = %job.id, error = %e, "Failed to recover stalled job"),
            }
        }

        info!(recovered, "Stalled job sweep complete");
        Ok(recovered)
    }

    /// Recover one job. `None` if it resumed heartbeating or finished meanwhile.
    async fn recover(&self, seen: &Job, cutoff: i64, now: i64) -> Result<Option<Job>> {
        let attempt = seen.attempts_made;
        let max_stalled = self.config.max_stalled_count;
        let backoff = self.backoff;

        let result = self
            .store
            .update(&seen.id, &|job: &mut Job| {
                let still_stalled = job.state == JobState::Active
                    && job.attempts_made == attempt
                    && job.heartbeat_at.map_or(true, |at| at < cutoff);
                if !still_stalled {
                    return Err(crate::error::AppError::Conflict(format!(
                        "job {} is no longer stalled",
                        job.id
                    )));
                }

                if job.stalled_count >= max_stalled {
                    job.fail(STALLED_LIMIT_MESSAGE, now)?;
                    return Ok(());
                }

                job.stalled_count += 1;
                let reason = format!("job stalled (no heartbeat since {:?})", job.heartbeat_at);
                match backoff.decide(job) {
                    RetryDecision::Retry(delay_ms) => job.schedule_retry(reason, delay_ms, now)?,
                    RetryDecision::Failed => job.fail(reason, now)?,
                }
                Ok(())
            })
            .await;

        match result {
            Ok(job) => Ok(Some(job)),
            Err(e) if e.is_lost_race() => {
                debug!(job_id = %seen.id, "Stalled job recovered itself");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Sweep on an interval until shutdown (spawn it)
    pub async fn run(self, mut shutdown: ShutdownToken) {
        info!(
            threshold_ms = self.config.threshold_ms,
            max_stalled_count = self.config.max_stalled_count,
            "Stalled job sweeper started"
        );

        let mut tick = interval(self.config.interval);
        loop {
            tokio::select! {
                _ = tick.tick() => {},
                _ = shutdown.wait() => break,
            }

            if let Err(e) = self.run_once().await {
                error!(error = %e, "Stalled job sweep failed");
            }
        }

        info!("Stalled job sweeper stopped");
    }
}
