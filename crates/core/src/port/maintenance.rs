// Retention housekeeping port
use crate::domain::JobState;
use crate::error::Result;
use crate::port::JobStore;
use async_trait::async_trait;

/// Age/count limits for finished jobs. `None` disables a limit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetentionPolicy {
    /// Keep at most this many completed jobs (newest kept)
    pub completed_max_count: Option<i64>,

    /// Remove completed jobs finished longer ago than this
    pub completed_max_age_ms: Option<i64>,

    /// Keep at most this many failed jobs
    pub failed_max_count: Option<i64>,

    /// Remove failed jobs finished longer ago than this
    pub failed_max_age_ms: Option<i64>,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            completed_max_count: Some(100),
            completed_max_age_ms: Some(24 * 60 * 60 * 1000), // 24 hours
            failed_max_count: Some(50),
            failed_max_age_ms: None,
        }
    }
}

/// What a retention pass removed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetentionReport {
    pub removed_completed: i64,
    pub removed_failed: i64,
}

/// Batch size used when removing aged jobs
const AGE_SWEEP_BATCH: i64 = 1000;

/// Store-level housekeeping of finished jobs.
///
/// Advisory only: nothing in the state machine depends on it having run.
#[async_trait]
pub trait Maintenance: JobStore {
    /// Remove the oldest finished jobs in `state` beyond the newest `keep`
    ///
    /// # Returns
    /// Number of jobs deleted
    async fn trim_to_count(&self, state: JobState, keep: i64) -> Result<i64>;

    /// Apply `policy` as of `now_millis`
    async fn apply_retention(
        &self,
        policy: &RetentionPolicy,
        now_millis: i64,
    ) -> Result<RetentionReport> {
        let mut report = RetentionReport::default();

        let limits = [
            (
                JobState::Completed,
                policy.completed_max_age_ms,
                policy.completed_max_count,
            ),
            (
                JobState::Failed,
                policy.failed_max_age_ms,
                policy.failed_max_count,
            ),
        ];

        for (state, max_age, max_count) in limits {
            let mut removed = 0;

            if let Some(max_age) = max_age {
                let cutoff = now_millis - max_age;
                loop {
                    let batch = self.clean(state, cutoff, AGE_SWEEP_BATCH, None).await?;
                    removed += batch.len() as i64;
                    if (batch.len() as i64) < AGE_SWEEP_BATCH {
                        break;
                    }
                }
            }

            if let Some(keep) = max_count {
                removed += self.trim_to_count(state, keep).await?;
            }

            match state {
                JobState::Completed => report.removed_completed = removed,
                _ => report.removed_failed = removed,
            }
        }

        tracing::info!(
            removed_completed = report.removed_completed,
            removed_failed = report.removed_failed,
            "Retention pass completed"
        );

        Ok(report)
    }
}
