// Lifecycle actions: retry, remove, promote, clean

use crate::domain::{Job, JobEvent, JobId, JobQueueAction, JobState, OwnerId};
use crate::error::{AppError, Result};
use crate::port::{EventPublisher, JobStore, TimeProvider};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Default number of jobs one clean call may remove
pub const DEFAULT_CLEAN_LIMIT: i64 = 1000;

/// Hard ceiling for a single clean call
pub const MAX_CLEAN_LIMIT: i64 = 10_000;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobActionResponse {
    pub success: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job: Option<Job>,
}

/// Remove finished jobs older than a grace period
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanRequest {
    pub state: JobState,

    /// Only jobs finished at least this long ago
    #[serde(default)]
    pub grace_ms: i64,

    #[serde(default = "default_clean_limit")]
    pub limit: i64,

    /// Restrict to one owner's jobs
    #[serde(default)]
    pub owner_id: Option<OwnerId>,
}

fn default_clean_limit() -> i64 {
    DEFAULT_CLEAN_LIMIT
}

fn ensure_caller_owns(job: &Job, caller: &str) -> Result<()> {
    if job.owner_id != caller {
        return Err(AppError::Forbidden(format!(
            "job {} does not belong to the caller",
            job.id
        )));
    }
    Ok(())
}

fn log_if_forbidden(err: &AppError, id: &JobId, action: JobQueueAction, caller: &str) {
    if let AppError::Forbidden(_) = err {
        warn!(
            job_id = %id,
            action = %action,
            caller_owner_id = %caller,
            "Forbidden job action attempted"
        );
    }
}

pub async fn perform(
    store: &dyn JobStore,
    time_provider: &dyn TimeProvider,
    publisher: &dyn EventPublisher,
    id: &JobId,
    action: JobQueueAction,
    caller: &str,
) -> Result<JobActionResponse> {
    let result = match action {
        JobQueueAction::Retry => {
            transition(store, time_provider, publisher, id, caller, JobState::Failed, |job| {
                job.retry()
            })
            .await
            .map(|job| JobActionResponse {
                success: true,
                message: "Job queued for retry".to_string(),
                job: Some(job),
            })
        }
        JobQueueAction::Promote => {
            transition(store, time_provider, publisher, id, caller, JobState::Delayed, |job| {
                job.promote()
            })
            .await
            .map(|job| JobActionResponse {
                success: true,
                message: "Job promoted".to_string(),
                job: Some(job),
            })
        }
        JobQueueAction::Remove => remove(store, time_provider, publisher, id, caller).await,
    };

    if let Err(e) = &result {
        log_if_forbidden(e, id, action, caller);
    }
    result
}

/// Atomic owner check plus state-machine step
async fn transition(
    store: &dyn JobStore,
    time_provider: &dyn TimeProvider,
    publisher: &dyn EventPublisher,
    id: &JobId,
    caller: &str,
    from: JobState,
    step: fn(&mut Job) -> crate::domain::error::Result<()>,
) -> Result<Job> {
    let job = store
        .update(id, &|job: &mut Job| {
            ensure_caller_owns(job, caller)?;
            step(job)?;
            Ok(())
        })
        .await?;

    let now = time_provider.now_millis();
    info!(job_id = %job.id, from = %from, to = %job.state, "Job action applied");
    publisher.publish(JobEvent::transition(&job, Some(from), now));
    Ok(job)
}

/// Remove from any state. Owner is immutable, so a fresh read is authoritative.
async fn remove(
    store: &dyn JobStore,
    time_provider: &dyn TimeProvider,
    publisher: &dyn EventPublisher,
    id: &JobId,
    caller: &str,
) -> Result<JobActionResponse> {
    let job = store
        .get(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("job {}", id)))?;
    ensure_caller_owns(&job, caller)?;

    let deleted = store.remove(id).await?;
    if deleted {
        info!(job_id = %id, state = %job.state, "Job removed");
        publisher.publish(JobEvent::removed(&job, time_provider.now_millis()));
    }

    Ok(JobActionResponse {
        success: true,
        message: if deleted {
            "Job removed".to_string()
        } else {
            "Job already removed".to_string()
        },
        job: None,
    })
}

/// Idempotent remove: an absent job counts as removed
pub async fn remove_idempotent(
    store: &dyn JobStore,
    time_provider: &dyn TimeProvider,
    publisher: &dyn EventPublisher,
    id: &JobId,
    caller: &str,
) -> Result<JobActionResponse> {
    match remove(store, time_provider, publisher, id, caller).await {
        Err(AppError::NotFound(_)) => Ok(JobActionResponse {
            success: true,
            message: "Job already removed".to_string(),
            job: None,
        }),
        Err(e) => {
            log_if_forbidden(&e, id, JobQueueAction::Remove, caller);
            Err(e)
        }
        ok => ok,
    }
}

pub async fn clean(
    store: &dyn JobStore,
    time_provider: &dyn TimeProvider,
    req: CleanRequest,
) -> Result<Vec<JobId>> {
    if !req.state.is_terminal() {
        return Err(AppError::Validation(format!(
            "clean only applies to completed or failed jobs, got {}",
            req.state
        )));
    }
    if req.grace_ms < 0 {
        return Err(AppError::Validation("grace_ms must be >= 0".to_string()));
    }
    if !(1..=MAX_CLEAN_LIMIT).contains(&req.limit) {
        return Err(AppError::Validation(format!(
            "limit out of range (1..={})",
            MAX_CLEAN_LIMIT
        )));
    }

    let cutoff = time_provider.now_millis() - req.grace_ms;
    let removed = store
        .clean(req.state, cutoff, req.limit, req.owner_id.as_deref())
        .await?;

    info!(
        state = %req.state,
        grace_ms = req.grace_ms,
        removed = removed.len(),
        "Cleaned finished jobs"
    );
    Ok(removed)
}
