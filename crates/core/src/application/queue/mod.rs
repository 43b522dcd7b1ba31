// Queue Service - producer-facing use cases

pub mod actions;
pub mod enqueue;
pub mod listing;

pub use actions::{CleanRequest, JobActionResponse};
pub use enqueue::EnqueueRequest;
pub use listing::{JobListResponse, ListJobsRequest};

use crate::domain::{Job, JobId, JobQueueAction, QueueStats};
use crate::error::{AppError, Result};
use crate::port::{EventPublisher, IdProvider, JobStore, TimeProvider};
use std::sync::Arc;
use tracing::info;

/// Queue Service
///
/// Every call is safe under concurrent invocation; the store's atomic
/// operations are the only synchronization.
pub struct QueueService {
    store: Arc<dyn JobStore>,
    id_provider: Arc<dyn IdProvider>,
    time_provider: Arc<dyn TimeProvider>,
    publisher: Arc<dyn EventPublisher>,
}

impl QueueService {
    pub fn new(
        store: Arc<dyn JobStore>,
        id_provider: Arc<dyn IdProvider>,
        time_provider: Arc<dyn TimeProvider>,
        publisher: Arc<dyn EventPublisher>,
    ) -> Self {
        Self {
            store,
            id_provider,
            time_provider,
            publisher,
        }
    }

    /// Validate and persist a new job
    pub async fn enqueue(&self, req: EnqueueRequest) -> Result<Job> {
        enqueue::execute(
            self.store.as_ref(),
            self.id_provider.as_ref(),
            self.time_provider.as_ref(),
            self.publisher.as_ref(),
            req,
        )
        .await
    }

    pub async fn get_job(&self, id: &JobId) -> Result<Job> {
        self.store
            .get(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("job {}", id)))
    }

    /// Newest-first page of jobs matching the request's filters
    pub async fn list_jobs(&self, req: ListJobsRequest) -> Result<JobListResponse> {
        listing::list(self.store.as_ref(), req).await
    }

    pub async fn queue_stats(&self, owner_id: Option<&str>) -> Result<QueueStats> {
        listing::stats(self.store.as_ref(), owner_id).await
    }

    /// Apply a lifecycle action on behalf of `caller_owner_id`
    ///
    /// # Errors
    /// - AppError::NotFound if the job does not exist
    /// - AppError::Forbidden if the caller does not own the job
    /// - AppError::InvalidState if the action is illegal in the job's state
    pub async fn perform_action(
        &self,
        id: &JobId,
        action: JobQueueAction,
        caller_owner_id: &str,
    ) -> Result<JobActionResponse> {
        actions::perform(
            self.store.as_ref(),
            self.time_provider.as_ref(),
            self.publisher.as_ref(),
            id,
            action,
            caller_owner_id,
        )
        .await
    }

    /// Remove that also succeeds when the job is already gone
    pub async fn remove_job(&self, id: &JobId, caller_owner_id: &str) -> Result<JobActionResponse> {
        actions::remove_idempotent(
            self.store.as_ref(),
            self.time_provider.as_ref(),
            self.publisher.as_ref(),
            id,
            caller_owner_id,
        )
        .await
    }

    pub async fn clean(&self, req: CleanRequest) -> Result<Vec<JobId>> {
        actions::clean(self.store.as_ref(), self.time_provider.as_ref(), req).await
    }

    /// Stop dispatch: waiting jobs move to paused
    pub async fn pause(&self) -> Result<u64> {
        let moved = self.store.set_paused(true).await?;
        info!(moved, "Queue paused");
        Ok(moved)
    }

    /// Resume dispatch: paused jobs move back to waiting
    pub async fn resume(&self) -> Result<u64> {
        let moved = self.store.set_paused(false).await?;
        info!(moved, "Queue resumed");
        Ok(moved)
    }

    pub async fn is_paused(&self) -> Result<bool> {
        self.store.is_paused().await
    }
}
