// Job Store Port (Interface)

use crate::domain::{Job, JobFilter, JobId, JobPage, JobState, QueueStats};
use crate::error::Result;
use async_trait::async_trait;

/// Read-modify-write step applied atomically by [`JobStore::update`].
///
/// Returning an error aborts the write; the error is handed back to the caller.
pub type JobMutation<'a> = &'a (dyn Fn(&mut Job) -> Result<()> + Send + Sync);

/// Durable, concurrently shared job persistence.
///
/// Producers and workers (possibly in other processes) share one store. The
/// only synchronization they rely on is the compare-and-swap done by
/// [`JobStore::claim`] and [`JobStore::update`].
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Check that the backend is reachable
    ///
    /// # Errors
    /// - AppError::StoreUnavailable if it is not
    async fn ping(&self) -> Result<()>;

    /// Release backend resources. Later calls fail with StoreUnavailable.
    async fn close(&self);

    /// Insert a new job
    ///
    /// # Errors
    /// - AppError::Conflict if a job with the same id exists
    async fn insert(&self, job: &Job) -> Result<()>;

    /// Find job by ID
    async fn get(&self, id: &JobId) -> Result<Option<Job>>;

    /// Jobs matching `filter`, newest first, plus the total matching count
    async fn list_jobs(&self, filter: &JobFilter, offset: i64, limit: i64) -> Result<JobPage>;

    /// Count jobs per state, optionally for a single owner
    async fn count_by_state(&self, owner_id: Option<&str>) -> Result<QueueStats>;

    /// Atomic read-modify-write of one job, returning the stored result
    ///
    /// # Errors
    /// - AppError::NotFound if the job does not exist
    /// - AppError::Conflict if concurrent writers kept winning the swap
    /// - whatever `mutation` returns
    async fn update(&self, id: &JobId, mutation: JobMutation<'_>) -> Result<Job>;

    /// Compare-and-swap `expected -> active`, starting a new attempt
    ///
    /// # Errors
    /// - AppError::Conflict if the job is no longer in `expected` (or not yet due)
    /// - AppError::NotFound if the job does not exist
    async fn claim(&self, id: &JobId, expected: JobState, now_millis: i64) -> Result<Job>;

    /// Claimable jobs in dispatch order (priority ASC, created_at ASC)
    async fn next_candidates(&self, now_millis: i64, limit: i64) -> Result<Vec<Job>>;

    /// Active jobs whose last heartbeat is older than `cutoff_millis`
    async fn find_stalled(&self, cutoff_millis: i64) -> Result<Vec<Job>>;

    /// Delete a job. Returns false if it was already gone.
    async fn remove(&self, id: &JobId) -> Result<bool>;

    /// Delete up to `limit` jobs in `state` finished before `finished_before`
    async fn clean(
        &self,
        state: JobState,
        finished_before: i64,
        limit: i64,
        owner_id: Option<&str>,
    ) -> Result<Vec<JobId>>;

    /// Pause (waiting -> paused) or resume (paused -> waiting) the whole queue.
    /// Returns the number of jobs moved.
    async fn set_paused(&self, paused: bool) -> Result<u64>;

    /// Whether the queue is currently paused
    async fn is_paused(&self) -> Result<bool>;
}
