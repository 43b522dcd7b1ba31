// Listing and counting (read-only snapshots of the store)

use crate::domain::{Job, JobFilter, JobState, OwnerId, QueueStats};
use crate::error::{AppError, Result};
use crate::port::JobStore;
use serde::{Deserialize, Serialize};

/// Page size used when the caller does not pick one
pub const DEFAULT_PAGE_SIZE: i64 = 20;

/// Larger page sizes are capped to this
pub const MAX_PAGE_SIZE: i64 = 100;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListJobsRequest {
    #[serde(default)]
    pub owner_id: Option<OwnerId>,

    /// Empty means every state
    #[serde(default)]
    pub states: Vec<JobState>,

    #[serde(default = "default_page")]
    pub page: i64,

    #[serde(default = "default_page_size")]
    pub page_size: i64,
}

fn default_page() -> i64 {
    1
}

fn default_page_size() -> i64 {
    DEFAULT_PAGE_SIZE
}

impl Default for ListJobsRequest {
    fn default() -> Self {
        Self {
            owner_id: None,
            states: Vec::new(),
            page: default_page(),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobListResponse {
    pub jobs: Vec<Job>,
    pub total: i64,
    pub page: i64,
    pub page_size: i64,
}

pub async fn list(store: &dyn JobStore, req: ListJobsRequest) -> Result<JobListResponse> {
    if req.page < 1 {
        return Err(AppError::Validation("page must be >= 1".to_string()));
    }
    if req.page_size < 1 {
        return Err(AppError::Validation("page_size must be >= 1".to_string()));
    }
    let page_size = req.page_size.min(MAX_PAGE_SIZE);
    let offset = (req.page - 1).saturating_mul(page_size);

    let filter = JobFilter {
        owner_id: req.owner_id,
        states: req.states,
    };
    let page = store.list_jobs(&filter, offset, page_size).await?;

    Ok(JobListResponse {
        jobs: page.jobs,
        total: page.total,
        page: req.page,
        page_size,
    })
}

pub async fn stats(store: &dyn JobStore, owner_id: Option<&str>) -> Result<QueueStats> {
    store.count_by_state(owner_id).await
}
