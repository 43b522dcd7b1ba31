//! RPC Request/Response Types
//!
//! Method parameters and results. Requests the queue service already
//! understands (enqueue, list, clean) are reused as-is.

use jobq_core::application::EventFilter;
use jobq_core::domain::{Job, JobId, JobQueueAction, OwnerId};
use serde::{Deserialize, Serialize};

pub use jobq_core::application::queue::{
    CleanRequest, EnqueueRequest, JobActionResponse, JobListResponse, ListJobsRequest,
};
pub use jobq_core::domain::QueueStats;

/// jobs.enqueue.v1 result
pub type EnqueueResponse = Job;

/// jobs.get.v1
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetJobRequest {
    pub id: JobId,
}

/// jobs.stats.v1
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatsRequest {
    #[serde(default)]
    pub owner_id: Option<OwnerId>,
}

/// jobs.action.v1
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionRequest {
    pub id: JobId,
    pub action: JobQueueAction,
    pub caller_owner_id: OwnerId,
}

/// jobs.clean.v1 result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanResponse {
    pub removed: Vec<JobId>,
    pub count: usize,
}

/// queue.pause.v1 / queue.resume.v1 result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PauseResponse {
    pub paused: bool,
    /// Jobs moved between waiting and paused by this call
    pub moved: u64,
}

/// jobs.subscribe.v1 - at most one of the fields narrows the stream
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubscribeRequest {
    #[serde(default)]
    pub job_id: Option<JobId>,
    #[serde(default)]
    pub owner_id: Option<OwnerId>,
}

impl SubscribeRequest {
    pub fn filter(&self) -> EventFilter {
        match (&self.job_id, &self.owner_id) {
            (Some(job_id), _) => EventFilter::Job(job_id.clone()),
            (None, Some(owner_id)) => EventFilter::Owner(owner_id.clone()),
            (None, None) => EventFilter::All,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_action_request_wire_format() {
        let req: ActionRequest = serde_json::from_value(json!({
            "id": "job-1",
            "action": "promote",
            "caller_owner_id": "u1"
        }))
        .unwrap();
        assert_eq!(req.action, JobQueueAction::Promote);
    }

    #[test]
    fn test_subscribe_filter() {
        assert_eq!(SubscribeRequest::default().filter(), EventFilter::All);

        let by_owner: SubscribeRequest =
            serde_json::from_value(json!({ "owner_id": "u1" })).unwrap();
        assert_eq!(by_owner.filter(), EventFilter::Owner("u1".into()));

        let by_job: SubscribeRequest =
            serde_json::from_value(json!({ "job_id": "job-1", "owner_id": "u1" })).unwrap();
        assert_eq!(by_job.filter(), EventFilter::Job("job-1".into()));
    }
}
