// Job state-change events for real-time observers

use crate::domain::job::{Job, JobId, JobState, OwnerId};
use serde::{Deserialize, Serialize};

/// A job moved between states or reported progress.
///
/// `from` is `None` for a freshly enqueued job, and `to` is `None` when the
/// job was removed. Progress events carry `from == to == Some(Active)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobEvent {
    pub job_id: JobId,
    pub owner_id: OwnerId,
    pub from: Option<JobState>,
    pub to: Option<JobState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<i32>,
    pub timestamp: i64,
}

impl JobEvent {
    pub fn transition(job: &Job, from: Option<JobState>, timestamp: i64) -> Self {
        Self {
            job_id: job.id.clone(),
            owner_id: job.owner_id.clone(),
            from,
            to: Some(job.state),
            progress: Some(job.progress),
            timestamp,
        }
    }

    pub fn progress(job: &Job, timestamp: i64) -> Self {
        Self {
            job_id: job.id.clone(),
            owner_id: job.owner_id.clone(),
            from: Some(job.state),
            to: Some(job.state),
            progress: Some(job.progress),
            timestamp,
        }
    }

    pub fn removed(job: &Job, timestamp: i64) -> Self {
        Self {
            job_id: job.id.clone(),
            owner_id: job.owner_id.clone(),
            from: Some(job.state),
            to: None,
            progress: None,
            timestamp,
        }
    }

    /// Short description for logging
    pub fn description(&self) -> String {
        let show = |s: Option<JobState>| s.map_or("-", |s| s.as_str());
        match self.progress {
            Some(p) if self.from == self.to => {
                format!("Job {} progress {}%", self.job_id, p)
            }
            _ => format!(
                "Job {} {} -> {}",
                self.job_id,
                show(self.from),
                show(self.to)
            ),
        }
    }
}
