// Queue Domain Model - listing, counting and lifecycle actions

use crate::domain::error::DomainError;
use crate::domain::job::{Job, JobState, OwnerId};
use serde::{Deserialize, Serialize};

/// Server-side filter for listings and counts
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobFilter {
    pub owner_id: Option<OwnerId>,
    /// Empty means every state
    pub states: Vec<JobState>,
}

impl JobFilter {
    pub fn owner(owner_id: impl Into<String>) -> Self {
        Self {
            owner_id: Some(owner_id.into()),
            states: Vec::new(),
        }
    }

    pub fn with_states(mut self, states: impl IntoIterator<Item = JobState>) -> Self {
        self.states = states.into_iter().collect();
        self
    }

    pub fn matches(&self, job: &Job) -> bool {
        let owner_ok = self
            .owner_id
            .as_ref()
            .map_or(true, |owner| owner == &job.owner_id);
        let state_ok = self.states.is_empty() || self.states.contains(&job.state);
        owner_ok && state_ok
    }
}

/// One page of a listing plus the total matching the filter
#[derive(Debug, Clone, Default)]
pub struct JobPage {
    pub jobs: Vec<Job>,
    pub total: i64,
}

/// Per-state job counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub waiting: i64,
    pub active: i64,
    pub completed: i64,
    pub failed: i64,
    pub delayed: i64,
    pub paused: i64,
    pub total: i64,
}

impl QueueStats {
    /// Add `count` jobs in `state`, keeping `total` in sync
    pub fn add(&mut self, state: JobState, count: i64) {
        match state {
            JobState::Waiting => self.waiting += count,
            JobState::Delayed => self.delayed += count,
            JobState::Active => self.active += count,
            JobState::Completed => self.completed += count,
            JobState::Failed => self.failed += count,
            JobState::Paused => self.paused += count,
        }
        self.total += count;
    }

    pub fn get(&self, state: JobState) -> i64 {
        match state {
            JobState::Waiting => self.waiting,
            JobState::Delayed => self.delayed,
            JobState::Active => self.active,
            JobState::Completed => self.completed,
            JobState::Failed => self.failed,
            JobState::Paused => self.paused,
        }
    }
}

/// Lifecycle actions a job owner can request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobQueueAction {
    Retry,
    Remove,
    Promote,
}

impl JobQueueAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobQueueAction::Retry => "retry",
            JobQueueAction::Remove => "remove",
            JobQueueAction::Promote => "promote",
        }
    }
}

impl std::fmt::Display for JobQueueAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for JobQueueAction {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "retry" => Ok(JobQueueAction::Retry),
            "remove" => Ok(JobQueueAction::Remove),
            "promote" => Ok(JobQueueAction::Promote),
            other => Err(DomainError::ValidationError(format!(
                "unknown action: {}",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_matches_owner_and_states() {
        let job = Job::new_test("echo", "u1");

        assert!(JobFilter::default().matches(&job));
        assert!(JobFilter::owner("u1").matches(&job));
        assert!(!JobFilter::owner("u2").matches(&job));
        assert!(JobFilter::owner("u1")
            .with_states([JobState::Waiting])
            .matches(&job));
        assert!(!JobFilter::default()
            .with_states([JobState::Failed, JobState::Completed])
            .matches(&job));
    }

    #[test]
    fn test_stats_total_tracks_adds() {
        let mut stats = QueueStats::default();
        stats.add(JobState::Waiting, 3);
        stats.add(JobState::Failed, 2);

        assert_eq!(stats.get(JobState::Waiting), 3);
        assert_eq!(stats.failed, 2);
        assert_eq!(stats.total, 5);
    }
}
