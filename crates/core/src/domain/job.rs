// Job Domain Model

use crate::domain::error::{DomainError, Result};
use serde::{Deserialize, Serialize};

/// Job ID (UUID v4)
pub type JobId = String;

/// Opaque caller identity supplied by the surrounding auth layer
pub type OwnerId = String;

/// Lowest dispatch priority value accepted (dispatched first)
pub const MIN_PRIORITY: i32 = 0;

/// Highest dispatch priority value accepted (dispatched last)
pub const MAX_PRIORITY: i32 = 100;

/// Default attempt budget for a new job
pub const DEFAULT_MAX_ATTEMPTS: i32 = 3;

/// Job State
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Waiting,
    Delayed,
    Active,
    Completed,
    Failed,
    Paused,
}

impl JobState {
    pub const ALL: [JobState; 6] = [
        JobState::Waiting,
        JobState::Active,
        JobState::Completed,
        JobState::Failed,
        JobState::Delayed,
        JobState::Paused,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Waiting => "waiting",
            JobState::Delayed => "delayed",
            JobState::Active => "active",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
            JobState::Paused => "paused",
        }
    }

    /// Completed and failed jobs only leave their state through an explicit action
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for JobState {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "waiting" => Ok(JobState::Waiting),
            "delayed" => Ok(JobState::Delayed),
            "active" => Ok(JobState::Active),
            "completed" => Ok(JobState::Completed),
            "failed" => Ok(JobState::Failed),
            "paused" => Ok(JobState::Paused),
            other => Err(DomainError::ValidationError(format!(
                "unknown job state: {}",
                other
            ))),
        }
    }
}

/// Job Payload (JSON object, never mutated after insert)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobPayload(serde_json::Value);

impl JobPayload {
    pub fn new(value: serde_json::Value) -> Self {
        Self(value)
    }

    pub fn empty() -> Self {
        Self(serde_json::Value::Object(serde_json::Map::new()))
    }

    pub fn as_value(&self) -> &serde_json::Value {
        &self.0
    }

    pub fn is_object(&self) -> bool {
        self.0.is_object()
    }

    /// Serialized size in bytes (what the store will persist)
    pub fn encoded_len(&self) -> usize {
        self.0.to_string().len()
    }
}

impl Default for JobPayload {
    fn default() -> Self {
        Self::empty()
    }
}

/// Diagnostic bag recorded at enqueue time, no role in processing
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
}

/// Job Entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub name: String,
    pub payload: JobPayload,
    pub owner_id: OwnerId,

    pub state: JobState,
    pub progress: i32,

    pub attempts_made: i32,
    pub max_attempts: i32,
    pub priority: i32,

    pub result: Option<serde_json::Value>,
    pub error_message: Option<String>,

    pub created_at: i64, // epoch ms
    pub processed_on: Option<i64>,
    pub finished_on: Option<i64>,
    pub delay_until: Option<i64>,

    pub metadata: Option<JobMetadata>,

    // Liveness of the active attempt
    pub heartbeat_at: Option<i64>,
    pub stalled_count: i32,
}

impl Job {
    /// Create a new waiting job
    ///
    /// # Arguments
    ///
    /// * `id` - Unique job ID (injected, not generated)
    /// * `created_at` - Creation timestamp in epoch ms (injected, not system time)
    /// * `name` - Handler name
    /// * `owner_id` - Principal the job is created for
    /// * `payload` - Job payload
    pub fn new(
        id: impl Into<String>,
        created_at: i64,
        name: impl Into<String>,
        owner_id: impl Into<String>,
        payload: JobPayload,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            payload,
            owner_id: owner_id.into(),
            state: JobState::Waiting,
            progress: 0,
            attempts_made: 0,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            priority: MIN_PRIORITY,
            result: None,
            error_message: None,
            created_at,
            processed_on: None,
            finished_on: None,
            delay_until: None,
            metadata: None,
            heartbeat_at: None,
            stalled_count: 0,
        }
    }

    /// Create a test job with deterministic ID and timestamp.
    ///
    /// Uses a simple counter for deterministic test IDs (test-1, test-2, ...).
    /// Timestamps start at 1000 and increment by 1000.
    ///
    /// **Note**: production code injects ID and time via providers.
    pub fn new_test(name: impl Into<String>, owner_id: impl Into<String>) -> Self {
        use std::sync::atomic::{AtomicU64, Ordering};
        static TEST_COUNTER: AtomicU64 = AtomicU64::new(1);

        let counter = TEST_COUNTER.fetch_add(1, Ordering::SeqCst);
        let id = format!("test-{}", counter);
        let created_at = (counter * 1000) as i64;

        Self::new(id, created_at, name, owner_id, JobPayload::empty())
    }

    /// Whether a worker may claim this job at `now_millis`
    pub fn is_eligible(&self, now_millis: i64) -> bool {
        match self.state {
            JobState::Waiting => true,
            JobState::Delayed => self.delay_until.map_or(true, |at| at <= now_millis),
            _ => false,
        }
    }

    pub fn has_attempts_left(&self) -> bool {
        self.attempts_made < self.max_attempts
    }

    fn transition_error(&self, to: JobState) -> DomainError {
        DomainError::InvalidStateTransition {
            from: self.state.to_string(),
            to: to.to_string(),
        }
    }

    /// waiting/delayed -> active. Starts a new attempt.
    pub fn claim(&mut self, now_millis: i64) -> Result<()> {
        if !matches!(self.state, JobState::Waiting | JobState::Delayed) {
            return Err(self.transition_error(JobState::Active));
        }
        if !self.has_attempts_left() {
            return Err(DomainError::ValidationError(format!(
                "job {} has no attempts left ({}/{})",
                self.id, self.attempts_made, self.max_attempts
            )));
        }
        self.state = JobState::Active;
        self.attempts_made += 1;
        self.progress = 0;
        self.processed_on.get_or_insert(now_millis);
        self.heartbeat_at = Some(now_millis);
        self.delay_until = None;
        self.finished_on = None;
        Ok(())
    }

    /// Record progress of the active attempt. Lower values are ignored.
    pub fn record_progress(&mut self, progress: i32, now_millis: i64) -> Result<()> {
        if self.state != JobState::Active {
            return Err(self.transition_error(JobState::Active));
        }
        self.progress = self.progress.max(progress.clamp(0, 100));
        self.heartbeat_at = Some(now_millis);
        Ok(())
    }

    /// active -> completed
    pub fn complete(&mut self, result: serde_json::Value, now_millis: i64) -> Result<()> {
        if self.state != JobState::Active {
            return Err(self.transition_error(JobState::Completed));
        }
        self.state = JobState::Completed;
        self.progress = 100;
        self.result = Some(result);
        self.error_message = None;
        self.finished_on = Some(now_millis);
        self.heartbeat_at = None;
        Ok(())
    }

    /// active -> delayed, the attempt failed but more remain
    pub fn schedule_retry(
        &mut self,
        error: impl Into<String>,
        delay_ms: i64,
        now_millis: i64,
    ) -> Result<()> {
        if self.state != JobState::Active {
            return Err(self.transition_error(JobState::Delayed));
        }
        self.state = JobState::Delayed;
        self.error_message = Some(error.into());
        self.finished_on = Some(now_millis);
        self.delay_until = Some(now_millis + delay_ms);
        self.heartbeat_at = None;
        Ok(())
    }

    /// active -> failed
    pub fn fail(&mut self, error: impl Into<String>, now_millis: i64) -> Result<()> {
        if self.state != JobState::Active {
            return Err(self.transition_error(JobState::Failed));
        }
        self.state = JobState::Failed;
        self.result = None;
        self.error_message = Some(error.into());
        self.finished_on = Some(now_millis);
        self.heartbeat_at = None;
        Ok(())
    }

    /// failed -> waiting, with a fresh attempt budget
    pub fn retry(&mut self) -> Result<()> {
        if self.state != JobState::Failed {
            return Err(self.transition_error(JobState::Waiting));
        }
        self.state = JobState::Waiting;
        self.attempts_made = 0;
        self.progress = 0;
        self.error_message = None;
        self.result = None;
        self.finished_on = None;
        self.delay_until = None;
        self.stalled_count = 0;
        Ok(())
    }

    /// delayed -> waiting, skipping the rest of the delay
    pub fn promote(&mut self) -> Result<()> {
        if self.state != JobState::Delayed {
            return Err(self.transition_error(JobState::Waiting));
        }
        self.state = JobState::Waiting;
        self.delay_until = None;
        Ok(())
    }
}
