// Enqueue Use Case

use crate::domain::job::{MAX_PRIORITY, MIN_PRIORITY};
use crate::domain::{Job, JobEvent, JobMetadata, JobPayload, JobState};
use crate::error::{AppError, Result};
use crate::port::{EventPublisher, IdProvider, JobStore, TimeProvider};
use serde::{Deserialize, Serialize};
use tracing::info;

/// Largest accepted serialized payload (256 KiB)
pub const MAX_PAYLOAD_BYTES: usize = 256 * 1024;

/// Deepest accepted payload nesting
pub const MAX_PAYLOAD_DEPTH: usize = 32;

/// Longest accepted delay (30 days)
pub const MAX_DELAY_MS: i64 = 30 * 24 * 60 * 60 * 1000;

/// Longest accepted job name
pub const MAX_NAME_LEN: usize = 128;

/// Upper bound for `max_attempts`
pub const MAX_ATTEMPTS_LIMIT: i32 = 50;

/// Enqueue request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnqueueRequest {
    pub name: String,

    #[serde(default = "empty_object")]
    pub payload: serde_json::Value,

    pub owner_id: String,

    #[serde(default)]
    pub delay_ms: Option<i64>,

    #[serde(default)]
    pub priority: Option<i32>,

    #[serde(default)]
    pub max_attempts: Option<i32>,

    #[serde(default)]
    pub metadata: Option<JobMetadata>,
}

fn empty_object() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

impl EnqueueRequest {
    /// Request with defaults for everything but the required fields
    pub fn new(
        name: impl Into<String>,
        owner_id: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            name: name.into(),
            payload,
            owner_id: owner_id.into(),
            delay_ms: None,
            priority: None,
            max_attempts: None,
            metadata: None,
        }
    }

    pub fn with_delay_ms(mut self, delay_ms: i64) -> Self {
        self.delay_ms = Some(delay_ms);
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: i32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }
}

fn json_depth(value: &serde_json::Value) -> usize {
    match value {
        serde_json::Value::Array(items) => 1 + items.iter().map(json_depth).max().unwrap_or(0),
        serde_json::Value::Object(map) => 1 + map.values().map(json_depth).max().unwrap_or(0),
        _ => 0,
    }
}

/// Validate an enqueue request before anything touches the store
pub fn validate_request(req: &EnqueueRequest) -> Result<()> {
    let name = req.name.trim();
    if name.is_empty() {
        return Err(AppError::Validation("job name cannot be empty".to_string()));
    }
    if req.name.chars().count() > MAX_NAME_LEN {
        return Err(AppError::Validation(format!(
            "job name too long (max {} chars)",
            MAX_NAME_LEN
        )));
    }

    if req.owner_id.trim().is_empty() {
        return Err(AppError::Validation("owner_id cannot be empty".to_string()));
    }

    if !req.payload.is_object() {
        return Err(AppError::Validation(
            "payload must be a JSON object".to_string(),
        ));
    }
    let size = req.payload.to_string().len();
    if size > MAX_PAYLOAD_BYTES {
        return Err(AppError::Validation(format!(
            "payload too large ({} bytes, max {})",
            size, MAX_PAYLOAD_BYTES
        )));
    }
    if json_depth(&req.payload) > MAX_PAYLOAD_DEPTH {
        return Err(AppError::Validation(format!(
            "payload too deeply nested (max depth {})",
            MAX_PAYLOAD_DEPTH
        )));
    }

    if let Some(delay_ms) = req.delay_ms {
        if !(0..=MAX_DELAY_MS).contains(&delay_ms) {
            return Err(AppError::Validation(format!(
                "delay_ms out of range (0..={})",
                MAX_DELAY_MS
            )));
        }
    }

    if let Some(priority) = req.priority {
        if !(MIN_PRIORITY..=MAX_PRIORITY).contains(&priority) {
            return Err(AppError::Validation(format!(
                "priority out of range ({}..={})",
                MIN_PRIORITY, MAX_PRIORITY
            )));
        }
    }

    if let Some(max_attempts) = req.max_attempts {
        if !(1..=MAX_ATTEMPTS_LIMIT).contains(&max_attempts) {
            return Err(AppError::Validation(format!(
                "max_attempts out of range (1..={})",
                MAX_ATTEMPTS_LIMIT
            )));
        }
    }

    Ok(())
}

/// Execute enqueue use case
///
/// # Arguments
///
/// * `store` - Job store
/// * `id_provider` - ID generator (injected for determinism)
/// * `time_provider` - Time provider (injected for determinism)
/// * `publisher` - Event sink
/// * `req` - Enqueue request
pub async fn execute(
    store: &dyn JobStore,
    id_provider: &dyn IdProvider,
    time_provider: &dyn TimeProvider,
    publisher: &dyn EventPublisher,
    req: EnqueueRequest,
) -> Result<Job> {
    validate_request(&req)?;

    let paused = store.is_paused().await?;
    let now = time_provider.now_millis();

    let mut job = Job::new(
        id_provider.generate_id(),
        now,
        req.name,
        req.owner_id,
        JobPayload::new(req.payload),
    );
    if let Some(priority) = req.priority {
        job.priority = priority;
    }
    if let Some(max_attempts) = req.max_attempts {
        job.max_attempts = max_attempts;
    }
    job.metadata = req.metadata;

    match req.delay_ms {
        Some(delay_ms) if delay_ms > 0 => {
            job.state = JobState::Delayed;
            job.delay_until = Some(now + delay_ms);
        }
        _ if paused => job.state = JobState::Paused,
        _ => {}
    }

    store.insert(&job).await?;

    info!(
        job_id = %job.id,
        name = %job.name,
        owner_id = %job.owner_id,
        state = %job.state,
        priority = job.priority,
        "Job enqueued"
    );
    publisher.publish(JobEvent::transition(&job, None, now));

    Ok(job)
}
