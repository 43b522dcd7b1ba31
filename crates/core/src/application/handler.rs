// Job handlers: name -> processing function

use crate::domain::{Job, JobEvent, JobId, JobPayload, JobState};
use crate::error::{AppError, Result};
use crate::port::{EventPublisher, JobStore, TimeProvider};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// Failure reported by a handler. Only visible to callers through
/// `failed` + `error_message`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HandlerError {
    /// Worth another attempt (subject to the attempt budget)
    #[error("{0}")]
    Retryable(String),

    /// Never retried
    #[error("{0}")]
    Fatal(String),
}

impl HandlerError {
    pub fn retryable(msg: impl Into<String>) -> Self {
        HandlerError::Retryable(msg.into())
    }

    pub fn fatal(msg: impl Into<String>) -> Self {
        HandlerError::Fatal(msg.into())
    }
}

// Store trouble while reporting progress is transient, losing the job is not
impl From<AppError> for HandlerError {
    fn from(err: AppError) -> Self {
        if err.is_lost_race() {
            HandlerError::Fatal(err.to_string())
        } else {
            HandlerError::Retryable(err.to_string())
        }
    }
}

pub type HandlerResult = std::result::Result<serde_json::Value, HandlerError>;

/// What a handler gets to see of the job it is processing
pub struct JobContext {
    job_id: JobId,
    name: String,
    owner_id: String,
    attempt: i32,
    payload: JobPayload,
    store: Arc<dyn JobStore>,
    publisher: Arc<dyn EventPublisher>,
    time_provider: Arc<dyn TimeProvider>,
}

impl JobContext {
    pub(crate) fn new(
        job: &Job,
        store: Arc<dyn JobStore>,
        publisher: Arc<dyn EventPublisher>,
        time_provider: Arc<dyn TimeProvider>,
    ) -> Self {
        Self {
            job_id: job.id.clone(),
            name: job.name.clone(),
            owner_id: job.owner_id.clone(),
            attempt: job.attempts_made,
            payload: job.payload.clone(),
            store,
            publisher,
            time_provider,
        }
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    /// 1-based attempt number (also the fencing token for this run)
    pub fn attempt(&self) -> i32 {
        self.attempt
    }

    pub fn payload(&self) -> &JobPayload {
        &self.payload
    }

    /// Report progress (clamped to 0..=100, never moves backwards)
    ///
    /// # Errors
    /// - AppError::InvalidState if this attempt no longer owns the job
    /// - AppError::NotFound if the job was removed
    pub async fn progress(&self, progress: i32) -> Result<()> {
        let attempt = self.attempt;
        let now = self.time_provider.now_millis();

        let job = self
            .store
            .update(&self.job_id, &|job: &mut Job| {
                ensure_owned(job, attempt)?;
                job.record_progress(progress, now)?;
                Ok(())
            })
            .await?;

        debug!(job_id = %self.job_id, progress = job.progress, "Progress recorded");
        self.publisher.publish(JobEvent::progress(&job, now));
        Ok(())
    }
}

/// Fencing check: the job is still active and still on the attempt we claimed
pub(crate) fn ensure_owned(job: &Job, attempt: i32) -> Result<()> {
    if job.state != JobState::Active || job.attempts_made != attempt {
        return Err(AppError::InvalidState(format!(
            "job {} moved on (state {}, attempt {} != {})",
            job.id, job.state, job.attempts_made, attempt
        )));
    }
    Ok(())
}

/// Processing function for one job name
#[async_trait]
pub trait JobHandler: Send + Sync + 'static {
    async fn handle(&self, ctx: JobContext) -> HandlerResult;
}

/// Handler built from an async closure over the raw context
pub struct FnHandler<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> JobHandler for FnHandler<F>
where
    F: Fn(JobContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    async fn handle(&self, ctx: JobContext) -> HandlerResult {
        (self.f)(ctx).await
    }
}

/// Handler that decodes the payload into `T` first
pub struct TypedHandler<T, F> {
    f: F,
    _payload: PhantomData<fn() -> T>,
}

#[async_trait]
impl<T, F, Fut> JobHandler for TypedHandler<T, F>
where
    T: DeserializeOwned + Send + 'static,
    F: Fn(JobContext, T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    async fn handle(&self, ctx: JobContext) -> HandlerResult {
        let payload: T = serde_json::from_value(ctx.payload().as_value().clone())
            .map_err(|e| HandlerError::Fatal(format!("invalid payload: {}", e)))?;
        (self.f)(ctx, payload).await
    }
}

/// Name -> handler map consulted by the worker
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn JobHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler
    ///
    /// # Errors
    /// - AppError::Validation if `name` is empty or already registered
    pub fn register<H: JobHandler>(&mut self, name: impl Into<String>, handler: H) -> Result<()> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(AppError::Validation(
                "handler name cannot be empty".to_string(),
            ));
        }
        if self.handlers.contains_key(&name) {
            return Err(AppError::Validation(format!(
                "handler already registered: {}",
                name
            )));
        }
        self.handlers.insert(name, Arc::new(handler));
        Ok(())
    }

    /// Register an async closure receiving the raw context
    pub fn register_fn<F, Fut>(&mut self, name: impl Into<String>, f: F) -> Result<()>
    where
        F: Fn(JobContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.register(name, FnHandler { f })
    }

    /// Register an async closure receiving the payload decoded as `T`.
    /// A payload that does not decode fails the job without retry.
    pub fn register_typed<T, F, Fut>(&mut self, name: impl Into<String>, f: F) -> Result<()>
    where
        T: DeserializeOwned + Send + 'static,
        F: Fn(JobContext, T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.register(
            name,
            TypedHandler {
                f,
                _payload: PhantomData,
            },
        )
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn JobHandler>> {
        self.handlers.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.handlers.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }
}
