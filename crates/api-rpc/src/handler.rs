//! RPC Method Handlers
//!
//! Thin translation between JSON-RPC params and the queue service.

use crate::error::{throttled, to_rpc_error};
use crate::rate_limiter::RateLimiter;
use crate::types::{
    ActionRequest, CleanRequest, CleanResponse, EnqueueRequest, EnqueueResponse, GetJobRequest,
    JobActionResponse, JobListResponse, ListJobsRequest, PauseResponse, QueueStats, StatsRequest,
    SubscribeRequest,
};
use jobq_core::application::{EventBus, EventSubscription, QueueService};
use jobq_core::domain::{Job, JobQueueAction};
use jsonrpsee::types::ErrorObjectOwned;
use std::sync::Arc;
use tracing::{debug, warn};

type RpcResult<T> = Result<T, ErrorObjectOwned>;

/// RPC Handler with injected dependencies
pub struct RpcHandler {
    queue: Arc<QueueService>,
    events: EventBus,
    rate_limiter: RateLimiter,
}

impl RpcHandler {
    pub fn new(queue: Arc<QueueService>, events: EventBus, rate_limiter: RateLimiter) -> Self {
        Self {
            queue,
            events,
            rate_limiter,
        }
    }

    fn throttle(&self, method: &str) -> RpcResult<()> {
        if self.rate_limiter.try_acquire() {
            return Ok(());
        }
        warn!(method, "Rate limit exceeded");
        Err(throttled())
    }

    /// jobs.enqueue.v1
    pub async fn enqueue(&self, params: EnqueueRequest) -> RpcResult<EnqueueResponse> {
        self.throttle("jobs.enqueue.v1")?;
        self.queue.enqueue(params).await.map_err(to_rpc_error)
    }

    /// jobs.get.v1
    pub async fn get_job(&self, params: GetJobRequest) -> RpcResult<Job> {
        self.queue.get_job(&params.id).await.map_err(to_rpc_error)
    }

    /// jobs.list.v1
    pub async fn list_jobs(&self, params: ListJobsRequest) -> RpcResult<JobListResponse> {
        self.queue.list_jobs(params).await.map_err(to_rpc_error)
    }

    /// jobs.stats.v1
    pub async fn stats(&self, params: StatsRequest) -> RpcResult<QueueStats> {
        self.queue
            .queue_stats(params.owner_id.as_deref())
            .await
            .map_err(to_rpc_error)
    }

    /// jobs.action.v1 - remove is idempotent at this boundary
    pub async fn action(&self, params: ActionRequest) -> RpcResult<JobActionResponse> {
        self.throttle("jobs.action.v1")?;
        let result = match params.action {
            JobQueueAction::Remove => {
                self.queue
                    .remove_job(&params.id, &params.caller_owner_id)
                    .await
            }
            action => {
                self.queue
                    .perform_action(&params.id, action, &params.caller_owner_id)
                    .await
            }
        };
        result.map_err(to_rpc_error)
    }

    /// jobs.clean.v1
    ///
    /// Admin-only: with no `owner_id` it removes finished jobs of every owner.
    /// Callers must be authorized before they reach this service.
    pub async fn clean(&self, params: CleanRequest) -> RpcResult<CleanResponse> {
        let removed = self.queue.clean(params).await.map_err(to_rpc_error)?;
        Ok(CleanResponse {
            count: removed.len(),
            removed,
        })
    }

    /// queue.pause.v1
    ///
    /// Admin-only: holds the waiting jobs of every owner.
    pub async fn pause(&self) -> RpcResult<PauseResponse> {
        let moved = self.queue.pause().await.map_err(to_rpc_error)?;
        Ok(PauseResponse {
            paused: true,
            moved,
        })
    }

    /// queue.resume.v1
    ///
    /// Admin-only: releases the paused jobs of every owner.
    pub async fn resume(&self) -> RpcResult<PauseResponse> {
        let moved = self.queue.resume().await.map_err(to_rpc_error)?;
        Ok(PauseResponse {
            paused: false,
            moved,
        })
    }

    /// jobs.subscribe.v1
    pub fn subscribe(&self, params: &SubscribeRequest) -> EventSubscription {
        let filter = params.filter();
        debug!(?filter, "New event subscription");
        self.events.subscribe(filter)
    }
}
