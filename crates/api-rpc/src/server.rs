//! JSON-RPC Server
//!
//! Serves the queue over JSON-RPC 2.0 on localhost TCP. HTTP clients get the
//! request/response methods; WebSocket clients can also subscribe to events.

use crate::handler::RpcHandler;
use crate::rate_limiter::{RateLimiter, DEFAULT_BURST, DEFAULT_RATE_PER_SEC};
use crate::types::{
    ActionRequest, CleanRequest, EnqueueRequest, GetJobRequest, ListJobsRequest, StatsRequest,
    SubscribeRequest,
};
use jobq_core::application::{EventBus, QueueService};
use jsonrpsee::server::{Server, ServerHandle};
use jsonrpsee::{PendingSubscriptionSink, RpcModule, SubscriptionMessage};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, info};

pub const DEFAULT_RPC_HOST: &str = "127.0.0.1";
pub const DEFAULT_RPC_PORT: u16 = 9527;

/// Subscription method and the notification method its events arrive on
pub const SUBSCRIBE_METHOD: &str = "jobs.subscribe.v1";
pub const EVENT_NOTIFICATION: &str = "jobs.event";
pub const UNSUBSCRIBE_METHOD: &str = "jobs.unsubscribe.v1";

/// RPC Server Configuration
#[derive(Debug, Clone)]
pub struct RpcServerConfig {
    pub host: String,
    /// 0 picks a free port
    pub port: u16,
    pub rate_limit_burst: u32,
    pub rate_limit_per_sec: u32,
}

impl Default for RpcServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_RPC_HOST.to_string(),
            port: DEFAULT_RPC_PORT,
            rate_limit_burst: DEFAULT_BURST,
            rate_limit_per_sec: DEFAULT_RATE_PER_SEC,
        }
    }
}

/// RPC Server
pub struct RpcServer {
    config: RpcServerConfig,
    handler: Arc<RpcHandler>,
}

/// Register `name` as a method taking `P` and delegating to the handler
fn register<P, R, F, Fut>(
    module: &mut RpcModule<()>,
    name: &'static str,
    handler: &Arc<RpcHandler>,
    call: F,
) -> Result<(), String>
where
    P: DeserializeOwned + Send + 'static,
    R: Serialize + Clone + Send + 'static,
    F: Fn(Arc<RpcHandler>, P) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = Result<R, jsonrpsee::types::ErrorObjectOwned>> + Send + 'static,
{
    let handler = handler.clone();
    module
        .register_async_method(name, move |params, _, _| {
            let handler = handler.clone();
            let call = call.clone();
            async move {
                let req: P = params.parse()?;
                call(handler, req).await
            }
        })
        .map(|_| ())
        .map_err(|e| e.to_string())
}

impl RpcServer {
    pub fn new(config: RpcServerConfig, queue: Arc<QueueService>, events: EventBus) -> Self {
        let limiter = RateLimiter::new(config.rate_limit_burst, config.rate_limit_per_sec);
        Self {
            config,
            handler: Arc::new(RpcHandler::new(queue, events, limiter)),
        }
    }

    /// Build the method table
    pub fn into_module(self) -> Result<RpcModule<()>, String> {
        let mut module = RpcModule::new(());
        let handler = &self.handler;

        register(&mut module, "jobs.enqueue.v1", handler, |h, req: EnqueueRequest| async move {
            h.enqueue(req).await
        })?;
        register(&mut module, "jobs.get.v1", handler, |h, req: GetJobRequest| async move {
            h.get_job(req).await
        })?;
        register(&mut module, "jobs.list.v1", handler, |h, req: ListJobsRequest| async move {
            h.list_jobs(req).await
        })?;
        register(&mut module, "jobs.stats.v1", handler, |h, req: StatsRequest| async move {
            h.stats(req).await
        })?;
        register(&mut module, "jobs.action.v1", handler, |h, req: ActionRequest| async move {
            h.action(req).await
        })?;
        register(&mut module, "jobs.clean.v1", handler, |h, req: CleanRequest| async move {
            h.clean(req).await
        })?;

        // Queue-wide toggles take no params
        let h = handler.clone();
        module
            .register_async_method("queue.pause.v1", move |_, _, _| {
                let h = h.clone();
                async move { h.pause().await }
            })
            .map_err(|e| e.to_string())?;
        let h = handler.clone();
        module
            .register_async_method("queue.resume.v1", move |_, _, _| {
                let h = h.clone();
                async move { h.resume().await }
            })
            .map_err(|e| e.to_string())?;

        let h = handler.clone();
        module
            .register_subscription(
                SUBSCRIBE_METHOD,
                EVENT_NOTIFICATION,
                UNSUBSCRIBE_METHOD,
                move |params, pending, _, _| {
                    let h = h.clone();
                    async move {
                        // Bare `[]` or no params subscribes to everything
                        let req = if params.is_object() {
                            params.parse::<SubscribeRequest>()
                        } else {
                            Ok(SubscribeRequest::default())
                        };
                        match req {
                            Ok(req) => forward_events(h, req, pending).await,
                            Err(e) => {
                                pending.reject(e).await;
                                Ok(())
                            }
                        }
                    }
                },
            )
            .map_err(|e| e.to_string())?;

        Ok(module)
    }

    /// Start the JSON-RPC server
    ///
    /// Returns the bound address, which differs from the configured one when
    /// port 0 was requested.
    pub async fn start(self) -> Result<(SocketAddr, ServerHandle), String> {
        let addr = format!("{}:{}", self.config.host, self.config.port);

        info!(
            host = %self.config.host,
            port = self.config.port,
            "Starting JSON-RPC server"
        );

        let server = Server::builder()
            .build(&addr)
            .await
            .map_err(|e| format!("Failed to build server on {}: {}", addr, e))?;
        let local_addr = server
            .local_addr()
            .map_err(|e| format!("Failed to read bound address: {}", e))?;

        let module = self.into_module()?;
        let handle = server.start(module);

        info!(addr = %local_addr, "JSON-RPC server started");
        Ok((local_addr, handle))
    }
}

/// Pump matching events to one subscriber until either side goes away
async fn forward_events(
    handler: Arc<RpcHandler>,
    req: SubscribeRequest,
    pending: PendingSubscriptionSink,
) -> jsonrpsee::core::SubscriptionResult {
    let mut events = handler.subscribe(&req);
    let sink = pending
        .accept()
        .await
        .map_err(|_| "subscriber went away before accept")?;

    loop {
        tokio::select! {
            _ = sink.closed() => break,
            event = events.recv() => {
                let Some(event) = event else { break };
                let msg = SubscriptionMessage::from_json(&event)?;
                if sink.send(msg).await.is_err() {
                    break;
                }
            }
        }
    }

    debug!(filter = ?events.filter(), "Event subscription closed");
    Ok(())
}
