//! Built-in job handlers
//!
//! Small handlers the daemon always registers so a fresh install can be
//! exercised end to end from the CLI.

use jobq_core::application::{HandlerError, HandlerRegistry, HandlerResult, JobContext};
use jobq_core::error::Result;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::info;

pub const ECHO: &str = "echo";
pub const EXAMPLE_JOB: &str = "example-job";
pub const ALWAYS_FAILS: &str = "always-fails";

/// Pause between `example-job` progress steps
pub const EXAMPLE_STEP: Duration = Duration::from_secs(1);

const EXAMPLE_STEPS: i32 = 5;

#[derive(Debug, Deserialize)]
struct EchoPayload {
    #[serde(default)]
    msg: serde_json::Value,
}

async fn echo(ctx: JobContext, payload: EchoPayload) -> HandlerResult {
    ctx.progress(0).await?;
    ctx.progress(100).await?;
    Ok(json!({ "echo": payload.msg }))
}

async fn example_job(ctx: JobContext, step: Duration) -> HandlerResult {
    info!(job_id = %ctx.job_id(), attempt = ctx.attempt(), "Processing example job");
    ctx.progress(0).await?;

    let started = std::time::Instant::now();
    for i in 1..=EXAMPLE_STEPS {
        tokio::time::sleep(step).await;
        ctx.progress(i * 100 / EXAMPLE_STEPS).await?;
    }

    Ok(json!({
        "message": format!("Job {} completed successfully!", ctx.job_id()),
        "processed_at": chrono::Utc::now().to_rfc3339(),
        "input_data": ctx.payload().as_value(),
        "processing_time_ms": started.elapsed().as_millis() as u64,
    }))
}

async fn always_fails(ctx: JobContext) -> HandlerResult {
    Err(HandlerError::retryable(format!(
        "intentional failure on attempt {}",
        ctx.attempt()
    )))
}

/// Register every built-in handler
pub fn register_builtin(registry: &mut HandlerRegistry, example_step: Duration) -> Result<()> {
    registry.register_typed(ECHO, echo)?;
    registry.register_fn(EXAMPLE_JOB, move |ctx| example_job(ctx, example_step))?;
    registry.register_fn(ALWAYS_FAILS, always_fails)?;
    Ok(())
}
