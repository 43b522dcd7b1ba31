//! jobq CLI - Command-line interface for the jobq daemon

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tabled::{Table, Tabled};

const DEFAULT_RPC_URL: &str = "http://127.0.0.1:9527";
const DEFAULT_OWNER: &str = "cli";

#[derive(Parser)]
#[command(name = "jobq")]
#[command(about = "jobq job queue CLI", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// RPC server URL
    #[arg(long, global = true, env = "JOBQ_RPC_URL", default_value = DEFAULT_RPC_URL)]
    rpc_url: String,

    /// Owner the commands act for
    #[arg(long, global = true, env = "JOBQ_OWNER", default_value = DEFAULT_OWNER)]
    owner: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum StateArg {
    Waiting,
    Delayed,
    Active,
    Completed,
    Failed,
    Paused,
}

impl StateArg {
    fn as_str(&self) -> &'static str {
        match self {
            StateArg::Waiting => "waiting",
            StateArg::Delayed => "delayed",
            StateArg::Active => "active",
            StateArg::Completed => "completed",
            StateArg::Failed => "failed",
            StateArg::Paused => "paused",
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Enqueue a new job
    Enqueue {
        /// Handler name (e.g., echo, example-job)
        name: String,

        /// Payload as a JSON object
        #[arg(long, default_value = "{}")]
        payload: String,

        /// Run no earlier than this many milliseconds from now
        #[arg(long)]
        delay_ms: Option<i64>,

        /// Priority (lower runs first)
        #[arg(short, long)]
        priority: Option<i32>,

        /// Attempt budget
        #[arg(long)]
        max_attempts: Option<i32>,
    },

    /// Show one job
    Get {
        /// Job ID
        id: String,
    },

    /// List jobs, newest first
    List {
        /// Only these states (repeatable)
        #[arg(short, long, value_enum)]
        state: Vec<StateArg>,

        #[arg(long, default_value = "1")]
        page: i64,

        #[arg(long, default_value = "20")]
        page_size: i64,

        /// Include jobs of every owner
        #[arg(long)]
        all_owners: bool,
    },

    /// Per-state job counts
    Stats {
        /// Count jobs of every owner
        #[arg(long)]
        all_owners: bool,
    },

    /// Re-queue a failed job
    Retry { id: String },

    /// Delete a job
    Remove { id: String },

    /// Make a delayed job runnable now
    Promote { id: String },

    /// Delete finished jobs
    Clean {
        #[arg(value_enum)]
        state: StateArg,

        /// Only jobs finished at least this long ago
        #[arg(long, default_value = "0")]
        grace_ms: i64,

        #[arg(long, default_value = "1000")]
        limit: i64,
    },

    /// Stop dispatching new jobs
    Pause,

    /// Resume dispatching
    Resume,
}

#[derive(Serialize)]
struct JsonRpcRequest {
    jsonrpc: String,
    method: String,
    params: serde_json::Value,
    id: u64,
}

#[derive(Deserialize)]
struct JsonRpcResponse {
    result: Option<serde_json::Value>,
    error: Option<JsonRpcError>,
}

#[derive(Deserialize)]
struct JsonRpcError {
    code: i32,
    message: String,
}

#[derive(Deserialize)]
struct JobView {
    id: String,
    name: String,
    state: String,
    progress: i32,
    attempts_made: i32,
    max_attempts: i32,
    owner_id: String,
    created_at: i64,
    #[serde(default)]
    delay_until: Option<i64>,
    #[serde(default)]
    error_message: Option<String>,
    #[serde(default)]
    result: Option<serde_json::Value>,
}

#[derive(Tabled)]
struct JobRow {
    id: String,
    name: String,
    state: String,
    progress: String,
    attempts: String,
    owner: String,
    created: String,
}

impl From<&JobView> for JobRow {
    fn from(job: &JobView) -> Self {
        Self {
            id: job.id.clone(),
            name: job.name.clone(),
            state: job.state.clone(),
            progress: format!("{}%", job.progress),
            attempts: format!("{}/{}", job.attempts_made, job.max_attempts),
            owner: job.owner_id.clone(),
            created: format_millis(job.created_at),
        }
    }
}

#[derive(Deserialize)]
struct JobList {
    jobs: Vec<JobView>,
    total: i64,
    page: i64,
    page_size: i64,
}

#[derive(Deserialize, Tabled)]
struct StatsRow {
    waiting: i64,
    active: i64,
    completed: i64,
    failed: i64,
    delayed: i64,
    paused: i64,
    total: i64,
}

#[derive(Deserialize)]
struct ActionResult {
    message: String,
}

fn format_millis(millis: i64) -> String {
    chrono::DateTime::from_timestamp_millis(millis)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| millis.to_string())
}

fn colored_state(state: &str) -> colored::ColoredString {
    match state {
        "completed" => state.green(),
        "failed" => state.red(),
        "active" => state.cyan(),
        "delayed" | "paused" => state.yellow(),
        _ => state.normal(),
    }
}

async fn call_rpc(url: &str, method: &str, params: serde_json::Value) -> Result<serde_json::Value> {
    let request = JsonRpcRequest {
        jsonrpc: "2.0".to_string(),
        method: method.to_string(),
        params,
        id: 1,
    };

    let client = reqwest::Client::new();
    let response: JsonRpcResponse = client
        .post(url)
        .json(&request)
        .send()
        .await
        .context("Failed to connect to daemon")?
        .json()
        .await
        .context("Failed to parse response")?;

    if let Some(error) = response.error {
        anyhow::bail!("RPC error ({}): {}", error.code, error.message);
    }

    response
        .result
        .ok_or_else(|| anyhow::anyhow!("No result in response"))
}

fn enqueue_params(
    name: &str,
    owner: &str,
    payload: &str,
    delay_ms: Option<i64>,
    priority: Option<i32>,
    max_attempts: Option<i32>,
) -> Result<serde_json::Value> {
    let payload: serde_json::Value =
        serde_json::from_str(payload).context("Invalid JSON payload")?;
    Ok(json!({
        "name": name,
        "owner_id": owner,
        "payload": payload,
        "delay_ms": delay_ms,
        "priority": priority,
        "max_attempts": max_attempts,
    }))
}

fn print_job(job: &JobView) {
    println!("{}", Table::new([JobRow::from(job)]));
    if let Some(at) = job.delay_until {
        println!("  {} {}", "Runs after:".bold(), format_millis(at));
    }
    if let Some(err) = &job.error_message {
        println!("  {} {}", "Last error:".bold(), err.red());
    }
    if let Some(result) = &job.result {
        println!("  {} {}", "Result:".bold(), result);
    }
}

async fn job_action(cli: &Cli, id: &str, action: &str) -> Result<()> {
    let params = json!({
        "id": id,
        "action": action,
        "caller_owner_id": cli.owner,
    });
    let result = call_rpc(&cli.rpc_url, "jobs.action.v1", params).await?;
    let result: ActionResult = serde_json::from_value(result)?;
    println!("{}", format!("✓ {}", result.message).green().bold());
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match &cli.command {
        Commands::Enqueue {
            name,
            payload,
            delay_ms,
            priority,
            max_attempts,
        } => {
            let params =
                enqueue_params(name, &cli.owner, payload, *delay_ms, *priority, *max_attempts)?;
            let result = call_rpc(&cli.rpc_url, "jobs.enqueue.v1", params).await?;
            let job: JobView = serde_json::from_value(result)?;

            println!("{}", "✓ Job enqueued successfully".green().bold());
            println!();
            print_job(&job);
        }

        Commands::Get { id } => {
            let result = call_rpc(&cli.rpc_url, "jobs.get.v1", json!({ "id": id })).await?;
            let job: JobView = serde_json::from_value(result)?;
            println!("{} {}", "Job".cyan().bold(), colored_state(&job.state));
            print_job(&job);
        }

        Commands::List {
            state,
            page,
            page_size,
            all_owners,
        } => {
            let states: Vec<&str> = state.iter().map(StateArg::as_str).collect();
            let params = json!({
                "owner_id": (!all_owners).then_some(&cli.owner),
                "states": states,
                "page": page,
                "page_size": page_size,
            });
            let result = call_rpc(&cli.rpc_url, "jobs.list.v1", params).await?;
            let list: JobList = serde_json::from_value(result)?;

            if list.jobs.is_empty() {
                println!("{}", "No jobs found".yellow());
            } else {
                let rows: Vec<JobRow> = list.jobs.iter().map(JobRow::from).collect();
                println!("{}", Table::new(rows));
            }
            println!(
                "Page {} ({} per page), {} total",
                list.page, list.page_size, list.total
            );
        }

        Commands::Stats { all_owners } => {
            let params = json!({ "owner_id": (!all_owners).then_some(&cli.owner) });
            let result = call_rpc(&cli.rpc_url, "jobs.stats.v1", params).await?;
            let stats: StatsRow = serde_json::from_value(result)?;

            println!("{}", "Queue Status".cyan().bold());
            println!("{}", Table::new([stats]));
        }

        Commands::Retry { id } => job_action(&cli, id, "retry").await?,
        Commands::Remove { id } => job_action(&cli, id, "remove").await?,
        Commands::Promote { id } => job_action(&cli, id, "promote").await?,

        Commands::Clean {
            state,
            grace_ms,
            limit,
        } => {
            let params = json!({
                "state": state.as_str(),
                "grace_ms": grace_ms,
                "limit": limit,
                "owner_id": cli.owner,
            });
            let result = call_rpc(&cli.rpc_url, "jobs.clean.v1", params).await?;
            println!(
                "{}",
                format!("✓ {} {} jobs removed", result["count"], state.as_str())
                    .green()
                    .bold()
            );
        }

        Commands::Pause => {
            let result = call_rpc(&cli.rpc_url, "queue.pause.v1", json!({})).await?;
            println!(
                "{}",
                format!("✓ Queue paused ({} waiting jobs held)", result["moved"])
                    .yellow()
                    .bold()
            );
        }

        Commands::Resume => {
            let result = call_rpc(&cli.rpc_url, "queue.resume.v1", json!({})).await?;
            println!(
                "{}",
                format!("✓ Queue resumed ({} jobs released)", result["moved"])
                    .green()
                    .bold()
            );
        }
    }

    Ok(())
}
