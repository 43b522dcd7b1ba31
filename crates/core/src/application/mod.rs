// Application Layer - Use Cases and Business Logic

pub mod events;
pub mod handler;
pub mod maintenance;
pub mod queue;
pub mod recovery;
pub mod retry;
pub mod worker;

// Re-exports
pub use events::{EventBus, EventFilter, EventSubscription};
pub use handler::{HandlerError, HandlerRegistry, HandlerResult, JobContext, JobHandler};
pub use maintenance::MaintenanceScheduler;
pub use queue::QueueService;
pub use recovery::{StallConfig, StalledJobSweeper};
pub use retry::{BackoffPolicy, RetryDecision};
pub use worker::{shutdown_channel, Outcome, ShutdownSender, ShutdownToken, Worker, WorkerConfig};
