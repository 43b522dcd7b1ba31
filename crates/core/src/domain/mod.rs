// Domain Layer - Pure business logic and entities

pub mod error;
pub mod event;
pub mod job;
pub mod queue;

// Re-exports
pub use error::DomainError;
pub use event::JobEvent;
pub use job::{Job, JobId, JobMetadata, JobPayload, JobState, OwnerId};
pub use queue::{JobFilter, JobPage, JobQueueAction, QueueStats};
