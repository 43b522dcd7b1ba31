// Port Layer - Interfaces for external dependencies

pub mod event_publisher;
pub mod id_provider; // For deterministic testing
pub mod job_store;
pub mod maintenance;
pub mod memory_store;
pub mod time_provider;

// Re-exports
pub use event_publisher::{EventPublisher, NoopPublisher};
pub use id_provider::IdProvider;
pub use job_store::{JobMutation, JobStore};
pub use maintenance::{Maintenance, RetentionPolicy, RetentionReport};
pub use memory_store::InMemoryJobStore;
pub use time_provider::TimeProvider;
