// jobq Infrastructure - SQLite Adapter
// Implements: JobStore, Maintenance

mod connection;
mod error;
mod job_store;
mod maintenance_impl;
mod migration;

pub use connection::create_pool;
pub use job_store::SqliteJobStore;
pub use migration::run_migrations;
