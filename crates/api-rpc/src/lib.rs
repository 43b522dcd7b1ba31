//! JSON-RPC API Layer
//!
//! Exposes the jobq queue service as JSON-RPC 2.0 methods plus a job event
//! subscription.

pub mod error;
pub mod handler;
pub mod rate_limiter;
pub mod server;
pub mod types;

pub use handler::RpcHandler;
pub use server::{RpcServer, RpcServerConfig};
