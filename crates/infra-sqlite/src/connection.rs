// SQLite Connection Pool Setup

use crate::error::map_sqlx_error;
use jobq_core::error::{AppError, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use std::time::Duration;

/// How long a writer waits on a locked database before SQLITE_BUSY
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// How long a caller waits for a free pooled connection
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(10);

fn is_memory_url(database_url: &str) -> bool {
    database_url.contains(":memory:") || database_url.contains("mode=memory")
}

/// Create SQLite connection pool with WAL mode
///
/// In-memory databases exist per connection, so they get a single connection
/// that is never recycled.
pub async fn create_pool(database_url: &str, max_connections: u32) -> Result<SqlitePool> {
    let memory = is_memory_url(database_url);

    let mut options = SqliteConnectOptions::from_str(database_url)
        .map_err(|e| AppError::Config(format!("invalid database url '{}': {}", database_url, e)))?
        .busy_timeout(BUSY_TIMEOUT)
        .foreign_keys(true)
        .create_if_missing(true);
    if !memory {
        options = options.journal_mode(SqliteJournalMode::Wal);
    }

    let mut pool_options = SqlitePoolOptions::new().acquire_timeout(ACQUIRE_TIMEOUT);
    pool_options = if memory {
        pool_options
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
    } else {
        pool_options.max_connections(max_connections.max(1))
    };

    pool_options
        .connect_with(options)
        .await
        .map_err(map_sqlx_error)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_pool() {
        let pool = create_pool("sqlite::memory:", 8).await.unwrap();
        assert!(pool.acquire().await.is_ok());
        assert_eq!(pool.options().get_max_connections(), 1);
    }

    #[test]
    fn test_memory_url_detection() {
        assert!(is_memory_url("sqlite::memory:"));
        assert!(is_memory_url("sqlite://file?mode=memory"));
        assert!(!is_memory_url("sqlite://jobs.db"));
    }
}
