// sqlx::Error -> AppError
// (orphan rules keep `From<sqlx::Error> for AppError` out of this crate)

use jobq_core::error::AppError;

/// SQLite result codes: https://www.sqlite.org/rescode.html
pub(crate) fn map_sqlx_error(err: sqlx::Error) -> AppError {
    match &err {
        sqlx::Error::Database(db_err) => match db_err.code().as_deref() {
            // UNIQUE / PRIMARY KEY constraint failed
            Some(code @ ("2067" | "1555")) => AppError::Conflict(format!(
                "Unique constraint violation: {} ({})",
                db_err.message(),
                code
            )),
            // SQLITE_BUSY, SQLITE_LOCKED and their extended codes
            Some(code @ ("5" | "6" | "261" | "517" | "262")) => AppError::StoreUnavailable(format!(
                "Database locked ({}): {}",
                code,
                db_err.message()
            )),
            // SQLITE_FULL
            Some("13") => AppError::Database(format!("Database full: {}", db_err.message())),
            Some(code) => AppError::Database(format!(
                "Database error [{}]: {}",
                code,
                db_err.message()
            )),
            None => AppError::Database(format!("Database error: {}", db_err.message())),
        },
        sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed
        | sqlx::Error::Io(_) => AppError::StoreUnavailable(err.to_string()),
        sqlx::Error::ColumnNotFound(col) => AppError::Database(format!("Column not found: {}", col)),
        _ => AppError::Database(err.to_string()),
    }
}
