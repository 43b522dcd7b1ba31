//! RPC Error Types
//!
//! Maps application errors to JSON-RPC error codes.

use jobq_core::error::AppError;
use jsonrpsee::types::ErrorObjectOwned;

/// RPC Error Codes
pub mod code {
    pub const VALIDATION_ERROR: i32 = 4000;
    pub const NOT_FOUND: i32 = 4001;
    pub const CONFLICT: i32 = 4002;
    pub const THROTTLED: i32 = 4003;
    pub const INVALID_STATE: i32 = 4004;
    pub const FORBIDDEN: i32 = 4005;
    pub const INTERNAL_ERROR: i32 = 5000;
    pub const DB_ERROR: i32 = 5001;
    pub const STORE_UNAVAILABLE: i32 = 5003;
}

/// Convert AppError to JSON-RPC ErrorObject
pub fn to_rpc_error(err: AppError) -> ErrorObjectOwned {
    let code = match &err {
        AppError::Validation(_) | AppError::Serialization(_) => code::VALIDATION_ERROR,
        AppError::NotFound(_) => code::NOT_FOUND,
        AppError::Conflict(_) => code::CONFLICT,
        AppError::InvalidState(_) => code::INVALID_STATE,
        AppError::Forbidden(_) => code::FORBIDDEN,
        AppError::StoreUnavailable(_) => code::STORE_UNAVAILABLE,
        AppError::Database(_) => code::DB_ERROR,
        AppError::Config(_) | AppError::Internal(_) => code::INTERNAL_ERROR,
    };
    ErrorObjectOwned::owned(code, err.to_string(), None::<()>)
}

/// Error returned when the token bucket is empty
pub fn throttled() -> ErrorObjectOwned {
    ErrorObjectOwned::owned(
        code::THROTTLED,
        "Rate limit exceeded. Please slow down.",
        None::<()>,
    )
}
