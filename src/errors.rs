use thiserror::Error;

/// Crate-wide error type. Every fallible operation in `quotaguard` that
/// isn't already scoped to a narrower error (e.g. `TokenError`) returns
/// this.
#[derive(Debug, Error)]
pub enum QuotaError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("license expired")]
    LicenseExpired,

    #[error("license suspended")]
    LicenseSuspended,

    #[error("license revoked")]
    LicenseRevoked,

    #[error("application quota exceeded: {current}/{limit} applications")]
    AppQuotaExceeded { current: u32, limit: u32 },

    #[error("execution quota exceeded: {current}/{limit} executions in the current window")]
    ExecutionQuotaExceeded { current: u32, limit: u32 },

    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("lock busy: {0}")]
    LockBusy(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("key-value store error: {0}")]
    Kv(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type QuotaResult<T> = Result<T, QuotaError>;

impl From<sqlx::Error> for QuotaError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => QuotaError::NotFound("row not found".to_string()),
            other => QuotaError::Database(other.to_string()),
        }
    }
}

impl From<redis::RedisError> for QuotaError {
    fn from(err: redis::RedisError) -> Self {
        QuotaError::Kv(err.to_string())
    }
}
