//! Standardized API error responses.
//!
//! Every handler returns `Result<_, ApiError>`; axum converts the `Err`
//! arm into the `{ "error": { "code", "message", "details" } }` envelope,
//! except for the two quota-exceeded kinds, which use their own flat
//! wire contract (see `QuotaExceededBody`).

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};

use crate::errors::QuotaError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    InvalidRequest,
    MissingField,
    InvalidField,
    MissingToken,
    InvalidToken,
    TokenExpired,
    LicenseSuspended,
    LicenseExpired,
    LicenseRevoked,
    Forbidden,
    ApplicationInactive,
    NotReactivatable,
    NotFound,
    Conflict,
    AppQuotaExceeded,
    ExecutionQuotaExceeded,
    LockBusy,
    DatabaseError,
    ConfigError,
    InternalError,
}

impl ErrorCode {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ErrorCode::InvalidRequest | ErrorCode::MissingField | ErrorCode::InvalidField => {
                StatusCode::BAD_REQUEST
            }
            ErrorCode::MissingToken | ErrorCode::InvalidToken | ErrorCode::TokenExpired => {
                StatusCode::UNAUTHORIZED
            }
            ErrorCode::LicenseSuspended
            | ErrorCode::LicenseExpired
            | ErrorCode::LicenseRevoked
            | ErrorCode::Forbidden
            | ErrorCode::ApplicationInactive
            | ErrorCode::NotReactivatable
            | ErrorCode::AppQuotaExceeded => StatusCode::FORBIDDEN,
            ErrorCode::NotFound => StatusCode::NOT_FOUND,
            ErrorCode::Conflict => StatusCode::CONFLICT,
            ErrorCode::ExecutionQuotaExceeded => StatusCode::TOO_MANY_REQUESTS,
            ErrorCode::LockBusy => StatusCode::SERVICE_UNAVAILABLE,
            ErrorCode::DatabaseError | ErrorCode::ConfigError | ErrorCode::InternalError => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    pub fn default_message(&self) -> &'static str {
        match self {
            ErrorCode::InvalidRequest => "request payload is invalid",
            ErrorCode::MissingField => "a required field is missing",
            ErrorCode::InvalidField => "a field value is invalid",
            ErrorCode::MissingToken => "authentication token is required",
            ErrorCode::InvalidToken => "authentication token is invalid",
            ErrorCode::TokenExpired => "authentication token has expired",
            ErrorCode::LicenseSuspended => "license is suspended",
            ErrorCode::LicenseExpired => "license has expired",
            ErrorCode::LicenseRevoked => "license has been revoked",
            ErrorCode::Forbidden => "operation is not permitted",
            ErrorCode::ApplicationInactive => "application is inactive",
            ErrorCode::NotReactivatable => "license cannot be reactivated",
            ErrorCode::NotFound => "the requested resource was not found",
            ErrorCode::Conflict => "operation conflicts with current resource state",
            ErrorCode::AppQuotaExceeded => "application quota exceeded",
            ErrorCode::ExecutionQuotaExceeded => "execution quota exceeded",
            ErrorCode::LockBusy => "system busy, try again",
            ErrorCode::DatabaseError => "database operation failed",
            ErrorCode::ConfigError => "server configuration error",
            ErrorCode::InternalError => "an unexpected error occurred",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

/// Wire body for the two quota-exceeded kinds: a flat object (no
/// `error`/`details` nesting) carrying whichever limit field applies
/// (`max_apps` or `max_executions_per_24h`) alongside `current_count`.
#[derive(Debug, Clone)]
pub struct QuotaExceededBody {
    pub limit_field: &'static str,
    pub limit: u32,
    pub current_count: u32,
    pub message: String,
}

impl Serialize for QuotaExceededBody {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(4))?;
        map.serialize_entry("error", &self.message)?;
        map.serialize_entry(self.limit_field, &self.limit)?;
        map.serialize_entry("current_count", &self.current_count)?;
        map.serialize_entry("message", &self.message)?;
        map.end()
    }
}

#[derive(Debug, Clone)]
pub enum ApiError {
    Standard(ErrorBody),
    QuotaExceeded(QuotaExceededBody),
}

impl Serialize for ApiError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            ApiError::Standard(body) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("error", body)?;
                map.end()
            }
            ApiError::QuotaExceeded(body) => body.serialize(serializer),
        }
    }
}

impl ApiError {
    pub fn new(code: ErrorCode) -> Self {
        Self::Standard(ErrorBody { code, message: code.default_message().to_string(), details: None })
    }

    pub fn with_message(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Standard(ErrorBody { code, message: message.into(), details: None })
    }

    pub fn with_details(code: ErrorCode, message: impl Into<String>, details: serde_json::Value) -> Self {
        Self::Standard(ErrorBody { code, message: message.into(), details: Some(details) })
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Standard(body) => body.code.status_code(),
            ApiError::QuotaExceeded(body) => {
                if body.limit_field == "max_apps" {
                    ErrorCode::AppQuotaExceeded.status_code()
                } else {
                    ErrorCode::ExecutionQuotaExceeded.status_code()
                }
            }
        }
    }

    pub fn not_found(resource: &str) -> Self {
        Self::with_message(ErrorCode::NotFound, format!("{resource} not found"))
    }

    pub fn missing_field(field: &str) -> Self {
        Self::with_details(
            ErrorCode::MissingField,
            format!("required field '{field}' is missing"),
            serde_json::json!({ "field": field }),
        )
    }

    pub fn invalid_field(field: &str, reason: &str) -> Self {
        Self::with_details(
            ErrorCode::InvalidField,
            format!("invalid value for '{field}': {reason}"),
            serde_json::json!({ "field": field }),
        )
    }

    /// Maps a `QuotaError` onto the wire error shape: validation,
    /// authentication, and authorization kinds split into their own
    /// codes; the two quota kinds use the flat `QuotaExceededBody`
    /// contract instead of the standard envelope.
    pub fn from_quota_error(err: QuotaError) -> Self {
        match err {
            QuotaError::NotFound(msg) => Self::with_message(ErrorCode::NotFound, msg),
            QuotaError::Conflict(msg) => Self::with_message(ErrorCode::Conflict, msg),
            QuotaError::Validation(msg) => Self::with_message(ErrorCode::InvalidField, msg),
            QuotaError::LicenseExpired => Self::new(ErrorCode::LicenseExpired),
            QuotaError::LicenseSuspended => Self::new(ErrorCode::LicenseSuspended),
            QuotaError::LicenseRevoked => Self::new(ErrorCode::LicenseRevoked),
            QuotaError::AppQuotaExceeded { current, limit } => {
                Self::QuotaExceeded(QuotaExceededBody {
                    limit_field: "max_apps",
                    limit,
                    current_count: current,
                    message: format!("application quota exceeded: {current}/{limit} applications"),
                })
            }
            QuotaError::ExecutionQuotaExceeded { current, limit } => {
                Self::QuotaExceeded(QuotaExceededBody {
                    limit_field: "max_executions_per_24h",
                    limit,
                    current_count: current,
                    message: format!("execution quota exceeded: {current}/{limit} executions"),
                })
            }
            QuotaError::Authentication(msg) => Self::with_message(ErrorCode::InvalidToken, msg),
            QuotaError::Forbidden(msg) => Self::with_message(ErrorCode::Forbidden, msg),
            QuotaError::LockBusy(msg) => Self::with_message(ErrorCode::LockBusy, msg),
            QuotaError::Database(msg) => Self::with_message(ErrorCode::DatabaseError, msg),
            QuotaError::Kv(msg) => Self::with_message(ErrorCode::DatabaseError, msg),
            QuotaError::Config(msg) => Self::with_message(ErrorCode::ConfigError, msg),
            QuotaError::Internal(msg) => Self::with_message(ErrorCode::InternalError, msg),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        (status, Json(self)).into_response()
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApiError::Standard(body) => write!(f, "{}: {}", body.code.default_message(), body.message),
            ApiError::QuotaExceeded(body) => write!(f, "{}", body.message),
        }
    }
}

impl std::error::Error for ApiError {}

impl From<QuotaError> for ApiError {
    fn from(err: QuotaError) -> Self {
        ApiError::from_quota_error(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_code_status_mapping() {
        assert_eq!(ErrorCode::NotFound.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(ErrorCode::ExecutionQuotaExceeded.status_code(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(ErrorCode::AppQuotaExceeded.status_code(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn quota_error_conversion_preserves_limits() {
        let api_err: ApiError = QuotaError::AppQuotaExceeded { current: 5, limit: 5 }.into();
        assert_eq!(api_err.status_code(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn app_quota_exceeded_uses_flat_wire_contract() {
        let api_err: ApiError = QuotaError::AppQuotaExceeded { current: 2, limit: 2 }.into();
        let value = serde_json::to_value(&api_err).unwrap();
        assert_eq!(value["max_apps"], 2);
        assert_eq!(value["current_count"], 2);
        assert!(value.get("error").is_some());
        assert!(value.get("message").is_some());
        assert!(value.get("details").is_none());
    }

    #[test]
    fn execution_quota_exceeded_uses_flat_wire_contract() {
        let api_err: ApiError = QuotaError::ExecutionQuotaExceeded { current: 3, limit: 3 }.into();
        let value = serde_json::to_value(&api_err).unwrap();
        assert_eq!(value["max_executions_per_24h"], 3);
        assert_eq!(value["current_count"], 3);
    }
}
