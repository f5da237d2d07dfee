//! Request logging middleware.
//!
//! Generates a request id per request, logs method/path/status/duration
//! in a tracing span, and echoes the id back in a response header so a
//! client can correlate a request with server-side logs.

use axum::{body::Body, extract::Request, http::HeaderValue, middleware::Next, response::Response};
use std::time::Instant;
use tracing::{info, info_span, Instrument};
use uuid::Uuid;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

pub fn generate_request_id() -> String {
    Uuid::new_v4().to_string()
}

pub async fn request_logging_middleware(request: Request, next: Next) -> Response<Body> {
    let request_id = generate_request_id();
    let method = request.method().clone();
    let path = request.uri().path().to_string();

    let span = info_span!("request", request_id = %request_id, method = %method, path = %path);
    let start = Instant::now();

    let response = async move {
        info!("started processing request");
        next.run(request).await
    }
    .instrument(span.clone())
    .await;

    let duration = start.elapsed();
    let status = response.status();
    let _enter = span.enter();
    info!(status = %status.as_u16(), duration_ms = %duration.as_millis(), "request completed");

    let (mut parts, body) = response.into_parts();
    if let Ok(header_value) = HeaderValue::from_str(&request_id) {
        parts.headers.insert(REQUEST_ID_HEADER, header_value);
    }
    Response::from_parts(parts, body)
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
    pub database: DatabaseHealth,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct DatabaseHealth {
    pub connected: bool,
    pub db_type: String,
}

impl HealthResponse {
    pub fn healthy(db_connected: bool, db_type: &str) -> Self {
        Self {
            status: if db_connected { "healthy" } else { "degraded" }.to_string(),
            service: "quotaguard".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            database: DatabaseHealth { connected: db_connected, db_type: db_type.to_string() },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_id_is_valid_uuid() {
        let id = generate_request_id();
        assert!(Uuid::parse_str(&id).is_ok());
    }

    #[test]
    fn health_response_healthy() {
        let health = HealthResponse::healthy(true, "sqlite");
        assert_eq!(health.status, "healthy");
    }
}
