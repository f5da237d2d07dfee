//! HTTP surface for quotaguard.
//!
//! This module contains:
//! - `state`       → `AppState`, constructor-injected into every handler
//! - `api_error`   → standardized error envelope (`ApiError`, `ErrorCode`)
//! - `auth`        → bearer-token and admin shared-secret extractors
//! - `logging`     → request-id/tracing middleware and health response
//! - `rate_limit`  → `tower_governor` limiter for the auth endpoints
//! - `handlers`    → auth, application, job, and quota-status handlers
//! - `admin`       → license CRUD handlers (requires `admin-api` feature)
//! - `routes`      → router assembly

pub mod api_error;
pub mod auth;
pub mod handlers;
pub mod logging;
pub mod routes;
pub mod state;

#[cfg(feature = "rate-limiting")]
pub mod rate_limit;

#[cfg(feature = "admin-api")]
pub mod admin;

pub use api_error::{ApiError, ErrorCode};
pub use auth::{AdminPrincipal, AuthenticatedPrincipal};
pub use routes::build_router;
pub use state::AppState;
