//! Router assembly.
//!
//! Mirrors the teacher's `build_router`: a single function taking the
//! constructed `AppState`, returning a fully wired `Router`. Logging
//! middleware applies to every route; the rate limiter applies only to
//! the two unauthenticated auth endpoints, matching the teacher's policy
//! of only throttling endpoints that take no credential.
//!
//! # Routes
//!
//! - `POST /auth/register`, `POST /auth/login` — rate-limited, no auth
//! - `GET /auth/me`, `POST /auth/refresh` — bearer (user)
//! - `POST /apps/register`, `GET /applications/`,
//!   `GET|PUT|DELETE /applications/{id}/`,
//!   `POST|DELETE /applications/{id}/activate/` — bearer
//! - `POST /jobs/start`, `POST /jobs/finish`, `GET /jobs/`,
//!   `GET /jobs/statistics/`, `GET /executions/window/` — bearer
//! - `GET /quota/status/` — bearer
//! - `GET /health/` — none
//! - `/admin/licenses/...` — `admin-api` feature, `X-Admin-Token`

use axum::routing::{get, post};
use axum::{middleware, Router};

use crate::config::RateLimitConfig;
use crate::server::handlers::{
    activate_application_handler, deactivate_application_handler, delete_application_handler,
    executions_window_handler, finish_job_handler, get_application_handler, health_handler,
    job_statistics_handler, list_applications_handler, list_jobs_handler, login_handler,
    me_handler, quota_status_handler, refresh_handler, register_application_handler,
    register_handler, start_job_handler, update_application_handler,
};
use crate::server::logging::request_logging_middleware;
use crate::server::state::AppState;

#[cfg(feature = "rate-limiting")]
use crate::server::rate_limit::create_rate_limiter;

#[cfg(feature = "admin-api")]
use crate::server::admin::{
    batch_create_license_handler, create_license_handler, get_license_handler, license_history_handler,
    list_licenses_handler, reactivate_license_handler, revoke_license_handler, suspend_license_handler,
    update_license_handler, upgrade_license_handler,
};

pub fn build_router(state: AppState, rate_limit: &RateLimitConfig) -> Router {
    let auth_router = Router::new().route("/auth/register", post(register_handler)).route("/auth/login", post(login_handler));
    #[cfg(feature = "rate-limiting")]
    let auth_router =
        if rate_limit.enabled { auth_router.layer(create_rate_limiter(rate_limit)) } else { auth_router };
    #[cfg(not(feature = "rate-limiting"))]
    let _ = rate_limit;

    let mut router = Router::new()
        .merge(auth_router)
        .route("/auth/me", get(me_handler))
        .route("/auth/refresh", post(refresh_handler))
        .route("/apps/register", post(register_application_handler))
        .route("/applications/", get(list_applications_handler))
        .route(
            "/applications/:id/",
            get(get_application_handler).put(update_application_handler).delete(delete_application_handler),
        )
        .route(
            "/applications/:id/activate/",
            post(activate_application_handler).delete(deactivate_application_handler),
        )
        .route("/jobs/start", post(start_job_handler))
        .route("/jobs/finish", post(finish_job_handler))
        .route("/jobs/", get(list_jobs_handler))
        .route("/jobs/statistics/", get(job_statistics_handler))
        .route("/executions/window/", get(executions_window_handler))
        .route("/quota/status/", get(quota_status_handler))
        .route("/health/", get(health_handler));

    #[cfg(feature = "admin-api")]
    {
        router = router
            .route("/admin/licenses", post(create_license_handler).get(list_licenses_handler))
            .route("/admin/licenses/batch", post(batch_create_license_handler))
            .route("/admin/licenses/:id", get(get_license_handler).put(update_license_handler))
            .route("/admin/licenses/:id/suspend", post(suspend_license_handler))
            .route("/admin/licenses/:id/reactivate", post(reactivate_license_handler))
            .route("/admin/licenses/:id/revoke", post(revoke_license_handler))
            .route("/admin/licenses/:id/upgrade", post(upgrade_license_handler))
            .route("/admin/licenses/:id/history", get(license_history_handler));
    }

    router.layer(middleware::from_fn(request_logging_middleware)).with_state(state)
}
