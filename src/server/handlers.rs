//! HTTP handlers for the authentication, application, job, execution,
//! and quota-status surfaces.
//!
//! Grounded in the licensing server's `handlers.rs`: one request/response
//! struct pair per operation, `State(state): State<AppState>` plus
//! `Json(payload)` extractors, `Result<Json<T>, ApiError>` return types.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::admission::{FinishJobRequest, RegisterApplicationRequest, StartJobRequest};
use crate::clock::Clock;
use crate::db::users::NewUser;
use crate::errors::QuotaError;
use crate::models::{Application, Job, JobStatus, License, Principal, User};
use crate::passwords;
use crate::quota::QuotaStatus;
use crate::server::api_error::{ApiError, ErrorCode};
use crate::server::auth::AuthenticatedPrincipal;
use crate::server::logging::HealthResponse;
use crate::server::state::AppState;

// ---------------------------------------------------------------------
// Auth
// ---------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct RegisterUserRequest {
    pub username: String,
    pub email: String,
    pub password: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct UserResponse {
    pub id: String,
    pub username: String,
    pub email: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

impl From<User> for UserResponse {
    fn from(u: User) -> Self {
        Self { id: u.id, username: u.username, email: u.email, first_name: u.first_name, last_name: u.last_name }
    }
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub user: UserResponse,
    pub token: String,
}

#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub token: String,
}

fn is_valid_email(email: &str) -> bool {
    let Some((local, domain)) = email.split_once('@') else { return false };
    !local.is_empty() && domain.contains('.') && !domain.starts_with('.') && !domain.ends_with('.')
}

pub async fn register_handler(
    State(state): State<AppState>,
    Json(payload): Json<RegisterUserRequest>,
) -> Result<(StatusCode, Json<AuthResponse>), ApiError> {
    if payload.username.trim().is_empty() {
        return Err(ApiError::missing_field("username"));
    }
    if payload.password.len() < 8 {
        return Err(ApiError::invalid_field("password", "must be at least 8 characters"));
    }
    if !is_valid_email(&payload.email) {
        return Err(ApiError::invalid_field("email", "not a valid email address"));
    }

    let password_hash = passwords::hash_password(&payload.password)?;
    let now = state.clock.now_utc();
    let user = state
        .db
        .create_user(
            NewUser {
                username: payload.username,
                email: payload.email,
                password_hash,
                first_name: payload.first_name,
                last_name: payload.last_name,
            },
            now,
        )
        .await?;

    let token = state
        .tokens
        .sign_user(&user.id, &user.username, &user.email, now)
        .map_err(|e| QuotaError::Internal(e.to_string()))?;

    info!(user_id = %user.id, "user registered");
    Ok((StatusCode::CREATED, Json(AuthResponse { user: user.into(), token })))
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

pub async fn login_handler(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> Result<Json<TokenResponse>, ApiError> {
    let user = state
        .db
        .get_user_by_username(&payload.username)
        .await?
        .ok_or_else(|| ApiError::with_message(ErrorCode::InvalidToken, "invalid username or password"))?;

    if !user.is_active {
        return Err(ApiError::with_message(ErrorCode::InvalidToken, "user account is inactive"));
    }
    if !passwords::verify_password(&payload.password, &user.password_hash)? {
        return Err(ApiError::with_message(ErrorCode::InvalidToken, "invalid username or password"));
    }

    let now = state.clock.now_utc();
    let token = state
        .tokens
        .sign_user(&user.id, &user.username, &user.email, now)
        .map_err(|e| QuotaError::Internal(e.to_string()))?;

    Ok(Json(TokenResponse { token }))
}

#[derive(Debug, Serialize)]
pub struct MeResponse {
    pub principal: String,
    pub tenant_id: String,
    pub user: Option<UserResponse>,
}

pub async fn me_handler(AuthenticatedPrincipal(principal): AuthenticatedPrincipal) -> Json<MeResponse> {
    let tenant_id = principal.tenant_id().to_string();
    match principal {
        Principal::User { user, .. } => {
            Json(MeResponse { principal: "user".into(), tenant_id, user: Some(user.into()) })
        }
        Principal::License(_) => Json(MeResponse { principal: "license".into(), tenant_id, user: None }),
    }
}

pub async fn refresh_handler(
    State(state): State<AppState>,
    AuthenticatedPrincipal(principal): AuthenticatedPrincipal,
) -> Result<Json<TokenResponse>, ApiError> {
    let Principal::User { user, .. } = principal else {
        return Err(ApiError::with_message(ErrorCode::Forbidden, "refresh is only available to user principals"));
    };
    let now = state.clock.now_utc();
    let token = state
        .tokens
        .sign_user(&user.id, &user.username, &user.email, now)
        .map_err(|e| QuotaError::Internal(e.to_string()))?;
    Ok(Json(TokenResponse { token }))
}

// ---------------------------------------------------------------------
// Applications
// ---------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct ApplicationResponse {
    pub id: String,
    pub license_id: String,
    pub name: String,
    pub description: Option<String>,
    pub version: Option<String>,
    pub api_key: String,
    pub webhook_url: Option<String>,
    pub is_active: bool,
    pub last_activity: Option<chrono::DateTime<Utc>>,
}

impl From<Application> for ApplicationResponse {
    fn from(a: Application) -> Self {
        Self {
            id: a.id,
            license_id: a.license_id,
            name: a.name,
            description: a.description,
            version: a.version,
            api_key: a.api_key,
            webhook_url: a.webhook_url,
            is_active: a.is_active,
            last_activity: a.last_activity,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct RegisterApplicationBody {
    pub name: String,
    pub description: Option<String>,
    pub version: Option<String>,
    pub webhook_url: Option<String>,
    #[serde(default = "default_config")]
    pub config: String,
}

fn default_config() -> String {
    "{}".to_string()
}

pub async fn register_application_handler(
    State(state): State<AppState>,
    AuthenticatedPrincipal(principal): AuthenticatedPrincipal,
    Json(payload): Json<RegisterApplicationBody>,
) -> Result<(StatusCode, Json<ApplicationResponse>), ApiError> {
    let app = state
        .admission
        .register_application(
            principal.license(),
            RegisterApplicationRequest {
                name: payload.name,
                description: payload.description,
                version: payload.version,
                webhook_url: payload.webhook_url,
                config: payload.config,
            },
        )
        .await?;
    Ok((StatusCode::CREATED, Json(app.into())))
}

pub async fn list_applications_handler(
    State(state): State<AppState>,
    AuthenticatedPrincipal(principal): AuthenticatedPrincipal,
) -> Result<Json<Vec<ApplicationResponse>>, ApiError> {
    let apps = state.db.list_applications_for_license(&principal.license().id).await?;
    Ok(Json(apps.into_iter().map(ApplicationResponse::from).collect()))
}

fn require_ownership(app: &Application, license: &License) -> Result<(), ApiError> {
    if app.license_id != license.id {
        return Err(ApiError::with_message(ErrorCode::Forbidden, "application belongs to another license"));
    }
    Ok(())
}

pub async fn get_application_handler(
    State(state): State<AppState>,
    AuthenticatedPrincipal(principal): AuthenticatedPrincipal,
    Path(id): Path<String>,
) -> Result<Json<ApplicationResponse>, ApiError> {
    let app = state.db.get_application(&id).await?;
    require_ownership(&app, principal.license())?;
    Ok(Json(app.into()))
}

#[derive(Debug, Deserialize)]
pub struct UpdateApplicationBody {
    pub name: Option<String>,
    pub description: Option<String>,
    pub version: Option<String>,
    pub webhook_url: Option<String>,
    pub config: Option<String>,
}

pub async fn update_application_handler(
    State(state): State<AppState>,
    AuthenticatedPrincipal(principal): AuthenticatedPrincipal,
    Path(id): Path<String>,
    Json(payload): Json<UpdateApplicationBody>,
) -> Result<Json<ApplicationResponse>, ApiError> {
    let mut app = state.db.get_application(&id).await?;
    require_ownership(&app, principal.license())?;

    if let Some(name) = payload.name {
        if name.is_empty() || name.len() > 255 {
            return Err(ApiError::invalid_field("name", "must be 1-255 chars"));
        }
        app.name = name;
    }
    if let Some(description) = payload.description {
        app.description = Some(description);
    }
    if let Some(version) = payload.version {
        app.version = Some(version);
    }
    if let Some(webhook_url) = payload.webhook_url {
        app.webhook_url = Some(webhook_url);
    }
    if let Some(config) = payload.config {
        app.config = config;
    }

    let now = state.clock.now_utc();
    state.db.update_application(&app, now).await?;
    let updated = state.db.get_application(&id).await?;
    Ok(Json(updated.into()))
}

pub async fn delete_application_handler(
    State(state): State<AppState>,
    AuthenticatedPrincipal(principal): AuthenticatedPrincipal,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let app = state.db.get_application(&id).await?;
    require_ownership(&app, principal.license())?;
    state.db.delete_application(&id).await?;
    if app.is_active {
        state.quota.decrement_app_count(&principal.license().tenant_id).await?;
    }
    Ok(StatusCode::NO_CONTENT)
}

pub async fn activate_application_handler(
    State(state): State<AppState>,
    AuthenticatedPrincipal(principal): AuthenticatedPrincipal,
    Path(id): Path<String>,
) -> Result<Json<ApplicationResponse>, ApiError> {
    let app = state.db.get_application(&id).await?;
    require_ownership(&app, principal.license())?;
    if app.is_active {
        return Ok(Json(app.into()));
    }

    let license = principal.license();
    let outcome = state.quota.check_and_increment_app_count_atomic(&license.tenant_id, license.max_apps).await?;
    if !outcome.allowed {
        return Err(QuotaError::AppQuotaExceeded { current: outcome.current, limit: license.max_apps as u32 }.into());
    }

    let now = state.clock.now_utc();
    state.db.set_application_active(&id, true, now).await?;
    let updated = state.db.get_application(&id).await?;
    Ok(Json(updated.into()))
}

pub async fn deactivate_application_handler(
    State(state): State<AppState>,
    AuthenticatedPrincipal(principal): AuthenticatedPrincipal,
    Path(id): Path<String>,
) -> Result<Json<ApplicationResponse>, ApiError> {
    let app = state.db.get_application(&id).await?;
    require_ownership(&app, principal.license())?;
    if !app.is_active {
        return Ok(Json(app.into()));
    }

    let now = state.clock.now_utc();
    state.db.set_application_active(&id, false, now).await?;
    state.quota.decrement_app_count(&principal.license().tenant_id).await?;
    let updated = state.db.get_application(&id).await?;
    Ok(Json(updated.into()))
}

// ---------------------------------------------------------------------
// Jobs
// ---------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct JobResponse {
    pub id: String,
    pub application_id: String,
    pub license_id: String,
    pub name: String,
    pub status: JobStatus,
    pub started_at: chrono::DateTime<Utc>,
    pub finished_at: Option<chrono::DateTime<Utc>>,
    pub execution_time_s: Option<f64>,
    pub error_message: Option<String>,
    pub result: Option<String>,
    pub cpu_usage: Option<f64>,
    pub memory_usage: Option<f64>,
}

impl From<Job> for JobResponse {
    fn from(j: Job) -> Self {
        Self {
            id: j.id,
            application_id: j.application_id,
            license_id: j.license_id,
            name: j.name,
            status: j.status,
            started_at: j.started_at,
            finished_at: j.finished_at,
            execution_time_s: j.execution_time_s,
            error_message: j.error_message,
            result: j.result,
            cpu_usage: j.cpu_usage,
            memory_usage: j.memory_usage,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct StartJobBody {
    pub application_id: String,
    pub name: String,
}

pub async fn start_job_handler(
    State(state): State<AppState>,
    AuthenticatedPrincipal(principal): AuthenticatedPrincipal,
    Json(payload): Json<StartJobBody>,
) -> Result<(StatusCode, Json<JobResponse>), ApiError> {
    let job = state
        .admission
        .start_job(
            principal.license(),
            StartJobRequest { application_id: payload.application_id, name: payload.name },
        )
        .await?;
    Ok((StatusCode::CREATED, Json(job.into())))
}

#[derive(Debug, Deserialize)]
pub struct FinishJobBody {
    pub job_id: String,
    pub status: JobStatus,
    pub result: Option<String>,
    pub error_message: Option<String>,
    pub cpu_usage: Option<f64>,
    pub memory_usage: Option<f64>,
}

pub async fn finish_job_handler(
    State(state): State<AppState>,
    AuthenticatedPrincipal(principal): AuthenticatedPrincipal,
    Json(payload): Json<FinishJobBody>,
) -> Result<Json<JobResponse>, ApiError> {
    let job = state
        .admission
        .finish_job(
            principal.license(),
            FinishJobRequest {
                job_id: payload.job_id,
                status: payload.status,
                result: payload.result,
                error_message: payload.error_message,
                cpu_usage: payload.cpu_usage,
                memory_usage: payload.memory_usage,
            },
        )
        .await?;
    Ok(Json(job.into()))
}

#[derive(Debug, Deserialize)]
pub struct ListJobsQuery {
    pub limit: Option<i64>,
}

pub async fn list_jobs_handler(
    State(state): State<AppState>,
    AuthenticatedPrincipal(principal): AuthenticatedPrincipal,
    Query(query): Query<ListJobsQuery>,
) -> Result<Json<Vec<JobResponse>>, ApiError> {
    let jobs = state.db.list_jobs(&principal.license().id, query.limit.unwrap_or(100)).await?;
    Ok(Json(jobs.into_iter().map(JobResponse::from).collect()))
}

#[derive(Debug, Serialize)]
pub struct JobStatisticsResponse {
    pub total_jobs: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub avg_execution_time_s: f64,
}

pub async fn job_statistics_handler(
    State(state): State<AppState>,
    AuthenticatedPrincipal(principal): AuthenticatedPrincipal,
) -> Result<Json<JobStatisticsResponse>, ApiError> {
    let jobs = state.db.list_jobs(&principal.license().id, 1000).await?;

    let mut running = 0;
    let mut completed = 0;
    let mut failed = 0;
    let mut cancelled = 0;
    let mut time_sum = 0.0;
    let mut time_count = 0;

    for job in &jobs {
        match job.status {
            JobStatus::Running | JobStatus::Pending => running += 1,
            JobStatus::Completed => completed += 1,
            JobStatus::Failed => failed += 1,
            JobStatus::Cancelled => cancelled += 1,
        }
        if let Some(t) = job.execution_time_s {
            time_sum += t;
            time_count += 1;
        }
    }

    Ok(Json(JobStatisticsResponse {
        total_jobs: jobs.len(),
        running,
        completed,
        failed,
        cancelled,
        avg_execution_time_s: if time_count > 0 { time_sum / time_count as f64 } else { 0.0 },
    }))
}

#[derive(Debug, Serialize)]
pub struct ExecutionWindowEntry {
    pub job_id: String,
    pub executed_at_ts: f64,
}

#[derive(Debug, Serialize)]
pub struct ExecutionWindowResponse {
    pub executions: Vec<ExecutionWindowEntry>,
}

pub async fn executions_window_handler(
    State(state): State<AppState>,
    AuthenticatedPrincipal(principal): AuthenticatedPrincipal,
) -> Result<Json<ExecutionWindowResponse>, ApiError> {
    let history = state.quota.execution_history(&principal.license().tenant_id).await?;
    let executions = history
        .into_iter()
        .map(|(member, score)| ExecutionWindowEntry {
            job_id: member.split(':').next().unwrap_or(&member).to_string(),
            executed_at_ts: score,
        })
        .collect();
    Ok(Json(ExecutionWindowResponse { executions }))
}

// ---------------------------------------------------------------------
// Quota status
// ---------------------------------------------------------------------

pub async fn quota_status_handler(
    State(state): State<AppState>,
    AuthenticatedPrincipal(principal): AuthenticatedPrincipal,
) -> Result<Json<QuotaStatus>, ApiError> {
    let license = principal.license();
    let status = state.quota.quota_status(&license.tenant_id, license.max_apps, license.max_executions_per_24h).await?;
    Ok(Json(status))
}

// ---------------------------------------------------------------------
// Health
// ---------------------------------------------------------------------

pub async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let db_type = match &*state.db {
        crate::db::Database::Sqlite(_) => "sqlite",
        #[cfg(feature = "postgres")]
        crate::db::Database::Postgres(_) => "postgres",
    };
    let connected = state.db.get_metrics_row("__health_check__", Utc::now().date_naive()).await.is_ok();
    Json(HealthResponse::healthy(connected, db_type))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_validation_accepts_plain_address() {
        assert!(is_valid_email("alice@example.com"));
        assert!(!is_valid_email("not-an-email"));
        assert!(!is_valid_email("alice@"));
    }
}
