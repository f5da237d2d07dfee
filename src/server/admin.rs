//! Admin API handlers for license CRUD, gated behind the `AdminPrincipal`
//! shared-secret extractor.
//!
//! Grounded in the licensing server's `admin.rs` module shape (one
//! request/response struct per operation, `Path`/`Query` extractors) but
//! calling straight into [`crate::license_service::LicenseService`]
//! instead of the database directly, since the state-machine transitions
//! (suspend/reactivate/revoke/upgrade) live there.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::licenses::NewLicense;
use crate::license_service::LicensePatch;
use crate::models::{License, LicenseHistory, LicenseStatus};
use crate::server::api_error::ApiError;
use crate::server::auth::AdminPrincipal;
use crate::server::state::AppState;

#[derive(Debug, Serialize)]
pub struct LicenseResponse {
    pub id: String,
    pub tenant_id: String,
    pub tenant_name: String,
    pub max_apps: i64,
    pub max_executions_per_24h: i64,
    pub valid_from: DateTime<Utc>,
    pub valid_to: DateTime<Utc>,
    pub status: LicenseStatus,
    pub contact_name: Option<String>,
    pub contact_email: Option<String>,
}

impl From<License> for LicenseResponse {
    fn from(l: License) -> Self {
        Self {
            id: l.id,
            tenant_id: l.tenant_id,
            tenant_name: l.tenant_name,
            max_apps: l.max_apps,
            max_executions_per_24h: l.max_executions_per_24h,
            valid_from: l.valid_from,
            valid_to: l.valid_to,
            status: l.status,
            contact_name: l.contact_name,
            contact_email: l.contact_email,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateLicenseRequest {
    pub tenant_id: String,
    pub tenant_name: String,
    pub max_apps: i64,
    pub max_executions_per_24h: i64,
    pub valid_from: DateTime<Utc>,
    pub valid_to: DateTime<Utc>,
    #[serde(default)]
    pub features: Option<String>,
    pub contact_name: Option<String>,
    pub contact_email: Option<String>,
}

pub async fn create_license_handler(
    State(state): State<AppState>,
    _admin: AdminPrincipal,
    Json(payload): Json<CreateLicenseRequest>,
) -> Result<(StatusCode, Json<LicenseResponse>), ApiError> {
    let license = state
        .license_service
        .create(
            NewLicense {
                tenant_id: payload.tenant_id,
                tenant_name: payload.tenant_name,
                max_apps: payload.max_apps,
                max_executions_per_24h: payload.max_executions_per_24h,
                valid_from: payload.valid_from,
                valid_to: payload.valid_to,
                features: payload.features.unwrap_or_else(|| "{}".to_string()),
                contact_name: payload.contact_name,
                contact_email: payload.contact_email,
            },
            "admin",
        )
        .await?;
    Ok((StatusCode::CREATED, Json(license.into())))
}

#[derive(Debug, Deserialize)]
pub struct BatchCreateLicenseRequest {
    pub count: u32,
    pub tenant_id_prefix: String,
    pub tenant_name: String,
    pub max_apps: i64,
    pub max_executions_per_24h: i64,
    pub valid_from: DateTime<Utc>,
    pub valid_to: DateTime<Utc>,
    #[serde(default)]
    pub features: Option<String>,
    pub contact_name: Option<String>,
    pub contact_email: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct BatchCreateResponse {
    pub created: u32,
    pub licenses: Vec<LicenseResponse>,
}

/// Creates `count` licenses sharing the same caps and validity window,
/// each with a unique `tenant_id` derived from `tenant_id_prefix`.
pub async fn batch_create_license_handler(
    State(state): State<AppState>,
    _admin: AdminPrincipal,
    Json(payload): Json<BatchCreateLicenseRequest>,
) -> Result<(StatusCode, Json<BatchCreateResponse>), ApiError> {
    if payload.count == 0 {
        return Err(ApiError::invalid_field("count", "must be greater than 0"));
    }
    if payload.count > 1000 {
        return Err(ApiError::invalid_field("count", "must not exceed 1000"));
    }

    let features = payload.features.clone().unwrap_or_else(|| "{}".to_string());
    let mut licenses = Vec::with_capacity(payload.count as usize);
    for i in 0..payload.count {
        let license = state
            .license_service
            .create(
                NewLicense {
                    tenant_id: format!("{}-{}-{}", payload.tenant_id_prefix, i, Uuid::new_v4()),
                    tenant_name: payload.tenant_name.clone(),
                    max_apps: payload.max_apps,
                    max_executions_per_24h: payload.max_executions_per_24h,
                    valid_from: payload.valid_from,
                    valid_to: payload.valid_to,
                    features: features.clone(),
                    contact_name: payload.contact_name.clone(),
                    contact_email: payload.contact_email.clone(),
                },
                "admin",
            )
            .await?;
        licenses.push(license.into());
    }

    Ok((StatusCode::CREATED, Json(BatchCreateResponse { created: licenses.len() as u32, licenses })))
}

pub async fn get_license_handler(
    State(state): State<AppState>,
    _admin: AdminPrincipal,
    Path(license_id): Path<String>,
) -> Result<Json<LicenseResponse>, ApiError> {
    let license = state.db.get_license(&license_id).await?;
    Ok(Json(license.into()))
}

#[derive(Debug, Deserialize)]
pub struct ListLicensesQuery {
    pub status: Option<LicenseStatus>,
    #[serde(default = "default_page")]
    pub page: i64,
    #[serde(default = "default_per_page")]
    pub per_page: i64,
}

fn default_page() -> i64 {
    1
}

fn default_per_page() -> i64 {
    50
}

pub async fn list_licenses_handler(
    State(state): State<AppState>,
    _admin: AdminPrincipal,
    Query(query): Query<ListLicensesQuery>,
) -> Result<Json<Vec<LicenseResponse>>, ApiError> {
    let licenses = state.db.list_licenses(query.status, query.page, query.per_page).await?;
    Ok(Json(licenses.into_iter().map(LicenseResponse::from).collect()))
}

#[derive(Debug, Deserialize, Default)]
pub struct UpdateLicenseRequest {
    pub tenant_name: Option<String>,
    pub max_apps: Option<i64>,
    pub max_executions_per_24h: Option<i64>,
    pub valid_to: Option<DateTime<Utc>>,
    pub features: Option<String>,
    pub contact_name: Option<String>,
    pub contact_email: Option<String>,
}

pub async fn update_license_handler(
    State(state): State<AppState>,
    _admin: AdminPrincipal,
    Path(license_id): Path<String>,
    Json(payload): Json<UpdateLicenseRequest>,
) -> Result<Json<LicenseResponse>, ApiError> {
    let license = state
        .license_service
        .update(
            &license_id,
            LicensePatch {
                tenant_name: payload.tenant_name,
                max_apps: payload.max_apps,
                max_executions_per_24h: payload.max_executions_per_24h,
                valid_to: payload.valid_to,
                features: payload.features,
                contact_name: payload.contact_name,
                contact_email: payload.contact_email,
            },
            "admin",
        )
        .await?;
    Ok(Json(license.into()))
}

#[derive(Debug, Deserialize, Default)]
pub struct ReasonRequest {
    #[serde(default)]
    pub reason: String,
}

pub async fn suspend_license_handler(
    State(state): State<AppState>,
    _admin: AdminPrincipal,
    Path(license_id): Path<String>,
    Json(payload): Json<ReasonRequest>,
) -> Result<Json<LicenseResponse>, ApiError> {
    let license = state.license_service.suspend(&license_id, &payload.reason, "admin").await?;
    Ok(Json(license.into()))
}

pub async fn reactivate_license_handler(
    State(state): State<AppState>,
    _admin: AdminPrincipal,
    Path(license_id): Path<String>,
    Json(payload): Json<ReasonRequest>,
) -> Result<Json<LicenseResponse>, ApiError> {
    let license = state.license_service.reactivate(&license_id, &payload.reason, "admin").await?;
    Ok(Json(license.into()))
}

pub async fn revoke_license_handler(
    State(state): State<AppState>,
    _admin: AdminPrincipal,
    Path(license_id): Path<String>,
    Json(payload): Json<ReasonRequest>,
) -> Result<Json<LicenseResponse>, ApiError> {
    let license = state.license_service.revoke(&license_id, &payload.reason, "admin").await?;
    Ok(Json(license.into()))
}

#[derive(Debug, Deserialize)]
pub struct UpgradeLicenseRequest {
    pub new_max_apps: Option<i64>,
    pub new_max_executions_per_24h: Option<i64>,
    pub new_valid_to: Option<DateTime<Utc>>,
    #[serde(default)]
    pub reason: String,
}

pub async fn upgrade_license_handler(
    State(state): State<AppState>,
    _admin: AdminPrincipal,
    Path(license_id): Path<String>,
    Json(payload): Json<UpgradeLicenseRequest>,
) -> Result<Json<LicenseResponse>, ApiError> {
    let license = state
        .license_service
        .upgrade(
            &license_id,
            payload.new_max_apps,
            payload.new_max_executions_per_24h,
            payload.new_valid_to,
            &payload.reason,
            "admin",
        )
        .await?;
    Ok(Json(license.into()))
}

pub async fn license_history_handler(
    State(state): State<AppState>,
    _admin: AdminPrincipal,
    Path(license_id): Path<String>,
) -> Result<Json<Vec<LicenseHistory>>, ApiError> {
    let history = state.db.list_license_history(&license_id).await?;
    Ok(Json(history))
}
