//! Data model shared by the durable store adapter and every component above it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum LicenseStatus {
    Active,
    Suspended,
    Expired,
    Revoked,
}

impl LicenseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LicenseStatus::Active => "ACTIVE",
            LicenseStatus::Suspended => "SUSPENDED",
            LicenseStatus::Expired => "EXPIRED",
            LicenseStatus::Revoked => "REVOKED",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum HistoryAction {
    Create,
    Update,
    Suspend,
    Reactivate,
    Revoke,
    Upgrade,
}

/// A tenant's license: the single row that caps applications and executions.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct License {
    pub id: String,
    pub tenant_id: String,
    pub tenant_name: String,
    pub max_apps: i64,
    pub max_executions_per_24h: i64,
    pub valid_from: DateTime<Utc>,
    pub valid_to: DateTime<Utc>,
    pub status: LicenseStatus,
    /// Opaque JSON map, stored as text.
    pub features: String,
    pub contact_name: Option<String>,
    pub contact_email: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl License {
    /// I2: EXPIRED is inferred, never eagerly persisted.
    pub fn effective_status(&self, now: DateTime<Utc>) -> LicenseStatus {
        if matches!(self.status, LicenseStatus::Active | LicenseStatus::Suspended)
            && now > self.valid_to
        {
            LicenseStatus::Expired
        } else {
            self.status
        }
    }

    /// `status = ACTIVE ∧ valid_from ≤ now ≤ valid_to`.
    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        self.status == LicenseStatus::Active && self.valid_from <= now && now <= self.valid_to
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.valid_to
    }

    pub fn remaining_days(&self, now: DateTime<Utc>) -> i64 {
        (self.valid_to - now).num_days().max(0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct LicenseHistory {
    pub id: String,
    pub license_id: String,
    pub action: HistoryAction,
    pub details: String,
    pub performed_by: String,
    pub performed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct LicenseUpgrade {
    pub id: String,
    pub license_id: String,
    pub previous_max_apps: i64,
    pub new_max_apps: i64,
    pub previous_max_executions: i64,
    pub new_max_executions: i64,
    pub previous_valid_to: DateTime<Utc>,
    pub new_valid_to: DateTime<Utc>,
    pub reason: String,
    pub approved_by: String,
    pub performed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct LicenseToken {
    pub id: String,
    pub license_id: String,
    pub token_hash: String,
    pub issued_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Application {
    pub id: String,
    pub license_id: String,
    pub name: String,
    pub description: Option<String>,
    pub version: Option<String>,
    pub api_key: String,
    pub webhook_url: Option<String>,
    pub is_active: bool,
    pub last_activity: Option<DateTime<Utc>>,
    pub config: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Job {
    pub id: String,
    pub application_id: String,
    pub license_id: String,
    pub name: String,
    pub status: JobStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub execution_time_s: Option<f64>,
    pub error_message: Option<String>,
    pub result: Option<String>,
    pub cpu_usage: Option<f64>,
    pub memory_usage: Option<f64>,
    pub metadata: String,
}

impl Job {
    /// I5: a Job is RUNNING iff `finished_at IS NULL` and `status = RUNNING`.
    pub fn is_running(&self) -> bool {
        self.finished_at.is_none() && self.status == JobStatus::Running
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct JobExecution {
    pub id: String,
    pub license_id: String,
    pub job_id: String,
    pub tenant_id: String,
    pub executed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ApplicationMetrics {
    pub id: String,
    pub application_id: String,
    pub date: chrono::NaiveDate,
    pub hour: Option<i32>,
    pub total_jobs: i64,
    pub successful_jobs: i64,
    pub failed_jobs: i64,
    pub avg_execution_time: f64,
    pub max_execution_time: f64,
    pub min_execution_time: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    pub id: String,
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub is_active: bool,
    pub date_joined: DateTime<Utc>,
}

impl User {
    pub fn full_name(&self) -> String {
        match (&self.first_name, &self.last_name) {
            (Some(f), Some(l)) => format!("{f} {l}"),
            (Some(f), None) => f.clone(),
            (None, Some(l)) => l.clone(),
            _ => self.username.clone(),
        }
    }
}

/// The authenticated identity for a request: either a user (carrying a
/// derived license) or a license directly.
#[derive(Debug, Clone)]
pub enum Principal {
    User { user: User, license: License },
    License(License),
}

impl Principal {
    pub fn license(&self) -> &License {
        match self {
            Principal::User { license, .. } => license,
            Principal::License(license) => license,
        }
    }

    pub fn tenant_id(&self) -> &str {
        &self.license().tenant_id
    }
}

pub fn parse_map(raw: &str) -> HashMap<String, serde_json::Value> {
    serde_json::from_str(raw).unwrap_or_default()
}

pub fn encode_map(map: &HashMap<String, serde_json::Value>) -> String {
    serde_json::to_string(map).unwrap_or_else(|_| "{}".to_string())
}
