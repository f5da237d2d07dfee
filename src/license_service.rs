//! License Service: license lifecycle (create, suspend, reactivate,
//! revoke, upgrade), validity predicate, history append.

use crate::clock::Clock;
use crate::db::licenses::NewLicense;
use crate::db::Database;
use crate::errors::{QuotaError, QuotaResult};
use crate::models::{HistoryAction, License, LicenseStatus};
use crate::quota::QuotaEngine;
use serde_json::json;
use std::sync::Arc;

pub struct LicenseService {
    db: Arc<Database>,
    quota: Arc<QuotaEngine>,
    clock: Arc<dyn Clock>,
}

#[derive(Debug, Default)]
pub struct LicensePatch {
    pub tenant_name: Option<String>,
    pub max_apps: Option<i64>,
    pub max_executions_per_24h: Option<i64>,
    pub valid_to: Option<chrono::DateTime<chrono::Utc>>,
    pub features: Option<String>,
    pub contact_name: Option<String>,
    pub contact_email: Option<String>,
}

impl LicenseService {
    pub fn new(db: Arc<Database>, quota: Arc<QuotaEngine>, clock: Arc<dyn Clock>) -> Self {
        Self { db, quota, clock }
    }

    pub fn is_valid(&self, license: &License) -> bool {
        license.is_valid(self.clock.now_utc())
    }

    pub async fn create(&self, draft: NewLicense, actor: &str) -> QuotaResult<License> {
        let now = self.clock.now_utc();
        let license = self.db.create_license(draft, actor, now).await?;
        self.quota.set_app_count(&license.tenant_id, 0).await?;
        Ok(license)
    }

    pub async fn update(&self, license_id: &str, patch: LicensePatch, actor: &str) -> QuotaResult<License> {
        let now = self.clock.now_utc();
        let mut license = self.db.get_license(license_id).await?;
        let mut diff = serde_json::Map::new();

        if let Some(name) = patch.tenant_name {
            if name != license.tenant_name {
                diff.insert("tenant_name".into(), json!({"before": license.tenant_name, "after": name}));
                license.tenant_name = name;
            }
        }
        if let Some(max_apps) = patch.max_apps {
            if max_apps != license.max_apps {
                diff.insert("max_apps".into(), json!({"before": license.max_apps, "after": max_apps}));
                license.max_apps = max_apps;
            }
        }
        if let Some(max_exec) = patch.max_executions_per_24h {
            if max_exec != license.max_executions_per_24h {
                diff.insert(
                    "max_executions_per_24h".into(),
                    json!({"before": license.max_executions_per_24h, "after": max_exec}),
                );
                license.max_executions_per_24h = max_exec;
            }
        }
        if let Some(valid_to) = patch.valid_to {
            // Open Question resolved: keep strict future-validation on both
            // create and update, matching the original create-path
            // serializer rather than the update path that dropped it.
            if valid_to <= now {
                return Err(QuotaError::Validation("valid_to must be in the future".into()));
            }
            if valid_to != license.valid_to {
                diff.insert("valid_to".into(), json!({"before": license.valid_to, "after": valid_to}));
                license.valid_to = valid_to;
            }
        }
        if let Some(features) = patch.features {
            diff.insert("features".into(), json!("updated"));
            license.features = features;
        }
        if let Some(contact_name) = patch.contact_name {
            license.contact_name = Some(contact_name);
        }
        if let Some(contact_email) = patch.contact_email {
            license.contact_email = Some(contact_email);
        }

        self.db.update_license(&license, now).await?;
        if !diff.is_empty() {
            self.db
                .append_license_history(
                    license_id,
                    HistoryAction::Update,
                    &serde_json::Value::Object(diff).to_string(),
                    actor,
                    now,
                )
                .await?;
        }
        self.db.get_license(license_id).await
    }

    /// Idempotent on already-SUSPENDED.
    pub async fn suspend(&self, license_id: &str, reason: &str, actor: &str) -> QuotaResult<License> {
        let now = self.clock.now_utc();
        let mut license = self.db.get_license(license_id).await?;
        if license.status == LicenseStatus::Suspended {
            return Ok(license);
        }
        license.status = LicenseStatus::Suspended;
        self.db.update_license(&license, now).await?;
        self.db
            .append_license_history(
                license_id,
                HistoryAction::Suspend,
                &json!({"reason": reason}).to_string(),
                actor,
                now,
            )
            .await?;
        self.db.get_license(license_id).await
    }

    /// If `now ≤ valid_to` and `status ≠ REVOKED`, reactivate; otherwise
    /// `NotReactivatable`.
    pub async fn reactivate(&self, license_id: &str, reason: &str, actor: &str) -> QuotaResult<License> {
        let now = self.clock.now_utc();
        let mut license = self.db.get_license(license_id).await?;
        if license.status == LicenseStatus::Revoked {
            return Err(QuotaError::Forbidden("license is revoked; cannot reactivate".into()));
        }
        if now > license.valid_to {
            return Err(QuotaError::Forbidden("license has expired; cannot reactivate".into()));
        }
        license.status = LicenseStatus::Active;
        self.db.update_license(&license, now).await?;
        self.db
            .append_license_history(
                license_id,
                HistoryAction::Reactivate,
                &json!({"reason": reason}).to_string(),
                actor,
                now,
            )
            .await?;
        self.db.get_license(license_id).await
    }

    /// Terminal: clears both quota counters and writes a REVOKE history row.
    pub async fn revoke(&self, license_id: &str, reason: &str, actor: &str) -> QuotaResult<License> {
        let now = self.clock.now_utc();
        let mut license = self.db.get_license(license_id).await?;
        license.status = LicenseStatus::Revoked;
        self.db.update_license(&license, now).await?;
        self.db
            .append_license_history(
                license_id,
                HistoryAction::Revoke,
                &json!({"reason": reason}).to_string(),
                actor,
                now,
            )
            .await?;
        self.quota.reset_tenant_data(&license.tenant_id).await?;
        self.db.get_license(license_id).await
    }

    /// Writes a LicenseUpgrade row capturing old/new values and an UPGRADE
    /// history row with a structured diff. No counter reset.
    pub async fn upgrade(
        &self,
        license_id: &str,
        new_max_apps: Option<i64>,
        new_max_executions: Option<i64>,
        new_valid_to: Option<chrono::DateTime<chrono::Utc>>,
        reason: &str,
        approver: &str,
    ) -> QuotaResult<License> {
        let now = self.clock.now_utc();
        let mut license = self.db.get_license(license_id).await?;

        let previous_max_apps = license.max_apps;
        let previous_max_executions = license.max_executions_per_24h;
        let previous_valid_to = license.valid_to;

        let new_max_apps = new_max_apps.unwrap_or(previous_max_apps);
        let new_max_executions = new_max_executions.unwrap_or(previous_max_executions);
        let new_valid_to = new_valid_to.unwrap_or(previous_valid_to);

        license.max_apps = new_max_apps;
        license.max_executions_per_24h = new_max_executions;
        license.valid_to = new_valid_to;
        self.db.update_license(&license, now).await?;

        self.db
            .record_license_upgrade(
                license_id,
                previous_max_apps,
                new_max_apps,
                previous_max_executions,
                new_max_executions,
                previous_valid_to,
                new_valid_to,
                reason,
                approver,
                now,
            )
            .await?;

        self.db
            .append_license_history(
                license_id,
                HistoryAction::Upgrade,
                &json!({
                    "max_apps": {"before": previous_max_apps, "after": new_max_apps},
                    "max_executions_per_24h": {"before": previous_max_executions, "after": new_max_executions},
                    "valid_to": {"before": previous_valid_to, "after": new_valid_to},
                    "reason": reason,
                })
                .to_string(),
                approver,
                now,
            )
            .await?;

        self.db.get_license(license_id).await
    }
}
