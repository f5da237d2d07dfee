use super::Database;
use crate::errors::{QuotaError, QuotaResult};
use crate::models::{HistoryAction, License, LicenseHistory, LicenseStatus, LicenseUpgrade};
use chrono::{DateTime, Utc};
use sqlx::query_as;
use uuid::Uuid;

pub struct NewLicense {
    pub tenant_id: String,
    pub tenant_name: String,
    pub max_apps: i64,
    pub max_executions_per_24h: i64,
    pub valid_from: DateTime<Utc>,
    pub valid_to: DateTime<Utc>,
    pub features: String,
    pub contact_name: Option<String>,
    pub contact_email: Option<String>,
}

impl Database {
    pub async fn create_license(&self, draft: NewLicense, actor: &str, now: DateTime<Utc>) -> QuotaResult<License> {
        if draft.valid_from >= draft.valid_to {
            return Err(QuotaError::Validation("valid_from must be before valid_to".into()));
        }
        let id = Uuid::new_v4().to_string();
        match self {
            Database::Sqlite(pool) => {
                sqlx::query(
                    "INSERT INTO licenses (id, tenant_id, tenant_name, max_apps, max_executions_per_24h, \
                     valid_from, valid_to, status, features, contact_name, contact_email, created_at, updated_at) \
                     VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                )
                .bind(&id)
                .bind(&draft.tenant_id)
                .bind(&draft.tenant_name)
                .bind(draft.max_apps)
                .bind(draft.max_executions_per_24h)
                .bind(draft.valid_from)
                .bind(draft.valid_to)
                .bind(LicenseStatus::Active.as_str())
                .bind(&draft.features)
                .bind(&draft.contact_name)
                .bind(&draft.contact_email)
                .bind(now)
                .bind(now)
                .execute(pool)
                .await
                .map_err(|e| map_unique_violation(e, "tenant_id"))?;
            }
            #[cfg(feature = "postgres")]
            Database::Postgres(pool) => {
                sqlx::query(
                    "INSERT INTO licenses (id, tenant_id, tenant_name, max_apps, max_executions_per_24h, \
                     valid_from, valid_to, status, features, contact_name, contact_email, created_at, updated_at) \
                     VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13)",
                )
                .bind(&id)
                .bind(&draft.tenant_id)
                .bind(&draft.tenant_name)
                .bind(draft.max_apps)
                .bind(draft.max_executions_per_24h)
                .bind(draft.valid_from)
                .bind(draft.valid_to)
                .bind(LicenseStatus::Active.as_str())
                .bind(&draft.features)
                .bind(&draft.contact_name)
                .bind(&draft.contact_email)
                .bind(now)
                .bind(now)
                .execute(pool)
                .await
                .map_err(|e| map_unique_violation(e, "tenant_id"))?;
            }
        }
        self.append_license_history(&id, HistoryAction::Create, "{}", actor, now).await?;
        self.get_license(&id).await
    }

    pub async fn get_license(&self, id: &str) -> QuotaResult<License> {
        match self {
            Database::Sqlite(pool) => Ok(query_as::<_, License>("SELECT * FROM licenses WHERE id = ?")
                .bind(id)
                .fetch_one(pool)
                .await?),
            #[cfg(feature = "postgres")]
            Database::Postgres(pool) => Ok(query_as::<_, License>("SELECT * FROM licenses WHERE id = $1")
                .bind(id)
                .fetch_one(pool)
                .await?),
        }
    }

    pub async fn get_license_by_tenant(&self, tenant_id: &str) -> QuotaResult<Option<License>> {
        match self {
            Database::Sqlite(pool) => Ok(query_as::<_, License>("SELECT * FROM licenses WHERE tenant_id = ?")
                .bind(tenant_id)
                .fetch_optional(pool)
                .await?),
            #[cfg(feature = "postgres")]
            Database::Postgres(pool) => Ok(
                query_as::<_, License>("SELECT * FROM licenses WHERE tenant_id = $1")
                    .bind(tenant_id)
                    .fetch_optional(pool)
                    .await?,
            ),
        }
    }

    pub async fn list_licenses(
        &self,
        status: Option<LicenseStatus>,
        page: i64,
        per_page: i64,
    ) -> QuotaResult<Vec<License>> {
        let offset = (page.max(1) - 1) * per_page;
        match self {
            Database::Sqlite(pool) => {
                let rows = if let Some(status) = status {
                    query_as::<_, License>(
                        "SELECT * FROM licenses WHERE status = ? ORDER BY created_at DESC LIMIT ? OFFSET ?",
                    )
                    .bind(status.as_str())
                    .bind(per_page)
                    .bind(offset)
                    .fetch_all(pool)
                    .await?
                } else {
                    query_as::<_, License>("SELECT * FROM licenses ORDER BY created_at DESC LIMIT ? OFFSET ?")
                        .bind(per_page)
                        .bind(offset)
                        .fetch_all(pool)
                        .await?
                };
                Ok(rows)
            }
            #[cfg(feature = "postgres")]
            Database::Postgres(pool) => {
                let rows = if let Some(status) = status {
                    query_as::<_, License>(
                        "SELECT * FROM licenses WHERE status = $1 ORDER BY created_at DESC LIMIT $2 OFFSET $3",
                    )
                    .bind(status.as_str())
                    .bind(per_page)
                    .bind(offset)
                    .fetch_all(pool)
                    .await?
                } else {
                    query_as::<_, License>("SELECT * FROM licenses ORDER BY created_at DESC LIMIT $1 OFFSET $2")
                        .bind(per_page)
                        .bind(offset)
                        .fetch_all(pool)
                        .await?
                };
                Ok(rows)
            }
        }
    }

    /// §4.4 `update`: persists a whole-row replacement; history diffing
    /// happens one layer up in `LicenseService`, which has both the
    /// before and after rows in hand.
    pub async fn update_license(&self, license: &License, now: DateTime<Utc>) -> QuotaResult<()> {
        match self {
            Database::Sqlite(pool) => {
                sqlx::query(
                    "UPDATE licenses SET tenant_name=?, max_apps=?, max_executions_per_24h=?, valid_from=?, \
                     valid_to=?, status=?, features=?, contact_name=?, contact_email=?, updated_at=? WHERE id=?",
                )
                .bind(&license.tenant_name)
                .bind(license.max_apps)
                .bind(license.max_executions_per_24h)
                .bind(license.valid_from)
                .bind(license.valid_to)
                .bind(license.status.as_str())
                .bind(&license.features)
                .bind(&license.contact_name)
                .bind(&license.contact_email)
                .bind(now)
                .bind(&license.id)
                .execute(pool)
                .await?;
            }
            #[cfg(feature = "postgres")]
            Database::Postgres(pool) => {
                sqlx::query(
                    "UPDATE licenses SET tenant_name=$1, max_apps=$2, max_executions_per_24h=$3, valid_from=$4, \
                     valid_to=$5, status=$6, features=$7, contact_name=$8, contact_email=$9, updated_at=$10 WHERE id=$11",
                )
                .bind(&license.tenant_name)
                .bind(license.max_apps)
                .bind(license.max_executions_per_24h)
                .bind(license.valid_from)
                .bind(license.valid_to)
                .bind(license.status.as_str())
                .bind(&license.features)
                .bind(&license.contact_name)
                .bind(&license.contact_email)
                .bind(now)
                .bind(&license.id)
                .execute(pool)
                .await?;
            }
        }
        Ok(())
    }

    pub async fn append_license_history(
        &self,
        license_id: &str,
        action: HistoryAction,
        details: &str,
        performed_by: &str,
        now: DateTime<Utc>,
    ) -> QuotaResult<LicenseHistory> {
        let id = Uuid::new_v4().to_string();
        match self {
            Database::Sqlite(pool) => {
                sqlx::query(
                    "INSERT INTO license_history (id, license_id, action, details, performed_by, performed_at) \
                     VALUES (?, ?, ?, ?, ?, ?)",
                )
                .bind(&id)
                .bind(license_id)
                .bind(format!("{action:?}").to_uppercase())
                .bind(details)
                .bind(performed_by)
                .bind(now)
                .execute(pool)
                .await?;
            }
            #[cfg(feature = "postgres")]
            Database::Postgres(pool) => {
                sqlx::query(
                    "INSERT INTO license_history (id, license_id, action, details, performed_by, performed_at) \
                     VALUES ($1,$2,$3,$4,$5,$6)",
                )
                .bind(&id)
                .bind(license_id)
                .bind(format!("{action:?}").to_uppercase())
                .bind(details)
                .bind(performed_by)
                .bind(now)
                .execute(pool)
                .await?;
            }
        }
        Ok(LicenseHistory {
            id,
            license_id: license_id.to_string(),
            action,
            details: details.to_string(),
            performed_by: performed_by.to_string(),
            performed_at: now,
        })
    }

    pub async fn list_license_history(&self, license_id: &str) -> QuotaResult<Vec<LicenseHistory>> {
        match self {
            Database::Sqlite(pool) => Ok(query_as::<_, LicenseHistory>(
                "SELECT * FROM license_history WHERE license_id = ? ORDER BY performed_at DESC",
            )
            .bind(license_id)
            .fetch_all(pool)
            .await?),
            #[cfg(feature = "postgres")]
            Database::Postgres(pool) => Ok(query_as::<_, LicenseHistory>(
                "SELECT * FROM license_history WHERE license_id = $1 ORDER BY performed_at DESC",
            )
            .bind(license_id)
            .fetch_all(pool)
            .await?),
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn record_license_upgrade(
        &self,
        license_id: &str,
        previous_max_apps: i64,
        new_max_apps: i64,
        previous_max_executions: i64,
        new_max_executions: i64,
        previous_valid_to: DateTime<Utc>,
        new_valid_to: DateTime<Utc>,
        reason: &str,
        approved_by: &str,
        now: DateTime<Utc>,
    ) -> QuotaResult<LicenseUpgrade> {
        let id = Uuid::new_v4().to_string();
        match self {
            Database::Sqlite(pool) => {
                sqlx::query(
                    "INSERT INTO license_upgrades (id, license_id, previous_max_apps, new_max_apps, \
                     previous_max_executions, new_max_executions, previous_valid_to, new_valid_to, reason, \
                     approved_by, performed_at) VALUES (?,?,?,?,?,?,?,?,?,?,?)",
                )
                .bind(&id)
                .bind(license_id)
                .bind(previous_max_apps)
                .bind(new_max_apps)
                .bind(previous_max_executions)
                .bind(new_max_executions)
                .bind(previous_valid_to)
                .bind(new_valid_to)
                .bind(reason)
                .bind(approved_by)
                .bind(now)
                .execute(pool)
                .await?;
            }
            #[cfg(feature = "postgres")]
            Database::Postgres(pool) => {
                sqlx::query(
                    "INSERT INTO license_upgrades (id, license_id, previous_max_apps, new_max_apps, \
                     previous_max_executions, new_max_executions, previous_valid_to, new_valid_to, reason, \
                     approved_by, performed_at) VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11)",
                )
                .bind(&id)
                .bind(license_id)
                .bind(previous_max_apps)
                .bind(new_max_apps)
                .bind(previous_max_executions)
                .bind(new_max_executions)
                .bind(previous_valid_to)
                .bind(new_valid_to)
                .bind(reason)
                .bind(approved_by)
                .bind(now)
                .execute(pool)
                .await?;
            }
        }
        Ok(LicenseUpgrade {
            id,
            license_id: license_id.to_string(),
            previous_max_apps,
            new_max_apps,
            previous_max_executions,
            new_max_executions,
            previous_valid_to,
            new_valid_to,
            reason: reason.to_string(),
            approved_by: approved_by.to_string(),
            performed_at: now,
        })
    }
}

fn map_unique_violation(err: sqlx::Error, field: &str) -> QuotaError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.is_unique_violation() {
            return QuotaError::Conflict(format!("{field} already exists"));
        }
    }
    QuotaError::from(err)
}
