use super::Database;
use crate::errors::{QuotaError, QuotaResult};
use crate::models::Application;
use chrono::{DateTime, Utc};
use sqlx::query_as;
use uuid::Uuid;

pub struct NewApplication {
    pub license_id: String,
    pub name: String,
    pub description: Option<String>,
    pub version: Option<String>,
    pub webhook_url: Option<String>,
    pub config: String,
}

impl Database {
    pub async fn application_name_taken(&self, license_id: &str, name: &str) -> QuotaResult<bool> {
        let existing = self.get_application_by_name(license_id, name).await?;
        Ok(existing.is_some())
    }

    pub async fn get_application_by_name(&self, license_id: &str, name: &str) -> QuotaResult<Option<Application>> {
        match self {
            Database::Sqlite(pool) => Ok(query_as::<_, Application>(
                "SELECT * FROM applications WHERE license_id = ? AND name = ?",
            )
            .bind(license_id)
            .bind(name)
            .fetch_optional(pool)
            .await?),
            #[cfg(feature = "postgres")]
            Database::Postgres(pool) => Ok(query_as::<_, Application>(
                "SELECT * FROM applications WHERE license_id = $1 AND name = $2",
            )
            .bind(license_id)
            .bind(name)
            .fetch_optional(pool)
            .await?),
        }
    }

    /// §4.6 step 5: insert with a freshly minted, uniqueness-retried
    /// `api_key`.
    pub async fn create_application(
        &self,
        draft: NewApplication,
        api_key: String,
        now: DateTime<Utc>,
    ) -> QuotaResult<Application> {
        let id = Uuid::new_v4().to_string();
        match self {
            Database::Sqlite(pool) => {
                sqlx::query(
                    "INSERT INTO applications (id, license_id, name, description, version, api_key, \
                     webhook_url, is_active, last_activity, config, created_at, updated_at) \
                     VALUES (?,?,?,?,?,?,?,1,NULL,?,?,?)",
                )
                .bind(&id)
                .bind(&draft.license_id)
                .bind(&draft.name)
                .bind(&draft.description)
                .bind(&draft.version)
                .bind(&api_key)
                .bind(&draft.webhook_url)
                .bind(&draft.config)
                .bind(now)
                .bind(now)
                .execute(pool)
                .await
                .map_err(map_conflict)?;
            }
            #[cfg(feature = "postgres")]
            Database::Postgres(pool) => {
                sqlx::query(
                    "INSERT INTO applications (id, license_id, name, description, version, api_key, \
                     webhook_url, is_active, last_activity, config, created_at, updated_at) \
                     VALUES ($1,$2,$3,$4,$5,$6,$7,TRUE,NULL,$8,$9,$10)",
                )
                .bind(&id)
                .bind(&draft.license_id)
                .bind(&draft.name)
                .bind(&draft.description)
                .bind(&draft.version)
                .bind(&api_key)
                .bind(&draft.webhook_url)
                .bind(&draft.config)
                .bind(now)
                .bind(now)
                .execute(pool)
                .await
                .map_err(map_conflict)?;
            }
        }
        self.get_application(&id).await
    }

    pub async fn get_application(&self, id: &str) -> QuotaResult<Application> {
        match self {
            Database::Sqlite(pool) => Ok(query_as::<_, Application>("SELECT * FROM applications WHERE id = ?")
                .bind(id)
                .fetch_one(pool)
                .await?),
            #[cfg(feature = "postgres")]
            Database::Postgres(pool) => Ok(query_as::<_, Application>("SELECT * FROM applications WHERE id = $1")
                .bind(id)
                .fetch_one(pool)
                .await?),
        }
    }

    pub async fn list_applications_for_license(&self, license_id: &str) -> QuotaResult<Vec<Application>> {
        match self {
            Database::Sqlite(pool) => Ok(query_as::<_, Application>(
                "SELECT * FROM applications WHERE license_id = ? ORDER BY created_at DESC",
            )
            .bind(license_id)
            .fetch_all(pool)
            .await?),
            #[cfg(feature = "postgres")]
            Database::Postgres(pool) => Ok(query_as::<_, Application>(
                "SELECT * FROM applications WHERE license_id = $1 ORDER BY created_at DESC",
            )
            .bind(license_id)
            .fetch_all(pool)
            .await?),
        }
    }

    pub async fn count_active_applications(&self, license_id: &str) -> QuotaResult<i64> {
        match self {
            Database::Sqlite(pool) => {
                let (count,): (i64,) = sqlx::query_as(
                    "SELECT COUNT(*) FROM applications WHERE license_id = ? AND is_active = 1",
                )
                .bind(license_id)
                .fetch_one(pool)
                .await?;
                Ok(count)
            }
            #[cfg(feature = "postgres")]
            Database::Postgres(pool) => {
                let (count,): (i64,) = sqlx::query_as(
                    "SELECT COUNT(*) FROM applications WHERE license_id = $1 AND is_active = TRUE",
                )
                .bind(license_id)
                .fetch_one(pool)
                .await?;
                Ok(count)
            }
        }
    }

    /// Whole-row replacement for the mutable fields, mirroring
    /// `update_license`'s approach of taking the already-loaded row and
    /// writing it back rather than a partial `SET` built from an enum of
    /// optional fields.
    pub async fn update_application(&self, app: &Application, now: DateTime<Utc>) -> QuotaResult<()> {
        match self {
            Database::Sqlite(pool) => {
                sqlx::query(
                    "UPDATE applications SET name=?, description=?, version=?, webhook_url=?, config=?, updated_at=? WHERE id=?",
                )
                .bind(&app.name)
                .bind(&app.description)
                .bind(&app.version)
                .bind(&app.webhook_url)
                .bind(&app.config)
                .bind(now)
                .bind(&app.id)
                .execute(pool)
                .await
                .map_err(map_conflict)?;
            }
            #[cfg(feature = "postgres")]
            Database::Postgres(pool) => {
                sqlx::query(
                    "UPDATE applications SET name=$1, description=$2, version=$3, webhook_url=$4, config=$5, updated_at=$6 WHERE id=$7",
                )
                .bind(&app.name)
                .bind(&app.description)
                .bind(&app.version)
                .bind(&app.webhook_url)
                .bind(&app.config)
                .bind(now)
                .bind(&app.id)
                .execute(pool)
                .await
                .map_err(map_conflict)?;
            }
        }
        Ok(())
    }

    pub async fn delete_application(&self, id: &str) -> QuotaResult<()> {
        match self {
            Database::Sqlite(pool) => {
                sqlx::query("DELETE FROM applications WHERE id = ?").bind(id).execute(pool).await?;
            }
            #[cfg(feature = "postgres")]
            Database::Postgres(pool) => {
                sqlx::query("DELETE FROM applications WHERE id = $1").bind(id).execute(pool).await?;
            }
        }
        Ok(())
    }

    pub async fn set_application_active(&self, id: &str, is_active: bool, now: DateTime<Utc>) -> QuotaResult<()> {
        match self {
            Database::Sqlite(pool) => {
                sqlx::query("UPDATE applications SET is_active = ?, updated_at = ? WHERE id = ?")
                    .bind(is_active)
                    .bind(now)
                    .bind(id)
                    .execute(pool)
                    .await?;
            }
            #[cfg(feature = "postgres")]
            Database::Postgres(pool) => {
                sqlx::query("UPDATE applications SET is_active = $1, updated_at = $2 WHERE id = $3")
                    .bind(is_active)
                    .bind(now)
                    .bind(id)
                    .execute(pool)
                    .await?;
            }
        }
        Ok(())
    }

    pub async fn touch_application_activity(&self, id: &str, now: DateTime<Utc>) -> QuotaResult<()> {
        match self {
            Database::Sqlite(pool) => {
                sqlx::query("UPDATE applications SET last_activity = ? WHERE id = ?")
                    .bind(now)
                    .bind(id)
                    .execute(pool)
                    .await?;
            }
            #[cfg(feature = "postgres")]
            Database::Postgres(pool) => {
                sqlx::query("UPDATE applications SET last_activity = $1 WHERE id = $2")
                    .bind(now)
                    .bind(id)
                    .execute(pool)
                    .await?;
            }
        }
        Ok(())
    }
}

fn map_conflict(err: sqlx::Error) -> QuotaError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.is_unique_violation() {
            return QuotaError::Conflict("application name or api_key already exists".into());
        }
    }
    QuotaError::from(err)
}
