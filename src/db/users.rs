use super::Database;
use crate::errors::{QuotaError, QuotaResult};
use crate::models::User;
use chrono::{DateTime, Utc};
use sqlx::query_as;
use uuid::Uuid;

pub struct NewUser {
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

impl Database {
    pub async fn create_user(&self, draft: NewUser, now: DateTime<Utc>) -> QuotaResult<User> {
        let id = Uuid::new_v4().to_string();
        match self {
            Database::Sqlite(pool) => {
                sqlx::query(
                    "INSERT INTO user_profile (id, username, email, password_hash, first_name, last_name, \
                     is_active, date_joined) VALUES (?,?,?,?,?,?,1,?)",
                )
                .bind(&id)
                .bind(&draft.username)
                .bind(&draft.email)
                .bind(&draft.password_hash)
                .bind(&draft.first_name)
                .bind(&draft.last_name)
                .bind(now)
                .execute(pool)
                .await
                .map_err(map_conflict)?;
            }
            #[cfg(feature = "postgres")]
            Database::Postgres(pool) => {
                sqlx::query(
                    "INSERT INTO user_profile (id, username, email, password_hash, first_name, last_name, \
                     is_active, date_joined) VALUES ($1,$2,$3,$4,$5,$6,TRUE,$7)",
                )
                .bind(&id)
                .bind(&draft.username)
                .bind(&draft.email)
                .bind(&draft.password_hash)
                .bind(&draft.first_name)
                .bind(&draft.last_name)
                .bind(now)
                .execute(pool)
                .await
                .map_err(map_conflict)?;
            }
        }
        self.get_user(&id).await
    }

    pub async fn get_user(&self, id: &str) -> QuotaResult<User> {
        match self {
            Database::Sqlite(pool) => Ok(query_as::<_, User>("SELECT * FROM user_profile WHERE id = ?")
                .bind(id)
                .fetch_one(pool)
                .await?),
            #[cfg(feature = "postgres")]
            Database::Postgres(pool) => Ok(query_as::<_, User>("SELECT * FROM user_profile WHERE id = $1")
                .bind(id)
                .fetch_one(pool)
                .await?),
        }
    }

    pub async fn get_user_by_username(&self, username: &str) -> QuotaResult<Option<User>> {
        match self {
            Database::Sqlite(pool) => Ok(query_as::<_, User>("SELECT * FROM user_profile WHERE username = ?")
                .bind(username)
                .fetch_optional(pool)
                .await?),
            #[cfg(feature = "postgres")]
            Database::Postgres(pool) => Ok(
                query_as::<_, User>("SELECT * FROM user_profile WHERE username = $1")
                    .bind(username)
                    .fetch_optional(pool)
                    .await?,
            ),
        }
    }
}

fn map_conflict(err: sqlx::Error) -> QuotaError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.is_unique_violation() {
            return QuotaError::Conflict("username already exists".into());
        }
    }
    QuotaError::from(err)
}
