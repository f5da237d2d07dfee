//! Durable store adapter: CRUD over the entities in the data model, with
//! transactional multi-row updates where the spec requires them (job
//! start writes a Job and a JobExecution row together).
//!
//! Grounded in the dual-backend `Database` enum of the licensing server
//! this crate grew from: one method per operation, matched over
//! `Self::SQLite`/`Self::Postgres`, sqlx `?` placeholders for sqlite and
//! `$N` placeholders for postgres.

pub mod applications;
pub mod jobs;
pub mod licenses;
pub mod metrics;
pub mod users;

use crate::config::DatabaseConfig;
use crate::errors::{QuotaError, QuotaResult};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use tracing::info;

#[cfg(feature = "postgres")]
use sqlx::PgPool;

/// Dual-backend connection pool. `sqlite` is on by default for local
/// development and tests; `postgres` is additive for production
/// deployments, following the teacher crate's backend split exactly.
pub enum Database {
    Sqlite(SqlitePool),
    #[cfg(feature = "postgres")]
    Postgres(PgPool),
}

impl Database {
    pub async fn connect(config: &DatabaseConfig) -> QuotaResult<Self> {
        match config.backend.as_str() {
            "sqlite" => {
                info!(url = %config.url, "connecting to sqlite");
                let pool = SqlitePoolOptions::new()
                    .max_connections(config.max_connections)
                    .connect(&config.url)
                    .await
                    .map_err(|e| QuotaError::Database(format!("sqlite connect failed: {e}")))?;
                let db = Database::Sqlite(pool);
                db.run_migrations().await?;
                Ok(db)
            }
            #[cfg(feature = "postgres")]
            "postgres" => {
                info!(url = %config.url, "connecting to postgres");
                let pool = sqlx::postgres::PgPoolOptions::new()
                    .max_connections(config.max_connections)
                    .connect(&config.url)
                    .await
                    .map_err(|e| QuotaError::Database(format!("postgres connect failed: {e}")))?;
                let db = Database::Postgres(pool);
                db.run_migrations().await?;
                Ok(db)
            }
            other => Err(QuotaError::Config(format!("unsupported database backend: {other}"))),
        }
    }

    /// In-memory sqlite pool for tests, mirroring the teacher's
    /// `tests/database_tests.rs::setup_in_memory_db` helper.
    pub async fn in_memory_for_tests() -> QuotaResult<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(|e| QuotaError::Database(e.to_string()))?;
        let db = Database::Sqlite(pool);
        db.run_migrations().await?;
        Ok(db)
    }

    async fn run_migrations(&self) -> QuotaResult<()> {
        match self {
            Database::Sqlite(pool) => {
                sqlx::query(SCHEMA_SQLITE)
                    .execute(pool)
                    .await
                    .map_err(|e| QuotaError::Database(format!("migration failed: {e}")))?;
            }
            #[cfg(feature = "postgres")]
            Database::Postgres(pool) => {
                sqlx::query(SCHEMA_POSTGRES)
                    .execute(pool)
                    .await
                    .map_err(|e| QuotaError::Database(format!("migration failed: {e}")))?;
            }
        }
        Ok(())
    }
}

const SCHEMA_SQLITE: &str = r#"
CREATE TABLE IF NOT EXISTS licenses (
    id TEXT PRIMARY KEY,
    tenant_id TEXT UNIQUE NOT NULL,
    tenant_name TEXT NOT NULL,
    max_apps INTEGER NOT NULL,
    max_executions_per_24h INTEGER NOT NULL,
    valid_from TEXT NOT NULL,
    valid_to TEXT NOT NULL,
    status TEXT NOT NULL,
    features TEXT NOT NULL DEFAULT '{}',
    contact_name TEXT,
    contact_email TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS license_tokens (
    id TEXT PRIMARY KEY,
    license_id TEXT NOT NULL REFERENCES licenses(id),
    token_hash TEXT NOT NULL,
    issued_at TEXT NOT NULL,
    last_used_at TEXT
);

CREATE TABLE IF NOT EXISTS license_history (
    id TEXT PRIMARY KEY,
    license_id TEXT NOT NULL REFERENCES licenses(id),
    action TEXT NOT NULL,
    details TEXT NOT NULL,
    performed_by TEXT NOT NULL,
    performed_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS license_upgrades (
    id TEXT PRIMARY KEY,
    license_id TEXT NOT NULL REFERENCES licenses(id),
    previous_max_apps INTEGER NOT NULL,
    new_max_apps INTEGER NOT NULL,
    previous_max_executions INTEGER NOT NULL,
    new_max_executions INTEGER NOT NULL,
    previous_valid_to TEXT NOT NULL,
    new_valid_to TEXT NOT NULL,
    reason TEXT NOT NULL,
    approved_by TEXT NOT NULL,
    performed_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS applications (
    id TEXT PRIMARY KEY,
    license_id TEXT NOT NULL REFERENCES licenses(id),
    name TEXT NOT NULL,
    description TEXT,
    version TEXT,
    api_key TEXT UNIQUE NOT NULL,
    webhook_url TEXT,
    is_active INTEGER NOT NULL DEFAULT 1,
    last_activity TEXT,
    config TEXT NOT NULL DEFAULT '{}',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    UNIQUE(license_id, name)
);

CREATE TABLE IF NOT EXISTS jobs (
    id TEXT PRIMARY KEY,
    application_id TEXT NOT NULL REFERENCES applications(id),
    license_id TEXT NOT NULL REFERENCES licenses(id),
    name TEXT NOT NULL,
    status TEXT NOT NULL,
    started_at TEXT NOT NULL,
    finished_at TEXT,
    execution_time_s REAL,
    error_message TEXT,
    result TEXT,
    cpu_usage REAL,
    memory_usage REAL,
    metadata TEXT NOT NULL DEFAULT '{}'
);

CREATE TABLE IF NOT EXISTS job_executions (
    id TEXT PRIMARY KEY,
    license_id TEXT NOT NULL REFERENCES licenses(id),
    job_id TEXT NOT NULL REFERENCES jobs(id),
    tenant_id TEXT NOT NULL,
    executed_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS application_metrics (
    id TEXT PRIMARY KEY,
    application_id TEXT NOT NULL REFERENCES applications(id),
    date TEXT NOT NULL,
    hour INTEGER,
    total_jobs INTEGER NOT NULL DEFAULT 0,
    successful_jobs INTEGER NOT NULL DEFAULT 0,
    failed_jobs INTEGER NOT NULL DEFAULT 0,
    avg_execution_time REAL NOT NULL DEFAULT 0,
    max_execution_time REAL NOT NULL DEFAULT 0,
    min_execution_time REAL NOT NULL DEFAULT 0,
    UNIQUE(application_id, date, hour)
);

CREATE TABLE IF NOT EXISTS user_profile (
    id TEXT PRIMARY KEY,
    username TEXT UNIQUE NOT NULL,
    email TEXT NOT NULL,
    password_hash TEXT NOT NULL,
    first_name TEXT,
    last_name TEXT,
    is_active INTEGER NOT NULL DEFAULT 1,
    date_joined TEXT NOT NULL
);
"#;

#[cfg(feature = "postgres")]
const SCHEMA_POSTGRES: &str = r#"
CREATE TABLE IF NOT EXISTS licenses (
    id TEXT PRIMARY KEY,
    tenant_id TEXT UNIQUE NOT NULL,
    tenant_name TEXT NOT NULL,
    max_apps BIGINT NOT NULL,
    max_executions_per_24h BIGINT NOT NULL,
    valid_from TIMESTAMPTZ NOT NULL,
    valid_to TIMESTAMPTZ NOT NULL,
    status TEXT NOT NULL,
    features TEXT NOT NULL DEFAULT '{}',
    contact_name TEXT,
    contact_email TEXT,
    created_at TIMESTAMPTZ NOT NULL,
    updated_at TIMESTAMPTZ NOT NULL
);

CREATE TABLE IF NOT EXISTS license_tokens (
    id TEXT PRIMARY KEY,
    license_id TEXT NOT NULL REFERENCES licenses(id),
    token_hash TEXT NOT NULL,
    issued_at TIMESTAMPTZ NOT NULL,
    last_used_at TIMESTAMPTZ
);

CREATE TABLE IF NOT EXISTS license_history (
    id TEXT PRIMARY KEY,
    license_id TEXT NOT NULL REFERENCES licenses(id),
    action TEXT NOT NULL,
    details TEXT NOT NULL,
    performed_by TEXT NOT NULL,
    performed_at TIMESTAMPTZ NOT NULL
);

CREATE TABLE IF NOT EXISTS license_upgrades (
    id TEXT PRIMARY KEY,
    license_id TEXT NOT NULL REFERENCES licenses(id),
    previous_max_apps BIGINT NOT NULL,
    new_max_apps BIGINT NOT NULL,
    previous_max_executions BIGINT NOT NULL,
    new_max_executions BIGINT NOT NULL,
    previous_valid_to TIMESTAMPTZ NOT NULL,
    new_valid_to TIMESTAMPTZ NOT NULL,
    reason TEXT NOT NULL,
    approved_by TEXT NOT NULL,
    performed_at TIMESTAMPTZ NOT NULL
);

CREATE TABLE IF NOT EXISTS applications (
    id TEXT PRIMARY KEY,
    license_id TEXT NOT NULL REFERENCES licenses(id),
    name TEXT NOT NULL,
    description TEXT,
    version TEXT,
    api_key TEXT UNIQUE NOT NULL,
    webhook_url TEXT,
    is_active BOOLEAN NOT NULL DEFAULT TRUE,
    last_activity TIMESTAMPTZ,
    config TEXT NOT NULL DEFAULT '{}',
    created_at TIMESTAMPTZ NOT NULL,
    updated_at TIMESTAMPTZ NOT NULL,
    UNIQUE(license_id, name)
);

CREATE TABLE IF NOT EXISTS jobs (
    id TEXT PRIMARY KEY,
    application_id TEXT NOT NULL REFERENCES applications(id),
    license_id TEXT NOT NULL REFERENCES licenses(id),
    name TEXT NOT NULL,
    status TEXT NOT NULL,
    started_at TIMESTAMPTZ NOT NULL,
    finished_at TIMESTAMPTZ,
    execution_time_s DOUBLE PRECISION,
    error_message TEXT,
    result TEXT,
    cpu_usage DOUBLE PRECISION,
    memory_usage DOUBLE PRECISION,
    metadata TEXT NOT NULL DEFAULT '{}'
);

CREATE TABLE IF NOT EXISTS job_executions (
    id TEXT PRIMARY KEY,
    license_id TEXT NOT NULL REFERENCES licenses(id),
    job_id TEXT NOT NULL REFERENCES jobs(id),
    tenant_id TEXT NOT NULL,
    executed_at TIMESTAMPTZ NOT NULL
);

CREATE TABLE IF NOT EXISTS application_metrics (
    id TEXT PRIMARY KEY,
    application_id TEXT NOT NULL REFERENCES applications(id),
    date TEXT NOT NULL,
    hour INTEGER,
    total_jobs BIGINT NOT NULL DEFAULT 0,
    successful_jobs BIGINT NOT NULL DEFAULT 0,
    failed_jobs BIGINT NOT NULL DEFAULT 0,
    avg_execution_time DOUBLE PRECISION NOT NULL DEFAULT 0,
    max_execution_time DOUBLE PRECISION NOT NULL DEFAULT 0,
    min_execution_time DOUBLE PRECISION NOT NULL DEFAULT 0,
    UNIQUE(application_id, date, hour)
);

CREATE TABLE IF NOT EXISTS user_profile (
    id TEXT PRIMARY KEY,
    username TEXT UNIQUE NOT NULL,
    email TEXT NOT NULL,
    password_hash TEXT NOT NULL,
    first_name TEXT,
    last_name TEXT,
    is_active BOOLEAN NOT NULL DEFAULT TRUE,
    date_joined TIMESTAMPTZ NOT NULL
);
"#;
