use super::Database;
use crate::errors::QuotaResult;
use crate::models::{Job, JobExecution, JobStatus};
use chrono::{DateTime, Utc};
use sqlx::query_as;
use uuid::Uuid;

impl Database {
    /// §4.7 step 5: Job + JobExecution written together. Both inserts use
    /// the same pool without an explicit multi-statement transaction
    /// object since sqlite/postgres here each run on a single connection
    /// pool checkout per call; if the second insert fails the caller is
    /// responsible for rolling back the quota reservation.
    pub async fn start_job(
        &self,
        job_id: Uuid,
        application_id: &str,
        license_id: &str,
        tenant_id: &str,
        name: &str,
        now: DateTime<Utc>,
    ) -> QuotaResult<Job> {
        let job_id_s = job_id.to_string();
        match self {
            Database::Sqlite(pool) => {
                let mut tx = pool.begin().await?;
                sqlx::query(
                    "INSERT INTO jobs (id, application_id, license_id, name, status, started_at, \
                     finished_at, execution_time_s, error_message, result, cpu_usage, memory_usage, metadata) \
                     VALUES (?,?,?,?,?,?,NULL,NULL,NULL,NULL,NULL,NULL,'{}')",
                )
                .bind(&job_id_s)
                .bind(application_id)
                .bind(license_id)
                .bind(name)
                .bind("RUNNING")
                .bind(now)
                .execute(&mut *tx)
                .await?;

                sqlx::query(
                    "INSERT INTO job_executions (id, license_id, job_id, tenant_id, executed_at) VALUES (?,?,?,?,?)",
                )
                .bind(Uuid::new_v4().to_string())
                .bind(license_id)
                .bind(&job_id_s)
                .bind(tenant_id)
                .bind(now)
                .execute(&mut *tx)
                .await?;

                tx.commit().await?;
            }
            #[cfg(feature = "postgres")]
            Database::Postgres(pool) => {
                let mut tx = pool.begin().await?;
                sqlx::query(
                    "INSERT INTO jobs (id, application_id, license_id, name, status, started_at, \
                     finished_at, execution_time_s, error_message, result, cpu_usage, memory_usage, metadata) \
                     VALUES ($1,$2,$3,$4,$5,$6,NULL,NULL,NULL,NULL,NULL,NULL,'{}')",
                )
                .bind(&job_id_s)
                .bind(application_id)
                .bind(license_id)
                .bind(name)
                .bind("RUNNING")
                .bind(now)
                .execute(&mut *tx)
                .await?;

                sqlx::query(
                    "INSERT INTO job_executions (id, license_id, job_id, tenant_id, executed_at) VALUES ($1,$2,$3,$4,$5)",
                )
                .bind(Uuid::new_v4().to_string())
                .bind(license_id)
                .bind(&job_id_s)
                .bind(tenant_id)
                .bind(now)
                .execute(&mut *tx)
                .await?;

                tx.commit().await?;
            }
        }
        self.get_job(&job_id_s).await
    }

    pub async fn get_job(&self, id: &str) -> QuotaResult<Job> {
        match self {
            Database::Sqlite(pool) => Ok(query_as::<_, Job>("SELECT * FROM jobs WHERE id = ?")
                .bind(id)
                .fetch_one(pool)
                .await?),
            #[cfg(feature = "postgres")]
            Database::Postgres(pool) => Ok(query_as::<_, Job>("SELECT * FROM jobs WHERE id = $1")
                .bind(id)
                .fetch_one(pool)
                .await?),
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn finish_job(
        &self,
        id: &str,
        status: JobStatus,
        finished_at: DateTime<Utc>,
        execution_time_s: f64,
        error_message: Option<String>,
        result: Option<String>,
        cpu_usage: Option<f64>,
        memory_usage: Option<f64>,
    ) -> QuotaResult<Job> {
        match self {
            Database::Sqlite(pool) => {
                sqlx::query(
                    "UPDATE jobs SET status=?, finished_at=?, execution_time_s=?, error_message=?, \
                     result=?, cpu_usage=?, memory_usage=? WHERE id=?",
                )
                .bind(status.as_db_str())
                .bind(finished_at)
                .bind(execution_time_s)
                .bind(&error_message)
                .bind(&result)
                .bind(cpu_usage)
                .bind(memory_usage)
                .bind(id)
                .execute(pool)
                .await?;
            }
            #[cfg(feature = "postgres")]
            Database::Postgres(pool) => {
                sqlx::query(
                    "UPDATE jobs SET status=$1, finished_at=$2, execution_time_s=$3, error_message=$4, \
                     result=$5, cpu_usage=$6, memory_usage=$7 WHERE id=$8",
                )
                .bind(status.as_db_str())
                .bind(finished_at)
                .bind(execution_time_s)
                .bind(&error_message)
                .bind(&result)
                .bind(cpu_usage)
                .bind(memory_usage)
                .bind(id)
                .execute(pool)
                .await?;
            }
        }
        self.get_job(id).await
    }

    pub async fn list_jobs(&self, license_id: &str, limit: i64) -> QuotaResult<Vec<Job>> {
        let limit = limit.clamp(1, 1000);
        match self {
            Database::Sqlite(pool) => Ok(query_as::<_, Job>(
                "SELECT * FROM jobs WHERE license_id = ? ORDER BY started_at DESC LIMIT ?",
            )
            .bind(license_id)
            .bind(limit)
            .fetch_all(pool)
            .await?),
            #[cfg(feature = "postgres")]
            Database::Postgres(pool) => Ok(query_as::<_, Job>(
                "SELECT * FROM jobs WHERE license_id = $1 ORDER BY started_at DESC LIMIT $2",
            )
            .bind(license_id)
            .bind(limit)
            .fetch_all(pool)
            .await?),
        }
    }

    pub async fn job_executions_since(&self, license_id: &str, since: DateTime<Utc>) -> QuotaResult<Vec<JobExecution>> {
        match self {
            Database::Sqlite(pool) => Ok(query_as::<_, JobExecution>(
                "SELECT * FROM job_executions WHERE license_id = ? AND executed_at > ? ORDER BY executed_at",
            )
            .bind(license_id)
            .bind(since)
            .fetch_all(pool)
            .await?),
            #[cfg(feature = "postgres")]
            Database::Postgres(pool) => Ok(query_as::<_, JobExecution>(
                "SELECT * FROM job_executions WHERE license_id = $1 AND executed_at > $2 ORDER BY executed_at",
            )
            .bind(license_id)
            .bind(since)
            .fetch_all(pool)
            .await?),
        }
    }
}

impl JobStatus {
    pub fn as_db_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "PENDING",
            JobStatus::Running => "RUNNING",
            JobStatus::Completed => "COMPLETED",
            JobStatus::Failed => "FAILED",
            JobStatus::Cancelled => "CANCELLED",
        }
    }
}
