use super::Database;
use crate::errors::QuotaResult;
use crate::models::{ApplicationMetrics, JobStatus};
use chrono::NaiveDate;
use sqlx::query_as;
use uuid::Uuid;

impl Database {
    pub async fn get_metrics_row(&self, application_id: &str, date: NaiveDate) -> QuotaResult<Option<ApplicationMetrics>> {
        match self {
            Database::Sqlite(pool) => Ok(query_as::<_, ApplicationMetrics>(
                "SELECT * FROM application_metrics WHERE application_id = ? AND date = ? AND hour IS NULL",
            )
            .bind(application_id)
            .bind(date.to_string())
            .fetch_optional(pool)
            .await?),
            #[cfg(feature = "postgres")]
            Database::Postgres(pool) => Ok(query_as::<_, ApplicationMetrics>(
                "SELECT * FROM application_metrics WHERE application_id = $1 AND date = $2 AND hour IS NULL",
            )
            .bind(application_id)
            .bind(date.to_string())
            .fetch_optional(pool)
            .await?),
        }
    }

    /// §4.9: upserts the `(application, today)` row. The whole read-modify-write
    /// happens inside the `ON CONFLICT DO UPDATE` clause itself — the update
    /// expressions reference the row's own pre-update column values directly,
    /// so two concurrent finishes each resolve against the database's own
    /// atomic read of the row rather than a value read earlier in application
    /// code, keeping the counts exact under concurrency.
    pub async fn record_job_finish_metrics(
        &self,
        application_id: &str,
        date: NaiveDate,
        status: JobStatus,
        execution_time_s: Option<f64>,
    ) -> QuotaResult<ApplicationMetrics> {
        let successful: i64 = if status == JobStatus::Completed { 1 } else { 0 };
        let failed: i64 = if status == JobStatus::Failed { 1 } else { 0 };

        match self {
            Database::Sqlite(pool) => match execution_time_s {
                Some(t) => {
                    sqlx::query(
                        "INSERT INTO application_metrics (id, application_id, date, hour, total_jobs, successful_jobs, \
                         failed_jobs, avg_execution_time, max_execution_time, min_execution_time) \
                         VALUES (?,?,?,NULL,1,?,?,?,?,?) \
                         ON CONFLICT(application_id, date, hour) DO UPDATE SET \
                         total_jobs = application_metrics.total_jobs + 1, \
                         successful_jobs = application_metrics.successful_jobs + excluded.successful_jobs, \
                         failed_jobs = application_metrics.failed_jobs + excluded.failed_jobs, \
                         avg_execution_time = (application_metrics.avg_execution_time * application_metrics.total_jobs \
                             + excluded.avg_execution_time) / (application_metrics.total_jobs + 1), \
                         max_execution_time = max(application_metrics.max_execution_time, excluded.max_execution_time), \
                         min_execution_time = CASE WHEN application_metrics.min_execution_time = 0.0 \
                             THEN excluded.min_execution_time \
                             ELSE min(application_metrics.min_execution_time, excluded.min_execution_time) END",
                    )
                    .bind(Uuid::new_v4().to_string())
                    .bind(application_id)
                    .bind(date.to_string())
                    .bind(successful)
                    .bind(failed)
                    .bind(t)
                    .bind(t)
                    .bind(t)
                    .execute(pool)
                    .await?;
                }
                None => {
                    sqlx::query(
                        "INSERT INTO application_metrics (id, application_id, date, hour, total_jobs, successful_jobs, \
                         failed_jobs, avg_execution_time, max_execution_time, min_execution_time) \
                         VALUES (?,?,?,NULL,1,?,?,0.0,0.0,0.0) \
                         ON CONFLICT(application_id, date, hour) DO UPDATE SET \
                         total_jobs = application_metrics.total_jobs + 1, \
                         successful_jobs = application_metrics.successful_jobs + excluded.successful_jobs, \
                         failed_jobs = application_metrics.failed_jobs + excluded.failed_jobs",
                    )
                    .bind(Uuid::new_v4().to_string())
                    .bind(application_id)
                    .bind(date.to_string())
                    .bind(successful)
                    .bind(failed)
                    .execute(pool)
                    .await?;
                }
            },
            #[cfg(feature = "postgres")]
            Database::Postgres(pool) => match execution_time_s {
                Some(t) => {
                    sqlx::query(
                        "INSERT INTO application_metrics (id, application_id, date, hour, total_jobs, successful_jobs, \
                         failed_jobs, avg_execution_time, max_execution_time, min_execution_time) \
                         VALUES ($1,$2,$3,NULL,1,$4,$5,$6,$7,$8) \
                         ON CONFLICT(application_id, date, hour) DO UPDATE SET \
                         total_jobs = application_metrics.total_jobs + 1, \
                         successful_jobs = application_metrics.successful_jobs + excluded.successful_jobs, \
                         failed_jobs = application_metrics.failed_jobs + excluded.failed_jobs, \
                         avg_execution_time = (application_metrics.avg_execution_time * application_metrics.total_jobs \
                             + excluded.avg_execution_time) / (application_metrics.total_jobs + 1), \
                         max_execution_time = GREATEST(application_metrics.max_execution_time, excluded.max_execution_time), \
                         min_execution_time = CASE WHEN application_metrics.min_execution_time = 0.0 \
                             THEN excluded.min_execution_time \
                             ELSE LEAST(application_metrics.min_execution_time, excluded.min_execution_time) END",
                    )
                    .bind(Uuid::new_v4().to_string())
                    .bind(application_id)
                    .bind(date.to_string())
                    .bind(successful)
                    .bind(failed)
                    .bind(t)
                    .bind(t)
                    .bind(t)
                    .execute(pool)
                    .await?;
                }
                None => {
                    sqlx::query(
                        "INSERT INTO application_metrics (id, application_id, date, hour, total_jobs, successful_jobs, \
                         failed_jobs, avg_execution_time, max_execution_time, min_execution_time) \
                         VALUES ($1,$2,$3,NULL,1,$4,$5,0.0,0.0,0.0) \
                         ON CONFLICT(application_id, date, hour) DO UPDATE SET \
                         total_jobs = application_metrics.total_jobs + 1, \
                         successful_jobs = application_metrics.successful_jobs + excluded.successful_jobs, \
                         failed_jobs = application_metrics.failed_jobs + excluded.failed_jobs",
                    )
                    .bind(Uuid::new_v4().to_string())
                    .bind(application_id)
                    .bind(date.to_string())
                    .bind(successful)
                    .bind(failed)
                    .execute(pool)
                    .await?;
                }
            },
        }
        self.get_metrics_row(application_id, date)
            .await?
            .ok_or_else(|| crate::errors::QuotaError::Internal("metrics row missing after upsert".into()))
    }
}
