//! Metrics Aggregator: per-(application, day) counters updated on job
//! finish. The actual upsert arithmetic lives in `db::metrics` next to the
//! storage it touches; this is the thin component boundary the Admission
//! Pipeline calls into, matching the separate-component billing in the
//! system overview.

use crate::db::Database;
use crate::errors::QuotaResult;
use crate::models::{ApplicationMetrics, JobStatus};
use chrono::{DateTime, Utc};
use std::sync::Arc;

pub struct MetricsAggregator {
    db: Arc<Database>,
}

impl MetricsAggregator {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub async fn record_finish(
        &self,
        application_id: &str,
        finished_at: DateTime<Utc>,
        status: JobStatus,
        execution_time_s: Option<f64>,
    ) -> QuotaResult<ApplicationMetrics> {
        self.db
            .record_job_finish_metrics(application_id, finished_at.date_naive(), status, execution_time_s)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::applications::NewApplication;
    use crate::db::licenses::NewLicense;

    async fn application() -> (Arc<Database>, String) {
        let db = Arc::new(Database::in_memory_for_tests().await.unwrap());
        let now = Utc::now();
        let license = db
            .create_license(
                NewLicense {
                    tenant_id: "tenant-metrics".into(),
                    tenant_name: "Metrics Co".into(),
                    max_apps: 5,
                    max_executions_per_24h: 1000,
                    valid_from: now,
                    valid_to: now + chrono::Duration::days(30),
                    features: "{}".into(),
                    contact_name: None,
                    contact_email: None,
                },
                "admin",
                now,
            )
            .await
            .unwrap();
        let app = db
            .create_application(
                NewApplication {
                    license_id: license.id,
                    name: "svc".into(),
                    description: None,
                    version: None,
                    webhook_url: None,
                    config: "{}".into(),
                },
                "app_test_key".into(),
                now,
            )
            .await
            .unwrap();
        (db, app.id)
    }

    /// §4.9: two concurrent finishes on the same (application, date) must
    /// not lose an increment — the upsert's own pre-update column values
    /// are what each writer adds to, not a value read earlier.
    #[tokio::test]
    async fn concurrent_finishes_keep_exact_counts() {
        let (db, application_id) = application().await;
        let aggregator = Arc::new(MetricsAggregator::new(db));
        let finished_at = Utc::now();

        let mut handles = Vec::new();
        for i in 0..20 {
            let aggregator = aggregator.clone();
            let application_id = application_id.clone();
            handles.push(tokio::spawn(async move {
                aggregator
                    .record_finish(&application_id, finished_at, JobStatus::Completed, Some(1.0 + i as f64))
                    .await
                    .unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let row = aggregator.db.get_metrics_row(&application_id, finished_at.date_naive()).await.unwrap().unwrap();
        assert_eq!(row.total_jobs, 20);
        assert_eq!(row.successful_jobs, 20);
        assert_eq!(row.failed_jobs, 0);
    }
}
