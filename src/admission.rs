//! Admission Pipeline: the orchestrating handlers for register
//! application / start job / finish job. Combines the Identity Resolver,
//! License Service, Quota Engine, and Durable Store; implements rollback
//! on partial failure (§4.8, P4).

use crate::clock::Clock;
use crate::db::applications::NewApplication;
use crate::db::Database;
use crate::errors::{QuotaError, QuotaResult};
use crate::metrics::MetricsAggregator;
use crate::models::{Application, Job, JobStatus, License};
use crate::quota::QuotaEngine;
use rand::Rng;
use std::sync::Arc;
use uuid::Uuid;

const API_KEY_CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
const API_KEY_LEN: usize = 32;
const API_KEY_CREATE_RETRIES: u32 = 5;

pub struct AdmissionPipeline {
    db: Arc<Database>,
    quota: Arc<QuotaEngine>,
    metrics: Arc<MetricsAggregator>,
    clock: Arc<dyn Clock>,
}

pub struct RegisterApplicationRequest {
    pub name: String,
    pub description: Option<String>,
    pub version: Option<String>,
    pub webhook_url: Option<String>,
    pub config: String,
}

pub struct StartJobRequest {
    pub application_id: String,
    pub name: String,
}

pub struct FinishJobRequest {
    pub job_id: String,
    pub status: JobStatus,
    pub result: Option<String>,
    pub error_message: Option<String>,
    pub cpu_usage: Option<f64>,
    pub memory_usage: Option<f64>,
}

fn generate_api_key() -> String {
    let mut rng = rand::rng();
    let body: String = (0..API_KEY_LEN)
        .map(|_| {
            let idx = rng.random_range(0..API_KEY_CHARSET.len());
            API_KEY_CHARSET[idx] as char
        })
        .collect();
    format!("app_{body}")
}

impl AdmissionPipeline {
    pub fn new(db: Arc<Database>, quota: Arc<QuotaEngine>, metrics: Arc<MetricsAggregator>, clock: Arc<dyn Clock>) -> Self {
        Self { db, quota, metrics, clock }
    }

    /// §4.6.
    pub async fn register_application(
        &self,
        license: &License,
        req: RegisterApplicationRequest,
    ) -> QuotaResult<Application> {
        if req.name.is_empty() || req.name.len() > 255 {
            return Err(QuotaError::Validation("name is required and must be <= 255 chars".into()));
        }
        if self.db.application_name_taken(&license.id, &req.name).await? {
            return Err(QuotaError::Conflict(format!("application named '{}' already exists", req.name)));
        }

        let outcome = self
            .quota
            .check_and_increment_app_count_atomic(&license.tenant_id, license.max_apps)
            .await?;
        if !outcome.allowed {
            return Err(QuotaError::AppQuotaExceeded {
                current: outcome.current,
                limit: license.max_apps as u32,
            });
        }

        let now = self.clock.now_utc();
        let mut last_err = None;
        for _ in 0..API_KEY_CREATE_RETRIES {
            let api_key = generate_api_key();
            let draft = NewApplication {
                license_id: license.id.clone(),
                name: req.name.clone(),
                description: req.description.clone(),
                version: req.version.clone(),
                webhook_url: req.webhook_url.clone(),
                config: req.config.clone(),
            };
            match self.db.create_application(draft, api_key, now).await {
                Ok(app) => return Ok(app),
                Err(QuotaError::Conflict(msg)) => last_err = Some(QuotaError::Conflict(msg)),
                Err(other) => {
                    self.quota.decrement_app_count(&license.tenant_id).await?;
                    return Err(other);
                }
            }
        }
        self.quota.decrement_app_count(&license.tenant_id).await?;
        Err(last_err.unwrap_or_else(|| QuotaError::Conflict("api_key collision retries exhausted".into())))
    }

    /// §4.7.
    pub async fn start_job(&self, license: &License, req: StartJobRequest) -> QuotaResult<Job> {
        let application = self.db.get_application(&req.application_id).await?;
        if application.license_id != license.id {
            return Err(QuotaError::Forbidden("application belongs to another license".into()));
        }
        if !application.is_active {
            return Err(QuotaError::Forbidden("application is inactive".into()));
        }

        let job_id = Uuid::new_v4();
        let outcome = self
            .quota
            .check_and_record_execution_atomic(&license.tenant_id, &job_id, license.max_executions_per_24h)
            .await?;
        if !outcome.allowed {
            return Err(QuotaError::ExecutionQuotaExceeded {
                current: outcome.current,
                limit: license.max_executions_per_24h as u32,
            });
        }

        let now = self.clock.now_utc();
        let job = match self
            .db
            .start_job(job_id, &application.id, &license.id, &license.tenant_id, &req.name, now)
            .await
        {
            Ok(job) => job,
            Err(err) => {
                if let Some(reserved_at) = outcome.reserved_at {
                    self.quota.rollback_execution(&license.tenant_id, reserved_at).await?;
                }
                return Err(err);
            }
        };

        // Best-effort; a failure here does not unwind the job that was
        // already admitted and persisted.
        let _ = self.db.touch_application_activity(&application.id, now).await;

        Ok(job)
    }

    /// §4.8.
    pub async fn finish_job(&self, license: &License, req: FinishJobRequest) -> QuotaResult<Job> {
        let job = self.db.get_job(&req.job_id).await?;
        if job.license_id != license.id {
            return Err(QuotaError::Forbidden("job belongs to another license".into()));
        }
        if !job.is_running() {
            return Err(QuotaError::Validation(format!(
                "job is not running (current status: {:?})",
                job.status
            )));
        }
        if let Some(cpu) = req.cpu_usage {
            if !(0.0..=100.0).contains(&cpu) {
                return Err(QuotaError::Validation("cpu_usage must be within [0, 100]".into()));
            }
        }
        if let Some(mem) = req.memory_usage {
            if mem < 0.0 {
                return Err(QuotaError::Validation("memory_usage must be >= 0".into()));
            }
        }

        let finished_at = self.clock.now_utc();
        let execution_time_s = (finished_at - job.started_at).num_milliseconds() as f64 / 1000.0;

        let updated = self
            .db
            .finish_job(
                &job.id,
                req.status,
                finished_at,
                execution_time_s,
                req.error_message,
                req.result,
                req.cpu_usage,
                req.memory_usage,
            )
            .await?;

        self.metrics
            .record_finish(&job.application_id, finished_at, req.status, Some(execution_time_s))
            .await?;

        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::db::licenses::NewLicense;
    use crate::kv::memory_store::MemoryStore;
    use crate::metrics::MetricsAggregator;
    use chrono::{Duration, Utc};

    async fn pipeline() -> (Arc<AdmissionPipeline>, Arc<Database>, License) {
        let db = Arc::new(Database::in_memory_for_tests().await.unwrap());
        let clock: Arc<dyn Clock> = Arc::new(FixedClock::new(Utc::now()));
        let quota = Arc::new(QuotaEngine::new(Arc::new(MemoryStore::new()), clock.clone()));
        let metrics = Arc::new(MetricsAggregator::new(db.clone()));
        let pipeline = Arc::new(AdmissionPipeline::new(db.clone(), quota, metrics, clock.clone()));

        let now = clock.now_utc();
        let license = db
            .create_license(
                NewLicense {
                    tenant_id: "tenant-admission".into(),
                    tenant_name: "Admission Co".into(),
                    max_apps: 5,
                    max_executions_per_24h: 5,
                    valid_from: now,
                    valid_to: now + Duration::days(30),
                    features: "{}".into(),
                    contact_name: None,
                    contact_email: None,
                },
                "admin",
                now,
            )
            .await
            .unwrap();
        (pipeline, db, license)
    }

    fn register(name: &str) -> RegisterApplicationRequest {
        RegisterApplicationRequest {
            name: name.to_string(),
            description: None,
            version: None,
            webhook_url: None,
            config: "{}".to_string(),
        }
    }

    #[tokio::test]
    async fn register_application_then_start_and_finish_job() {
        let (pipeline, _db, license) = pipeline().await;
        let app = pipeline.register_application(&license, register("svc")).await.unwrap();
        let job = pipeline
            .start_job(&license, StartJobRequest { application_id: app.id.clone(), name: "run-1".into() })
            .await
            .unwrap();
        assert_eq!(job.status, JobStatus::Running);

        let finished = pipeline
            .finish_job(
                &license,
                FinishJobRequest {
                    job_id: job.id,
                    status: JobStatus::Completed,
                    result: Some("ok".into()),
                    error_message: None,
                    cpu_usage: Some(12.5),
                    memory_usage: Some(64.0),
                },
            )
            .await
            .unwrap();
        assert_eq!(finished.status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn start_job_rejects_application_owned_by_another_license() {
        let (pipeline, db, license) = pipeline().await;
        let app = pipeline.register_application(&license, register("svc")).await.unwrap();

        let other = db
            .create_license(
                NewLicense {
                    tenant_id: "tenant-intruder".into(),
                    tenant_name: "Intruder Inc".into(),
                    max_apps: 5,
                    max_executions_per_24h: 5,
                    valid_from: license.valid_from,
                    valid_to: license.valid_to,
                    features: "{}".into(),
                    contact_name: None,
                    contact_email: None,
                },
                "admin",
                license.valid_from,
            )
            .await
            .unwrap();

        let err = pipeline
            .start_job(&other, StartJobRequest { application_id: app.id, name: "run-1".into() })
            .await
            .unwrap_err();
        assert!(matches!(err, QuotaError::Forbidden(_)));
    }

    /// P4: a lost name-collision race must leave the application counter
    /// exactly where it started, not incremented for the loser.
    #[tokio::test]
    async fn concurrent_duplicate_name_registration_rolls_back_app_count() {
        let (pipeline, _db, license) = pipeline().await;
        let license = Arc::new(license);

        let a = { let (p, l) = (pipeline.clone(), license.clone()); tokio::spawn(async move { p.register_application(&l, register("dup")).await }) };
        let b = { let (p, l) = (pipeline.clone(), license.clone()); tokio::spawn(async move { p.register_application(&l, register("dup")).await }) };

        let (ra, rb) = (a.await.unwrap(), b.await.unwrap());
        let successes = [&ra, &rb].iter().filter(|r| r.is_ok()).count();
        assert_eq!(successes, 1, "exactly one of the two duplicate-name registrations should succeed");

        assert_eq!(pipeline.quota.app_count(&license.tenant_id).await.unwrap(), 1);
    }

    /// Seed scenario 5: a store failure after a successful quota
    /// reservation must leave the execution counter at its pre-call
    /// value. Simulated by closing the pool out from under `start_job`
    /// after the application is already registered.
    #[tokio::test]
    async fn store_failure_after_reservation_rolls_back_execution_count() {
        let (pipeline, db, license) = pipeline().await;
        let app = pipeline.register_application(&license, register("svc")).await.unwrap();
        let before = pipeline.quota.execution_count(&license.tenant_id).await.unwrap();

        match &*db {
            Database::Sqlite(pool) => pool.close().await,
            #[cfg(feature = "postgres")]
            Database::Postgres(pool) => pool.close().await,
        }

        let err = pipeline
            .start_job(&license, StartJobRequest { application_id: app.id, name: "run-1".into() })
            .await
            .unwrap_err();
        assert!(matches!(err, QuotaError::Database(_)));
        assert_eq!(pipeline.quota.execution_count(&license.tenant_id).await.unwrap(), before);
    }
}
