//! Repository tests against an in-memory SQLite pool, one test per CRUD
//! surface. Mirrors the teacher's own `tests/database_tests.rs` shape
//! (helper to stand up an in-memory `Database`, then exercise each
//! operation directly against it) generalized from the license-only
//! table set to the full license/application/job/user/metrics schema.

use chrono::{Duration, Utc};
use quotaguard::db::applications::NewApplication;
use quotaguard::db::licenses::NewLicense;
use quotaguard::db::users::NewUser;
use quotaguard::db::Database;
use quotaguard::models::{HistoryAction, JobStatus, LicenseStatus};

async fn setup() -> Database {
    Database::in_memory_for_tests().await.expect("in-memory db")
}

fn license_draft(tenant_id: &str, now: chrono::DateTime<Utc>) -> NewLicense {
    NewLicense {
        tenant_id: tenant_id.to_string(),
        tenant_name: format!("{tenant_id} co"),
        max_apps: 5,
        max_executions_per_24h: 50,
        valid_from: now,
        valid_to: now + Duration::days(30),
        features: "{}".to_string(),
        contact_name: None,
        contact_email: None,
    }
}

#[tokio::test]
async fn create_and_fetch_license_by_id_and_tenant() {
    let db = setup().await;
    let now = Utc::now();
    let created = db.create_license(license_draft("tenant-db-1", now), "admin", now).await.unwrap();
    assert_eq!(created.status, LicenseStatus::Active);

    let by_id = db.get_license(&created.id).await.unwrap();
    assert_eq!(by_id.tenant_id, "tenant-db-1");

    let by_tenant = db.get_license_by_tenant("tenant-db-1").await.unwrap().unwrap();
    assert_eq!(by_tenant.id, created.id);

    assert!(db.get_license_by_tenant("no-such-tenant").await.unwrap().is_none());
}

#[tokio::test]
async fn duplicate_tenant_id_is_rejected() {
    let db = setup().await;
    let now = Utc::now();
    db.create_license(license_draft("tenant-dup", now), "admin", now).await.unwrap();
    let err = db.create_license(license_draft("tenant-dup", now), "admin", now).await.unwrap_err();
    assert!(matches!(err, quotaguard::errors::QuotaError::Conflict(_)));
}

#[tokio::test]
async fn update_license_persists_status_and_caps() {
    let db = setup().await;
    let now = Utc::now();
    let mut license = db.create_license(license_draft("tenant-db-2", now), "admin", now).await.unwrap();
    license.status = LicenseStatus::Suspended;
    license.max_apps = 99;
    db.update_license(&license, now).await.unwrap();

    let reloaded = db.get_license(&license.id).await.unwrap();
    assert_eq!(reloaded.status, LicenseStatus::Suspended);
    assert_eq!(reloaded.max_apps, 99);
}

#[tokio::test]
async fn license_history_appends_and_lists_newest_first() {
    let db = setup().await;
    let now = Utc::now();
    let license = db.create_license(license_draft("tenant-db-3", now), "admin", now).await.unwrap();

    db.append_license_history(&license.id, HistoryAction::Suspend, "{}", "admin", now + Duration::seconds(1))
        .await
        .unwrap();
    db.append_license_history(&license.id, HistoryAction::Reactivate, "{}", "admin", now + Duration::seconds(2))
        .await
        .unwrap();

    let history = db.list_license_history(&license.id).await.unwrap();
    // Most recent first, plus the `Create` row from `create_license` itself.
    assert_eq!(history.len(), 3);
    assert_eq!(history[0].action, HistoryAction::Reactivate);
    assert_eq!(history[1].action, HistoryAction::Suspend);
    assert_eq!(history[2].action, HistoryAction::Create);
}

#[tokio::test]
async fn list_licenses_filters_by_status_and_paginates() {
    let db = setup().await;
    let now = Utc::now();
    db.create_license(license_draft("tenant-list-a", now), "admin", now).await.unwrap();
    let mut suspended = db.create_license(license_draft("tenant-list-b", now), "admin", now).await.unwrap();
    suspended.status = LicenseStatus::Suspended;
    db.update_license(&suspended, now).await.unwrap();

    let all = db.list_licenses(None, 1, 10).await.unwrap();
    assert_eq!(all.len(), 2);

    let only_suspended = db.list_licenses(Some(LicenseStatus::Suspended), 1, 10).await.unwrap();
    assert_eq!(only_suspended.len(), 1);
    assert_eq!(only_suspended[0].id, suspended.id);
}

#[tokio::test]
async fn application_crud_round_trips() {
    let db = setup().await;
    let now = Utc::now();
    let license = db.create_license(license_draft("tenant-db-4", now), "admin", now).await.unwrap();

    assert!(!db.application_name_taken(&license.id, "worker").await.unwrap());
    let app = db
        .create_application(
            NewApplication {
                license_id: license.id.clone(),
                name: "worker".to_string(),
                description: Some("background worker".to_string()),
                version: Some("1.0.0".to_string()),
                webhook_url: None,
                config: "{}".to_string(),
            },
            "app_testkey123".to_string(),
            now,
        )
        .await
        .unwrap();
    assert!(db.application_name_taken(&license.id, "worker").await.unwrap());

    let fetched = db.get_application(&app.id).await.unwrap();
    assert_eq!(fetched.name, "worker");
    assert!(fetched.is_active);

    assert_eq!(db.count_active_applications(&license.id).await.unwrap(), 1);

    db.set_application_active(&app.id, false, now).await.unwrap();
    assert_eq!(db.count_active_applications(&license.id).await.unwrap(), 0);

    let mut updated = db.get_application(&app.id).await.unwrap();
    updated.description = Some("renamed".to_string());
    db.update_application(&updated, now).await.unwrap();
    assert_eq!(db.get_application(&app.id).await.unwrap().description.as_deref(), Some("renamed"));

    let listed = db.list_applications_for_license(&license.id).await.unwrap();
    assert_eq!(listed.len(), 1);

    db.delete_application(&app.id).await.unwrap();
    assert!(db.list_applications_for_license(&license.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn job_lifecycle_and_execution_history() {
    let db = setup().await;
    let now = Utc::now();
    let license = db.create_license(license_draft("tenant-db-5", now), "admin", now).await.unwrap();
    let app = db
        .create_application(
            NewApplication {
                license_id: license.id.clone(),
                name: "pipeline".to_string(),
                description: None,
                version: None,
                webhook_url: None,
                config: "{}".to_string(),
            },
            "app_anotherkey456".to_string(),
            now,
        )
        .await
        .unwrap();

    let job_id = uuid::Uuid::new_v4();
    let started = db
        .start_job(job_id, &app.id, &license.id, &license.tenant_id, "nightly-run", now)
        .await
        .unwrap();
    assert!(started.is_running());

    let finished = db
        .finish_job(&started.id, JobStatus::Completed, now + Duration::seconds(5), 5.0, None, Some("done".into()), Some(10.0), Some(128.0))
        .await
        .unwrap();
    assert_eq!(finished.status, JobStatus::Completed);
    assert!(!finished.is_running());

    let jobs = db.list_jobs(&license.id, 10).await.unwrap();
    assert_eq!(jobs.len(), 1);

    let executions = db.job_executions_since(&license.id, now - Duration::seconds(1)).await.unwrap();
    assert_eq!(executions.len(), 1);
}

#[tokio::test]
async fn user_create_and_lookup_by_username() {
    let db = setup().await;
    let now = Utc::now();
    let user = db
        .create_user(
            NewUser {
                username: "carol".to_string(),
                email: "carol@example.com".to_string(),
                password_hash: "hashed".to_string(),
                first_name: Some("Carol".to_string()),
                last_name: Some("Danvers".to_string()),
            },
            now,
        )
        .await
        .unwrap();
    assert!(user.is_active);

    let found = db.get_user_by_username("carol").await.unwrap().unwrap();
    assert_eq!(found.id, user.id);
    assert!(db.get_user_by_username("nobody").await.unwrap().is_none());

    let err = db
        .create_user(
            NewUser {
                username: "carol".to_string(),
                email: "carol2@example.com".to_string(),
                password_hash: "hashed".to_string(),
                first_name: None,
                last_name: None,
            },
            now,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, quotaguard::errors::QuotaError::Conflict(_)));
}

#[tokio::test]
async fn metrics_upsert_accumulates_across_finishes() {
    let db = setup().await;
    let now = Utc::now();
    let license = db.create_license(license_draft("tenant-db-6", now), "admin", now).await.unwrap();
    let app = db
        .create_application(
            NewApplication {
                license_id: license.id.clone(),
                name: "metrics-app".to_string(),
                description: None,
                version: None,
                webhook_url: None,
                config: "{}".to_string(),
            },
            "app_metricskey789".to_string(),
            now,
        )
        .await
        .unwrap();

    let today = now.date_naive();
    assert!(db.get_metrics_row(&app.id, today).await.unwrap().is_none());

    let first = db.record_job_finish_metrics(&app.id, today, JobStatus::Completed, Some(4.0)).await.unwrap();
    assert_eq!(first.total_jobs, 1);
    assert_eq!(first.successful_jobs, 1);

    let second = db.record_job_finish_metrics(&app.id, today, JobStatus::Failed, Some(6.0)).await.unwrap();
    assert_eq!(second.total_jobs, 2);
    assert_eq!(second.successful_jobs, 1);
    assert_eq!(second.failed_jobs, 1);
    assert_eq!(second.avg_execution_time, 5.0);
    assert_eq!(second.max_execution_time, 6.0);
    assert_eq!(second.min_execution_time, 4.0);
}
