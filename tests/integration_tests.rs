//! End-to-end HTTP tests: spin up a real server on an ephemeral port
//! backed by an in-memory SQLite database and in-memory KV store, then
//! drive it with `reqwest::Client`. Mirrors the teacher's own
//! `spawn_test_server` + `reqwest::Client` integration style, generalized
//! from the license-activation surface to the quota/admission surface.

use std::sync::Arc;

use chrono::{Duration, Utc};
use quotaguard::admission::AdmissionPipeline;
use quotaguard::clock::{Clock, FixedClock};
use quotaguard::config::{QuotaConfig, RateLimitConfig};
use quotaguard::db::licenses::NewLicense;
use quotaguard::db::Database;
use quotaguard::identity::IdentityResolver;
use quotaguard::kv::memory_store::MemoryStore;
use quotaguard::kv::KvStore;
use quotaguard::license_service::LicenseService;
use quotaguard::metrics::MetricsAggregator;
use quotaguard::quota::QuotaEngine;
use quotaguard::server::routes::build_router;
use quotaguard::server::state::AppState;
use quotaguard::tokens::TokenCodec;
use serde_json::{json, Value};
use tokio::net::TcpListener;

struct TestServer {
    base_url: String,
    state: AppState,
    clock: FixedClock,
}

async fn spawn_server() -> TestServer {
    let db = Arc::new(Database::in_memory_for_tests().await.expect("in-memory db"));
    let kv: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
    let fixed_clock = FixedClock::new(Utc::now());
    let clock: Arc<dyn Clock> = Arc::new(fixed_clock.clone());

    let quota = Arc::new(QuotaEngine::new(kv, clock.clone()));
    let license_service = Arc::new(LicenseService::new(db.clone(), quota.clone(), clock.clone()));
    let identity =
        Arc::new(IdentityResolver::new(db.clone(), quota.clone(), clock.clone(), QuotaConfig::default()));
    let metrics = Arc::new(MetricsAggregator::new(db.clone()));
    let admission =
        Arc::new(AdmissionPipeline::new(db.clone(), quota.clone(), metrics.clone(), clock.clone()));
    let tokens = Arc::new(TokenCodec::new("test-secret-at-least-32-bytes-long", 3600));

    let state = AppState {
        db,
        quota,
        license_service,
        identity,
        admission,
        metrics,
        tokens,
        clock,
        quota_defaults: QuotaConfig::default(),
        admin_token: Some("admin-test-secret".to_string()),
    };

    // Rate limiting is disabled in tests: many seed scenarios fire several
    // requests back-to-back from the same loopback address on purpose.
    let rate_limit = RateLimitConfig { enabled: false, ..RateLimitConfig::default() };
    let router = build_router(state.clone(), &rate_limit);

    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind ephemeral port");
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router.into_make_service()).await.expect("server failed");
    });

    TestServer { base_url: format!("http://{addr}"), state, clock: fixed_clock }
}

/// Creates a license with the given caps and returns a signed license
/// token for it, bypassing the `/auth/register` derived-license defaults
/// so tests can exercise small, deterministic caps.
async fn license_token(state: &AppState, tenant_id: &str, max_apps: i64, max_executions: i64) -> String {
    let now = state.clock.now_utc();
    let draft = NewLicense {
        tenant_id: tenant_id.to_string(),
        tenant_name: format!("{tenant_id} inc"),
        max_apps,
        max_executions_per_24h: max_executions,
        valid_from: now,
        valid_to: now + Duration::days(30),
        features: "{}".to_string(),
        contact_name: None,
        contact_email: None,
    };
    let license = state.license_service.create(draft, "test-harness").await.expect("create license");
    state.tokens.sign_license(&license, now).expect("sign license token")
}

fn bearer(token: &str) -> String {
    format!("Bearer {token}")
}

#[tokio::test]
async fn seed_scenario_register_then_start_then_finish() {
    let server = spawn_server().await;
    let token = license_token(&server.state, "tenant-happy-path", 10, 100).await;
    let client = reqwest::Client::new();

    let register: Value = client
        .post(format!("{}/apps/register", server.base_url))
        .header("Authorization", bearer(&token))
        .json(&json!({"name": "A"}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(register["api_key"].as_str().unwrap().starts_with("app_"));
    let application_id = register["id"].as_str().unwrap().to_string();

    let start_resp = client
        .post(format!("{}/jobs/start", server.base_url))
        .header("Authorization", bearer(&token))
        .json(&json!({"application_id": application_id, "name": "j1"}))
        .send()
        .await
        .unwrap();
    assert_eq!(start_resp.status(), 201);
    let job: Value = start_resp.json().await.unwrap();
    assert_eq!(job["status"], "RUNNING");
    let job_id = job["id"].as_str().unwrap().to_string();

    let finish: Value = client
        .post(format!("{}/jobs/finish", server.base_url))
        .header("Authorization", bearer(&token))
        .json(&json!({"job_id": job_id, "status": "COMPLETED"}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(finish["status"], "COMPLETED");
    assert!(finish["execution_time_s"].as_f64().unwrap() >= 0.0);
}

#[tokio::test]
async fn seed_scenario_app_quota_settles_at_max() {
    let server = spawn_server().await;
    let token = license_token(&server.state, "tenant-app-quota", 2, 100).await;
    let client = reqwest::Client::new();

    let mut statuses = Vec::new();
    for name in ["a1", "a2", "a3"] {
        let resp = client
            .post(format!("{}/apps/register", server.base_url))
            .header("Authorization", bearer(&token))
            .json(&json!({"name": name}))
            .send()
            .await
            .unwrap();
        statuses.push(resp.status().as_u16());
        if resp.status() == 403 {
            let body: Value = resp.json().await.unwrap();
            assert_eq!(body["max_apps"], 2);
            assert_eq!(body["current_count"], 2);
        }
    }
    assert_eq!(statuses, vec![201, 201, 403]);
}

#[tokio::test]
async fn seed_scenario_execution_quota_then_sliding_recovery() {
    let server = spawn_server().await;
    let token = license_token(&server.state, "tenant-exec-quota", 10, 3).await;
    let client = reqwest::Client::new();

    let register: Value = client
        .post(format!("{}/apps/register", server.base_url))
        .header("Authorization", bearer(&token))
        .json(&json!({"name": "A"}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let application_id = register["id"].as_str().unwrap().to_string();

    let mut statuses = Vec::new();
    for i in 0..4 {
        let resp = client
            .post(format!("{}/jobs/start", server.base_url))
            .header("Authorization", bearer(&token))
            .json(&json!({"application_id": application_id, "name": format!("j{i}")}))
            .send()
            .await
            .unwrap();
        statuses.push(resp.status().as_u16());
    }
    assert_eq!(statuses, vec![201, 201, 201, 429]);

    // Advance the injected clock past the 24h sliding window; the next
    // start must succeed again (P2).
    server.clock.advance(Duration::hours(24) + Duration::seconds(1));

    let resp = client
        .post(format!("{}/jobs/start", server.base_url))
        .header("Authorization", bearer(&token))
        .json(&json!({"application_id": application_id, "name": "j-recovered"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);
}

#[tokio::test]
async fn seed_scenario_revoked_license_rejected() {
    let server = spawn_server().await;
    let token = license_token(&server.state, "tenant-revoked", 10, 10).await;
    let license = server.state.db.get_license_by_tenant("tenant-revoked").await.unwrap().unwrap();
    server.state.license_service.revoke(&license.id, "fraud", "test-harness").await.unwrap();

    let client = reqwest::Client::new();
    let resp = client
        .post(format!("{}/jobs/start", server.base_url))
        .header("Authorization", bearer(&token))
        .json(&json!({"application_id": "whatever", "name": "j1"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);
    let body: Value = resp.json().await.unwrap();
    assert!(body["error"]["message"].as_str().unwrap().contains("revoked"));

    let history = server.state.db.list_license_history(&license.id).await.unwrap();
    assert!(history.iter().any(|h| h.action == quotaguard::models::HistoryAction::Revoke));
}

#[tokio::test]
async fn ownership_denies_access_to_another_tenants_application() {
    let server = spawn_server().await;
    let token_a = license_token(&server.state, "tenant-owner", 10, 10).await;
    let token_b = license_token(&server.state, "tenant-intruder", 10, 10).await;
    let client = reqwest::Client::new();

    let register: Value = client
        .post(format!("{}/apps/register", server.base_url))
        .header("Authorization", bearer(&token_a))
        .json(&json!({"name": "private-app"}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let application_id = register["id"].as_str().unwrap().to_string();

    let resp = client
        .get(format!("{}/applications/{}/", server.base_url, application_id))
        .header("Authorization", bearer(&token_b))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 403);
}

#[tokio::test]
#[cfg(feature = "admin-api")]
async fn admin_batch_create_licenses_mints_distinct_tenants() {
    let server = spawn_server().await;
    let client = reqwest::Client::new();
    let now = server.clock.now_utc();

    let resp = client
        .post(format!("{}/admin/licenses/batch", server.base_url))
        .header("X-Admin-Token", "admin-test-secret")
        .json(&json!({
            "count": 3,
            "tenant_id_prefix": "batch-co",
            "tenant_name": "Batch Co",
            "max_apps": 5,
            "max_executions_per_24h": 100,
            "valid_from": now,
            "valid_to": now + Duration::days(30),
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);

    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["created"], 3);
    let licenses = body["licenses"].as_array().unwrap();
    assert_eq!(licenses.len(), 3);
    let tenant_ids: std::collections::HashSet<_> =
        licenses.iter().map(|l| l["tenant_id"].as_str().unwrap().to_string()).collect();
    assert_eq!(tenant_ids.len(), 3, "each batch-created license must get a distinct tenant_id");
}

#[tokio::test]
#[cfg(feature = "admin-api")]
async fn admin_batch_create_licenses_rejects_zero_count() {
    let server = spawn_server().await;
    let client = reqwest::Client::new();
    let now = server.clock.now_utc();

    let resp = client
        .post(format!("{}/admin/licenses/batch", server.base_url))
        .header("X-Admin-Token", "admin-test-secret")
        .json(&json!({
            "count": 0,
            "tenant_id_prefix": "batch-empty",
            "tenant_name": "Batch Empty",
            "max_apps": 5,
            "max_executions_per_24h": 100,
            "valid_from": now,
            "valid_to": now + Duration::days(30),
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
}

#[tokio::test]
async fn health_endpoint_reports_connected_database() {
    let server = spawn_server().await;
    let client = reqwest::Client::new();
    let resp = client.get(format!("{}/health/", server.base_url)).send().await.unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["database"]["db_type"], "sqlite");
}
