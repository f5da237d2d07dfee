//! Binary entrypoint: load configuration, wire up the database, KV
//! store, and services, then serve the router.
//!
//! Grounded in the licensing server's own `main.rs` bootstrap shape
//! (tracing init, config load, pool connect, bind-and-serve) but backed
//! by `AppConfig`/`AppState` instead of the teacher's ad hoc globals.

use std::net::SocketAddr;
use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use quotaguard::admission::AdmissionPipeline;
use quotaguard::clock::SystemClock;
use quotaguard::config::AppConfig;
use quotaguard::db::Database;
use quotaguard::identity::IdentityResolver;
use quotaguard::kv::redis_store::RedisStore;
use quotaguard::kv::KvStore;
use quotaguard::license_service::LicenseService;
use quotaguard::metrics::MetricsAggregator;
use quotaguard::quota::QuotaEngine;
use quotaguard::server::routes::build_router;
use quotaguard::server::state::AppState;
use quotaguard::tokens::TokenCodec;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load()?;

    let filter = EnvFilter::try_new(&config.logging.level).unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);
    if config.logging.json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    quotaguard::config::init_config(config.clone());

    let db = Arc::new(Database::connect(&config.database).await?);
    let kv: Arc<dyn KvStore> = Arc::new(RedisStore::connect(&config.kv.redis_url).await?);
    let clock: Arc<dyn quotaguard::clock::Clock> = Arc::new(SystemClock);

    let quota = Arc::new(QuotaEngine::new(kv.clone(), clock.clone()));
    let license_service = Arc::new(LicenseService::new(db.clone(), quota.clone(), clock.clone()));
    let identity =
        Arc::new(IdentityResolver::new(db.clone(), quota.clone(), clock.clone(), config.quota.clone()));
    let metrics = Arc::new(MetricsAggregator::new(db.clone()));
    let admission = Arc::new(AdmissionPipeline::new(db.clone(), quota.clone(), metrics.clone(), clock.clone()));
    let tokens = Arc::new(TokenCodec::new(&config.auth.resolved_secret()?, config.auth.token_expiration_secs));
    let admin_token = config.auth.resolved_admin_token()?;

    let state = AppState {
        db,
        quota,
        license_service,
        identity,
        admission,
        metrics,
        tokens,
        clock,
        quota_defaults: config.quota.clone(),
        admin_token,
    };

    let router = build_router(state, &config.rate_limit);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    tracing::info!(%addr, "starting quotaguard server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router.into_make_service_with_connect_info::<SocketAddr>()).await?;
    Ok(())
}
