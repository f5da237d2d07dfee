//! Shared application state for handlers.
//!
//! Everything here is constructor-injected in `main.rs`: no global
//! singletons for business logic, only the `config` crate's `OnceLock`
//! for static configuration.

use std::sync::Arc;

use crate::admission::AdmissionPipeline;
use crate::clock::Clock;
use crate::config::QuotaConfig;
use crate::db::Database;
use crate::identity::IdentityResolver;
use crate::license_service::LicenseService;
use crate::metrics::MetricsAggregator;
use crate::quota::QuotaEngine;
use crate::tokens::TokenCodec;

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Database>,
    pub quota: Arc<QuotaEngine>,
    pub license_service: Arc<LicenseService>,
    pub identity: Arc<IdentityResolver>,
    pub admission: Arc<AdmissionPipeline>,
    pub metrics: Arc<MetricsAggregator>,
    pub tokens: Arc<TokenCodec>,
    pub clock: Arc<dyn Clock>,
    pub quota_defaults: QuotaConfig,
    /// `None` disables the admin surface entirely, same posture as an
    /// unset bootstrap token.
    pub admin_token: Option<String>,
}
