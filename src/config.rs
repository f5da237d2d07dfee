//! Layered configuration: defaults → `config.toml` → `QUOTAGUARD_*` env
//! overrides, validated eagerly at startup. Structure and loading style
//! follow the licensing server's `TalosConfig` almost exactly.

use serde::Deserialize;
use std::env;
use std::sync::OnceLock;

use crate::errors::{QuotaError, QuotaResult};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { host: "0.0.0.0".to_string(), port: 8080 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub backend: String,
    pub url: String,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            backend: "sqlite".to_string(),
            url: "sqlite://quotaguard.db?mode=rwc".to_string(),
            max_connections: 10,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct KvConfig {
    pub redis_url: String,
}

impl Default for KvConfig {
    fn default() -> Self {
        Self { redis_url: "redis://127.0.0.1:6379".to_string() }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// May be `env:VAR_NAME` to indirect through another environment
    /// variable, matching `JwtValidator::from_config`'s secret handling.
    pub jwt_secret: String,
    pub token_expiration_secs: i64,
    /// Shared secret for the admin surface, checked against the
    /// `X-Admin-Token` header. Same env-indirection convention as
    /// `jwt_secret`; unset (empty) disables the admin surface entirely,
    /// the same posture the bootstrap token takes when its env var is
    /// absent.
    pub admin_token: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: "change-me-in-production-please-at-least-32-bytes".to_string(),
            token_expiration_secs: 3600,
            admin_token: String::new(),
        }
    }
}

impl AuthConfig {
    pub fn resolved_secret(&self) -> QuotaResult<String> {
        match self.jwt_secret.strip_prefix("env:") {
            Some(var) => env::var(var).map_err(|_| {
                QuotaError::Config(format!("jwt_secret points at unset environment variable {var}"))
            }),
            None => Ok(self.jwt_secret.clone()),
        }
    }

    pub fn resolved_admin_token(&self) -> QuotaResult<Option<String>> {
        if self.admin_token.is_empty() {
            return Ok(None);
        }
        match self.admin_token.strip_prefix("env:") {
            Some(var) => env::var(var).map(Some).map_err(|_| {
                QuotaError::Config(format!("admin_token points at unset environment variable {var}"))
            }),
            None => Ok(Some(self.admin_token.clone())),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub enabled: bool,
    pub requests_per_second: u64,
    pub burst_size: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self { enabled: true, requests_per_second: 5, burst_size: 10 }
    }
}

/// Defaults applied to a lazily-created derived license (§4.5).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QuotaConfig {
    pub default_max_apps: i64,
    pub default_max_executions_per_24h: i64,
    pub default_license_validity_days: i64,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            default_max_apps: 10,
            default_max_executions_per_24h: 1000,
            default_license_validity_days: 365,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), json: false }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub kv: KvConfig,
    pub auth: AuthConfig,
    pub rate_limit: RateLimitConfig,
    pub quota: QuotaConfig,
    pub logging: LoggingConfig,
}

impl AppConfig {
    pub fn load() -> QuotaResult<Self> {
        let defaults = AppConfig::default();

        let builder = config::Config::builder()
            .set_default("server.host", defaults.server.host)?
            .set_default("server.port", defaults.server.port)?
            .set_default("database.backend", defaults.database.backend)?
            .set_default("database.url", defaults.database.url)?
            .set_default("database.max_connections", defaults.database.max_connections)?
            .set_default("kv.redis_url", defaults.kv.redis_url)?
            .set_default("auth.jwt_secret", defaults.auth.jwt_secret)?
            .set_default("auth.token_expiration_secs", defaults.auth.token_expiration_secs)?
            .set_default("auth.admin_token", defaults.auth.admin_token)?
            .set_default("rate_limit.enabled", defaults.rate_limit.enabled)?
            .set_default("rate_limit.requests_per_second", defaults.rate_limit.requests_per_second)?
            .set_default("rate_limit.burst_size", defaults.rate_limit.burst_size)?
            .set_default("quota.default_max_apps", defaults.quota.default_max_apps)?
            .set_default("quota.default_max_executions_per_24h", defaults.quota.default_max_executions_per_24h)?
            .set_default(
                "quota.default_license_validity_days",
                defaults.quota.default_license_validity_days,
            )?
            .set_default("logging.level", defaults.logging.level)?
            .set_default("logging.json", defaults.logging.json)?
            .add_source(config::File::with_name("config").required(false))
            .set_override_option("server.host", env::var("QUOTAGUARD_SERVER_HOST").ok())?
            .set_override_option("server.port", env::var("QUOTAGUARD_SERVER_PORT").ok())?
            .set_override_option("database.backend", env::var("QUOTAGUARD_DB_BACKEND").ok())?
            .set_override_option("database.url", env::var("QUOTAGUARD_DATABASE_URL").ok())?
            .set_override_option("kv.redis_url", env::var("QUOTAGUARD_REDIS_URL").ok())?
            .set_override_option("auth.jwt_secret", env::var("QUOTAGUARD_JWT_SECRET").ok())?
            .set_override_option("auth.admin_token", env::var("QUOTAGUARD_ADMIN_TOKEN").ok())?
            .set_override_option("rate_limit.enabled", env::var("QUOTAGUARD_RATE_LIMIT_ENABLED").ok())?
            .set_override_option("logging.level", env::var("QUOTAGUARD_LOG_LEVEL").ok())?;

        let raw = builder.build().map_err(|e| QuotaError::Config(e.to_string()))?;
        let cfg: AppConfig = raw.try_deserialize().map_err(|e| QuotaError::Config(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> QuotaResult<()> {
        if self.server.port == 0 {
            return Err(QuotaError::Config("server.port must be nonzero".into()));
        }
        if self.database.max_connections == 0 {
            return Err(QuotaError::Config("database.max_connections must be nonzero".into()));
        }
        if self.auth.jwt_secret.len() < 16 && !self.auth.jwt_secret.starts_with("env:") {
            return Err(QuotaError::Config("auth.jwt_secret is too short".into()));
        }
        if self.quota.default_max_apps <= 0 {
            return Err(QuotaError::Config("quota.default_max_apps must be positive".into()));
        }
        if self.quota.default_max_executions_per_24h <= 0 {
            return Err(QuotaError::Config(
                "quota.default_max_executions_per_24h must be positive".into(),
            ));
        }
        if self.quota.default_license_validity_days <= 0 {
            return Err(QuotaError::Config(
                "quota.default_license_validity_days must be positive".into(),
            ));
        }
        Ok(())
    }
}

static CONFIG: OnceLock<AppConfig> = OnceLock::new();

pub fn init_config(cfg: AppConfig) {
    let _ = CONFIG.set(cfg);
}

pub fn get_config() -> &'static AppConfig {
    CONFIG.get().expect("config not initialized; call init_config() at startup")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        AppConfig::default().validate().unwrap();
    }

    #[test]
    fn rejects_zero_port() {
        let mut cfg = AppConfig::default();
        cfg.server.port = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_short_secret() {
        let mut cfg = AppConfig::default();
        cfg.auth.jwt_secret = "short".to_string();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_nonpositive_quota_defaults() {
        let mut cfg = AppConfig::default();
        cfg.quota.default_max_apps = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn resolved_secret_follows_env_indirection() {
        std::env::set_var("QUOTAGUARD_TEST_SECRET", "indirected-secret-value-1234567890");
        let mut cfg = AuthConfig::default();
        cfg.jwt_secret = "env:QUOTAGUARD_TEST_SECRET".to_string();
        assert_eq!(cfg.resolved_secret().unwrap(), "indirected-secret-value-1234567890");
    }
}
