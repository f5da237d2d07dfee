//! Rate limiting middleware for unauthenticated endpoints.
//!
//! Applied to `/auth/login` and `/auth/register`: the only endpoints
//! that take no bearer token, and so the only ones worth protecting
//! against brute force.

use governor::middleware::NoOpMiddleware;
use std::sync::Arc;
use tower_governor::governor::GovernorConfigBuilder;

pub use tower_governor::key_extractor::SmartIpKeyExtractor;
pub use tower_governor::GovernorLayer;

use crate::config::RateLimitConfig;

/// Builds a per-IP governor layer from `requests_per_second`/`burst_size`.
///
/// As with the licensing server this is modeled on, the caller must
/// construct the router with `.into_make_service_with_connect_info::<SocketAddr>()`
/// for `SmartIpKeyExtractor` to see real client addresses.
pub fn create_rate_limiter(config: &RateLimitConfig) -> GovernorLayer<SmartIpKeyExtractor, NoOpMiddleware> {
    let governor_config = GovernorConfigBuilder::default()
        .per_second(config.requests_per_second)
        .burst_size(config.burst_size)
        .key_extractor(SmartIpKeyExtractor)
        .finish()
        .expect("failed to build governor config");

    GovernorLayer { config: Arc::new(governor_config) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_rate_limiter_from_defaults() {
        let config = RateLimitConfig::default();
        let _layer = create_rate_limiter(&config);
    }
}
