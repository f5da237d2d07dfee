//! Quota Engine: the sliding-window execution counter and application
//! counter, plus the atomic check-and-reserve primitives that make both
//! safe under concurrent admission requests.

use crate::clock::Clock;
use crate::errors::{QuotaError, QuotaResult};
use crate::kv::{app_count_key, execution_key, lock_key, KvStore};
use std::sync::Arc;
use uuid::Uuid;

/// Default 24h sliding window, in seconds.
pub const EXECUTION_WINDOW_SECS: i64 = 86_400;
/// Key TTL past the window so idle tenants age out of the store.
const EXECUTION_KEY_TTL_SECS: i64 = EXECUTION_WINDOW_SECS + 3_600;
const LOCK_TTL_MS: u64 = 5_000;
const LOCK_MAX_WAIT_MS: u64 = 5_000;

/// Uniform `(success, current, message)` return shape for both
/// check-and-reserve primitives. `current` on success is the
/// post-reservation count; on failure it is the observed count that
/// triggered rejection.
#[derive(Debug, Clone, PartialEq)]
pub struct QuotaOutcome {
    pub allowed: bool,
    pub current: u32,
    pub message: Option<String>,
    /// The score the reservation was written under, if one was made.
    /// `rollback_execution` needs this to undo the exact write.
    pub reserved_at: Option<f64>,
}

impl QuotaOutcome {
    fn allow(current: u32, reserved_at: f64) -> Self {
        Self { allowed: true, current, message: None, reserved_at: Some(reserved_at) }
    }

    fn allow_without_reservation(current: u32) -> Self {
        Self { allowed: true, current, message: None, reserved_at: None }
    }

    fn deny(current: u32, message: impl Into<String>) -> Self {
        Self { allowed: false, current, message: Some(message.into()), reserved_at: None }
    }
}

pub struct QuotaEngine {
    kv: Arc<dyn KvStore>,
    clock: Arc<dyn Clock>,
}

impl QuotaEngine {
    pub fn new(kv: Arc<dyn KvStore>, clock: Arc<dyn Clock>) -> Self {
        Self { kv, clock }
    }

    fn now_ts(&self) -> f64 {
        self.clock.now_utc().timestamp_millis() as f64 / 1000.0
    }

    /// Removes entries whose score is at or before `now - window`.
    async fn cleanup_old_executions(&self, tenant_id: &str, now: f64) -> QuotaResult<()> {
        let key = execution_key(tenant_id);
        self.kv
            .zremrangebyscore(&key, f64::MIN, now - EXECUTION_WINDOW_SECS as f64)
            .await?;
        Ok(())
    }

    /// `count(tenant, window_s=86400)`.
    pub async fn execution_count(&self, tenant_id: &str) -> QuotaResult<u32> {
        let now = self.now_ts();
        self.cleanup_old_executions(tenant_id, now).await?;
        let key = execution_key(tenant_id);
        let count = self.kv.zcount(&key, now - EXECUTION_WINDOW_SECS as f64, now).await?;
        Ok(count as u32)
    }

    pub async fn execution_history(&self, tenant_id: &str) -> QuotaResult<Vec<(String, f64)>> {
        let now = self.now_ts();
        let key = execution_key(tenant_id);
        self.kv.zrangebyscore(&key, now - EXECUTION_WINDOW_SECS as f64, now).await
    }

    /// §4.3.1: the five-step atomic check-and-reserve for the sliding
    /// window. `job_id` becomes part of the sorted-set member so the same
    /// execution can be rolled back by removing that exact member.
    pub async fn check_and_record_execution_atomic(
        &self,
        tenant_id: &str,
        job_id: &Uuid,
        max_executions: i64,
    ) -> QuotaResult<QuotaOutcome> {
        let key = execution_key(tenant_id);
        let lock_name = lock_key(&key);

        let token = self
            .kv
            .acquire_lock(&lock_name, LOCK_TTL_MS, LOCK_MAX_WAIT_MS)
            .await?;
        let Some(token) = token else {
            return Ok(QuotaOutcome::deny(0, "system busy, try again"));
        };

        let result = async {
            let now = self.now_ts();
            self.cleanup_old_executions(tenant_id, now).await?;

            let current = self.kv.zcount(&key, now - EXECUTION_WINDOW_SECS as f64, now).await? as u32;

            if current as i64 >= max_executions {
                return Ok(QuotaOutcome::deny(
                    current,
                    format!("quota exceeded: {current}/{max_executions}"),
                ));
            }

            let member = format!("{job_id}:{now}");
            self.kv.zadd(&key, &member, now).await?;
            self.kv.expire(&key, EXECUTION_KEY_TTL_SECS).await?;
            Ok(QuotaOutcome::allow(current + 1, now))
        }
        .await;

        self.kv.release_lock(&lock_name, &token).await?;
        result
    }

    /// Removes the exact entry written by a prior reservation, keyed by
    /// the score it was recorded under (the KV primitives only expose
    /// range removal, not exact-member removal, so the range is narrowed
    /// to a single instant).
    pub async fn rollback_execution(&self, tenant_id: &str, recorded_at: f64) -> QuotaResult<()> {
        let key = execution_key(tenant_id);
        self.kv.zremrangebyscore(&key, recorded_at, recorded_at).await?;
        Ok(())
    }

    /// §4.3.2: the app-count atomic check-and-increment.
    pub async fn check_and_increment_app_count_atomic(
        &self,
        tenant_id: &str,
        max_apps: i64,
    ) -> QuotaResult<QuotaOutcome> {
        let key = app_count_key(tenant_id);
        let lock_name = lock_key(&key);

        let token = self
            .kv
            .acquire_lock(&lock_name, LOCK_TTL_MS, LOCK_MAX_WAIT_MS)
            .await?;
        let Some(token) = token else {
            return Ok(QuotaOutcome::deny(0, "system busy, try again"));
        };

        let result = async {
            let current = self.kv.get_counter(&key).await?;
            if current >= max_apps {
                return Ok(QuotaOutcome::deny(
                    current as u32,
                    format!("max apps reached {current}/{max_apps}"),
                ));
            }
            let updated = if current == 0 {
                self.kv.set_counter(&key, 1).await?;
                1
            } else {
                self.kv.incr(&key).await?
            };
            Ok(QuotaOutcome::allow_without_reservation(updated as u32))
        }
        .await;

        self.kv.release_lock(&lock_name, &token).await?;
        result
    }

    /// Used both for explicit deactivation and for rollback after a
    /// failed admission.
    pub async fn decrement_app_count(&self, tenant_id: &str) -> QuotaResult<()> {
        let key = app_count_key(tenant_id);
        let current = self.kv.get_counter(&key).await?;
        if current > 0 {
            self.kv.decr(&key).await?;
        }
        Ok(())
    }

    pub async fn app_count(&self, tenant_id: &str) -> QuotaResult<u32> {
        Ok(self.kv.get_counter(&app_count_key(tenant_id)).await?.max(0) as u32)
    }

    pub async fn set_app_count(&self, tenant_id: &str, value: i64) -> QuotaResult<()> {
        self.kv.set_counter(&app_count_key(tenant_id), value).await
    }

    /// Called on revocation: clears both counters for the tenant.
    pub async fn reset_tenant_data(&self, tenant_id: &str) -> QuotaResult<()> {
        self.kv.delete(&execution_key(tenant_id)).await?;
        self.kv.delete(&app_count_key(tenant_id)).await?;
        Ok(())
    }

    /// Best-effort reseed from an authoritative count (active application
    /// rows, or in-window JobExecution rows) on startup or key loss. Never
    /// required for correctness: subsequent admissions are still gated by
    /// `max` either way.
    pub async fn reseed_app_count(&self, tenant_id: &str, authoritative_count: i64) -> QuotaResult<()> {
        self.set_app_count(tenant_id, authoritative_count).await
    }

    pub async fn quota_status(
        &self,
        tenant_id: &str,
        max_apps: i64,
        max_executions: i64,
    ) -> QuotaResult<QuotaStatus> {
        Ok(QuotaStatus {
            max_apps,
            current_apps: self.app_count(tenant_id).await?,
            max_executions_per_24h: max_executions,
            current_executions: self.execution_count(tenant_id).await?,
        })
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct QuotaStatus {
    pub max_apps: i64,
    pub current_apps: u32,
    pub max_executions_per_24h: i64,
    pub current_executions: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, FixedClock};
    use crate::kv::memory_store::MemoryStore;
    use chrono::Utc;

    fn engine(clock: Arc<dyn Clock>) -> QuotaEngine {
        QuotaEngine::new(Arc::new(MemoryStore::new()), clock)
    }

    #[tokio::test]
    async fn execution_cap_allows_exactly_max() {
        let clock = Arc::new(FixedClock::new(Utc::now()));
        let engine = engine(clock.clone());
        let mut allowed = 0;
        for _ in 0..5 {
            let job_id = Uuid::new_v4();
            let outcome = engine
                .check_and_record_execution_atomic("tenant-a", &job_id, 3)
                .await
                .unwrap();
            if outcome.allowed {
                allowed += 1;
            }
        }
        assert_eq!(allowed, 3);
    }

    #[tokio::test]
    async fn sliding_window_recovers_after_24h() {
        let start = Utc::now();
        let clock = Arc::new(FixedClock::new(start));
        let engine = engine(clock.clone());

        for _ in 0..3 {
            let job_id = Uuid::new_v4();
            let outcome = engine
                .check_and_record_execution_atomic("tenant-b", &job_id, 3)
                .await
                .unwrap();
            assert!(outcome.allowed);
        }

        let blocked = engine
            .check_and_record_execution_atomic("tenant-b", &Uuid::new_v4(), 3)
            .await
            .unwrap();
        assert!(!blocked.allowed);

        clock.advance(chrono::Duration::seconds(EXECUTION_WINDOW_SECS + 1));

        let recovered = engine
            .check_and_record_execution_atomic("tenant-b", &Uuid::new_v4(), 3)
            .await
            .unwrap();
        assert!(recovered.allowed);
    }

    #[tokio::test]
    async fn app_count_settles_at_max() {
        let clock = Arc::new(FixedClock::new(Utc::now()));
        let engine = engine(clock);
        let mut allowed = 0;
        for _ in 0..10 {
            let outcome = engine
                .check_and_increment_app_count_atomic("tenant-c", 4)
                .await
                .unwrap();
            if outcome.allowed {
                allowed += 1;
            }
        }
        assert_eq!(allowed, 4);
        assert_eq!(engine.app_count("tenant-c").await.unwrap(), 4);
    }

    #[tokio::test]
    async fn rollback_restores_pre_call_count() {
        let clock = Arc::new(FixedClock::new(Utc::now()));
        let engine = engine(clock);
        let job_id = Uuid::new_v4();
        let before = engine.execution_count("tenant-d").await.unwrap();

        let outcome = engine
            .check_and_record_execution_atomic("tenant-d", &job_id, 10)
            .await
            .unwrap();
        assert!(outcome.allowed);
        assert_eq!(engine.execution_count("tenant-d").await.unwrap(), before + 1);

        engine
            .rollback_execution("tenant-d", outcome.reserved_at.unwrap())
            .await
            .unwrap();
        assert_eq!(engine.execution_count("tenant-d").await.unwrap(), before);
    }

    #[tokio::test]
    async fn revocation_clears_both_counters() {
        let clock = Arc::new(FixedClock::new(Utc::now()));
        let engine = engine(clock);
        engine.check_and_increment_app_count_atomic("tenant-e", 5).await.unwrap();
        engine
            .check_and_record_execution_atomic("tenant-e", &Uuid::new_v4(), 5)
            .await
            .unwrap();
        engine.reset_tenant_data("tenant-e").await.unwrap();
        assert_eq!(engine.app_count("tenant-e").await.unwrap(), 0);
        assert_eq!(engine.execution_count("tenant-e").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn execution_cap_holds_under_concurrent_admission() {
        let clock = Arc::new(FixedClock::new(Utc::now()));
        let engine = Arc::new(engine(clock));
        let mut handles = Vec::new();
        for _ in 0..20 {
            let engine = engine.clone();
            handles.push(tokio::spawn(async move {
                let job_id = Uuid::new_v4();
                engine.check_and_record_execution_atomic("tenant-f", &job_id, 5).await.unwrap().allowed
            }));
        }
        let mut allowed = 0;
        for handle in handles {
            if handle.await.unwrap() {
                allowed += 1;
            }
        }
        assert_eq!(allowed, 5);
    }

    #[tokio::test]
    async fn app_count_holds_under_concurrent_registration() {
        let clock = Arc::new(FixedClock::new(Utc::now()));
        let engine = Arc::new(engine(clock));
        let mut handles = Vec::new();
        for _ in 0..20 {
            let engine = engine.clone();
            handles.push(tokio::spawn(async move {
                engine.check_and_increment_app_count_atomic("tenant-g", 7).await.unwrap().allowed
            }));
        }
        let mut allowed = 0;
        for handle in handles {
            if handle.await.unwrap() {
                allowed += 1;
            }
        }
        assert_eq!(allowed, 7);
        assert_eq!(engine.app_count("tenant-g").await.unwrap(), 7);
    }
}
