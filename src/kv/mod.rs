//! Key-value store adapter: sorted-set, counter, and distributed-lock
//! primitives used by the Quota Engine. Two implementations exist —
//! [`redis_store::RedisStore`] for production and [`memory_store::MemoryStore`]
//! for tests — so business logic is written once against the [`KvStore`] trait.

pub mod memory_store;
pub mod redis_store;

use crate::errors::QuotaResult;
use async_trait::async_trait;


/// A held distributed lock. Dropping it does not release it — callers must
/// call [`KvStore::release`] explicitly, mirroring the explicit
/// acquire/release pairing `QuotaService.check_and_record_execution_atomic`
/// uses around `cache.lock(...)` in the system this was modeled on.
#[derive(Debug, Clone)]
pub struct LockToken(pub String);

#[async_trait]
pub trait KvStore: Send + Sync {
    /// `zadd(key, member, score)`.
    async fn zadd(&self, key: &str, member: &str, score: f64) -> QuotaResult<()>;

    /// `zcount(key, lo, hi)`.
    async fn zcount(&self, key: &str, lo: f64, hi: f64) -> QuotaResult<u64>;

    /// `zremrangebyscore(key, lo, hi)`.
    async fn zremrangebyscore(&self, key: &str, lo: f64, hi: f64) -> QuotaResult<u64>;

    /// `zrangebyscore(key, lo, hi) -> [(member, score)]`.
    async fn zrangebyscore(&self, key: &str, lo: f64, hi: f64) -> QuotaResult<Vec<(String, f64)>>;

    /// Sets a key's TTL in seconds.
    async fn expire(&self, key: &str, ttl_secs: i64) -> QuotaResult<()>;

    /// Absent counters read as 0.
    async fn get_counter(&self, key: &str) -> QuotaResult<i64>;
    async fn set_counter(&self, key: &str, value: i64) -> QuotaResult<()>;
    async fn incr(&self, key: &str) -> QuotaResult<i64>;
    async fn decr(&self, key: &str) -> QuotaResult<i64>;
    async fn delete(&self, key: &str) -> QuotaResult<()>;

    /// Exclusive lock, TTL-safeguarded against a crashed holder.
    /// Returns `None` if not acquired within `max_wait_ms`.
    async fn acquire_lock(
        &self,
        lock_key: &str,
        ttl_ms: u64,
        max_wait_ms: u64,
    ) -> QuotaResult<Option<LockToken>>;

    /// Releases a lock previously returned by `acquire_lock`. A no-op if
    /// the token no longer matches the holder (already expired).
    async fn release_lock(&self, lock_key: &str, token: &LockToken) -> QuotaResult<()>;
}

pub fn execution_key(tenant_id: &str) -> String {
    format!("executions:{tenant_id}")
}

pub fn app_count_key(tenant_id: &str) -> String {
    format!("apps:count:{tenant_id}")
}

pub fn lock_key(base_key: &str) -> String {
    format!("lock:{base_key}")
}
