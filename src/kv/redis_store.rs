//! Redis-backed implementation of [`super::KvStore`].
//!
//! Grounded in the connection-management and error-wrapping style of
//! `RateLimiter` in the api-gateway rate limiter of a larger services
//! workspace in the retrieval pack: open a client once, pull a fresh
//! multiplexed connection per call, map every `redis::RedisError` through
//! `?` into the crate error type.

use super::{KvStore, LockToken};
use crate::errors::{QuotaError, QuotaResult};
use async_trait::async_trait;
use redis::AsyncCommands;
use redis::Client as RedisClient;
use std::time::Duration;
use uuid::Uuid;

#[derive(Clone)]
pub struct RedisStore {
    client: RedisClient,
}

impl RedisStore {
    pub async fn connect(redis_url: &str) -> QuotaResult<Self> {
        let client = RedisClient::open(redis_url)
            .map_err(|e| QuotaError::Kv(format!("failed to create redis client: {e}")))?;

        let mut conn = client
            .get_multiplexed_tokio_connection()
            .await
            .map_err(|e| QuotaError::Kv(format!("failed to connect to redis: {e}")))?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;

        Ok(Self { client })
    }

    async fn conn(&self) -> QuotaResult<redis::aio::MultiplexedConnection> {
        self.client
            .get_multiplexed_tokio_connection()
            .await
            .map_err(|e| QuotaError::Kv(format!("failed to get redis connection: {e}")))
    }
}

/// Lua script for lock release: only delete the key if the value still
/// matches the token we were handed, so a lock we no longer hold (expired
/// and re-acquired by someone else) is never torn down from under them.
const RELEASE_LOCK_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end
"#;

#[async_trait]
impl KvStore for RedisStore {
    async fn zadd(&self, key: &str, member: &str, score: f64) -> QuotaResult<()> {
        let mut conn = self.conn().await?;
        conn.zadd::<_, _, _, ()>(key, member, score).await?;
        Ok(())
    }

    async fn zcount(&self, key: &str, lo: f64, hi: f64) -> QuotaResult<u64> {
        let mut conn = self.conn().await?;
        let count: u64 = conn.zcount(key, lo, hi).await?;
        Ok(count)
    }

    async fn zremrangebyscore(&self, key: &str, lo: f64, hi: f64) -> QuotaResult<u64> {
        let mut conn = self.conn().await?;
        let removed: u64 = conn.zrembyscore(key, lo, hi).await?;
        Ok(removed)
    }

    async fn zrangebyscore(&self, key: &str, lo: f64, hi: f64) -> QuotaResult<Vec<(String, f64)>> {
        let mut conn = self.conn().await?;
        let pairs: Vec<(String, f64)> = conn.zrangebyscore_withscores(key, lo, hi).await?;
        Ok(pairs)
    }

    async fn expire(&self, key: &str, ttl_secs: i64) -> QuotaResult<()> {
        let mut conn = self.conn().await?;
        conn.expire::<_, ()>(key, ttl_secs).await?;
        Ok(())
    }

    async fn get_counter(&self, key: &str) -> QuotaResult<i64> {
        let mut conn = self.conn().await?;
        let value: Option<i64> = conn.get(key).await?;
        Ok(value.unwrap_or(0))
    }

    async fn set_counter(&self, key: &str, value: i64) -> QuotaResult<()> {
        let mut conn = self.conn().await?;
        conn.set::<_, _, ()>(key, value).await?;
        Ok(())
    }

    async fn incr(&self, key: &str) -> QuotaResult<i64> {
        let mut conn = self.conn().await?;
        let value: i64 = conn.incr(key, 1).await?;
        Ok(value)
    }

    async fn decr(&self, key: &str) -> QuotaResult<i64> {
        let mut conn = self.conn().await?;
        let value: i64 = conn.decr(key, 1).await?;
        Ok(value)
    }

    async fn delete(&self, key: &str) -> QuotaResult<()> {
        let mut conn = self.conn().await?;
        conn.del::<_, ()>(key).await?;
        Ok(())
    }

    async fn acquire_lock(
        &self,
        lock_key: &str,
        ttl_ms: u64,
        max_wait_ms: u64,
    ) -> QuotaResult<Option<LockToken>> {
        let mut conn = self.conn().await?;
        let token = Uuid::new_v4().to_string();
        let deadline = tokio::time::Instant::now() + Duration::from_millis(max_wait_ms);

        loop {
            let acquired: bool = redis::cmd("SET")
                .arg(lock_key)
                .arg(&token)
                .arg("NX")
                .arg("PX")
                .arg(ttl_ms)
                .query_async::<_, Option<String>>(&mut conn)
                .await?
                .is_some();

            if acquired {
                return Ok(Some(LockToken(token)));
            }

            if tokio::time::Instant::now() >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
    }

    async fn release_lock(&self, lock_key: &str, token: &LockToken) -> QuotaResult<()> {
        let mut conn = self.conn().await?;
        let script = redis::Script::new(RELEASE_LOCK_SCRIPT);
        let _: i64 = script
            .key(lock_key)
            .arg(&token.0)
            .invoke_async(&mut conn)
            .await?;
        Ok(())
    }
}
