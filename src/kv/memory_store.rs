//! In-process [`super::KvStore`] implementation for tests.
//!
//! Modeled on the `LICENSE_DB: Mutex<HashMap<...>>` in-memory simulator
//! the licensing server keeps around for fast unit tests instead of a
//! live database; here it stands in for Redis so the Quota Engine's
//! concurrency properties (P1-P6) can be exercised without a live
//! instance.

use super::{KvStore, LockToken};
use crate::errors::QuotaResult;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Default)]
struct Locked {
    token: String,
    expires_at: Instant,
}

#[derive(Default)]
struct State {
    sorted_sets: HashMap<String, Vec<(String, f64)>>,
    counters: HashMap<String, i64>,
    locks: HashMap<String, Locked>,
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn zadd(&self, key: &str, member: &str, score: f64) -> QuotaResult<()> {
        let mut state = self.state.lock().await;
        let set = state.sorted_sets.entry(key.to_string()).or_default();
        set.retain(|(m, _)| m != member);
        set.push((member.to_string(), score));
        Ok(())
    }

    async fn zcount(&self, key: &str, lo: f64, hi: f64) -> QuotaResult<u64> {
        let state = self.state.lock().await;
        let count = state
            .sorted_sets
            .get(key)
            .map(|set| set.iter().filter(|(_, s)| *s >= lo && *s <= hi).count())
            .unwrap_or(0);
        Ok(count as u64)
    }

    async fn zremrangebyscore(&self, key: &str, lo: f64, hi: f64) -> QuotaResult<u64> {
        let mut state = self.state.lock().await;
        let Some(set) = state.sorted_sets.get_mut(key) else {
            return Ok(0);
        };
        let before = set.len();
        set.retain(|(_, s)| !(*s >= lo && *s <= hi));
        Ok((before - set.len()) as u64)
    }

    async fn zrangebyscore(&self, key: &str, lo: f64, hi: f64) -> QuotaResult<Vec<(String, f64)>> {
        let state = self.state.lock().await;
        let mut pairs: Vec<(String, f64)> = state
            .sorted_sets
            .get(key)
            .map(|set| {
                set.iter()
                    .filter(|(_, s)| *s >= lo && *s <= hi)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        pairs.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap());
        Ok(pairs)
    }

    async fn expire(&self, _key: &str, _ttl_secs: i64) -> QuotaResult<()> {
        // Idle-tenant aging is a Redis-only concern; the in-memory store
        // is always scoped to a single test run.
        Ok(())
    }

    async fn get_counter(&self, key: &str) -> QuotaResult<i64> {
        let state = self.state.lock().await;
        Ok(state.counters.get(key).copied().unwrap_or(0))
    }

    async fn set_counter(&self, key: &str, value: i64) -> QuotaResult<()> {
        let mut state = self.state.lock().await;
        state.counters.insert(key.to_string(), value);
        Ok(())
    }

    async fn incr(&self, key: &str) -> QuotaResult<i64> {
        let mut state = self.state.lock().await;
        let entry = state.counters.entry(key.to_string()).or_insert(0);
        *entry += 1;
        Ok(*entry)
    }

    async fn decr(&self, key: &str) -> QuotaResult<i64> {
        let mut state = self.state.lock().await;
        let entry = state.counters.entry(key.to_string()).or_insert(0);
        *entry -= 1;
        Ok(*entry)
    }

    async fn delete(&self, key: &str) -> QuotaResult<()> {
        let mut state = self.state.lock().await;
        state.sorted_sets.remove(key);
        state.counters.remove(key);
        Ok(())
    }

    async fn acquire_lock(
        &self,
        lock_key: &str,
        ttl_ms: u64,
        max_wait_ms: u64,
    ) -> QuotaResult<Option<LockToken>> {
        let token = Uuid::new_v4().to_string();
        let deadline = Instant::now() + Duration::from_millis(max_wait_ms);

        loop {
            {
                let mut state = self.state.lock().await;
                let held = state
                    .locks
                    .get(lock_key)
                    .map(|l| l.expires_at > Instant::now())
                    .unwrap_or(false);
                if !held {
                    state.locks.insert(
                        lock_key.to_string(),
                        Locked {
                            token: token.clone(),
                            expires_at: Instant::now() + Duration::from_millis(ttl_ms),
                        },
                    );
                    return Ok(Some(LockToken(token)));
                }
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    async fn release_lock(&self, lock_key: &str, token: &LockToken) -> QuotaResult<()> {
        let mut state = self.state.lock().await;
        if let Some(locked) = state.locks.get(lock_key) {
            if locked.token == token.0 {
                state.locks.remove(lock_key);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn zcount_reflects_window() {
        let store = MemoryStore::new();
        store.zadd("executions:t1", "job1:100", 100.0).await.unwrap();
        store.zadd("executions:t1", "job2:200", 200.0).await.unwrap();
        assert_eq!(store.zcount("executions:t1", 0.0, 150.0).await.unwrap(), 1);
        assert_eq!(store.zcount("executions:t1", 0.0, 300.0).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn lock_is_exclusive_until_released() {
        let store = MemoryStore::new();
        let first = store.acquire_lock("lock:t1", 5_000, 50).await.unwrap();
        assert!(first.is_some());
        let second = store.acquire_lock("lock:t1", 5_000, 50).await.unwrap();
        assert!(second.is_none());
        store.release_lock("lock:t1", &first.unwrap()).await.unwrap();
        let third = store.acquire_lock("lock:t1", 5_000, 50).await.unwrap();
        assert!(third.is_some());
    }

    #[tokio::test]
    async fn counters_absent_read_as_zero() {
        let store = MemoryStore::new();
        assert_eq!(store.get_counter("apps:count:t1").await.unwrap(), 0);
        assert_eq!(store.incr("apps:count:t1").await.unwrap(), 1);
        assert_eq!(store.decr("apps:count:t1").await.unwrap(), 0);
    }
}
