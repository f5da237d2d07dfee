use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex};

/// Time source used everywhere a component would otherwise call
/// `Utc::now()` directly. Business logic in `quota`, `license_service`,
/// and `identity` takes `&dyn Clock` so tests can drive time deterministically
/// instead of sleeping real seconds.
pub trait Clock: Send + Sync {
    fn now_utc(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_utc(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Test double whose `now_utc()` only moves when explicitly advanced,
/// so tests can assert sliding-window recovery at exact window boundaries.
#[derive(Debug, Clone)]
pub struct FixedClock {
    inner: Arc<Mutex<DateTime<Utc>>>,
}

impl FixedClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(start)),
        }
    }

    pub fn advance(&self, delta: chrono::Duration) {
        let mut guard = self.inner.lock().expect("FixedClock mutex poisoned");
        *guard += delta;
    }

    pub fn set(&self, at: DateTime<Utc>) {
        let mut guard = self.inner.lock().expect("FixedClock mutex poisoned");
        *guard = at;
    }
}

impl Clock for FixedClock {
    fn now_utc(&self) -> DateTime<Utc> {
        *self.inner.lock().expect("FixedClock mutex poisoned")
    }
}
