use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tokio::time::Instant;

use crate::models::Millis;

pub trait Clock: Send + Sync {
    fn now(&self) -> Millis;
}

/// Wall-clock baseline captured once, advanced by the tokio monotonic clock.
///
/// Deadlines computed from this clock agree with `tokio::time::sleep`, which
/// keeps timer wake-ups and expiry checks consistent (also under a paused
/// test runtime).
pub struct SystemClock {
    baseline: Millis,
    started: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        SystemClock {
            baseline: chrono::Utc::now().timestamp_millis(),
            started: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Millis {
        self.baseline + self.started.elapsed().as_millis() as Millis
    }
}

/// Hand-driven clock for tests and replay.
#[derive(Clone, Default)]
pub struct ManualClock {
    now: Arc<AtomicI64>,
}

impl ManualClock {
    pub fn new(start: Millis) -> Self {
        ManualClock {
            now: Arc::new(AtomicI64::new(start)),
        }
    }

    pub fn set(&self, at: Millis) {
        self.now.store(at, Ordering::SeqCst);
    }

    pub fn advance(&self, by: Millis) {
        self.now.fetch_add(by, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Millis {
        self.now.load(Ordering::SeqCst)
    }
}
