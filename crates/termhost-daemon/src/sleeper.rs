//! Sleeper trait for deterministic timing in tests.
//!
//! The kill escalation loop waits through a `Sleeper`, so tests can swap in
//! `MockSleeper`, which records every requested duration and returns at once.

use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use termhost_common::mutex_lock_or_recover;

#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Production sleeper backed by `tokio::time::sleep`.
#[derive(Debug, Clone, Copy, Default)]
pub struct RealSleeper;

#[async_trait]
impl Sleeper for RealSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

#[derive(Debug, Default)]
pub struct MockSleeper {
    call_count: AtomicU64,
    total_duration_ms: AtomicU64,
    durations: Mutex<Vec<Duration>>,
}

impl MockSleeper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn call_count(&self) -> u64 {
        self.call_count.load(Ordering::SeqCst)
    }

    pub fn total_duration(&self) -> Duration {
        Duration::from_millis(self.total_duration_ms.load(Ordering::SeqCst))
    }

    pub fn durations(&self) -> Vec<Duration> {
        mutex_lock_or_recover(&self.durations).clone()
    }
}

#[async_trait]
impl Sleeper for MockSleeper {
    async fn sleep(&self, duration: Duration) {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        self.total_duration_ms
            .fetch_add(duration.as_millis() as u64, Ordering::SeqCst);
        mutex_lock_or_recover(&self.durations).push(duration);
    }
}
