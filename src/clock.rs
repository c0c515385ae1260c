//! Time source for pacing and polling
//!
//! The engine waits on time in exactly two places: the pause that keeps a
//! batch from finishing faster than its floor, and the interval between
//! validation passes. Both go through [`MigrationClock`], so simulation
//! runs swap in [`SimulatedClock`] and never block.

use parking_lot::Mutex;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Milliseconds since the clock started
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct Timestamp(pub u64);

impl Timestamp {
    /// Time from `earlier` to `self`; zero if `earlier` is later
    pub fn since(self, earlier: Timestamp) -> Duration {
        Duration::from_millis(self.0.saturating_sub(earlier.0))
    }
}

pub type SleepFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Shared as `Arc<dyn MigrationClock>` through the migration context
pub trait MigrationClock: Send + Sync + 'static {
    fn now(&self) -> Timestamp;

    fn sleep(&self, duration: Duration) -> SleepFuture;

    fn elapsed(&self, since: Timestamp) -> Duration {
        self.now().since(since)
    }
}

/// Monotonic tokio time
#[derive(Debug, Clone)]
pub struct ProductionClock {
    origin: tokio::time::Instant,
}

impl Default for ProductionClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ProductionClock {
    pub fn new() -> Self {
        ProductionClock {
            origin: tokio::time::Instant::now(),
        }
    }
}

impl MigrationClock for ProductionClock {
    fn now(&self) -> Timestamp {
        Timestamp(self.origin.elapsed().as_millis() as u64)
    }

    fn sleep(&self, duration: Duration) -> SleepFuture {
        Box::pin(tokio::time::sleep(duration))
    }
}

/// Virtual time for deterministic runs.
///
/// Time moves only on `advance` or `sleep`. A sleep jumps forward by the
/// requested duration, is recorded, and completes after one yield. Clones
/// share the same time line.
#[derive(Debug, Clone, Default)]
pub struct SimulatedClock {
    now_ms: Arc<AtomicU64>,
    sleeps: Arc<Mutex<Vec<Duration>>>,
}

impl SimulatedClock {
    pub fn new(start_ms: u64) -> Self {
        SimulatedClock {
            now_ms: Arc::new(AtomicU64::new(start_ms)),
            sleeps: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Let time pass without a sleep (work that "took" `duration`)
    pub fn advance(&self, duration: Duration) {
        self.now_ms
            .fetch_add(duration.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn advance_ms(&self, ms: u64) {
        self.advance(Duration::from_millis(ms));
    }

    /// Every sleep requested so far, in call order
    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().clone()
    }

    pub fn total_slept(&self) -> Duration {
        self.sleeps.lock().iter().sum()
    }
}

impl MigrationClock for SimulatedClock {
    fn now(&self) -> Timestamp {
        Timestamp(self.now_ms.load(Ordering::SeqCst))
    }

    fn sleep(&self, duration: Duration) -> SleepFuture {
        self.sleeps.lock().push(duration);
        self.advance(duration);
        Box::pin(tokio::task::yield_now())
    }
}
