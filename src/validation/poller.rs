//! Async Validation Poller
//!
//! Waits for server-side derivations that complete after the call that
//! triggered them (e.g. variants created in the background after an
//! experience create).
//!
//! ## State Machine
//!
//! ```text
//! Pending ──interval──► Checking ──all verified──► Done
//!    ▲                     │
//!    └──── retry ──────────┤
//!                          └──passes == floor(threshold/interval)──► Exhausted
//! ```
//!
//! Every pass probes all pending items concurrently and waits for every
//! probe before deciding. Exhaustion is not an error: leftover items are
//! reported as failed and the caller carries on. The inter-pass timer is
//! cancellable.

use crate::clock::MigrationClock;
use crate::config::PollerConfig;
use crate::store::{write_json_atomic, StoreError};
use futures::future::join_all;
use serde::Serialize;
use std::fmt::Display;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Poller state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    Pending,
    Checking,
    Done,
    Exhausted,
    Cancelled,
}

/// Result of a poll run
#[derive(Debug, Clone)]
pub struct PollOutcome<T, V> {
    pub state: PollState,
    /// Items whose probe succeeded, with what the probe returned
    pub verified: Vec<(T, V)>,
    /// Items still pending when the poller stopped
    pub failed: Vec<T>,
    pub passes: u32,
}

impl<T, V> PollOutcome<T, V> {
    pub fn is_complete(&self) -> bool {
        self.state == PollState::Done
    }

    /// Write the failed items to a side file (JSON array). Nothing is
    /// written when every item verified.
    pub fn write_failed_file(&self, path: &Path) -> Result<bool, StoreError>
    where
        T: Serialize,
    {
        if self.failed.is_empty() {
            return Ok(false);
        }
        write_json_atomic(path, &self.failed)?;
        Ok(true)
    }
}

/// Bounded-retry poller for asynchronously derived objects
pub struct AsyncValidationPoller {
    config: PollerConfig,
    clock: Arc<dyn MigrationClock>,
    cancel: CancellationToken,
}

impl AsyncValidationPoller {
    pub fn new(config: PollerConfig, clock: Arc<dyn MigrationClock>) -> Self {
        debug_assert!(!config.interval.is_zero(), "Precondition: poll interval must be non-zero");
        AsyncValidationPoller {
            config,
            clock,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Check passes allowed before giving up
    pub fn max_passes(&self) -> u32 {
        self.config.max_passes()
    }

    /// Poll `items` until each probe reports `Some`, or the pass budget
    /// runs out.
    ///
    /// A probe error counts as "not yet" for that pass.
    pub async fn run<T, V, E, F, Fut>(&self, items: Vec<T>, mut probe: F) -> PollOutcome<T, V>
    where
        F: FnMut(&T) -> Fut,
        Fut: Future<Output = Result<Option<V>, E>>,
        E: Display,
    {
        let max_passes = self.max_passes();
        let mut pending = items;
        let mut verified = Vec::with_capacity(pending.len());
        let mut passes = 0u32;
        let mut state = if pending.is_empty() {
            PollState::Done
        } else {
            PollState::Pending
        };

        while state == PollState::Pending {
            if passes >= max_passes {
                state = PollState::Exhausted;
                break;
            }
            if !self.wait_interval().await {
                state = PollState::Cancelled;
                break;
            }

            state = PollState::Checking;
            passes += 1;
            let results = join_all(pending.iter().map(&mut probe)).await;

            let mut still_pending = Vec::with_capacity(pending.len());
            for (item, result) in pending.into_iter().zip(results) {
                match result {
                    Ok(Some(value)) => verified.push((item, value)),
                    Ok(None) => still_pending.push(item),
                    Err(e) => {
                        warn!("Validation probe failed on pass {}: {}", passes, e);
                        still_pending.push(item);
                    }
                }
            }
            pending = still_pending;

            debug!(
                "Validation pass {}/{}: {} verified, {} pending",
                passes,
                max_passes,
                verified.len(),
                pending.len()
            );
            state = if pending.is_empty() {
                PollState::Done
            } else {
                PollState::Pending
            };
        }

        debug_assert!(
            state != PollState::Pending && state != PollState::Checking,
            "Invariant violated: poller stopped in a transient state"
        );
        debug_assert!(passes <= max_passes, "Invariant violated: pass budget exceeded");

        match state {
            PollState::Done => info!("Validation complete after {} passes", passes),
            _ => warn!(
                "Validation stopped ({:?}) after {} passes with {} items pending",
                state,
                passes,
                pending.len()
            ),
        }

        PollOutcome {
            state,
            verified,
            failed: pending,
            passes,
        }
    }

    /// Sleep one interval; false when cancelled first
    async fn wait_interval(&self) -> bool {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => false,
            _ = self.clock.sleep(self.config.interval) => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SimulatedClock;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::time::Duration;

    fn poller(clock: &SimulatedClock, threshold_ms: u64, interval_ms: u64) -> AsyncValidationPoller {
        let config = PollerConfig {
            threshold: Duration::from_millis(threshold_ms),
            interval: Duration::from_millis(interval_ms),
        };
        AsyncValidationPoller::new(config, Arc::new(clock.clone()))
    }

    #[tokio::test]
    async fn test_exhaustion_after_three_passes() {
        let clock = SimulatedClock::new(0);
        let outcome = poller(&clock, 30_000, 10_000)
            .run(vec!["exp1".to_string()], |_| async {
                Ok::<Option<()>, String>(None)
            })
            .await;

        assert_eq!(outcome.state, PollState::Exhausted);
        assert_eq!(outcome.passes, 3);
        assert_eq!(outcome.failed, vec!["exp1".to_string()]);
        assert!(outcome.verified.is_empty());
        assert_eq!(clock.total_slept(), Duration::from_millis(30_000));
    }

    #[tokio::test]
    async fn test_items_verify_independently() {
        let clock = SimulatedClock::new(0);
        // item -> passes needed before it verifies
        let needed: HashMap<&str, u32> = [("a", 1), ("b", 2)].into_iter().collect();
        let seen: Arc<Mutex<HashMap<String, u32>>> = Arc::new(Mutex::new(HashMap::new()));

        let outcome = poller(&clock, 30_000, 10_000)
            .run(vec!["a", "b"], |item: &&str| {
                let item = item.to_string();
                let need = needed[item.as_str()];
                let seen = seen.clone();
                async move {
                    let mut seen = seen.lock();
                    let count = seen.entry(item.clone()).or_insert(0);
                    *count += 1;
                    Ok::<_, String>((*count >= need).then(|| format!("{}-ok", item)))
                }
            })
            .await;

        assert_eq!(outcome.state, PollState::Done);
        assert_eq!(outcome.passes, 2);
        assert_eq!(outcome.verified.len(), 2);
        // "a" is not probed again once verified
        assert_eq!(seen.lock()["a"], 1);
    }

    #[tokio::test]
    async fn test_probe_errors_count_as_pending() {
        let clock = SimulatedClock::new(0);
        let outcome = poller(&clock, 20_000, 10_000)
            .run(vec![1u32], |_| async { Err::<Option<()>, _>("503") })
            .await;
        assert_eq!(outcome.state, PollState::Exhausted);
        assert_eq!(outcome.passes, 2);
    }

    #[tokio::test]
    async fn test_empty_input_is_done() {
        let clock = SimulatedClock::new(0);
        let outcome = poller(&clock, 30_000, 10_000)
            .run(Vec::<u32>::new(), |_| async { Ok::<Option<()>, String>(None) })
            .await;
        assert_eq!(outcome.state, PollState::Done);
        assert_eq!(outcome.passes, 0);
        assert!(clock.sleeps().is_empty());
    }

    #[tokio::test]
    async fn test_threshold_below_interval_still_checks_once() {
        let clock = SimulatedClock::new(0);
        let outcome = poller(&clock, 5_000, 10_000)
            .run(vec![1u32], |_| async { Ok::<Option<()>, String>(None) })
            .await;
        assert_eq!(outcome.passes, 1);
    }

    #[tokio::test]
    async fn test_cancellation_stops_polling() {
        let clock = SimulatedClock::new(0);
        let token = CancellationToken::new();
        token.cancel();
        let outcome = poller(&clock, 30_000, 10_000)
            .with_cancellation(token)
            .run(vec![1u32], |_| async { Ok::<Option<()>, String>(None) })
            .await;
        assert_eq!(outcome.state, PollState::Cancelled);
        assert_eq!(outcome.passes, 0);
        assert_eq!(outcome.failed, vec![1]);
    }

    #[tokio::test]
    async fn test_failed_side_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("failed-experiences.json");
        let clock = SimulatedClock::new(0);
        let outcome = poller(&clock, 10_000, 10_000)
            .run(vec!["x".to_string()], |_| async { Ok::<Option<()>, String>(None) })
            .await;

        assert!(outcome.write_failed_file(&path).unwrap());
        let written: Vec<String> = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(written, vec!["x".to_string()]);
    }
}
