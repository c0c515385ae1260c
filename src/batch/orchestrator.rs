//! Batch Orchestrator
//!
//! Drives "fetch or write N items, M at a time" with pacing. Each batch is
//! dispatched in full, every request in it settles (resolve or reject)
//! before the next batch starts, and a batch that finishes faster than the
//! configured floor is followed by a sleep for the remainder. There is no
//! sleep after the final batch.
//!
//! ## Flow
//!
//! ```text
//! plan → [batch 0: dispatch all → settle all → pace] → [batch 1 ...] → stats
//! ```
//!
//! Per-request failures go to the reject callback and never stop the run;
//! what to do with them is the caller's decision.

use crate::batch::plan::{BatchPlan, RequestSlot};
use crate::clock::{MigrationClock, Timestamp};
use crate::config::BatchConfig;
use futures::stream::{FuturesUnordered, StreamExt};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// A query that can be re-issued for any page window
pub trait PageQuery: Clone {
    fn at_page(&self, skip: u64, limit: u64) -> Self;
}

/// Handed to resolve/reject callbacks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Settled {
    pub slot: RequestSlot,
    /// True for the last callback of the whole run, whichever request it
    /// belongs to. End-of-stream work keys off this, exactly once.
    pub ends_run: bool,
}

/// Counters for one orchestrated run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchStats {
    pub requests_dispatched: usize,
    pub batches: usize,
    pub resolved: usize,
    pub rejected: usize,
    pub pacing_sleeps: usize,
    pub paced: Duration,
    /// Run stopped between batches because of cancellation
    pub cancelled: bool,
}

/// Bounded-concurrency, paced request driver
#[derive(Clone)]
pub struct BatchOrchestrator {
    config: BatchConfig,
    clock: Arc<dyn MigrationClock>,
    cancel: Option<CancellationToken>,
}

impl BatchOrchestrator {
    pub fn new(config: BatchConfig, clock: Arc<dyn MigrationClock>) -> Self {
        debug_assert!(config.concurrency_limit > 0, "Precondition: concurrency_limit must be positive");
        BatchOrchestrator {
            config,
            clock,
            cancel: None,
        }
    }

    /// Stop dispatching new batches once `token` is cancelled.
    /// A batch already dispatched always runs to settlement.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    /// Page through `[0, total_count)` with a uniform query; the skip/limit
    /// window is substituted per request.
    pub async fn run_pages<Q, F, Fut, T, E, R, J>(
        &self,
        total_count: u64,
        query: &Q,
        mut fetch: F,
        on_resolve: R,
        on_reject: J,
    ) -> BatchStats
    where
        Q: PageQuery,
        F: FnMut(Q) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        R: FnMut(Settled, T),
        J: FnMut(Settled, E),
    {
        let plan = BatchPlan::pages(total_count, self.config.page_size, self.config.concurrency_limit);
        debug!(
            "Paging {} items in {} requests over {} batches",
            total_count,
            plan.request_count(),
            plan.batch_count()
        );
        self.run_plan(
            &plan,
            |slot| fetch(query.at_page(slot.skip, slot.limit)),
            on_resolve,
            on_reject,
        )
        .await
    }

    /// One request per item through a custom handler
    pub async fn run_items<F, Fut, T, E, R, J>(
        &self,
        count: usize,
        handler: F,
        on_resolve: R,
        on_reject: J,
    ) -> BatchStats
    where
        F: FnMut(RequestSlot) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        R: FnMut(Settled, T),
        J: FnMut(Settled, E),
    {
        let plan = BatchPlan::items(count, self.config.concurrency_limit);
        self.run_plan(&plan, handler, on_resolve, on_reject).await
    }

    /// Execute a prepared plan
    pub async fn run_plan<F, Fut, T, E, R, J>(
        &self,
        plan: &BatchPlan,
        mut dispatch: F,
        mut on_resolve: R,
        mut on_reject: J,
    ) -> BatchStats
    where
        F: FnMut(RequestSlot) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        R: FnMut(Settled, T),
        J: FnMut(Settled, E),
    {
        let total = plan.request_count();
        let batch_count = plan.batch_count();
        let mut settled_count = 0usize;
        let mut stats = BatchStats::default();

        for (position, batch) in plan.batches().iter().enumerate() {
            if self.is_cancelled() {
                warn!(
                    "Batch run cancelled before batch {} of {}",
                    position + 1,
                    batch_count
                );
                stats.cancelled = true;
                break;
            }

            let started = self.clock.now();
            let mut in_flight: FuturesUnordered<_> = batch
                .iter()
                .map(|slot| {
                    let slot = *slot;
                    let pending = dispatch(slot);
                    async move { (slot, pending.await) }
                })
                .collect();
            stats.requests_dispatched += batch.len();
            stats.batches += 1;

            while let Some((slot, result)) = in_flight.next().await {
                settled_count += 1;
                let settled = Settled {
                    slot,
                    ends_run: settled_count == total,
                };
                match result {
                    Ok(value) => {
                        stats.resolved += 1;
                        on_resolve(settled, value);
                    }
                    Err(e) => {
                        stats.rejected += 1;
                        on_reject(settled, e);
                    }
                }
            }

            debug_assert!(in_flight.is_empty(), "Invariant violated: batch advanced before settling");

            if position + 1 < batch_count {
                self.pace(started, &mut stats).await;
            }
        }

        debug_assert_eq!(
            stats.resolved + stats.rejected,
            stats.requests_dispatched,
            "Invariant violated: dispatched request never settled"
        );
        stats
    }

    /// Sleep out the rest of the batch floor
    async fn pace(&self, started: Timestamp, stats: &mut BatchStats) {
        let elapsed = self.clock.elapsed(started);
        let floor = self.config.min_batch_duration;
        if elapsed >= floor {
            return;
        }

        let remaining = floor - elapsed;
        debug!("Batch took {:?}, pacing for {:?}", elapsed, remaining);
        stats.pacing_sleeps += 1;
        stats.paced += remaining;

        match &self.cancel {
            Some(token) => {
                tokio::select! {
                    _ = self.clock.sleep(remaining) => {}
                    _ = token.cancelled() => {}
                }
            }
            None => self.clock.sleep(remaining).await,
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(CancellationToken::is_cancelled)
    }
}
