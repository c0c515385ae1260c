//! Simulated Content API with Fault Injection
//!
//! DST wrapper around any [`ContentApi`]: each call first rolls a seeded
//! RNG and may fail with a transient error instead of reaching the inner
//! client. Failures happen before the inner call, so a failed create never
//! leaves an object behind. Same seed, same failure sequence.

use crate::api::{ApiError, ApiFuture, ContentApi, ListQuery, ListResponse};
use crate::record::Record;
use bytes::Bytes;
use parking_lot::Mutex;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::sync::Arc;

/// Configuration for simulated fault injection
#[derive(Debug, Clone)]
pub struct SimulatedApiConfig {
    /// Probability of LIST failure
    pub list_fail_prob: f64,
    /// Probability of CREATE failure
    pub create_fail_prob: f64,
    /// Probability of UPDATE failure
    pub update_fail_prob: f64,
    /// Probability of DOWNLOAD failure
    pub download_fail_prob: f64,
}

impl Default for SimulatedApiConfig {
    fn default() -> Self {
        SimulatedApiConfig {
            list_fail_prob: 0.01,     // 1%
            create_fail_prob: 0.01,   // 1%
            update_fail_prob: 0.01,   // 1%
            download_fail_prob: 0.02, // 2%
        }
    }
}

impl SimulatedApiConfig {
    /// High chaos configuration for stress testing
    pub fn high_chaos() -> Self {
        SimulatedApiConfig {
            list_fail_prob: 0.05,
            create_fail_prob: 0.10,
            update_fail_prob: 0.10,
            download_fail_prob: 0.10,
        }
    }

    /// No faults - for baseline testing
    pub fn no_faults() -> Self {
        SimulatedApiConfig {
            list_fail_prob: 0.0,
            create_fail_prob: 0.0,
            update_fail_prob: 0.0,
            download_fail_prob: 0.0,
        }
    }
}

/// Statistics for fault injection
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SimulatedApiStats {
    pub list_attempts: u64,
    pub list_failures: u64,
    pub create_attempts: u64,
    pub create_failures: u64,
    pub update_attempts: u64,
    pub update_failures: u64,
    pub download_attempts: u64,
    pub download_failures: u64,
}

impl SimulatedApiStats {
    pub fn total_failures(&self) -> u64 {
        self.list_failures + self.create_failures + self.update_failures + self.download_failures
    }
}

struct FaultState {
    rng: ChaCha8Rng,
    stats: SimulatedApiStats,
}

#[derive(Clone, Copy)]
enum Op {
    List,
    Create,
    Update,
    Download,
}

/// Fault-injecting wrapper
#[derive(Clone)]
pub struct SimulatedContentApi {
    inner: Arc<dyn ContentApi>,
    config: SimulatedApiConfig,
    state: Arc<Mutex<FaultState>>,
}

impl SimulatedContentApi {
    pub fn new(inner: Arc<dyn ContentApi>, seed: u64, config: SimulatedApiConfig) -> Self {
        SimulatedContentApi {
            inner,
            config,
            state: Arc::new(Mutex::new(FaultState {
                rng: ChaCha8Rng::seed_from_u64(seed),
                stats: SimulatedApiStats::default(),
            })),
        }
    }

    /// Get current statistics
    pub fn stats(&self) -> SimulatedApiStats {
        self.state.lock().stats.clone()
    }

    /// Reset statistics
    pub fn reset_stats(&self) {
        self.state.lock().stats = SimulatedApiStats::default();
    }

    /// Count the attempt and decide whether it fails
    fn roll(&self, op: Op) -> Result<(), ApiError> {
        let mut state = self.state.lock();
        let prob = match op {
            Op::List => self.config.list_fail_prob,
            Op::Create => self.config.create_fail_prob,
            Op::Update => self.config.update_fail_prob,
            Op::Download => self.config.download_fail_prob,
        };
        let fail = prob > 0.0 && state.rng.gen_bool(prob.min(1.0));

        let stats = &mut state.stats;
        let (attempts, failures, name) = match op {
            Op::List => (&mut stats.list_attempts, &mut stats.list_failures, "list"),
            Op::Create => (&mut stats.create_attempts, &mut stats.create_failures, "create"),
            Op::Update => (&mut stats.update_attempts, &mut stats.update_failures, "update"),
            Op::Download => (&mut stats.download_attempts, &mut stats.download_failures, "download"),
        };
        *attempts += 1;
        if fail {
            *failures += 1;
            return Err(ApiError::Transient(format!("simulated {} failure", name)));
        }
        Ok(())
    }
}

impl ContentApi for SimulatedContentApi {
    fn branch(&self) -> &str {
        self.inner.branch()
    }

    fn with_branch(&self, branch: &str) -> Arc<dyn ContentApi> {
        Arc::new(SimulatedContentApi {
            inner: self.inner.with_branch(branch),
            config: self.config.clone(),
            state: self.state.clone(),
        })
    }

    fn list<'a>(&'a self, content_type: &'a str, query: ListQuery) -> ApiFuture<'a, ListResponse> {
        Box::pin(async move {
            self.roll(Op::List)?;
            self.inner.list(content_type, query).await
        })
    }

    fn create<'a>(&'a self, content_type: &'a str, payload: Record) -> ApiFuture<'a, Record> {
        Box::pin(async move {
            self.roll(Op::Create)?;
            self.inner.create(content_type, payload).await
        })
    }

    fn update<'a>(
        &'a self,
        content_type: &'a str,
        uid: &'a str,
        payload: Record,
    ) -> ApiFuture<'a, Record> {
        Box::pin(async move {
            self.roll(Op::Update)?;
            self.inner.update(content_type, uid, payload).await
        })
    }

    fn download<'a>(&'a self, url: &'a str) -> ApiFuture<'a, Bytes> {
        Box::pin(async move {
            self.roll(Op::Download)?;
            self.inner.download(url).await
        })
    }
}
