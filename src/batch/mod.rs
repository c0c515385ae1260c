//! Paced, bounded-concurrency batch driver
//!
//! Knows nothing about file formats or the remote API: callers hand it a
//! count (or a query to page) plus a dispatch function and resolve/reject
//! callbacks.

pub mod orchestrator;
pub mod plan;

pub use orchestrator::{BatchOrchestrator, BatchStats, PageQuery, Settled};
pub use plan::{BatchPlan, RequestSlot};
