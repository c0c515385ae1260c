//! Run-level sequencing: dependency ordering, per-branch execution and the
//! summary a run ends with

pub mod graph;
pub mod runner;
pub mod summary;

pub use graph::DependencyGraph;
pub use runner::MigrationOrchestrator;
pub use summary::{BranchSummary, ModuleOutcome, ModuleResult, RunDirection, RunSummary};
