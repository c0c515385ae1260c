//! Migration Orchestrator
//!
//! Runs modules in dependency order, once per branch. A module whose
//! dependency did not complete in the same branch is skipped with a
//! missing-dependency outcome. A failing module never stops its siblings
//! or the other branches.

use crate::api::ContentApi;
use crate::clock::MigrationClock;
use crate::config::MigrationConfig;
use crate::error::MigrateError;
use crate::modules::{
    builtin, ContentModule, MigrationContext, ModuleExporter, ModuleImporter, ModuleKind,
    ModuleReport,
};
use crate::orchestrator::graph::DependencyGraph;
use crate::orchestrator::summary::{
    BranchSummary, ModuleOutcome, ModuleResult, RunDirection, RunSummary,
};
use crate::transform::TransformChain;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Sequences module exports and imports across branches
pub struct MigrationOrchestrator {
    config: Arc<MigrationConfig>,
    api: Arc<dyn ContentApi>,
    clock: Arc<dyn MigrationClock>,
    transforms: TransformChain,
    graph: DependencyGraph,
    cancel: CancellationToken,
    modules: BTreeMap<ModuleKind, Arc<dyn ContentModule>>,
}

impl MigrationOrchestrator {
    /// Orchestrator with the built-in modules and standard transforms.
    /// Invalid configuration is rejected here, before any work starts.
    pub fn new(
        config: MigrationConfig,
        api: Arc<dyn ContentApi>,
        clock: Arc<dyn MigrationClock>,
    ) -> Result<Self, MigrateError> {
        config.validate()?;
        Ok(MigrationOrchestrator {
            config: Arc::new(config),
            api,
            clock,
            transforms: TransformChain::standard(),
            graph: DependencyGraph::standard(),
            cancel: CancellationToken::new(),
            modules: ModuleKind::ALL
                .into_iter()
                .map(|kind| (kind, builtin(kind)))
                .collect(),
        })
    }

    pub fn with_transforms(mut self, transforms: TransformChain) -> Self {
        self.transforms = transforms;
        self
    }

    pub fn with_graph(mut self, graph: DependencyGraph) -> Self {
        self.graph = graph;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Replace the handler of one module
    pub fn with_module(mut self, kind: ModuleKind, module: Arc<dyn ContentModule>) -> Self {
        self.modules.insert(kind, module);
        self
    }

    /// Drop the handler of one module; running it then fails the module
    pub fn without_module(mut self, kind: ModuleKind) -> Self {
        self.modules.remove(&kind);
        self
    }

    pub fn config(&self) -> &MigrationConfig {
        &self.config
    }

    /// Token that stops the run between batches and poll passes
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub async fn export(&self) -> RunSummary {
        self.run(RunDirection::Export).await
    }

    pub async fn import(&self) -> RunSummary {
        self.run(RunDirection::Import).await
    }

    async fn run(&self, direction: RunDirection) -> RunSummary {
        let mut summary = RunSummary::new(direction);
        let order = match self.graph.order(&self.config.modules) {
            Ok(order) => order,
            Err(e) => {
                error!("Cannot order modules: {}", e);
                summary.error = Some(e.to_string());
                return summary;
            }
        };
        let names: Vec<&str> = order.iter().map(|m| m.as_str()).collect();
        info!("{:?} order: [{}]", direction, names.join(", "));

        for branch in self.config.effective_branches() {
            let branch_summary = self.run_branch(direction, &branch, &order).await;
            summary.branches.push(branch_summary);
        }
        summary
    }

    async fn run_branch(
        &self,
        direction: RunDirection,
        branch: &str,
        order: &[ModuleKind],
    ) -> BranchSummary {
        info!("Starting {:?} of branch {}", direction, branch);
        let ctx = MigrationContext::new(
            self.api.with_branch(branch),
            self.clock.clone(),
            self.config.clone(),
            branch,
        )
        .with_transforms(self.transforms.clone())
        .with_cancellation(self.cancel.clone());

        let mut summary = BranchSummary::new(branch);
        for &module in order {
            let outcome = if self.cancel.is_cancelled() {
                ModuleOutcome::Cancelled
            } else {
                self.run_module(direction, &ctx, module, &summary).await
            };
            summary.modules.push(ModuleResult { module, outcome });
        }
        summary
    }

    async fn run_module(
        &self,
        direction: RunDirection,
        ctx: &MigrationContext,
        module: ModuleKind,
        done: &BranchSummary,
    ) -> ModuleOutcome {
        let missing: Vec<ModuleKind> = self
            .graph
            .dependencies(module)
            .filter(|dep| !done.completed(*dep))
            .collect();
        if !missing.is_empty() {
            let e = MigrateError::MissingDependency {
                module,
                missing: missing.clone(),
            };
            error!("[{}] {}", ctx.branch, e);
            return ModuleOutcome::SkippedMissingDependency { missing };
        }

        info!("[{}] {:?} of {} started", ctx.branch, direction, module);
        match self.dispatch(direction, ctx, module).await {
            Ok(report) => {
                if report.has_item_failures() {
                    warn!("[{}] Finished with item failures: {}", ctx.branch, report);
                } else {
                    info!("[{}] Finished: {}", ctx.branch, report);
                }
                ModuleOutcome::Completed { report }
            }
            Err(MigrateError::Cancelled) => {
                warn!("[{}] {:?} of {} cancelled", ctx.branch, direction, module);
                ModuleOutcome::Cancelled
            }
            Err(e) => {
                error!("[{}] {:?} of {} failed: {}", ctx.branch, direction, module, e);
                ModuleOutcome::Failed {
                    error: e.to_string(),
                }
            }
        }
    }

    async fn dispatch(
        &self,
        direction: RunDirection,
        ctx: &MigrationContext,
        module: ModuleKind,
    ) -> Result<ModuleReport, MigrateError> {
        let handler = self
            .modules
            .get(&module)
            .ok_or(MigrateError::UnsupportedModule(module))?;
        match direction {
            RunDirection::Export => handler.export(ctx).await,
            RunDirection::Import => handler.import(ctx).await,
        }
    }
}
