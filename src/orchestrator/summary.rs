//! Run summary: per-branch, per-module outcomes

use crate::modules::{ModuleKind, ModuleReport};
use serde::Serialize;
use std::fmt;

/// Which direction a run moved content
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunDirection {
    Export,
    Import,
}

/// How one module ended in one branch
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ModuleOutcome {
    Completed { report: ModuleReport },
    /// The module aborted; item failures alone never land here
    Failed { error: String },
    /// A dependency did not complete, so the module refused to run
    SkippedMissingDependency { missing: Vec<ModuleKind> },
    Cancelled,
}

impl ModuleOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, ModuleOutcome::Completed { .. })
    }

    pub fn report(&self) -> Option<&ModuleReport> {
        match self {
            ModuleOutcome::Completed { report } => Some(report),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModuleResult {
    pub module: ModuleKind,
    pub outcome: ModuleOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BranchSummary {
    pub branch: String,
    pub modules: Vec<ModuleResult>,
}

impl BranchSummary {
    pub fn new(branch: impl Into<String>) -> Self {
        BranchSummary {
            branch: branch.into(),
            modules: Vec::new(),
        }
    }

    pub fn outcome(&self, module: ModuleKind) -> Option<&ModuleOutcome> {
        self.modules
            .iter()
            .find(|r| r.module == module)
            .map(|r| &r.outcome)
    }

    pub fn completed(&self, module: ModuleKind) -> bool {
        self.outcome(module).is_some_and(ModuleOutcome::is_completed)
    }
}

/// Everything a run did
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub direction: RunDirection,
    pub branches: Vec<BranchSummary>,
    /// The run as a whole could not start (e.g. a dependency cycle)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RunSummary {
    pub fn new(direction: RunDirection) -> Self {
        RunSummary {
            direction,
            branches: Vec::new(),
            error: None,
        }
    }

    pub fn branch(&self, name: &str) -> Option<&BranchSummary> {
        self.branches.iter().find(|b| b.branch == name)
    }

    /// Any module failed or was skipped, or the run could not start.
    /// Item failures inside completed modules do not count.
    pub fn has_fatal_errors(&self) -> bool {
        self.error.is_some()
            || self
                .branches
                .iter()
                .flat_map(|b| &b.modules)
                .any(|r| !r.outcome.is_completed())
    }

    /// Sum of item-level failures across completed modules
    pub fn item_failures(&self) -> u64 {
        self.branches
            .iter()
            .flat_map(|b| &b.modules)
            .filter_map(|r| r.outcome.report())
            .map(|r| r.failed + r.pending_validation)
            .sum()
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let direction = match self.direction {
            RunDirection::Export => "Export",
            RunDirection::Import => "Import",
        };
        writeln!(f, "{} summary", direction)?;
        if let Some(error) = &self.error {
            writeln!(f, "  run failed: {}", error)?;
        }
        for branch in &self.branches {
            writeln!(f, "  branch {}", branch.branch)?;
            for result in &branch.modules {
                match &result.outcome {
                    ModuleOutcome::Completed { report } => writeln!(f, "    ok      {}", report)?,
                    ModuleOutcome::Failed { error } => {
                        writeln!(f, "    FAILED  {}: {}", result.module, error)?
                    }
                    ModuleOutcome::SkippedMissingDependency { missing } => {
                        let names: Vec<&str> = missing.iter().map(|m| m.as_str()).collect();
                        writeln!(
                            f,
                            "    SKIPPED {}: missing [{}]",
                            result.module,
                            names.join(", ")
                        )?
                    }
                    ModuleOutcome::Cancelled => writeln!(f, "    CANCELLED {}", result.module)?,
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn completed(module: ModuleKind, failed: u64) -> ModuleResult {
        let mut report = ModuleReport::new(module);
        report.failed = failed;
        ModuleResult {
            module,
            outcome: ModuleOutcome::Completed { report },
        }
    }

    #[test]
    fn test_item_failures_are_not_fatal() {
        let mut summary = RunSummary::new(RunDirection::Import);
        let mut branch = BranchSummary::new("main");
        branch.modules.push(completed(ModuleKind::Stack, 0));
        branch.modules.push(completed(ModuleKind::Entries, 4));
        summary.branches.push(branch);

        assert!(!summary.has_fatal_errors());
        assert_eq!(summary.item_failures(), 4);
    }

    #[test]
    fn test_module_failure_is_fatal() {
        let mut summary = RunSummary::new(RunDirection::Import);
        let mut branch = BranchSummary::new("main");
        branch.modules.push(ModuleResult {
            module: ModuleKind::Assets,
            outcome: ModuleOutcome::Failed {
                error: "Store error: missing directory".into(),
            },
        });
        branch.modules.push(ModuleResult {
            module: ModuleKind::Entries,
            outcome: ModuleOutcome::SkippedMissingDependency {
                missing: vec![ModuleKind::Assets],
            },
        });
        summary.branches.push(branch);

        assert!(summary.has_fatal_errors());
        let text = summary.to_string();
        assert!(text.contains("FAILED  assets"));
        assert!(text.contains("SKIPPED entries: missing [assets]"));

        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["branches"][0]["modules"][1]["outcome"]["status"], "skipped_missing_dependency");
    }
}
