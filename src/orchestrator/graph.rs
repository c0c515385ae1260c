//! Module dependency graph
//!
//! Kahn's algorithm over in-degrees. Ready modules are taken in
//! `ModuleKind` order so the run order is deterministic. Anything left with
//! a non-zero in-degree sits on a cycle.

use crate::error::MigrateError;
use crate::modules::ModuleKind;
use std::collections::{BTreeMap, BTreeSet};

/// Module -> modules it depends on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyGraph {
    edges: BTreeMap<ModuleKind, BTreeSet<ModuleKind>>,
}

impl Default for DependencyGraph {
    fn default() -> Self {
        Self::standard()
    }
}

impl DependencyGraph {
    /// The static dependencies every module declares
    pub fn standard() -> Self {
        Self::from_edges(
            ModuleKind::ALL
                .into_iter()
                .map(|module| (module, module.dependencies().to_vec())),
        )
    }

    /// Arbitrary wiring, mostly for tests
    pub fn from_edges(edges: impl IntoIterator<Item = (ModuleKind, Vec<ModuleKind>)>) -> Self {
        let mut graph = BTreeMap::new();
        for (module, deps) in edges {
            let entry: &mut BTreeSet<ModuleKind> = graph.entry(module).or_default();
            entry.extend(deps.iter().copied());
            for dep in deps {
                graph.entry(dep).or_default();
            }
        }
        DependencyGraph { edges: graph }
    }

    pub fn dependencies(&self, module: ModuleKind) -> impl Iterator<Item = ModuleKind> + '_ {
        self.edges.get(&module).into_iter().flatten().copied()
    }

    /// `requested` plus everything it transitively depends on
    pub fn closure(&self, requested: &[ModuleKind]) -> BTreeSet<ModuleKind> {
        let mut seen = BTreeSet::new();
        let mut stack: Vec<ModuleKind> = requested.to_vec();
        while let Some(module) = stack.pop() {
            if seen.insert(module) {
                stack.extend(self.dependencies(module));
            }
        }
        seen
    }

    /// Dependency order for `requested` and its dependencies; all modules
    /// when `requested` is empty
    pub fn order(&self, requested: &[ModuleKind]) -> Result<Vec<ModuleKind>, MigrateError> {
        let selected: BTreeSet<ModuleKind> = if requested.is_empty() {
            self.edges.keys().copied().collect()
        } else {
            self.closure(requested)
        };

        let mut in_degree: BTreeMap<ModuleKind, usize> = selected
            .iter()
            .map(|&module| (module, self.dependencies(module).count()))
            .collect();
        let mut ready: BTreeSet<ModuleKind> = in_degree
            .iter()
            .filter(|(_, &degree)| degree == 0)
            .map(|(&module, _)| module)
            .collect();
        let mut order = Vec::with_capacity(selected.len());

        while let Some(module) = ready.pop_first() {
            order.push(module);
            for (&dependent, degree) in in_degree.iter_mut() {
                if *degree > 0 && self.dependencies(dependent).any(|d| d == module) {
                    *degree -= 1;
                    if *degree == 0 {
                        ready.insert(dependent);
                    }
                }
            }
        }

        if order.len() < selected.len() {
            let cycle: Vec<ModuleKind> = in_degree
                .into_iter()
                .filter(|(_, degree)| *degree > 0)
                .map(|(module, _)| module)
                .collect();
            return Err(MigrateError::DependencyCycle(cycle));
        }

        debug_assert_eq!(order.len(), selected.len(), "Postcondition: every module ordered");
        Ok(order)
    }
}
