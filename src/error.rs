//! Migration error type
//!
//! Each layer has its own error enum; `MigrateError` wraps them at module
//! boundaries. A module returning `Err` failed as a whole. Per-item API
//! failures never become a `MigrateError`: they are recorded in the
//! module's fails file and counted in its report.

use crate::api::ApiError;
use crate::config::ConfigError;
use crate::mapper::{MapperError, TreeError};
use crate::modules::ModuleKind;
use crate::store::StoreError;
use crate::transform::TransformError;

/// Error that aborts a module or a run
#[derive(Debug)]
pub enum MigrateError {
    Config(ConfigError),
    Store(StoreError),
    Mapper(MapperError),
    Tree(TreeError),
    /// Module-level API failure (e.g. the initial count probe)
    Api(ApiError),
    Transform(TransformError),
    /// A module this one depends on did not complete in this run
    MissingDependency {
        module: ModuleKind,
        missing: Vec<ModuleKind>,
    },
    /// The module dependency graph has a cycle through these modules
    DependencyCycle(Vec<ModuleKind>),
    /// No exporter/importer registered for a module
    UnsupportedModule(ModuleKind),
    /// Run was cancelled
    Cancelled,
}

impl MigrateError {
    /// Missing directories, malformed files, invalid configuration and
    /// broken dependency wiring. These fail the module outright and are
    /// not worth retrying.
    pub fn is_structural(&self) -> bool {
        match self {
            MigrateError::Config(_)
            | MigrateError::Store(_)
            | MigrateError::Tree(_)
            | MigrateError::MissingDependency { .. }
            | MigrateError::DependencyCycle(_)
            | MigrateError::UnsupportedModule(_) => true,
            MigrateError::Mapper(e) => matches!(e, MapperError::Store(_)),
            MigrateError::Api(_) | MigrateError::Transform(_) | MigrateError::Cancelled => false,
        }
    }
}

impl std::fmt::Display for MigrateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MigrateError::Config(e) => write!(f, "{}", e),
            MigrateError::Store(e) => write!(f, "Store error: {}", e),
            MigrateError::Mapper(e) => write!(f, "Mapper error: {}", e),
            MigrateError::Tree(e) => write!(f, "Hierarchy error: {}", e),
            MigrateError::Api(e) => write!(f, "API error: {}", e),
            MigrateError::Transform(e) => write!(f, "Transform error: {}", e),
            MigrateError::MissingDependency { module, missing } => {
                let names: Vec<&str> = missing.iter().map(|m| m.as_str()).collect();
                write!(
                    f,
                    "Module {} cannot run: missing dependencies [{}]",
                    module,
                    names.join(", ")
                )
            }
            MigrateError::DependencyCycle(modules) => {
                let names: Vec<&str> = modules.iter().map(|m| m.as_str()).collect();
                write!(f, "Module dependency cycle through [{}]", names.join(", "))
            }
            MigrateError::UnsupportedModule(module) => {
                write!(f, "No handler registered for module {}", module)
            }
            MigrateError::Cancelled => write!(f, "Migration cancelled"),
        }
    }
}

impl std::error::Error for MigrateError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            MigrateError::Config(e) => Some(e),
            MigrateError::Store(e) => Some(e),
            MigrateError::Mapper(e) => Some(e),
            MigrateError::Tree(e) => Some(e),
            MigrateError::Api(e) => Some(e),
            MigrateError::Transform(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ConfigError> for MigrateError {
    fn from(e: ConfigError) -> Self {
        MigrateError::Config(e)
    }
}

impl From<StoreError> for MigrateError {
    fn from(e: StoreError) -> Self {
        MigrateError::Store(e)
    }
}

impl From<MapperError> for MigrateError {
    fn from(e: MapperError) -> Self {
        MigrateError::Mapper(e)
    }
}

impl From<TreeError> for MigrateError {
    fn from(e: TreeError) -> Self {
        MigrateError::Tree(e)
    }
}

impl From<ApiError> for MigrateError {
    fn from(e: ApiError) -> Self {
        MigrateError::Api(e)
    }
}

impl From<TransformError> for MigrateError {
    fn from(e: TransformError) -> Self {
        MigrateError::Transform(e)
    }
}
