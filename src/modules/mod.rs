//! Content Modules
//!
//! One exporter and one importer per content type. Each module owns its
//! stores and uid maps for the duration of a run and reports per-item
//! failures as data (`fails.json`), returning `Err` only when the module as
//! a whole cannot continue.
//!
//! ## On-disk Layout (per branch)
//!
//! ```text
//! <content>/<module>/...                  chunked stores
//! <content>/<mapper>/<module>/uid-mapper.json
//! <content>/<mapper>/entries/<content type>/uid-mapper.json
//! <content>/<mapper>/<module>/fails.json
//! ```

pub mod assets;
pub mod collection;
pub mod context;
pub mod entries;
pub mod experiences;
pub mod flat;
pub mod kind;
pub mod report;

use crate::error::MigrateError;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

pub use assets::{AssetsModule, ASSET_FILES_DIR, FOLDER_MAPPER_FILE, URL_MAPPER_FILE};
pub use collection::{export_collection, CollectionExport};
pub use context::{retry_transient, MigrationContext, RETRY_ATTEMPTS_MAX};
pub use entries::EntriesModule;
pub use experiences::{ExperiencesModule, FAILED_EXPERIENCES_FILE, VARIANT_MAPPER_FILE};
pub use flat::FlatModule;
pub use kind::ModuleKind;
pub use report::{FailedItem, FailureLog, ModuleReport, FAILS_FILE};

/// Future returned by module runs
pub type ModuleFuture<'a> = Pin<Box<dyn Future<Output = Result<ModuleReport, MigrateError>> + Send + 'a>>;

/// Pulls one module's content from the source into local stores
pub trait ModuleExporter: Send + Sync {
    fn kind(&self) -> ModuleKind;

    fn export<'a>(&'a self, ctx: &'a MigrationContext) -> ModuleFuture<'a>;
}

/// Replays one module's stores into the destination
pub trait ModuleImporter: Send + Sync {
    fn kind(&self) -> ModuleKind;

    fn import<'a>(&'a self, ctx: &'a MigrationContext) -> ModuleFuture<'a>;
}

/// Both halves of a module, for registries that handle export and import
pub trait ContentModule: ModuleExporter + ModuleImporter {}

impl<T: ModuleExporter + ModuleImporter> ContentModule for T {}

/// The built-in module for `kind`
pub fn builtin(kind: ModuleKind) -> Arc<dyn ContentModule> {
    match kind {
        ModuleKind::Stack
        | ModuleKind::Locales
        | ModuleKind::GlobalFields
        | ModuleKind::ContentTypes => Arc::new(FlatModule::new(kind)),
        ModuleKind::Assets => Arc::new(AssetsModule),
        ModuleKind::Entries => Arc::new(EntriesModule),
        ModuleKind::Experiences => Arc::new(ExperiencesModule),
    }
}
