//! Flat collections: stack settings, locales, global fields, content types
//!
//! One store per collection, no hierarchy, no cross-references that need
//! remapping. Import only strips server-assigned fields.

use crate::api::ListQuery;
use crate::error::MigrateError;
use crate::modules::collection::{
    export_collection, plan_creates, read_stored, write_pending, WriteCounts,
};
use crate::modules::{
    FailureLog, MigrationContext, ModuleExporter, ModuleFuture, ModuleImporter, ModuleKind,
    ModuleReport,
};
use crate::record::Record;
use crate::store::StoreOptions;
use crate::transform::{LookupTables, TransformStage};
use tracing::info;

/// Field holding a locale's code
pub const LOCALE_CODE_FIELD: &str = "code";

/// Exporter/importer for a flat collection
#[derive(Debug, Clone, Copy)]
pub struct FlatModule {
    kind: ModuleKind,
}

impl FlatModule {
    pub fn new(kind: ModuleKind) -> Self {
        debug_assert!(
            matches!(
                kind,
                ModuleKind::Stack
                    | ModuleKind::Locales
                    | ModuleKind::GlobalFields
                    | ModuleKind::ContentTypes
            ),
            "Precondition: {} is not a flat collection",
            kind
        );
        FlatModule { kind }
    }

    fn store_options(&self, ctx: &MigrationContext) -> StoreOptions {
        ctx.store_options(&ctx.module_dir(self.kind), self.kind)
    }

    async fn run_export(&self, ctx: &MigrationContext) -> Result<ModuleReport, MigrateError> {
        let mut report = ModuleReport::new(self.kind);
        let mut failures = FailureLog::new(&ctx.mapper_dir(self.kind));
        let result = export_collection(
            ctx,
            self.kind.collection(),
            ListQuery::new(),
            self.store_options(ctx),
            &mut failures,
        )
        .await;
        failures.flush()?;

        let export = result?;
        report.exported = export.records;
        report.chunks = export.chunks;
        report.failed = failures.len() as u64;
        Ok(report)
    }

    async fn run_import(&self, ctx: &MigrationContext) -> Result<ModuleReport, MigrateError> {
        let mut failures = FailureLog::new(&ctx.mapper_dir(self.kind));
        let mut counts = WriteCounts::default();
        let result = self.import_records(ctx, &mut failures, &mut counts).await;
        failures.flush()?;
        result?;

        let mut report = ModuleReport::new(self.kind);
        report.created = counts.created;
        report.skipped = counts.skipped;
        report.failed = counts.failed;
        info!("Imported {}", report);
        Ok(report)
    }

    async fn import_records(
        &self,
        ctx: &MigrationContext,
        failures: &mut FailureLog,
        counts: &mut WriteCounts,
    ) -> Result<(), MigrateError> {
        let mut records = read_stored(self.store_options(ctx))?;
        if self.kind == ModuleKind::Locales {
            // the master locale exists at the destination already
            let master = ctx.master_locale();
            let before = records.len();
            records.retain(|r| r.get_str(LOCALE_CODE_FIELD) != Some(master));
            counts.skipped += (before - records.len()) as u64;
        }

        let mapper = ctx.uid_mapper(self.kind)?;
        let cleanup = ctx.transforms.restricted_to(&[TransformStage::PublishDetails]);
        let tables = LookupTables::new();
        let writes = plan_creates(
            records,
            &mapper,
            |record: Record| cleanup.apply(record, &tables),
            failures,
            self.kind.as_str(),
            counts,
        );
        write_pending(
            ctx,
            self.kind.collection(),
            &writes,
            &mapper,
            failures,
            self.kind.as_str(),
            counts,
        )
        .await
    }
}

impl ModuleExporter for FlatModule {
    fn kind(&self) -> ModuleKind {
        self.kind
    }

    fn export<'a>(&'a self, ctx: &'a MigrationContext) -> ModuleFuture<'a> {
        Box::pin(self.run_export(ctx))
    }
}

impl ModuleImporter for FlatModule {
    fn kind(&self) -> ModuleKind {
        self.kind
    }

    fn import<'a>(&'a self, ctx: &'a MigrationContext) -> ModuleFuture<'a> {
        Box::pin(self.run_import(ctx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::InMemoryContentApi;
    use crate::clock::SimulatedClock;
    use crate::config::MigrationConfig;
    use std::sync::Arc;

    fn context(dir: &std::path::Path, api: &InMemoryContentApi) -> MigrationContext {
        MigrationContext::new(
            Arc::new(api.clone()),
            Arc::new(SimulatedClock::new(0)),
            Arc::new(MigrationConfig::test(dir)),
            "main",
        )
    }

    fn locale(uid: &str, code: &str) -> Record {
        Record::new(uid)
            .with(LOCALE_CODE_FIELD, code)
            .with("created_at", "2024-01-01")
    }

    #[tokio::test]
    async fn test_locales_round_trip_skips_master() {
        let dir = tempfile::tempdir().unwrap();
        let source = InMemoryContentApi::new("src");
        source.seed(
            "locales",
            vec![locale("l1", "en-us"), locale("l2", "fr-fr"), locale("l3", "de-de")],
        );
        let destination = InMemoryContentApi::new("dst");
        let module = FlatModule::new(ModuleKind::Locales);

        let exported = module.export(&context(dir.path(), &source)).await.unwrap();
        assert_eq!(exported.exported, 3);

        let imported = module.import(&context(dir.path(), &destination)).await.unwrap();
        assert_eq!(imported.created, 2);
        assert_eq!(imported.skipped, 1);

        let created = destination.records("locales");
        assert_eq!(created.len(), 2);
        assert!(created.iter().all(|r| !r.contains("created_at")));
    }

    #[tokio::test]
    async fn test_second_import_creates_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let source = InMemoryContentApi::new("src");
        source.seed("global_fields", (0..5).map(|i| Record::new(format!("gf{}", i))));
        let destination = InMemoryContentApi::new("dst");
        let module = FlatModule::new(ModuleKind::GlobalFields);

        module.export(&context(dir.path(), &source)).await.unwrap();
        module.import(&context(dir.path(), &destination)).await.unwrap();
        let again = module.import(&context(dir.path(), &destination)).await.unwrap();

        assert_eq!(again.created, 0);
        assert_eq!(again.skipped, 5);
        assert_eq!(destination.create_count("global_fields"), 5);
    }

    #[tokio::test]
    async fn test_import_without_export_is_structural() {
        let dir = tempfile::tempdir().unwrap();
        let destination = InMemoryContentApi::new("dst");
        let module = FlatModule::new(ModuleKind::ContentTypes);
        let err = module.import(&context(dir.path(), &destination)).await.unwrap_err();
        assert!(err.is_structural());
    }
}
