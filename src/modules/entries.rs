//! Entries, per content type and locale
//!
//! Export writes one store per `(content type, locale)` under
//! `entries/<content type>/<locale>`. Import walks the master locale first,
//! one chunk at a time, creating entries and mapping them. Other locales
//! then become localized versions (updates) of the mapped entries; an entry
//! that only exists in a non-master locale is created.
//!
//! Entry uids are unique only within a content type, so each content type
//! keeps its own uid map under `<mapper>/entries/<content type>`.
//!
//! Every record goes through the full transform chain: asset fixups, then
//! entry reference fixups, then publish-detail cleanup.

use crate::api::ListQuery;
use crate::error::MigrateError;
use crate::mapper::{MapperError, UidMapper, UID_MAPPER_FILE};
use crate::modules::assets::URL_MAPPER_FILE;
use crate::modules::collection::{
    export_collection, plan_creates, read_stored, write_pending, PendingWrite, WriteCounts,
    WriteOp,
};
use crate::modules::flat::LOCALE_CODE_FIELD;
use crate::modules::{
    FailureLog, MigrationContext, ModuleExporter, ModuleFuture, ModuleImporter, ModuleKind,
    ModuleReport,
};
use crate::record::Record;
use crate::store::{
    is_plain_segment, list_subdirectories, ChunkedStore, Direction, StoreOptions,
};
use crate::transform::{entries_table, LookupTables, ASSET_URL_TABLE};
use std::path::PathBuf;
use tracing::{debug, info};

/// Remote collection holding the entries of one content type
pub fn entries_collection(content_type: &str) -> String {
    format!("content_types/{}/entries", content_type)
}

/// Exporter/importer for entries
#[derive(Debug, Clone, Copy, Default)]
pub struct EntriesModule;

impl EntriesModule {
    fn store_dir(ctx: &MigrationContext, content_type: &str, locale: &str) -> PathBuf {
        ctx.module_dir(ModuleKind::Entries)
            .join(content_type)
            .join(locale)
    }

    fn store_options(ctx: &MigrationContext, content_type: &str, locale: &str) -> StoreOptions {
        ctx.store_options(&Self::store_dir(ctx, content_type, locale), ModuleKind::Entries)
    }

    /// Uid map of one content type's entries
    pub fn uid_mapper(ctx: &MigrationContext, content_type: &str) -> Result<UidMapper, MapperError> {
        UidMapper::load(
            ctx.mapper_dir(ModuleKind::Entries)
                .join(content_type)
                .join(UID_MAPPER_FILE),
        )
    }

    /// Exported content type uids
    fn content_types(ctx: &MigrationContext) -> Result<Vec<String>, MigrateError> {
        let options = ctx.store_options(
            &ctx.module_dir(ModuleKind::ContentTypes),
            ModuleKind::ContentTypes,
        );
        Ok(read_stored(options)?
            .iter()
            .filter_map(|r| r.uid().map(str::to_string))
            .collect())
    }

    /// Master locale first, then every exported locale code
    fn locales(ctx: &MigrationContext) -> Result<Vec<String>, MigrateError> {
        let options = ctx.store_options(&ctx.module_dir(ModuleKind::Locales), ModuleKind::Locales);
        let master = ctx.master_locale().to_string();
        let mut codes = vec![master.clone()];
        for record in read_stored(options)? {
            if let Some(code) = record.get_str(LOCALE_CODE_FIELD) {
                if code != master && !codes.iter().any(|c| c == code) {
                    codes.push(code.to_string());
                }
            }
        }
        Ok(codes)
    }

    async fn run_export(&self, ctx: &MigrationContext) -> Result<ModuleReport, MigrateError> {
        let mut report = ModuleReport::new(ModuleKind::Entries);
        let mut failures = FailureLog::new(&ctx.mapper_dir(ModuleKind::Entries));
        let result = self.export_all(ctx, &mut report, &mut failures).await;
        failures.flush()?;
        result?;
        report.failed = failures.len() as u64;
        info!("Exported {}", report);
        Ok(report)
    }

    async fn export_all(
        &self,
        ctx: &MigrationContext,
        report: &mut ModuleReport,
        failures: &mut FailureLog,
    ) -> Result<(), MigrateError> {
        let content_types = Self::content_types(ctx)?;
        let locales = Self::locales(ctx)?;
        debug!(
            "Exporting entries of {} content types in {} locales",
            content_types.len(),
            locales.len()
        );

        for content_type in &content_types {
            if !is_plain_segment(content_type) {
                failures.record_in(content_type, "unsafe content type uid", "content_types");
                continue;
            }
            let collection = entries_collection(content_type);
            for locale in &locales {
                if !is_plain_segment(locale) {
                    failures.record_in(locale, "unsafe locale code", content_type.as_str());
                    continue;
                }
                let export = export_collection(
                    ctx,
                    &collection,
                    ListQuery::new().locale(locale.as_str()),
                    Self::store_options(ctx, content_type, locale),
                    failures,
                )
                .await?;
                report.exported += export.records;
                report.chunks += export.chunks;
            }
        }
        Ok(())
    }

    async fn run_import(&self, ctx: &MigrationContext) -> Result<ModuleReport, MigrateError> {
        let mut failures = FailureLog::new(&ctx.mapper_dir(ModuleKind::Entries));
        let mut counts = WriteCounts::default();
        let result = self.import_all(ctx, &mut failures, &mut counts).await;
        failures.flush()?;
        result?;

        let mut report = ModuleReport::new(ModuleKind::Entries);
        report.created = counts.created;
        report.updated = counts.updated;
        report.skipped = counts.skipped;
        report.failed = counts.failed;
        info!("Imported {}", report);
        Ok(report)
    }

    async fn import_all(
        &self,
        ctx: &MigrationContext,
        failures: &mut FailureLog,
        counts: &mut WriteCounts,
    ) -> Result<(), MigrateError> {
        let entries_dir = ctx.module_dir(ModuleKind::Entries);
        let content_types = list_subdirectories(&entries_dir)?;

        // references may point into any content type
        let mut tables = LookupTables::new()
            .with("assets", ctx.uid_mapper(ModuleKind::Assets)?)
            .with(ASSET_URL_TABLE, ctx.named_mapper(ModuleKind::Assets, URL_MAPPER_FILE)?);
        let mut mappers = Vec::with_capacity(content_types.len());
        for content_type in &content_types {
            let mapper = Self::uid_mapper(ctx, content_type)?;
            tables.insert(entries_table(content_type), mapper.clone());
            mappers.push(mapper);
        }

        let master = ctx.master_locale().to_string();
        for (content_type, mapper) in content_types.iter().zip(&mappers) {
            let mut locales = list_subdirectories(&entries_dir.join(content_type))?;
            // master locale first so localized versions find their entry mapped
            locales.sort_by_key(|locale| *locale != master);

            for locale in &locales {
                self.import_store(ctx, content_type, locale, mapper, &tables, failures, counts)
                    .await?;
            }
        }
        Ok(())
    }

    async fn import_store(
        &self,
        ctx: &MigrationContext,
        content_type: &str,
        locale: &str,
        mapper: &UidMapper,
        tables: &LookupTables,
        failures: &mut FailureLog,
        counts: &mut WriteCounts,
    ) -> Result<(), MigrateError> {
        let context = format!("{}/{}", content_type, locale);
        let collection = entries_collection(content_type);
        let is_master = locale == ctx.master_locale();
        let mut store = ChunkedStore::open_existing(Self::store_options(ctx, content_type, locale))?;

        while let Some(chunk) = store.read_chunk_sequential(Direction::Next)? {
            let writes = if is_master {
                plan_creates(
                    chunk,
                    mapper,
                    |record: Record| ctx.transforms.apply(record, tables),
                    failures,
                    &context,
                    counts,
                )
            } else {
                self.plan_localized(ctx, chunk, mapper, tables, failures, &context, counts)
            };
            write_pending(ctx, &collection, &writes, mapper, failures, &context, counts).await?;
        }
        Ok(())
    }

    /// Updates for mapped entries, creates for the rest
    fn plan_localized(
        &self,
        ctx: &MigrationContext,
        records: Vec<Record>,
        mapper: &UidMapper,
        tables: &LookupTables,
        failures: &mut FailureLog,
        context: &str,
        counts: &mut WriteCounts,
    ) -> Vec<PendingWrite> {
        let mut writes = Vec::with_capacity(records.len());
        for record in records {
            let Some(uid) = record.uid().map(str::to_string) else {
                counts.failed += 1;
                failures.record_in("<missing uid>", "record has no uid", context);
                continue;
            };
            let payload = match ctx.transforms.apply(record, tables) {
                Ok(payload) => payload,
                Err(e) => {
                    counts.failed += 1;
                    failures.record_in(&uid, e, context);
                    continue;
                }
            };
            let op = match mapper.get(&uid) {
                Some(destination) => WriteOp::Update(destination),
                None => WriteOp::Create,
            };
            writes.push(PendingWrite {
                source_uid: uid,
                op,
                payload,
            });
        }
        writes
    }
}

impl ModuleExporter for EntriesModule {
    fn kind(&self) -> ModuleKind {
        ModuleKind::Entries
    }

    fn export<'a>(&'a self, ctx: &'a MigrationContext) -> ModuleFuture<'a> {
        Box::pin(self.run_export(ctx))
    }
}

impl ModuleImporter for EntriesModule {
    fn kind(&self) -> ModuleKind {
        ModuleKind::Entries
    }

    fn import<'a>(&'a self, ctx: &'a MigrationContext) -> ModuleFuture<'a> {
        Box::pin(self.run_import(ctx))
    }
}
