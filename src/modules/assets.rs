//! Assets and their folder hierarchy
//!
//! ## Export
//!
//! 1. Folders into `assets/folders`
//! 2. Asset records into `assets/` with a `uid/url/filename/parent_uid`
//!    metadata sidecar
//! 3. Download pass: binaries land in `assets/files/<uid>/<filename>`.
//!    Files already on disk are not fetched again, so a rerun only
//!    downloads what is missing.
//!
//! ## Import
//!
//! Folders are created level by level so every parent exists (and is
//! mapped) before its children. Assets are then created under their
//! remapped folder. Besides the uid map, a url map lets entry fixups
//! rewrite embedded asset urls.

use crate::api::{ApiError, ListQuery};
use crate::batch::{RequestSlot, Settled};
use crate::error::MigrateError;
use crate::mapper::{DirectoryTreeBuilder, UidMapper};
use crate::modules::collection::{
    export_collection, read_stored, write_pending, write_pending_with, PendingWrite, WriteCounts,
    WriteOp,
};
use crate::modules::{
    retry_transient, FailureLog, MigrationContext, ModuleExporter, ModuleFuture, ModuleImporter,
    ModuleKind, ModuleReport,
};
use crate::record::{Record, PARENT_UID_FIELD};
use crate::store::{
    is_plain_segment, list_files_recursively, write_bytes_atomic, ChunkedStore, StoreError,
    StoreOptions,
};
use crate::transform::{LookupTables, TransformStage};
use bytes::Bytes;
use serde_json::Value;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Remote collection of asset folders
pub const FOLDERS_COLLECTION: &str = "folders";
/// Subdirectory of the asset store holding downloaded binaries
pub const ASSET_FILES_DIR: &str = "files";
/// Subdirectory of the asset store holding the folder store
pub const FOLDERS_DIR: &str = "folders";
pub const FOLDER_MAPPER_FILE: &str = "folder-mapper.json";
pub const URL_MAPPER_FILE: &str = "url-mapper.json";
/// Fields projected into the asset metadata sidecar
pub const ASSET_METADATA_FIELDS: [&str; 4] = ["uid", "url", "filename", PARENT_UID_FIELD];
/// Field set on imported assets with the size of the local binary
pub const FILE_SIZE_FIELD: &str = "file_size";

/// Exporter/importer for assets and folders
#[derive(Debug, Clone, Copy, Default)]
pub struct AssetsModule;

/// A binary still to fetch
#[derive(Debug, Clone)]
struct Download {
    uid: String,
    url: String,
    target: PathBuf,
}

impl AssetsModule {
    fn asset_options(ctx: &MigrationContext) -> StoreOptions {
        ctx.store_options(&ctx.module_dir(ModuleKind::Assets), ModuleKind::Assets)
            .with_metadata_fields(ASSET_METADATA_FIELDS)
    }

    fn folder_options(ctx: &MigrationContext) -> StoreOptions {
        let base = ctx.module_dir(ModuleKind::Assets).join(FOLDERS_DIR);
        ctx.store_options(&base, ModuleKind::Assets)
    }

    fn files_dir(ctx: &MigrationContext) -> PathBuf {
        ctx.module_dir(ModuleKind::Assets).join(ASSET_FILES_DIR)
    }

    /// Local path of an asset's binary, if the record names one.
    ///
    /// Both segments come from remote records and must each be one plain
    /// path component, so the binary always lands under `files_dir`.
    fn binary_path(files_dir: &Path, record: &Record) -> Result<Option<PathBuf>, String> {
        let (Some(uid), Some(filename)) = (record.uid(), record.get_str("filename")) else {
            return Ok(None);
        };
        for segment in [uid, filename] {
            if !is_plain_segment(segment) {
                return Err(format!("unsafe binary path segment {:?}", segment));
            }
        }
        Ok(Some(files_dir.join(uid).join(filename)))
    }

    async fn run_export(&self, ctx: &MigrationContext) -> Result<ModuleReport, MigrateError> {
        let mut report = ModuleReport::new(ModuleKind::Assets);
        let mut failures = FailureLog::new(&ctx.mapper_dir(ModuleKind::Assets));
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
        let folders = export_collection(
            ctx,
            FOLDERS_COLLECTION,
            ListQuery::new(),
            Self::folder_options(ctx),
            failures,
        )
        .await?;
        let assets = export_collection(
            ctx,
            ModuleKind::Assets.collection(),
            ListQuery::new(),
            Self::asset_options(ctx),
            failures,
        )
        .await?;
        report.exported = folders.records + assets.records;
        report.chunks = folders.chunks + assets.chunks;
        report.downloaded = self.download_missing(ctx, failures).await?;
        Ok(())
    }

    /// Fetch every binary the sidecar lists that is not on disk yet
    async fn download_missing(
        &self,
        ctx: &MigrationContext,
        failures: &mut FailureLog,
    ) -> Result<u64, MigrateError> {
        let store = ChunkedStore::open_existing(Self::asset_options(ctx))?;
        let sidecar = store.read_plain_metadata()?;
        let files_dir = Self::files_dir(ctx);
        std::fs::create_dir_all(&files_dir).map_err(|e| StoreError::io(&files_dir, e))?;
        let on_disk: HashSet<PathBuf> = list_files_recursively(&files_dir)?.into_iter().collect();

        let mut downloads = Vec::new();
        for projected in sidecar.records() {
            let (Some(uid), Some(url)) = (projected.uid(), projected.get_str("url")) else {
                continue;
            };
            let target = match Self::binary_path(&files_dir, projected) {
                Ok(Some(target)) => target,
                Ok(None) => continue,
                Err(reason) => {
                    failures.record_in(uid, reason, url);
                    continue;
                }
            };
            if on_disk.contains(&target) {
                continue;
            }
            downloads.push(Download {
                uid: uid.to_string(),
                url: url.to_string(),
                target,
            });
        }
        debug!(
            "{} of {} asset binaries to download",
            downloads.len(),
            sidecar.len()
        );
        if downloads.is_empty() {
            return Ok(0);
        }

        let api = ctx.api.as_ref();
        let pending = &downloads;
        let (batch, abort) = ctx.abortable_batch();
        let mut written = 0u64;
        let mut write_error: Option<StoreError> = None;

        let stats = batch
            .run_items(
                downloads.len(),
                move |slot: RequestSlot| {
                    let url = pending[slot.index].url.as_str();
                    retry_transient(move || api.download(url))
                },
                |settled: Settled, data: Bytes| {
                    if write_error.is_some() {
                        return;
                    }
                    match write_bytes_atomic(&pending[settled.slot.index].target, &data) {
                        Ok(()) => written += 1,
                        Err(e) => {
                            write_error = Some(e);
                            abort.cancel();
                        }
                    }
                },
                |settled: Settled, e: ApiError| {
                    let download = &pending[settled.slot.index];
                    failures.record_in(&download.uid, e, download.url.as_str());
                },
            )
            .await;

        if let Some(e) = write_error {
            return Err(e.into());
        }
        if stats.cancelled {
            return Err(MigrateError::Cancelled);
        }
        info!("Downloaded {} asset binaries", written);
        Ok(written)
    }

    async fn run_import(&self, ctx: &MigrationContext) -> Result<ModuleReport, MigrateError> {
        let mut failures = FailureLog::new(&ctx.mapper_dir(ModuleKind::Assets));
        let mut counts = WriteCounts::default();
        let result = self.import_all(ctx, &mut failures, &mut counts).await;
        failures.flush()?;
        result?;

        let mut report = ModuleReport::new(ModuleKind::Assets);
        report.created = counts.created;
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
        let folder_mapper = ctx.named_mapper(ModuleKind::Assets, FOLDER_MAPPER_FILE)?;
        self.import_folders(ctx, &folder_mapper, failures, counts).await?;

        let asset_mapper = ctx.uid_mapper(ModuleKind::Assets)?;
        let url_mapper = ctx.named_mapper(ModuleKind::Assets, URL_MAPPER_FILE)?;
        let records = read_stored(Self::asset_options(ctx))?;
        let files_dir = Self::files_dir(ctx);
        let cleanup = ctx.transforms.restricted_to(&[TransformStage::PublishDetails]);
        let tables = LookupTables::new();

        let mut writes = Vec::with_capacity(records.len());
        for record in records {
            let Some(uid) = record.uid().map(str::to_string) else {
                counts.failed += 1;
                failures.record_in("<missing uid>", "record has no uid", "assets");
                continue;
            };
            if asset_mapper.has(&uid) {
                counts.skipped += 1;
                continue;
            }
            let path = match Self::binary_path(&files_dir, &record) {
                Ok(path) => path,
                Err(reason) => {
                    counts.failed += 1;
                    failures.record_in(&uid, reason, "assets");
                    continue;
                }
            };
            let size = match path.map(std::fs::metadata) {
                Some(Ok(meta)) if meta.is_file() => meta.len(),
                _ => {
                    counts.failed += 1;
                    failures.record_in(&uid, "binary not downloaded", "assets");
                    continue;
                }
            };

            let mut payload = record;
            let parent = payload
                .parent_uid()
                .and_then(|p| folder_mapper.get(p))
                .map_or(Value::Null, Value::String);
            payload.set(PARENT_UID_FIELD, parent);
            payload.set(FILE_SIZE_FIELD, size);
            match cleanup.apply(payload, &tables) {
                Ok(payload) => writes.push(PendingWrite {
                    source_uid: uid,
                    op: WriteOp::Create,
                    payload,
                }),
                Err(e) => {
                    counts.failed += 1;
                    failures.record_in(&uid, e, "assets");
                }
            }
        }

        write_pending_with(
            ctx,
            ModuleKind::Assets.collection(),
            &writes,
            &asset_mapper,
            failures,
            "assets",
            counts,
            |write, created| match (write.payload.get_str("url"), created.get_str("url")) {
                (Some(source), Some(destination)) => url_mapper.set(source, destination),
                _ => Ok(()),
            },
        )
        .await
    }

    /// Parents first: one batch run per tree level
    async fn import_folders(
        &self,
        ctx: &MigrationContext,
        folder_mapper: &UidMapper,
        failures: &mut FailureLog,
        counts: &mut WriteCounts,
    ) -> Result<(), MigrateError> {
        let folders = read_stored(Self::folder_options(ctx))?;
        let tree = DirectoryTreeBuilder::new().build(&folders)?;
        let mut folder_counts = WriteCounts::default();

        for level in tree.levels() {
            let writes: Vec<PendingWrite> = level
                .iter()
                .filter(|node| {
                    let mapped = folder_mapper.has(node.uid());
                    if mapped {
                        folder_counts.skipped += 1;
                    }
                    !mapped
                })
                .map(|node| {
                    let parent = node
                        .destination_parent(folder_mapper)
                        .map_or(Value::Null, Value::String);
                    PendingWrite {
                        source_uid: node.uid().to_string(),
                        op: WriteOp::Create,
                        payload: node.record.clone().with(PARENT_UID_FIELD, parent),
                    }
                })
                .collect();
            write_pending(
                ctx,
                FOLDERS_COLLECTION,
                &writes,
                folder_mapper,
                failures,
                FOLDERS_COLLECTION,
                &mut folder_counts,
            )
            .await?;
        }

        debug!(
            "Folders: {} created, {} skipped, {} failed",
            folder_counts.created, folder_counts.skipped, folder_counts.failed
        );
        counts.failed += folder_counts.failed;
        Ok(())
    }
}

impl ModuleExporter for AssetsModule {
    fn kind(&self) -> ModuleKind {
        ModuleKind::Assets
    }

    fn export<'a>(&'a self, ctx: &'a MigrationContext) -> ModuleFuture<'a> {
        Box::pin(self.run_export(ctx))
    }
}

impl ModuleImporter for AssetsModule {
    fn kind(&self) -> ModuleKind {
        ModuleKind::Assets
    }

    fn import<'a>(&'a self, ctx: &'a MigrationContext) -> ModuleFuture<'a> {
        Box::pin(self.run_import(ctx))
    }
}
