//! Shared export/import passes over one remote collection
//!
//! Export: count probe, paged fetch through the batch driver, every page
//! streamed into a key-mapped chunked store. The last settled callback
//! closes the open chunk.
//!
//! Import: records already in the uid map are skipped, the rest are
//! prepared (transformed) and written one request per item. Each create is
//! mapped as soon as it resolves, so an interrupted import resumes without
//! duplicates.

use crate::api::{ApiError, ListQuery, ListResponse};
use crate::batch::{RequestSlot, Settled};
use crate::error::MigrateError;
use crate::mapper::{MapperError, UidMapper};
use crate::modules::{retry_transient, FailureLog, MigrationContext};
use crate::record::Record;
use crate::store::{AppendOptions, ChunkedStore, StoreError, StoreOptions};
use std::fmt::Display;
use tracing::{debug, info};

/// Result of exporting one collection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CollectionExport {
    pub records: u64,
    pub chunks: usize,
    pub failed_pages: usize,
}

/// Page `content_type` matching `query` into a fresh store at `options`
pub async fn export_collection(
    ctx: &MigrationContext,
    content_type: &str,
    query: ListQuery,
    options: StoreOptions,
    failures: &mut FailureLog,
) -> Result<CollectionExport, MigrateError> {
    let api = ctx.api.as_ref();
    let total = retry_transient(|| api.list(content_type, query.clone().count_only()))
        .await?
        .count;
    debug!("Exporting {} {} records", total, content_type);

    let mut store = ChunkedStore::create(options.with_key_field(crate::record::UID_FIELD))?;
    let mut write_error: Option<StoreError> = None;
    let mut records = 0u64;
    let mut failed_pages = 0usize;
    let (batch, abort) = ctx.abortable_batch();

    let stats = batch
        .run_pages(
            total,
            &query,
            move |page: ListQuery| retry_transient(move || api.list(content_type, page.clone())),
            |settled: Settled, page: ListResponse| {
                if write_error.is_some() {
                    return;
                }
                let opts = AppendOptions {
                    map_key_val: true,
                    close_chunk: settled.ends_run,
                };
                match store.append_records(&page.items, opts) {
                    Ok(()) => records += page.items.len() as u64,
                    Err(e) => {
                        write_error = Some(e);
                        abort.cancel();
                    }
                }
            },
            |settled: Settled, e: ApiError| {
                failed_pages += 1;
                let window = format!(
                    "{}[{}..{}]",
                    content_type,
                    settled.slot.skip,
                    settled.slot.skip + settled.slot.limit
                );
                failures.record_in(&window, e, content_type);
            },
        )
        .await;

    if let Some(e) = write_error {
        return Err(e.into());
    }
    if stats.cancelled {
        return Err(MigrateError::Cancelled);
    }

    let written = store.complete_store(true)?;
    info!(
        "Exported {} {} records into {} chunks",
        records, content_type, written.chunks_finalized
    );
    Ok(CollectionExport {
        records,
        chunks: written.chunks_finalized,
        failed_pages,
    })
}

/// Every record of a completed collection. A missing directory or index
/// means the collection was never exported and fails the caller.
pub fn read_stored(options: StoreOptions) -> Result<Vec<Record>, StoreError> {
    ChunkedStore::open_existing(options)?.read_all_records()
}

/// What a pending write does at the destination
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    Create,
    /// Update of an already-mapped destination object
    Update(String),
}

/// One prepared destination write
#[derive(Debug, Clone, PartialEq)]
pub struct PendingWrite {
    pub source_uid: String,
    pub op: WriteOp,
    pub payload: Record,
}

/// Counters of one import pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteCounts {
    pub created: u64,
    pub updated: u64,
    pub skipped: u64,
    pub failed: u64,
}

/// Split `records` into creates for unmapped uids; mapped ones are skipped.
/// `prepare` runs on every record that will be written; its failures and
/// records without a uid go to `failures`.
pub fn plan_creates<F, E>(
    records: Vec<Record>,
    mapper: &UidMapper,
    mut prepare: F,
    failures: &mut FailureLog,
    context: &str,
    counts: &mut WriteCounts,
) -> Vec<PendingWrite>
where
    F: FnMut(Record) -> Result<Record, E>,
    E: Display,
{
    let mut writes = Vec::with_capacity(records.len());
    for record in records {
        let Some(uid) = record.uid().map(str::to_string) else {
            counts.failed += 1;
            failures.record_in("<missing uid>", "record has no uid", context);
            continue;
        };
        if mapper.has(&uid) {
            counts.skipped += 1;
            continue;
        }
        match prepare(record) {
            Ok(payload) => writes.push(PendingWrite {
                source_uid: uid,
                op: WriteOp::Create,
                payload,
            }),
            Err(e) => {
                counts.failed += 1;
                failures.record_in(&uid, e, context);
            }
        }
    }
    writes
}

/// Issue `writes` against `content_type`, mapping every create in `mapper`
/// as it resolves
pub async fn write_pending(
    ctx: &MigrationContext,
    content_type: &str,
    writes: &[PendingWrite],
    mapper: &UidMapper,
    failures: &mut FailureLog,
    context: &str,
    counts: &mut WriteCounts,
) -> Result<(), MigrateError> {
    write_pending_with(
        ctx,
        content_type,
        writes,
        mapper,
        failures,
        context,
        counts,
        |_, _| Ok(()),
    )
    .await
}

/// [`write_pending`] with a hook run after each create is mapped, for
/// secondary maps keyed by something other than the uid
pub async fn write_pending_with<C>(
    ctx: &MigrationContext,
    content_type: &str,
    writes: &[PendingWrite],
    mapper: &UidMapper,
    failures: &mut FailureLog,
    context: &str,
    counts: &mut WriteCounts,
    mut on_created: C,
) -> Result<(), MigrateError>
where
    C: FnMut(&PendingWrite, &Record) -> Result<(), MapperError>,
{
    if writes.is_empty() {
        return Ok(());
    }

    let api = ctx.api.as_ref();
    let (batch, abort) = ctx.abortable_batch();
    let mut created = 0u64;
    let mut updated = 0u64;
    let mut late_failures: Vec<(String, String)> = Vec::new();
    let mut fatal: Option<StoreError> = None;

    let stats = batch
        .run_items(
            writes.len(),
            move |slot: RequestSlot| {
                let write = &writes[slot.index];
                let payload = write.payload.clone();
                let target = match &write.op {
                    WriteOp::Create => None,
                    WriteOp::Update(uid) => Some(uid.as_str()),
                };
                retry_transient(move || match target {
                    None => api.create(content_type, payload.clone()),
                    Some(uid) => api.update(content_type, uid, payload.clone()),
                })
            },
            |settled: Settled, written: Record| {
                let write = &writes[settled.slot.index];
                if write.op != WriteOp::Create {
                    updated += 1;
                    return;
                }
                let Some(destination) = written.uid() else {
                    late_failures.push((write.source_uid.clone(), "create returned no uid".into()));
                    return;
                };
                let mapped = mapper
                    .set(&write.source_uid, destination)
                    .and_then(|()| on_created(write, &written));
                match mapped {
                    Ok(()) => created += 1,
                    Err(MapperError::Store(e)) => {
                        if fatal.is_none() {
                            fatal = Some(e);
                        }
                        abort.cancel();
                    }
                    Err(e) => late_failures.push((write.source_uid.clone(), e.to_string())),
                }
            },
            |settled: Settled, e: ApiError| {
                failures.record_in(&writes[settled.slot.index].source_uid, e, context);
            },
        )
        .await;

    for (uid, error) in late_failures {
        failures.record_in(&uid, error, context);
    }
    counts.created += created;
    counts.updated += updated;
    counts.failed += (stats.rejected + stats.resolved) as u64 - created - updated;

    if let Some(e) = fatal {
        return Err(MapperError::Store(e).into());
    }
    if stats.cancelled {
        return Err(MigrateError::Cancelled);
    }
    debug!(
        "{}: {} created, {} updated, {} rejected",
        context, created, updated, stats.rejected
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::InMemoryContentApi;
    use crate::clock::SimulatedClock;
    use crate::config::MigrationConfig;
    use crate::modules::ModuleKind;
    use std::sync::Arc;

    fn context(dir: &std::path::Path, api: InMemoryContentApi) -> MigrationContext {
        MigrationContext::new(
            Arc::new(api),
            Arc::new(SimulatedClock::new(0)),
            Arc::new(MigrationConfig::test(dir)),
            "main",
        )
    }

    #[tokio::test]
    async fn test_export_then_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let api = InMemoryContentApi::new("src");
        api.seed(
            "locales",
            (0..250).map(|i| Record::new(format!("loc{}", i)).with("code", format!("c{}", i))),
        );
        let ctx = context(dir.path(), api);
        let base = ctx.module_dir(ModuleKind::Locales);
        let mut failures = FailureLog::new(dir.path());

        let export = export_collection(
            &ctx,
            "locales",
            ListQuery::new(),
            ctx.store_options(&base, ModuleKind::Locales),
            &mut failures,
        )
        .await
        .unwrap();

        assert_eq!(export.records, 250);
        assert_eq!(export.failed_pages, 0);
        let stored = read_stored(ctx.store_options(&base, ModuleKind::Locales)).unwrap();
        assert_eq!(stored.len(), 250);
    }

    #[tokio::test]
    async fn test_empty_collection_still_writes_index() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path(), InMemoryContentApi::new("src"));
        let base = ctx.module_dir(ModuleKind::GlobalFields);
        let mut failures = FailureLog::new(dir.path());

        let export = export_collection(
            &ctx,
            "global_fields",
            ListQuery::new(),
            ctx.store_options(&base, ModuleKind::GlobalFields),
            &mut failures,
        )
        .await
        .unwrap();
        assert_eq!(export.records, 0);
        assert!(base.join(crate::store::INDEX_FILE_NAME).exists());
    }

    #[test]
    fn test_read_stored_requires_exported_collection() {
        let dir = tempfile::tempdir().unwrap();
        let missing = StoreOptions::new(dir.path().join("never"), "x");
        assert!(matches!(read_stored(missing), Err(StoreError::MissingDirectory(_))));

        let unfinished = StoreOptions::new(dir.path(), "x");
        assert!(matches!(read_stored(unfinished), Err(StoreError::IndexNotFound(_))));
    }

    #[tokio::test]
    async fn test_writes_skip_mapped_and_map_new() {
        let dir = tempfile::tempdir().unwrap();
        let destination = InMemoryContentApi::new("dst");
        let ctx = context(dir.path(), destination.clone());
        let mapper = UidMapper::in_memory();
        mapper.set("A", "X").unwrap();
        let mut failures = FailureLog::new(dir.path());
        let mut counts = WriteCounts::default();

        let writes = plan_creates(
            vec![Record::new("A"), Record::new("B")],
            &mapper,
            Ok::<_, String>,
            &mut failures,
            "locales",
            &mut counts,
        );
        assert_eq!(writes.len(), 1);
        write_pending(&ctx, "locales", &writes, &mapper, &mut failures, "locales", &mut counts)
            .await
            .unwrap();

        assert_eq!(counts.created, 1);
        assert_eq!(counts.skipped, 1);
        assert_eq!(mapper.get("A").as_deref(), Some("X"));
        assert!(mapper.has("B"));
        assert_eq!(destination.create_count("locales"), 1);
    }

    #[tokio::test]
    async fn test_update_of_missing_object_is_item_failure() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path(), InMemoryContentApi::new("dst"));
        let mapper = UidMapper::in_memory();
        let mut failures = FailureLog::new(dir.path());
        let mut counts = WriteCounts::default();
        let writes = vec![PendingWrite {
            source_uid: "e1".into(),
            op: WriteOp::Update("dst_404".into()),
            payload: Record::new("e1"),
        }];

        write_pending(&ctx, "blog", &writes, &mapper, &mut failures, "blog/fr-fr", &mut counts)
            .await
            .unwrap();
        assert_eq!(counts.failed, 1);
        assert_eq!(failures.items()[0].uid, "e1");
    }
}
