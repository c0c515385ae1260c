//! Chunked store tests against the real filesystem
//!
//! Write a collection through one store handle, reopen it through another
//! and check what a later import relies on: every chunk is indexed, no
//! chunk outgrows the bound by more than one record, and records read back
//! in write order.

use serde_json::json;
use stack_migrate::store::{
    list_files_recursively, AppendOptions, ChunkFormat, ChunkedStore, Direction, StoreError,
    StoreOptions, INDEX_FILE_NAME, METADATA_FILE_NAME,
};
use stack_migrate::Record;
use std::collections::BTreeSet;
use std::path::Path;

const CHUNK_BYTES: u64 = 2 * 1024;

fn asset(i: usize) -> Record {
    Record::new(format!("asset{:04}", i))
        .with("filename", format!("photo-{}.jpg", i))
        .with("url", format!("https://src.cdn/asset{:04}/photo-{}.jpg", i, i))
        .with("description", "d".repeat(i % 300))
        .with("tags", json!(["migrated", format!("batch-{}", i / 10)]))
}

fn options(dir: &Path, format: ChunkFormat) -> StoreOptions {
    StoreOptions::new(dir, "assets")
        .with_chunk_byte_size(CHUNK_BYTES)
        .with_format(format)
        .with_metadata_fields(["uid", "filename"])
}

fn write_pages(dir: &Path, format: ChunkFormat, records: &[Record]) {
    let mut store = ChunkedStore::create(options(dir, format)).unwrap();
    let pages: Vec<&[Record]> = records.chunks(25).collect();
    let last = pages.len() - 1;
    for (i, page) in pages.into_iter().enumerate() {
        let mut opts = AppendOptions::keyed();
        opts.close_chunk = i == last;
        store.append_records(page, opts).unwrap();
    }
    let stats = store.complete_store(true).unwrap();
    assert_eq!(stats.records_written, records.len() as u64);
}

#[test]
fn test_every_chunk_on_disk_is_indexed() {
    for format in [ChunkFormat::Json, ChunkFormat::Text] {
        let dir = tempfile::tempdir().unwrap();
        let records: Vec<Record> = (0..200).map(asset).collect();
        write_pages(dir.path(), format, &records);

        let store = ChunkedStore::open_existing(options(dir.path(), format)).unwrap();
        let index = store.read_index().unwrap();
        assert!(index.total_chunks() > 1, "{:?}: expected several chunks", format);

        let indexed: BTreeSet<String> = index.file_names().map(str::to_string).collect();
        let on_disk: BTreeSet<String> = list_files_recursively(dir.path())
            .unwrap()
            .into_iter()
            .filter_map(|path| path.file_name()?.to_str().map(str::to_string))
            .filter(|f| f != INDEX_FILE_NAME && f != METADATA_FILE_NAME)
            .collect();
        assert_eq!(indexed, on_disk, "{:?}: orphaned or missing chunk files", format);
    }
}

#[test]
fn test_chunks_stay_within_one_record_of_the_bound() {
    let dir = tempfile::tempdir().unwrap();
    let records: Vec<Record> = (0..200).map(asset).collect();
    write_pages(dir.path(), ChunkFormat::Json, &records);

    let largest_record = records
        .iter()
        .map(|r| serde_json::to_vec(r).unwrap().len() as u64)
        .max()
        .unwrap();
    let store = ChunkedStore::open_existing(options(dir.path(), ChunkFormat::Json)).unwrap();
    for name in store.read_index().unwrap().file_names() {
        let size = std::fs::metadata(dir.path().join(name)).unwrap().len();
        // key, separators and framing add a few bytes per record
        assert!(
            size < CHUNK_BYTES + largest_record + 64,
            "chunk {} is {} bytes",
            name,
            size
        );
    }
}

#[test]
fn test_read_back_in_write_order() {
    let dir = tempfile::tempdir().unwrap();
    let records: Vec<Record> = (0..120).map(asset).collect();
    write_pages(dir.path(), ChunkFormat::Text, &records);

    let mut store = ChunkedStore::open_existing(options(dir.path(), ChunkFormat::Text)).unwrap();
    assert_eq!(store.read_all_records().unwrap(), records);

    let mut forward = Vec::new();
    while let Some(chunk) = store.read_chunk_sequential(Direction::Next).unwrap() {
        forward.extend(chunk);
    }
    assert_eq!(forward, records);

    store.reset_cursor();
    let mut backward = Vec::new();
    while let Some(chunk) = store.read_chunk_sequential(Direction::Previous).unwrap() {
        backward.push(chunk);
    }
    let rebuilt: Vec<Record> = backward.into_iter().rev().flatten().collect();
    assert_eq!(rebuilt, records);

    let sidecar = store.read_plain_metadata().unwrap();
    assert_eq!(sidecar.len(), records.len());
}

#[test]
fn test_corrupt_chunk_fails_the_read() {
    let dir = tempfile::tempdir().unwrap();
    let records: Vec<Record> = (0..60).map(asset).collect();
    write_pages(dir.path(), ChunkFormat::Json, &records);

    let store = ChunkedStore::open_existing(options(dir.path(), ChunkFormat::Json)).unwrap();
    let index = store.read_index().unwrap();
    let first = index.get(1).unwrap().to_string();
    std::fs::write(dir.path().join(&first), br#"{"asset0000":{"uid":"asset0000"},"asset0001":7}"#)
        .unwrap();

    assert!(matches!(
        store.read_chunk_by_index(1),
        Err(StoreError::Malformed { .. })
    ));
    assert!(matches!(
        store.read_all_records(),
        Err(StoreError::Malformed { .. })
    ));
}
