//! Hot path benchmarks for profiling-driven optimization.
//!
//! Run with: `cargo bench --bench hot_paths`
//! Compare baselines: `cargo bench --bench hot_paths -- --baseline main`
//!
//! These cover the per-record work of a migration: appending to the
//! chunked store, remapping references, and ordering folder trees.

use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion, Throughput};
use serde_json::json;
use stack_migrate::mapper::{DirectoryTreeBuilder, UidMapper};
use stack_migrate::record::{Record, PARENT_UID_FIELD};
use stack_migrate::store::{AppendOptions, ChunkFormat, ChunkedStore, StoreOptions};
use stack_migrate::transform::{entries_table, LookupTables, TransformChain, ASSET_URL_TABLE};

fn entry(i: usize) -> Record {
    Record::new(format!("blt{:08}", i))
        .with("locale", "en-us")
        .with("title", format!("Entry number {}", i))
        .with("body", "x".repeat(256))
        .with(
            "hero",
            json!({"uid": format!("asset{}", i % 50), "url": "https://src.cdn/a.png", "filename": "a.png"}),
        )
        .with(
            "related",
            json!([{"uid": format!("blt{:08}", i / 2), "_content_type_uid": "blog"}]),
        )
        .with("publish_details", json!({"environment": "production"}))
}

/// Benchmark ChunkedStore::append_records + complete_store for one page
fn bench_append_records(c: &mut Criterion) {
    let mut group = c.benchmark_group("append_records");
    let page: Vec<Record> = (0..100).map(entry).collect();
    group.throughput(Throughput::Elements(page.len() as u64));

    for (name, chunk_bytes, format) in [
        ("json_1mb", 1024 * 1024, ChunkFormat::Json),
        ("json_16kb", 16 * 1024, ChunkFormat::Json),
        ("text_1mb", 1024 * 1024, ChunkFormat::Text),
    ] {
        group.bench_function(name, |b| {
            b.iter_batched(
                || tempfile::tempdir().unwrap(),
                |dir| {
                    let options = StoreOptions::new(dir.path(), "entries")
                        .with_chunk_byte_size(chunk_bytes)
                        .with_format(format);
                    let mut store = ChunkedStore::create(options).unwrap();
                    store
                        .append_records(black_box(&page), AppendOptions::keyed())
                        .unwrap();
                    store.complete_store(true).unwrap();
                    dir
                },
                BatchSize::PerIteration,
            )
        });
    }

    group.finish();
}

/// Benchmark TransformChain::apply with populated lookup tables
fn bench_transform_chain(c: &mut Criterion) {
    let mut group = c.benchmark_group("transform_chain");
    group.throughput(Throughput::Elements(1));

    let assets = UidMapper::in_memory();
    let entries = UidMapper::in_memory();
    for i in 0..1000 {
        assets.set(&format!("asset{}", i), &format!("dst-asset{}", i)).unwrap();
        entries.set(&format!("blt{:08}", i), &format!("dst{:08}", i)).unwrap();
    }
    let tables = LookupTables::new()
        .with("assets", assets)
        .with(ASSET_URL_TABLE, UidMapper::in_memory())
        .with(entries_table("blog"), entries);
    let chain = TransformChain::standard();
    let record = entry(42);

    group.bench_function("standard", |b| {
        b.iter(|| chain.apply(black_box(record.clone()), &tables).unwrap())
    });

    group.finish();
}

/// Benchmark DirectoryTreeBuilder::build on a deep and a wide tree
fn bench_tree_build(c: &mut Criterion) {
    let mut group = c.benchmark_group("tree_build");

    let chain: Vec<Record> = (0..60)
        .map(|i| {
            let folder = Record::new(format!("f{}", i));
            if i == 0 {
                folder
            } else {
                folder.with(PARENT_UID_FIELD, format!("f{}", i - 1))
            }
        })
        .rev()
        .collect();
    let wide: Vec<Record> = (0..1000)
        .map(|i| {
            let folder = Record::new(format!("f{}", i));
            if i < 10 {
                folder
            } else {
                folder.with(PARENT_UID_FIELD, format!("f{}", i % 10))
            }
        })
        .collect();

    let builder = DirectoryTreeBuilder::new();
    for (name, records) in [("deep_60", &chain), ("wide_1000", &wide)] {
        group.throughput(Throughput::Elements(records.len() as u64));
        group.bench_function(name, |b| b.iter(|| builder.build(black_box(records)).unwrap()));
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_append_records,
    bench_transform_chain,
    bench_tree_build,
);

criterion_main!(benches);
