//! Migration DST Tests
//!
//! Deterministic simulation tests (seed-based): both platforms sit behind
//! the fault-injecting API and every seed replays the same failures.
//!
//! ## Invariants checked
//!
//! 1. **No duplicates**: every object created at the destination is mapped,
//!    so a resumed run never creates it again
//! 2. **Convergence**: after a fault-free resume every source entry is mapped
//! 3. **Determinism**: same seed, same summaries

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use stack_migrate::api::{SimulatedApiConfig, LOCALE_FIELD};
use stack_migrate::mapper::UID_MAPPER_FILE;
use stack_migrate::modules::entries::entries_collection;
use stack_migrate::modules::flat::LOCALE_CODE_FIELD;
use stack_migrate::modules::ModuleKind;
use stack_migrate::{
    ContentApi, InMemoryContentApi, MigrationConfig, MigrationOrchestrator, Record, RunSummary,
    SimulatedClock, SimulatedContentApi, UidMapper,
};
use std::path::Path;
use std::sync::Arc;

const ENTRY_COUNT: usize = 120;

fn seeded_source(seed: u64) -> InMemoryContentApi {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let source = InMemoryContentApi::new("src");
    source.seed("stack", vec![Record::new("stack1")]);
    source.seed(
        "locales",
        vec![
            Record::new("l1").with(LOCALE_CODE_FIELD, "en-us"),
            Record::new("l2").with(LOCALE_CODE_FIELD, "fr-fr"),
        ],
    );
    source.seed("content_types", vec![Record::new("blog")]);

    let mut entries = Vec::new();
    for i in 0..ENTRY_COUNT {
        let uid = format!("e{}", i);
        entries.push(
            Record::new(&uid)
                .with(LOCALE_FIELD, "en-us")
                .with("title", format!("Post {}", i)),
        );
        if rng.gen_bool(0.25) {
            entries.push(
                Record::new(&uid)
                    .with(LOCALE_FIELD, "fr-fr")
                    .with("title", format!("Article {}", i)),
            );
        }
    }
    source.seed(&entries_collection("blog"), entries);
    source
}

fn config(dir: &Path) -> MigrationConfig {
    let mut config = MigrationConfig::test(dir);
    config.modules = vec![ModuleKind::Entries];
    config.batch.page_size = 25;
    config.batch.concurrency_limit = 4;
    config
}

async fn run(
    dir: &Path,
    api: Arc<dyn ContentApi>,
    export: bool,
) -> RunSummary {
    let orchestrator =
        MigrationOrchestrator::new(config(dir), api, Arc::new(SimulatedClock::new(0))).unwrap();
    if export {
        orchestrator.export().await
    } else {
        orchestrator.import().await
    }
}

fn faulty(api: &InMemoryContentApi, seed: u64, faults: SimulatedApiConfig) -> Arc<dyn ContentApi> {
    Arc::new(SimulatedContentApi::new(Arc::new(api.clone()), seed, faults))
}

fn entry_mapper(dir: &Path) -> UidMapper {
    UidMapper::load(
        dir.join("mapper")
            .join(ModuleKind::Entries.as_str())
            .join("blog")
            .join(UID_MAPPER_FILE),
    )
    .unwrap()
}

/// One faulty export + import, then a fault-free resume
async fn run_seed(seed: u64, faults: SimulatedApiConfig) -> (RunSummary, RunSummary) {
    let dir = tempfile::tempdir().unwrap();
    let source = seeded_source(seed);
    let destination = InMemoryContentApi::new("dst");

    // Export without faults so the import side is what gets stressed
    let exported = run(dir.path(), Arc::new(source.clone()), true).await;
    assert!(!exported.has_fatal_errors(), "seed {}: {}", seed, exported);

    let imported = run(dir.path(), faulty(&destination, seed, faults), false).await;

    let collection = entries_collection("blog");
    let mapper = entry_mapper(dir.path());
    assert_eq!(
        destination.create_count(&collection),
        mapper.len() as u64,
        "seed {}: every created entry must be mapped",
        seed
    );

    let resumed = run(dir.path(), Arc::new(destination.clone()), false).await;
    assert!(!resumed.has_fatal_errors(), "seed {}: {}", seed, resumed);

    let mapper = entry_mapper(dir.path());
    assert_eq!(mapper.len(), ENTRY_COUNT, "seed {}: resume did not converge", seed);
    assert_eq!(
        destination.create_count(&collection),
        ENTRY_COUNT as u64,
        "seed {}: resume created duplicates",
        seed
    );
    (imported, resumed)
}

// =============================================================================
// Single Seed Tests
// =============================================================================

#[tokio::test]
async fn test_migration_dst_single_calm() {
    let (imported, _) = run_seed(12345, SimulatedApiConfig::no_faults()).await;
    assert!(!imported.has_fatal_errors(), "{}", imported);
    assert_eq!(imported.item_failures(), 0);
}

#[tokio::test]
async fn test_migration_dst_single_chaos() {
    let (imported, resumed) = run_seed(54321, SimulatedApiConfig::high_chaos()).await;
    println!("{}", imported);
    println!("{}", resumed);
}

// =============================================================================
// Multi-Seed Tests
// =============================================================================

#[tokio::test]
async fn test_migration_dst_20_seeds_default() {
    for seed in 0..20 {
        run_seed(seed, SimulatedApiConfig::default()).await;
    }
}

#[tokio::test]
async fn test_migration_dst_20_seeds_chaos() {
    for seed in 100..120 {
        run_seed(seed, SimulatedApiConfig::high_chaos()).await;
    }
}

#[tokio::test]
async fn test_migration_dst_determinism() {
    let (first, _) = run_seed(777, SimulatedApiConfig::high_chaos()).await;
    let (second, _) = run_seed(777, SimulatedApiConfig::high_chaos()).await;
    assert_eq!(
        serde_json::to_value(&first).unwrap(),
        serde_json::to_value(&second).unwrap()
    );
}
