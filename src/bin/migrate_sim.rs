//! Deterministic migration simulation
//!
//! Seeds a source stack in memory, exports it to disk, imports the export
//! into an empty destination and prints both run summaries. Both platforms
//! can be wrapped in the fault-injecting API, so a seed reproduces the same
//! failures on every run. Time is simulated: pacing pauses and poll
//! intervals cost nothing.
//!
//! Exits non-zero when any module failed, was skipped, or was cancelled.
//! Item-level failures are reported but do not change the exit code.
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | MIGRATE_CONFIG | - | TOML config file; built-in defaults when unset |
//! | MIGRATE_CONTENT_DIR | $TMPDIR/migrate-sim-<seed> | Export directory |
//! | MIGRATE_SIM_SEED | 42 | Seed for fixtures and fault injection |
//! | MIGRATE_SIM_ENTRIES | 250 | Master-locale entries per content type |
//! | MIGRATE_SIM_FAULTS | none | none, default, or high |
//!
//! Every other `MIGRATE_*` override of the config file applies as usual.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde_json::json;
use stack_migrate::api::{DerivedRule, SimulatedApiConfig, LOCALE_FIELD};
use stack_migrate::config::ConfigError;
use stack_migrate::modules::assets::FOLDERS_COLLECTION;
use stack_migrate::modules::entries::entries_collection;
use stack_migrate::modules::experiences::VARIANTS_FIELD;
use stack_migrate::modules::flat::LOCALE_CODE_FIELD;
use stack_migrate::observability::init_tracing;
use stack_migrate::record::PARENT_UID_FIELD;
use stack_migrate::{
    ContentApi, InMemoryContentApi, MigrationConfig, MigrationOrchestrator, Record,
    SimulatedClock, SimulatedContentApi,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};

const DEFAULT_SEED: u64 = 42;
const DEFAULT_ENTRIES: usize = 250;
const CONTENT_TYPES: [&str; 2] = ["blog", "author"];
const LOCALES: [&str; 3] = ["en-us", "fr-fr", "de-de"];
const FOLDER_COUNT: usize = 6;
const ASSET_COUNT: usize = 20;
const EXPERIENCE_COUNT: usize = 5;

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn fault_config() -> Option<SimulatedApiConfig> {
    match std::env::var("MIGRATE_SIM_FAULTS").as_deref() {
        Ok("default") => Some(SimulatedApiConfig::default()),
        Ok("high") => Some(SimulatedApiConfig::high_chaos()),
        _ => None,
    }
}

fn load_config(seed: u64) -> Result<MigrationConfig, ConfigError> {
    let config = match std::env::var("MIGRATE_CONFIG") {
        Ok(path) => MigrationConfig::load(&PathBuf::from(path))?,
        Err(_) => {
            let mut config = MigrationConfig {
                content_dir: std::env::temp_dir().join(format!("migrate-sim-{}", seed)),
                ..MigrationConfig::default()
            };
            config.apply_env_overrides()?;
            config
        }
    };
    config.validate()?;
    Ok(config)
}

/// Populate the source platform. Same seed, same fixtures.
fn seed_source(source: &InMemoryContentApi, rng: &mut ChaCha8Rng, entries: usize) {
    source.seed("stack", vec![Record::new("sim-stack").with("name", "Simulated stack")]);
    source.seed(
        "locales",
        LOCALES
            .iter()
            .enumerate()
            .map(|(i, code)| Record::new(format!("loc{}", i)).with(LOCALE_CODE_FIELD, *code)),
    );
    source.seed(
        "global_fields",
        vec![Record::new("seo").with("title", "SEO")],
    );
    source.seed(
        "content_types",
        CONTENT_TYPES
            .iter()
            .map(|ct| Record::new(*ct).with("title", *ct)),
    );

    // Folder tree: each folder hangs under a random earlier one, or the root
    let mut folders = Vec::with_capacity(FOLDER_COUNT);
    for i in 0..FOLDER_COUNT {
        let mut folder = Record::new(format!("fld{}", i)).with("name", format!("folder-{}", i));
        if i > 0 && rng.gen_bool(0.7) {
            folder.set(PARENT_UID_FIELD, format!("fld{}", rng.gen_range(0..i)));
        }
        folders.push(folder);
    }
    // Children listed before parents on purpose
    folders.reverse();
    source.seed(FOLDERS_COLLECTION, folders);

    let mut assets = Vec::with_capacity(ASSET_COUNT);
    for i in 0..ASSET_COUNT {
        let uid = format!("ast{}", i);
        let filename = format!("image-{}.png", i);
        let url = format!("https://src.cdn/{}/{}", uid, filename);
        let size = rng.gen_range(16..256);
        source.seed_binary(&url, vec![(i % 251) as u8; size]);
        let mut asset = Record::new(&uid).with("url", url).with("filename", filename);
        if rng.gen_bool(0.8) {
            asset.set(PARENT_UID_FIELD, format!("fld{}", rng.gen_range(0..FOLDER_COUNT)));
        }
        assets.push(asset);
    }
    source.seed("assets", assets);

    for ct in CONTENT_TYPES {
        let collection = entries_collection(ct);
        let mut records = Vec::new();
        for i in 0..entries {
            let uid = format!("{}-{}", ct, i);
            let asset = rng.gen_range(0..ASSET_COUNT);
            let mut entry = Record::new(&uid)
                .with(LOCALE_FIELD, LOCALES[0])
                .with("title", format!("{} {}", ct, i))
                .with(
                    "hero",
                    json!({
                        "uid": format!("ast{}", asset),
                        "url": format!("https://src.cdn/ast{}/image-{}.png", asset, asset),
                        "filename": format!("image-{}.png", asset),
                    }),
                )
                .with("publish_details", json!({"environment": "production"}));
            if i > 0 {
                let target = format!("{}-{}", ct, rng.gen_range(0..i));
                entry.set("related", json!([{"uid": target, "_content_type_uid": ct}]));
            }
            records.push(entry);

            for locale in &LOCALES[1..] {
                if rng.gen_bool(0.3) {
                    records.push(
                        Record::new(&uid)
                            .with(LOCALE_FIELD, *locale)
                            .with("title", format!("{} {} ({})", ct, i, locale)),
                    );
                }
            }
        }
        source.seed(&collection, records);
    }

    source.seed(
        "experiences",
        (0..EXPERIENCE_COUNT).map(|i| {
            let variants: Vec<_> = (0..rng.gen_range(1..4))
                .map(|v| json!({"uid": format!("var{}-{}", i, v), "name": format!("variant-{}", v)}))
                .collect();
            Record::new(format!("exp{}", i))
                .with("name", format!("experience-{}", i))
                .with(VARIANTS_FIELD, json!(variants))
        }),
    );
}

fn wrap(api: InMemoryContentApi, seed: u64) -> Arc<dyn ContentApi> {
    match fault_config() {
        Some(faults) => Arc::new(SimulatedContentApi::new(Arc::new(api), seed, faults)),
        None => Arc::new(api),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let seed = env_parse("MIGRATE_SIM_SEED", DEFAULT_SEED);
    let entries = env_parse("MIGRATE_SIM_ENTRIES", DEFAULT_ENTRIES);

    let config = match load_config(seed) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::from(2);
        }
    };
    init_tracing(&config.log);
    info!(
        "Simulating migration: seed={}, entries={}, content_dir={}",
        seed,
        entries,
        config.content_dir.display()
    );

    let source = InMemoryContentApi::new("src");
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    for branch in config.effective_branches() {
        seed_source(&source.on_branch(&branch), &mut rng, entries);
    }
    let destination = InMemoryContentApi::new("dst").with_rule(DerivedRule::variants(Some(2)));
    let clock = Arc::new(SimulatedClock::new(0));

    let exporter = match MigrationOrchestrator::new(config.clone(), wrap(source, seed), clock.clone())
    {
        Ok(orchestrator) => orchestrator,
        Err(e) => {
            error!("Cannot start export: {}", e);
            return ExitCode::from(2);
        }
    };
    let exported = exporter.export().await;
    println!("{}", exported);

    let importer = match MigrationOrchestrator::new(
        config,
        wrap(destination.clone(), seed.wrapping_add(1)),
        clock.clone(),
    ) {
        Ok(orchestrator) => orchestrator,
        Err(e) => {
            error!("Cannot start import: {}", e);
            return ExitCode::from(2);
        }
    };
    let imported = importer.import().await;
    println!("{}", imported);

    info!(
        "Simulated time slept: {:?}, item failures: export={}, import={}",
        clock.total_slept(),
        exported.item_failures(),
        imported.item_failures()
    );

    if exported.has_fatal_errors() || imported.has_fatal_errors() {
        error!("Migration finished with module failures");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
