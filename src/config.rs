//! Migration Configuration
//!
//! Settings are read from a TOML file and then overridden from `MIGRATE_*`
//! environment variables. Every sub-config has a `Default` for production
//! use and a `test()` preset with small, fast values.

use crate::modules::ModuleKind;
use crate::store::{ChunkFormat, DEFAULT_CHUNK_BYTE_SIZE};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Remote API page-size ceiling
pub const PAGE_SIZE_DEFAULT: u64 = 100;
/// Upper bound on concurrently dispatched requests per batch
pub const CONCURRENCY_LIMIT_MAX: usize = 64;
/// Branch used when branching is disabled
pub const DEFAULT_BRANCH: &str = "main";

/// Configuration errors. Always structural: the run cannot start.
#[derive(Debug)]
pub enum ConfigError {
    /// Config file could not be read
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    /// Config file is not valid TOML for this schema
    Parse(toml::de::Error),
    /// An environment override could not be parsed
    InvalidOverride { key: String, value: String },
    /// Values parsed but are not usable
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io { path, source } => {
                write!(f, "Cannot read config {}: {}", path.display(), source)
            }
            ConfigError::Parse(e) => write!(f, "Config parse error: {}", e),
            ConfigError::InvalidOverride { key, value } => {
                write!(f, "Invalid value '{}' for {}", value, key)
            }
            ConfigError::Invalid(msg) => write!(f, "Invalid configuration: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io { source, .. } => Some(source),
            ConfigError::Parse(e) => Some(e),
            _ => None,
        }
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Parse(e)
    }
}

/// Top-level migration configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MigrationConfig {
    /// Root of the exported content tree
    pub content_dir: PathBuf,
    /// Locale that already exists at the destination
    pub master_locale: String,
    /// Branches to migrate; empty means the single implicit branch
    pub branches: Vec<String>,
    /// Modules to run; empty means every module
    pub modules: Vec<ModuleKind>,
    /// Directory name (under `content_dir`) holding uid maps and fails files
    pub mapper_dir: String,
    pub batch: BatchConfig,
    pub store: StoreConfig,
    pub poller: PollerConfig,
    pub log: LogConfig,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        MigrationConfig {
            content_dir: PathBuf::new(),
            master_locale: "en-us".to_string(),
            branches: Vec::new(),
            modules: Vec::new(),
            mapper_dir: "mapper".to_string(),
            batch: BatchConfig::default(),
            store: StoreConfig::default(),
            poller: PollerConfig::default(),
            log: LogConfig::default(),
        }
    }
}

impl MigrationConfig {
    /// Configuration for tests rooted at `content_dir`
    pub fn test(content_dir: impl Into<PathBuf>) -> Self {
        MigrationConfig {
            content_dir: content_dir.into(),
            batch: BatchConfig::test(),
            store: StoreConfig::test(),
            poller: PollerConfig::test(),
            log: LogConfig::test(),
            ..MigrationConfig::default()
        }
    }

    /// Parse a TOML document
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Read a TOML file, apply environment overrides, validate
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_toml_str(&text)?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `MIGRATE_*` overrides from the process environment
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary lookup (the environment in production)
    pub fn apply_overrides_from<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = lookup("MIGRATE_CONTENT_DIR") {
            self.content_dir = PathBuf::from(dir);
        }
        if let Some(value) = lookup("MIGRATE_CONCURRENCY") {
            self.batch.concurrency_limit = parse_override("MIGRATE_CONCURRENCY", &value)?;
        }
        if let Some(value) = lookup("MIGRATE_CHUNK_BYTES") {
            self.store.chunk_byte_size = parse_override("MIGRATE_CHUNK_BYTES", &value)?;
        }
        if let Some(locale) = lookup("MIGRATE_MASTER_LOCALE") {
            self.master_locale = locale;
        }
        if let Some(value) = lookup("MIGRATE_BRANCHES") {
            self.branches = value
                .split(',')
                .map(str::trim)
                .filter(|b| !b.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(level) = lookup("MIGRATE_LOG_LEVEL") {
            self.log.level = level;
        }
        if let Some(value) = lookup("MIGRATE_LOG_JSON") {
            self.log.json = matches!(value.as_str(), "1" | "true" | "yes");
        }
        Ok(())
    }

    /// Reject configurations no run can start with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.content_dir.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("content_dir is not set".into()));
        }
        if self.master_locale.is_empty() {
            return Err(ConfigError::Invalid("master_locale is empty".into()));
        }
        if self.mapper_dir.is_empty() {
            return Err(ConfigError::Invalid("mapper_dir is empty".into()));
        }
        self.batch.validate()?;
        self.store.validate()?;
        self.poller.validate()?;
        Ok(())
    }

    /// Branches to run, falling back to the implicit branch
    pub fn effective_branches(&self) -> Vec<String> {
        if self.branches.is_empty() {
            vec![DEFAULT_BRANCH.to_string()]
        } else {
            self.branches.clone()
        }
    }

    /// Root of the export tree for one branch.
    ///
    /// The implicit branch writes straight under `content_dir`; named
    /// branches get their own subdirectory.
    pub fn branch_dir(&self, branch: &str) -> PathBuf {
        if self.branches.is_empty() {
            self.content_dir.clone()
        } else {
            self.content_dir.join(branch)
        }
    }
}

fn parse_override<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

/// Batch pacing and concurrency
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Requests dispatched concurrently per batch (default: 2)
    pub concurrency_limit: usize,
    /// Items per page request (default: 100)
    pub page_size: u64,
    /// Minimum wall-clock duration of one batch (default: 1000ms)
    #[serde(with = "duration_millis")]
    pub min_batch_duration: Duration,
}

impl Default for BatchConfig {
    fn default() -> Self {
        BatchConfig {
            concurrency_limit: 2,
            page_size: PAGE_SIZE_DEFAULT,
            min_batch_duration: Duration::from_millis(1000),
        }
    }
}

impl BatchConfig {
    /// Configuration for tests (same shape, still paced)
    pub fn test() -> Self {
        BatchConfig {
            concurrency_limit: 2,
            page_size: PAGE_SIZE_DEFAULT,
            min_batch_duration: Duration::from_millis(1000),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.concurrency_limit == 0 {
            return Err(ConfigError::Invalid("concurrency_limit must be at least 1".into()));
        }
        if self.concurrency_limit > CONCURRENCY_LIMIT_MAX {
            return Err(ConfigError::Invalid(format!(
                "concurrency_limit {} exceeds {}",
                self.concurrency_limit, CONCURRENCY_LIMIT_MAX
            )));
        }
        if self.page_size == 0 {
            return Err(ConfigError::Invalid("page_size must be at least 1".into()));
        }
        Ok(())
    }
}

/// Chunk store settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Chunk size bound (default: 10MB)
    pub chunk_byte_size: u64,
    /// Chunk file format
    pub format: ChunkFormat,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            chunk_byte_size: DEFAULT_CHUNK_BYTE_SIZE,
            format: ChunkFormat::Json,
        }
    }
}

impl StoreConfig {
    /// Configuration for tests (tiny chunks, forcing many files)
    pub fn test() -> Self {
        StoreConfig {
            chunk_byte_size: 4 * 1024, // 4KB
            format: ChunkFormat::Json,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chunk_byte_size == 0 {
            return Err(ConfigError::Invalid("chunk_byte_size must be at least 1".into()));
        }
        Ok(())
    }
}

/// Asynchronous validation polling
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollerConfig {
    /// Total time budget for derived objects to appear (default: 30s)
    #[serde(with = "duration_millis")]
    pub threshold: Duration,
    /// Delay before each check pass (default: 10s)
    #[serde(with = "duration_millis")]
    pub interval: Duration,
}

impl Default for PollerConfig {
    fn default() -> Self {
        PollerConfig {
            threshold: Duration::from_secs(30),
            interval: Duration::from_secs(10),
        }
    }
}

impl PollerConfig {
    /// Configuration for tests
    pub fn test() -> Self {
        PollerConfig {
            threshold: Duration::from_millis(300),
            interval: Duration::from_millis(100),
        }
    }

    /// Retry ceiling: `floor(threshold / interval)`, at least one pass
    pub fn max_passes(&self) -> u32 {
        debug_assert!(!self.interval.is_zero(), "Precondition: interval must be non-zero");
        let interval = self.interval.as_millis().max(1);
        let passes = self.threshold.as_millis() / interval;
        passes.clamp(1, u32::MAX as u128) as u32
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.interval.is_zero() {
            return Err(ConfigError::Invalid("poller interval must be non-zero".into()));
        }
        Ok(())
    }
}

/// Logging output
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Default filter directive when RUST_LOG is unset (default: info)
    pub level: String,
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl LogConfig {
    pub fn test() -> Self {
        LogConfig {
            level: "debug".to_string(),
            json: false,
        }
    }
}

/// Serde helper for Duration as milliseconds
mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config_needs_content_dir() {
        let config = MigrationConfig::default();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
        assert!(MigrationConfig::test("/tmp/export").validate().is_ok());
    }

    #[test]
    fn test_toml_parsing_with_defaults() {
        let text = r#"
            content_dir = "/data/export"
            branches = ["main", "dev"]
            modules = ["locales", "entries"]

            [batch]
            concurrency_limit = 4
            min_batch_duration = 250

            [poller]
            threshold = 30000
            interval = 10000
        "#;
        let config = MigrationConfig::from_toml_str(text).unwrap();
        assert_eq!(config.content_dir, PathBuf::from("/data/export"));
        assert_eq!(config.batch.concurrency_limit, 4);
        assert_eq!(config.batch.page_size, PAGE_SIZE_DEFAULT);
        assert_eq!(config.batch.min_batch_duration, Duration::from_millis(250));
        assert_eq!(config.modules, vec![ModuleKind::Locales, ModuleKind::Entries]);
        assert_eq!(config.poller.max_passes(), 3);
        assert_eq!(config.store.chunk_byte_size, DEFAULT_CHUNK_BYTE_SIZE);
        assert_eq!(config.master_locale, "en-us");
    }

    #[test]
    fn test_bad_toml_is_parse_error() {
        let result = MigrationConfig::from_toml_str("batch = 3");
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_overrides() {
        let env: HashMap<&str, &str> = [
            ("MIGRATE_CONTENT_DIR", "/override"),
            ("MIGRATE_CONCURRENCY", "8"),
            ("MIGRATE_CHUNK_BYTES", "1"),
            ("MIGRATE_BRANCHES", "main, dev ,"),
            ("MIGRATE_LOG_JSON", "true"),
        ]
        .into_iter()
        .collect();

        let mut config = MigrationConfig::default();
        config
            .apply_overrides_from(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.content_dir, PathBuf::from("/override"));
        assert_eq!(config.batch.concurrency_limit, 8);
        assert_eq!(config.store.chunk_byte_size, 1);
        assert_eq!(config.branches, vec!["main".to_string(), "dev".to_string()]);
        assert!(config.log.json);
    }

    #[test]
    fn test_invalid_override() {
        let mut config = MigrationConfig::default();
        let result = config.apply_overrides_from(|key| {
            (key == "MIGRATE_CONCURRENCY").then(|| "many".to_string())
        });
        assert!(matches!(result, Err(ConfigError::InvalidOverride { .. })));
    }

    #[test]
    fn test_validation_rejects_zero_values() {
        let mut config = MigrationConfig::test("/tmp/x");
        config.batch.concurrency_limit = 0;
        assert!(config.validate().is_err());

        let mut config = MigrationConfig::test("/tmp/x");
        config.batch.page_size = 0;
        assert!(config.validate().is_err());

        let mut config = MigrationConfig::test("/tmp/x");
        config.poller.interval = Duration::ZERO;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_max_passes() {
        let poller = PollerConfig {
            threshold: Duration::from_millis(30_000),
            interval: Duration::from_millis(10_000),
        };
        assert_eq!(poller.max_passes(), 3);

        let short = PollerConfig {
            threshold: Duration::from_millis(50),
            interval: Duration::from_millis(100),
        };
        assert_eq!(short.max_passes(), 1);
    }

    #[test]
    fn test_branch_dirs() {
        let mut config = MigrationConfig::test("/data");
        assert_eq!(config.effective_branches(), vec![DEFAULT_BRANCH.to_string()]);
        assert_eq!(config.branch_dir(DEFAULT_BRANCH), PathBuf::from("/data"));

        config.branches = vec!["dev".into()];
        assert_eq!(config.branch_dir("dev"), PathBuf::from("/data/dev"));
    }

    #[test]
    fn test_batch_config_serialization() {
        let config = BatchConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let parsed: BatchConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config.min_batch_duration, parsed.min_batch_duration);
        assert_eq!(config.concurrency_limit, parsed.concurrency_limit);
    }
}
