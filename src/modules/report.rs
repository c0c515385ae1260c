//! Per-module outcome counters and the on-disk fails artifact

use crate::modules::ModuleKind;
use crate::store::{read_json_file, write_json_atomic, StoreError};
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::path::{Path, PathBuf};
use tracing::warn;

/// File name of a module's failed-items report
pub const FAILS_FILE: &str = "fails.json";

/// What one module did in one branch
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModuleReport {
    pub module: ModuleKind,
    /// Records written to stores
    pub exported: u64,
    pub created: u64,
    /// Localized versions written onto existing destination objects
    pub updated: u64,
    /// Already mapped in a previous run
    pub skipped: u64,
    pub failed: u64,
    /// Derived objects that never showed up within the poll budget
    pub pending_validation: u64,
    /// Binaries fetched by the download pass
    pub downloaded: u64,
    pub chunks: usize,
}

impl ModuleReport {
    pub fn new(module: ModuleKind) -> Self {
        ModuleReport {
            module,
            exported: 0,
            created: 0,
            updated: 0,
            skipped: 0,
            failed: 0,
            pending_validation: 0,
            downloaded: 0,
            chunks: 0,
        }
    }

    /// Items that need a look after the run
    pub fn has_item_failures(&self) -> bool {
        self.failed > 0 || self.pending_validation > 0
    }
}

impl std::fmt::Display for ModuleReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}: exported={} created={} updated={} skipped={} failed={}",
            self.module, self.exported, self.created, self.updated, self.skipped, self.failed
        )?;
        if self.pending_validation > 0 {
            write!(f, " pending_validation={}", self.pending_validation)?;
        }
        if self.downloaded > 0 {
            write!(f, " downloaded={}", self.downloaded)?;
        }
        Ok(())
    }
}

/// One failed item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedItem {
    pub uid: String,
    pub error: String,
    /// Content type, locale or page window the failure belongs to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

/// Accumulates failed items and writes them to `<dir>/fails.json`
#[derive(Debug)]
pub struct FailureLog {
    path: PathBuf,
    items: Vec<FailedItem>,
}

impl FailureLog {
    pub fn new(dir: &Path) -> Self {
        FailureLog {
            path: dir.join(FAILS_FILE),
            items: Vec::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn record(&mut self, uid: &str, error: impl Display) {
        self.push(uid, error, None);
    }

    pub fn record_in(&mut self, uid: &str, error: impl Display, context: impl Into<String>) {
        self.push(uid, error, Some(context.into()));
    }

    fn push(&mut self, uid: &str, error: impl Display, context: Option<String>) {
        let error = error.to_string();
        warn!("Item {} failed: {}", uid, error);
        self.items.push(FailedItem {
            uid: uid.to_string(),
            error,
            context,
        });
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn items(&self) -> &[FailedItem] {
        &self.items
    }

    /// Persist the log. With nothing failed, a fails file left by an
    /// earlier run is removed. Returns whether a file was written.
    pub fn flush(&self) -> Result<bool, StoreError> {
        if self.items.is_empty() {
            match std::fs::remove_file(&self.path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(StoreError::io(&self.path, e)),
            }
            return Ok(false);
        }
        write_json_atomic(&self.path, &self.items)?;
        Ok(true)
    }

    /// Read a fails file written by an earlier run
    pub fn load(dir: &Path) -> Result<Vec<FailedItem>, StoreError> {
        Ok(read_json_file(&dir.join(FAILS_FILE))?.unwrap_or_default())
    }
}
