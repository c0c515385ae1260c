//! UID Mapper
//!
//! `source uid -> destination uid` table for one content type (or one
//! sub-entity, such as variants within an experience). Loaded once at start
//! if the file exists and flushed in full on every `set`, so a killed and
//! restarted import never re-creates a destination object it already made.
//!
//! Clones share the same table. Writes are serialized under one lock, and
//! the flush happens inside it, so the file always matches some prefix of
//! the sets.

use crate::store::{read_json_file, write_json_atomic, StoreError};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// File name of a persisted uid map
pub const UID_MAPPER_FILE: &str = "uid-mapper.json";

/// UID mapper errors
#[derive(Debug)]
pub enum MapperError {
    /// Loading or flushing the map failed
    Store(StoreError),
    /// A mapped source uid was set to a different destination uid
    Conflict {
        source_uid: String,
        existing: String,
        attempted: String,
    },
}

impl std::fmt::Display for MapperError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MapperError::Store(e) => write!(f, "Uid map storage error: {}", e),
            MapperError::Conflict {
                source_uid,
                existing,
                attempted,
            } => write!(
                f,
                "Uid {} already mapped to {}, refusing remap to {}",
                source_uid, existing, attempted
            ),
        }
    }
}

impl std::error::Error for MapperError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            MapperError::Store(e) => Some(e),
            MapperError::Conflict { .. } => None,
        }
    }
}

impl From<StoreError> for MapperError {
    fn from(e: StoreError) -> Self {
        MapperError::Store(e)
    }
}

struct MapperState {
    entries: BTreeMap<String, String>,
    flushes: u64,
}

/// Shared, persisted uid table
#[derive(Clone)]
pub struct UidMapper {
    path: Option<PathBuf>,
    state: Arc<Mutex<MapperState>>,
}

impl UidMapper {
    /// Load the map at `path`; a missing file is an empty map, a malformed
    /// one is an error.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, MapperError> {
        let path = path.into();
        let entries: BTreeMap<String, String> = read_json_file(&path)?.unwrap_or_default();
        debug!("Loaded {} uid mappings from {}", entries.len(), path.display());
        Ok(Self::with_entries(Some(path), entries))
    }

    /// Load `<dir>/uid-mapper.json`
    pub fn load_in(dir: &Path) -> Result<Self, MapperError> {
        Self::load(dir.join(UID_MAPPER_FILE))
    }

    /// Unpersisted map (tests, scratch lookups)
    pub fn in_memory() -> Self {
        Self::with_entries(None, BTreeMap::new())
    }

    fn with_entries(path: Option<PathBuf>, entries: BTreeMap<String, String>) -> Self {
        UidMapper {
            path,
            state: Arc::new(Mutex::new(MapperState { entries, flushes: 0 })),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn get(&self, source_uid: &str) -> Option<String> {
        self.state.lock().entries.get(source_uid).cloned()
    }

    pub fn has(&self, source_uid: &str) -> bool {
        self.state.lock().entries.contains_key(source_uid)
    }

    /// Record a mapping and flush the whole table.
    ///
    /// Setting an existing pair again is a no-op; remapping a source uid to
    /// a different destination is refused.
    pub fn set(&self, source_uid: &str, destination_uid: &str) -> Result<(), MapperError> {
        let mut state = self.state.lock();
        if let Some(existing) = state.entries.get(source_uid) {
            if existing == destination_uid {
                return Ok(());
            }
            return Err(MapperError::Conflict {
                source_uid: source_uid.to_string(),
                existing: existing.clone(),
                attempted: destination_uid.to_string(),
            });
        }

        state
            .entries
            .insert(source_uid.to_string(), destination_uid.to_string());
        if let Some(path) = &self.path {
            if let Err(e) = write_json_atomic(path, &state.entries) {
                state.entries.remove(source_uid);
                return Err(e.into());
            }
            state.flushes += 1;
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().entries.is_empty()
    }

    /// Copy of the current table
    pub fn snapshot(&self) -> BTreeMap<String, String> {
        self.state.lock().entries.clone()
    }

    /// Number of flushes since load
    pub fn flush_count(&self) -> u64 {
        self.state.lock().flushes
    }
}

impl std::fmt::Debug for UidMapper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UidMapper")
            .field("path", &self.path)
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_get_has() {
        let mapper = UidMapper::in_memory();
        assert!(!mapper.has("a"));
        mapper.set("a", "x").unwrap();
        assert!(mapper.has("a"));
        assert_eq!(mapper.get("a"), Some("x".to_string()));
        assert_eq!(mapper.len(), 1);
        assert_eq!(mapper.flush_count(), 0);
    }

    #[test]
    fn test_flush_on_every_set_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let mapper = UidMapper::load_in(dir.path()).unwrap();
        assert!(mapper.is_empty());

        mapper.set("a", "x").unwrap();
        mapper.set("b", "y").unwrap();
        assert_eq!(mapper.flush_count(), 2);

        let reloaded = UidMapper::load_in(dir.path()).unwrap();
        assert_eq!(reloaded.snapshot(), mapper.snapshot());

        let raw: serde_json::Value = serde_json::from_slice(
            &std::fs::read(dir.path().join(UID_MAPPER_FILE)).unwrap(),
        )
        .unwrap();
        assert_eq!(raw["a"], "x");
    }

    #[test]
    fn test_clones_share_table() {
        let mapper = UidMapper::in_memory();
        let other = mapper.clone();
        other.set("a", "x").unwrap();
        assert_eq!(mapper.get("a"), Some("x".to_string()));
    }

    #[test]
    fn test_remap_conflict() {
        let mapper = UidMapper::in_memory();
        mapper.set("a", "x").unwrap();
        mapper.set("a", "x").unwrap();
        assert!(matches!(
            mapper.set("a", "y"),
            Err(MapperError::Conflict { .. })
        ));
        assert_eq!(mapper.get("a"), Some("x".to_string()));
    }

    #[test]
    fn test_malformed_map_is_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(UID_MAPPER_FILE), b"{\"a\":").unwrap();
        assert!(matches!(
            UidMapper::load_in(dir.path()),
            Err(MapperError::Store(StoreError::Malformed { .. }))
        ));
    }

    #[test]
    fn test_concurrent_sets_are_serialized() {
        let dir = tempfile::tempdir().unwrap();
        let mapper = UidMapper::load_in(dir.path()).unwrap();

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let mapper = mapper.clone();
                std::thread::spawn(move || {
                    for i in 0..25 {
                        mapper.set(&format!("s{}-{}", t, i), &format!("d{}-{}", t, i)).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(mapper.len(), 200);
        let reloaded = UidMapper::load_in(dir.path()).unwrap();
        assert_eq!(reloaded.len(), 200);
    }
}
