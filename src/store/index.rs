//! Chunk Index
//!
//! Maps chunk sequence numbers to chunk filenames. The index is the source
//! of truth for which chunks exist: chunk filenames are opaque and are
//! never discovered by listing the directory.
//!
//! On disk the index is a flat JSON object, `{"1": "<file>", "2": "<file>"}`,
//! saved with the write-to-temp + rename pattern so it is never partially
//! written.

use crate::store::fs::{read_json_file, write_json_atomic};
use crate::store::StoreError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Sequence number -> chunk filename
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChunkIndex {
    chunks: BTreeMap<u64, String>,
}

impl ChunkIndex {
    pub fn new() -> Self {
        ChunkIndex::default()
    }

    /// Allocate the next sequence number (1-based, never reused)
    pub fn next_sequence(&self) -> u64 {
        self.chunks.keys().next_back().map_or(1, |last| last + 1)
    }

    /// Record a finalized chunk
    pub fn insert(&mut self, seq: u64, file_name: String) {
        debug_assert!(
            !self.chunks.contains_key(&seq),
            "Invariant violated: chunk sequence {} reused",
            seq
        );
        self.chunks.insert(seq, file_name);
    }

    pub fn get(&self, seq: u64) -> Option<&str> {
        self.chunks.get(&seq).map(String::as_str)
    }

    pub fn total_chunks(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn first_sequence(&self) -> Option<u64> {
        self.chunks.keys().next().copied()
    }

    pub fn last_sequence(&self) -> Option<u64> {
        self.chunks.keys().next_back().copied()
    }

    /// Chunks in sequence order
    pub fn iter(&self) -> impl Iterator<Item = (u64, &str)> {
        self.chunks.iter().map(|(seq, name)| (*seq, name.as_str()))
    }

    pub fn file_names(&self) -> impl Iterator<Item = &str> {
        self.chunks.values().map(String::as_str)
    }

    /// Sequence number following `seq`, if any
    pub fn after(&self, seq: u64) -> Option<u64> {
        self.chunks.range(seq + 1..).next().map(|(s, _)| *s)
    }

    /// Sequence number preceding `seq`, if any
    pub fn before(&self, seq: u64) -> Option<u64> {
        self.chunks.range(..seq).next_back().map(|(s, _)| *s)
    }
}

/// Loads and saves the index file of one collection
#[derive(Debug, Clone)]
pub struct IndexFile {
    path: PathBuf,
}

impl IndexFile {
    pub fn new(base_path: &Path, file_name: &str) -> Self {
        IndexFile {
            path: base_path.join(file_name),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Load the index. A missing index means the collection was never
    /// completed and is reported as `IndexNotFound`.
    pub fn load(&self) -> Result<ChunkIndex, StoreError> {
        read_json_file(&self.path)?.ok_or_else(|| StoreError::IndexNotFound(self.path.clone()))
    }

    /// Save the index atomically
    pub fn save(&self, index: &ChunkIndex) -> Result<(), StoreError> {
        write_json_atomic(&self.path, index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ChunkIndex {
        let mut index = ChunkIndex::new();
        index.insert(1, "a-entries.json".to_string());
        index.insert(2, "b-entries.json".to_string());
        index.insert(3, "c-entries.json".to_string());
        index
    }

    #[test]
    fn test_next_sequence_starts_at_one() {
        let mut index = ChunkIndex::new();
        assert_eq!(index.next_sequence(), 1);
        index.insert(1, "x".to_string());
        assert_eq!(index.next_sequence(), 2);
    }

    #[test]
    fn test_navigation() {
        let index = sample();
        assert_eq!(index.first_sequence(), Some(1));
        assert_eq!(index.last_sequence(), Some(3));
        assert_eq!(index.after(1), Some(2));
        assert_eq!(index.after(3), None);
        assert_eq!(index.before(3), Some(2));
        assert_eq!(index.before(1), None);
    }

    #[test]
    fn test_serialized_as_string_keyed_object() {
        let json = serde_json::to_value(sample()).unwrap();
        assert_eq!(json["1"], "a-entries.json");
        assert_eq!(json["3"], "c-entries.json");
    }

    #[test]
    fn test_index_file_save_load() {
        let dir = tempfile::tempdir().unwrap();
        let file = IndexFile::new(dir.path(), "index.json");
        assert!(!file.exists());
        assert!(matches!(file.load(), Err(StoreError::IndexNotFound(_))));

        file.save(&sample()).unwrap();
        assert!(file.exists());
        assert_eq!(file.load().unwrap(), sample());
    }

    #[test]
    fn test_malformed_index_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("index.json"), b"[not an index").unwrap();
        let file = IndexFile::new(dir.path(), "index.json");
        assert!(matches!(file.load(), Err(StoreError::Malformed { .. })));
    }
}
