//! Metadata sidecar: a reduced projection of every stored record, grouped
//! by the chunk that holds it. Lets resumable passes iterate `uid`/`url`/
//! `filename` style fields without parsing full chunks.

use crate::record::Record;
use crate::store::fs::{read_json_file, write_json_atomic};
use crate::store::StoreError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Chunk filename -> projected records
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MetadataSidecar {
    chunks: BTreeMap<String, Vec<Record>>,
}

impl MetadataSidecar {
    pub fn new() -> Self {
        MetadataSidecar::default()
    }

    /// Attach the projections accumulated for a chunk that just closed
    pub fn insert_chunk(&mut self, file_name: String, projections: Vec<Record>) {
        self.chunks.insert(file_name, projections);
    }

    pub fn chunk(&self, file_name: &str) -> Option<&[Record]> {
        self.chunks.get(file_name).map(Vec::as_slice)
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Total projected records across chunks
    pub fn len(&self) -> usize {
        self.chunks.values().map(Vec::len).sum()
    }

    /// All projected records, chunk by chunk
    pub fn records(&self) -> impl Iterator<Item = &Record> {
        self.chunks.values().flatten()
    }

    pub(crate) fn load(path: &Path) -> Result<Self, StoreError> {
        Ok(read_json_file(path)?.unwrap_or_default())
    }

    pub(crate) fn save(&self, path: &Path) -> Result<(), StoreError> {
        write_json_atomic(path, self)
    }
}
