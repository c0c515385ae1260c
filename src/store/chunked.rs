//! Chunked Store
//!
//! Append-only, streaming persistence of an unbounded record collection.
//! Records are written straight to the open chunk file; the chunk is
//! finalized once its size reaches the configured bound (checked after
//! each record, never mid-record) or when the caller asks for it.
//!
//! ## Lifecycle
//!
//! ```text
//! create → append_records* → complete_store(write_index) → (read_* ...)
//! ```
//!
//! The index and metadata sidecar are only written by `complete_store`. A
//! run interrupted before that leaves no (or a stale) index and must be
//! treated as void for the collection.
//!
//! One writer per collection: a `ChunkedStore` is not shared between tasks.

use crate::record::Record;
use crate::store::format::{decode_chunk, Framing};
use crate::store::{ChunkFormat, ChunkIndex, IndexFile, MetadataSidecar, StoreError};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use uuid::Uuid;

/// Default chunk bound (10 MiB)
pub const DEFAULT_CHUNK_BYTE_SIZE: u64 = 10 * 1024 * 1024;
/// Index file name within a collection directory
pub const INDEX_FILE_NAME: &str = "index.json";
/// Metadata sidecar file name within a collection directory
pub const METADATA_FILE_NAME: &str = "metadata.json";

/// Options for one logical collection
#[derive(Debug, Clone)]
pub struct StoreOptions {
    /// Directory holding chunks, index and sidecar
    pub base_path: PathBuf,
    /// Module name embedded in chunk filenames
    pub module_name: String,
    /// Chunk size bound in bytes
    pub chunk_byte_size: u64,
    /// Chunk file format
    pub format: ChunkFormat,
    /// Field used as the object key in key-mapped mode
    pub key_field: String,
    /// Fields projected into the metadata sidecar (None disables the sidecar)
    pub metadata_fields: Option<Vec<String>>,
    pub index_file_name: String,
    pub metadata_file_name: String,
}

impl StoreOptions {
    pub fn new(base_path: impl Into<PathBuf>, module_name: impl Into<String>) -> Self {
        StoreOptions {
            base_path: base_path.into(),
            module_name: module_name.into(),
            chunk_byte_size: DEFAULT_CHUNK_BYTE_SIZE,
            format: ChunkFormat::Json,
            key_field: crate::record::UID_FIELD.to_string(),
            metadata_fields: None,
            index_file_name: INDEX_FILE_NAME.to_string(),
            metadata_file_name: METADATA_FILE_NAME.to_string(),
        }
    }

    pub fn with_chunk_byte_size(mut self, bytes: u64) -> Self {
        self.chunk_byte_size = bytes;
        self
    }

    pub fn with_format(mut self, format: ChunkFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_key_field(mut self, field: impl Into<String>) -> Self {
        self.key_field = field.into();
        self
    }

    pub fn with_metadata_fields<S: Into<String>>(mut self, fields: impl IntoIterator<Item = S>) -> Self {
        self.metadata_fields = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    fn validate(&self) -> Result<(), StoreError> {
        if self.base_path.as_os_str().is_empty() {
            return Err(StoreError::InvalidOptions("base path is empty".into()));
        }
        if self.module_name.is_empty() {
            return Err(StoreError::InvalidOptions("module name is empty".into()));
        }
        if self.chunk_byte_size == 0 {
            return Err(StoreError::InvalidOptions("chunk size bound is zero".into()));
        }
        Ok(())
    }
}

/// Per-call append options
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AppendOptions {
    /// Store records as an object keyed by `key_field` instead of an array
    pub map_key_val: bool,
    /// Finalize the open chunk after this append
    pub close_chunk: bool,
}

impl AppendOptions {
    pub fn keyed() -> Self {
        AppendOptions {
            map_key_val: true,
            close_chunk: false,
        }
    }

    pub fn closing(mut self) -> Self {
        self.close_chunk = true;
        self
    }
}

/// Direction for sequential chunk reads
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Next,
    Previous,
}

/// Counters for one write pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub chunks_finalized: usize,
    pub records_written: u64,
    pub bytes_written: u64,
}

/// The chunk currently receiving writes
struct OpenChunk {
    seq: u64,
    file_name: String,
    file: File,
    framing: Framing,
    bytes_written: u64,
    records: u64,
    pending_metadata: Vec<Record>,
}

impl OpenChunk {
    fn write_record(&mut self, record: &Record, key_field: &str) -> Result<u64, StoreError> {
        let fragment = self.framing.encode(record, key_field, self.records == 0)?;
        self.file
            .write_all(&fragment)
            .map_err(|e| StoreError::io(&self.file_name, e))?;
        self.bytes_written += fragment.len() as u64;
        self.records += 1;
        Ok(fragment.len() as u64)
    }
}

/// Streaming chunked store for one logical collection
pub struct ChunkedStore {
    options: StoreOptions,
    index_file: IndexFile,
    /// Chunks finalized by this instance
    index: ChunkIndex,
    metadata: MetadataSidecar,
    open: Option<OpenChunk>,
    completed: bool,
    stats: StoreStats,
    /// Read cursor and the index snapshot it walks
    cursor: Option<u64>,
    cursor_index: Option<ChunkIndex>,
}

impl ChunkedStore {
    /// Create a store for a fresh write pass, creating the directory if needed
    pub fn create(options: StoreOptions) -> Result<Self, StoreError> {
        options.validate()?;
        std::fs::create_dir_all(&options.base_path)
            .map_err(|e| StoreError::io(&options.base_path, e))?;
        Ok(Self::build(options, false))
    }

    /// Open a completed collection for reading. The directory must exist.
    pub fn open_existing(options: StoreOptions) -> Result<Self, StoreError> {
        options.validate()?;
        if !options.base_path.is_dir() {
            return Err(StoreError::MissingDirectory(options.base_path.clone()));
        }
        Ok(Self::build(options, true))
    }

    fn build(options: StoreOptions, completed: bool) -> Self {
        let index_file = IndexFile::new(&options.base_path, &options.index_file_name);
        ChunkedStore {
            options,
            index_file,
            index: ChunkIndex::new(),
            metadata: MetadataSidecar::new(),
            open: None,
            completed,
            stats: StoreStats::default(),
            cursor: None,
            cursor_index: None,
        }
    }

    pub fn options(&self) -> &StoreOptions {
        &self.options
    }

    pub fn base_path(&self) -> &Path {
        &self.options.base_path
    }

    pub fn stats(&self) -> &StoreStats {
        &self.stats
    }

    /// Chunk files finalized by this instance, in sequence order
    pub fn written_files(&self) -> Vec<String> {
        self.index.file_names().map(str::to_string).collect()
    }

    pub fn has_open_chunk(&self) -> bool {
        self.open.is_some()
    }

    /// Append records to the collection.
    ///
    /// Opens a chunk on demand, writes each record as one fragment, and
    /// finalizes the chunk whenever its size reaches the bound. A chunk may
    /// exceed the bound by at most the last record written into it.
    pub fn append_records(&mut self, records: &[Record], opts: AppendOptions) -> Result<(), StoreError> {
        if self.completed {
            return Err(StoreError::AlreadyCompleted);
        }

        let framing = Framing::select(self.options.format, opts.map_key_val);

        for record in records {
            let mut chunk = match self.open.take() {
                Some(chunk) => chunk,
                None => self.open_chunk(framing)?,
            };

            if chunk.framing != framing {
                self.open = Some(chunk);
                return Err(StoreError::FramingMismatch);
            }

            match chunk.write_record(record, &self.options.key_field) {
                Ok(bytes) => {
                    self.stats.records_written += 1;
                    self.stats.bytes_written += bytes;
                }
                Err(e) => {
                    self.open = Some(chunk);
                    return Err(e);
                }
            }

            if let Some(fields) = &self.options.metadata_fields {
                chunk.pending_metadata.push(record.project(fields));
            }

            if chunk.bytes_written >= self.options.chunk_byte_size {
                self.finalize(chunk)?;
            } else {
                self.open = Some(chunk);
            }
        }

        if opts.close_chunk {
            if let Some(chunk) = self.open.take() {
                self.finalize(chunk)?;
            }
        }

        Ok(())
    }

    /// Finalize any open chunk and optionally persist the index and sidecar.
    ///
    /// Must be called exactly once per write pass. With nothing open it only
    /// writes the index/sidecar (when requested).
    pub fn complete_store(&mut self, write_index: bool) -> Result<StoreStats, StoreError> {
        if self.completed {
            return Err(StoreError::AlreadyCompleted);
        }
        if let Some(chunk) = self.open.take() {
            self.finalize(chunk)?;
        }
        self.completed = true;

        if write_index {
            self.index_file.save(&self.index)?;
            if self.options.metadata_fields.is_some() {
                self.metadata.save(&self.metadata_path())?;
            }
        }

        info!(
            "Completed store {} ({} chunks, {} records, {} bytes)",
            self.options.base_path.display(),
            self.stats.chunks_finalized,
            self.stats.records_written,
            self.stats.bytes_written
        );
        Ok(self.stats.clone())
    }

    fn open_chunk(&mut self, framing: Framing) -> Result<OpenChunk, StoreError> {
        let seq = self.index.next_sequence();
        let file_name = format!(
            "{}-{}.{}",
            Uuid::new_v4(),
            self.options.module_name,
            self.options.format.extension()
        );
        let path = self.options.base_path.join(&file_name);

        // create_new: a chunk file is never reopened for writing
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| StoreError::io(&path, e))?;
        let prologue = framing.prologue();
        file.write_all(prologue).map_err(|e| StoreError::io(&path, e))?;

        debug!("Opened chunk {} ({})", seq, file_name);
        Ok(OpenChunk {
            seq,
            file_name,
            file,
            framing,
            bytes_written: prologue.len() as u64,
            records: 0,
            pending_metadata: Vec::new(),
        })
    }

    fn finalize(&mut self, mut chunk: OpenChunk) -> Result<(), StoreError> {
        let path = self.options.base_path.join(&chunk.file_name);
        chunk
            .file
            .write_all(chunk.framing.epilogue())
            .and_then(|_| chunk.file.flush())
            .map_err(|e| StoreError::io(&path, e))?;
        chunk.bytes_written += chunk.framing.epilogue().len() as u64;

        debug!(
            "Finalized chunk {} ({} records, {} bytes)",
            chunk.seq, chunk.records, chunk.bytes_written
        );

        if self.options.metadata_fields.is_some() {
            self.metadata
                .insert_chunk(chunk.file_name.clone(), std::mem::take(&mut chunk.pending_metadata));
        }
        self.index.insert(chunk.seq, chunk.file_name);
        self.stats.chunks_finalized += 1;
        Ok(())
    }

    fn metadata_path(&self) -> PathBuf {
        self.options.base_path.join(&self.options.metadata_file_name)
    }

    // ------------------------------------------------------------------
    // Read side
    // ------------------------------------------------------------------

    /// True when a completed index exists on disk
    pub fn index_exists(&self) -> bool {
        self.index_file.exists()
    }

    /// Full `{seq -> filename}` map from disk
    pub fn read_index(&self) -> Result<ChunkIndex, StoreError> {
        self.index_file.load()
    }

    pub fn total_chunks(&self) -> Result<usize, StoreError> {
        Ok(self.read_index()?.total_chunks())
    }

    /// Load and parse one chunk by sequence number
    pub fn read_chunk_by_index(&self, seq: u64) -> Result<Vec<Record>, StoreError> {
        let index = self.read_index()?;
        self.read_chunk_from(&index, seq)
    }

    fn read_chunk_from(&self, index: &ChunkIndex, seq: u64) -> Result<Vec<Record>, StoreError> {
        let file_name = index.get(seq).ok_or(StoreError::UnknownChunk(seq))?;
        let path = self.options.base_path.join(file_name);
        let data = std::fs::read(&path).map_err(|e| StoreError::io(&path, e))?;
        decode_chunk(self.options.format, &data).map_err(|e| StoreError::malformed(&path, e))
    }

    /// Walk chunks one at a time. Returns `None` past either end.
    ///
    /// The index is snapshotted on the first call; `reset_cursor` starts over.
    pub fn read_chunk_sequential(&mut self, direction: Direction) -> Result<Option<Vec<Record>>, StoreError> {
        if self.cursor_index.is_none() {
            self.cursor_index = Some(self.read_index()?);
        }
        let Some(index) = self.cursor_index.as_ref() else {
            return Ok(None);
        };

        let next = match (direction, self.cursor) {
            (Direction::Next, None) => index.first_sequence(),
            (Direction::Next, Some(seq)) => index.after(seq),
            (Direction::Previous, None) => index.last_sequence(),
            (Direction::Previous, Some(seq)) => index.before(seq),
        };

        match next {
            Some(seq) => {
                let records = self.read_chunk_from(index, seq)?;
                self.cursor = Some(seq);
                Ok(Some(records))
            }
            None => Ok(None),
        }
    }

    pub fn reset_cursor(&mut self) {
        self.cursor = None;
        self.cursor_index = None;
    }

    /// Every record of the collection, in chunk order
    pub fn read_all_records(&self) -> Result<Vec<Record>, StoreError> {
        let index = self.read_index()?;
        let mut records = Vec::new();
        for (seq, _) in index.iter() {
            records.extend(self.read_chunk_from(&index, seq)?);
        }
        Ok(records)
    }

    /// Metadata sidecar, or an empty one when the collection has none
    pub fn read_plain_metadata(&self) -> Result<MetadataSidecar, StoreError> {
        MetadataSidecar::load(&self.metadata_path())
    }
}

impl Drop for ChunkedStore {
    fn drop(&mut self) {
        if self.open.is_some() && !self.completed {
            debug!(
                "Store {} dropped with an open chunk; collection is incomplete",
                self.options.base_path.display()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn records(n: usize) -> Vec<Record> {
        (0..n)
            .map(|i| {
                Record::new(format!("blt{:04}", i))
                    .with("title", format!("Entry {}", i))
                    .with("url", format!("/entries/{}", i))
            })
            .collect()
    }

    fn options(dir: &Path) -> StoreOptions {
        StoreOptions::new(dir, "entries")
    }

    #[test]
    fn test_single_chunk_keyed() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = ChunkedStore::create(options(dir.path())).unwrap();

        store.append_records(&records(3), AppendOptions::keyed()).unwrap();
        store.complete_store(true).unwrap();

        let index = store.read_index().unwrap();
        assert_eq!(index.total_chunks(), 1);
        let file = index.get(1).unwrap();
        assert!(file.ends_with("-entries.json"));

        let raw: Value =
            serde_json::from_slice(&std::fs::read(dir.path().join(file)).unwrap()).unwrap();
        assert_eq!(raw["blt0001"]["title"], "Entry 1");
    }

    #[test]
    fn test_multiple_appends_share_chunk() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = ChunkedStore::create(options(dir.path())).unwrap();

        let all = records(6);
        store.append_records(&all[..2], AppendOptions::default()).unwrap();
        store.append_records(&all[2..], AppendOptions::default()).unwrap();
        store.complete_store(true).unwrap();

        assert_eq!(store.total_chunks().unwrap(), 1);
        assert_eq!(store.read_chunk_by_index(1).unwrap(), all);
    }

    #[test]
    fn test_small_bound_splits_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let mut store =
            ChunkedStore::create(options(dir.path()).with_chunk_byte_size(1)).unwrap();

        store.append_records(&records(5), AppendOptions::keyed()).unwrap();
        let stats = store.complete_store(true).unwrap();

        assert_eq!(stats.chunks_finalized, 5);
        assert_eq!(store.total_chunks().unwrap(), 5);
        for seq in 1..=5 {
            assert_eq!(store.read_chunk_by_index(seq).unwrap().len(), 1);
        }
    }

    #[test]
    fn test_close_flag_finalizes_chunk() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = ChunkedStore::create(options(dir.path())).unwrap();

        store
            .append_records(&records(2), AppendOptions::default().closing())
            .unwrap();
        assert!(!store.has_open_chunk());
        store.append_records(&records(1), AppendOptions::default()).unwrap();
        assert!(store.has_open_chunk());
        store.complete_store(true).unwrap();

        assert_eq!(store.total_chunks().unwrap(), 2);
    }

    #[test]
    fn test_complete_with_nothing_open_writes_empty_index() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = ChunkedStore::create(options(dir.path())).unwrap();

        store.complete_store(true).unwrap();
        assert!(store.index_exists());
        assert!(store.read_index().unwrap().is_empty());
        assert!(store.read_all_records().unwrap().is_empty());
    }

    #[test]
    fn test_complete_twice_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = ChunkedStore::create(options(dir.path())).unwrap();
        store.complete_store(false).unwrap();
        assert!(matches!(
            store.complete_store(false),
            Err(StoreError::AlreadyCompleted)
        ));
        assert!(matches!(
            store.append_records(&records(1), AppendOptions::default()),
            Err(StoreError::AlreadyCompleted)
        ));
    }

    #[test]
    fn test_complete_without_index_leaves_no_index() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = ChunkedStore::create(options(dir.path())).unwrap();
        store.append_records(&records(2), AppendOptions::default()).unwrap();
        store.complete_store(false).unwrap();

        assert!(!store.index_exists());
        assert!(matches!(store.read_index(), Err(StoreError::IndexNotFound(_))));
    }

    #[test]
    fn test_framing_mismatch_within_open_chunk() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = ChunkedStore::create(options(dir.path())).unwrap();
        store.append_records(&records(1), AppendOptions::keyed()).unwrap();

        let result = store.append_records(&records(1), AppendOptions::default());
        assert!(matches!(result, Err(StoreError::FramingMismatch)));
        // The open chunk survives the rejected append
        store.complete_store(true).unwrap();
        assert_eq!(store.read_all_records().unwrap().len(), 1);
    }

    #[test]
    fn test_metadata_projection() {
        let dir = tempfile::tempdir().unwrap();
        let opts = options(dir.path())
            .with_chunk_byte_size(1)
            .with_metadata_fields(["uid", "url"]);
        let mut store = ChunkedStore::create(opts).unwrap();

        store.append_records(&records(3), AppendOptions::keyed()).unwrap();
        store.complete_store(true).unwrap();

        let metadata = store.read_plain_metadata().unwrap();
        assert_eq!(metadata.len(), 3);
        for projected in metadata.records() {
            assert!(projected.contains("uid"));
            assert!(projected.contains("url"));
            assert!(!projected.contains("title"));
        }
        for file in store.written_files() {
            assert_eq!(metadata.chunk(&file).unwrap().len(), 1);
        }
    }

    #[test]
    fn test_metadata_absent_when_disabled() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = ChunkedStore::create(options(dir.path())).unwrap();
        store.append_records(&records(2), AppendOptions::default()).unwrap();
        store.complete_store(true).unwrap();

        assert!(!dir.path().join(METADATA_FILE_NAME).exists());
        assert!(store.read_plain_metadata().unwrap().is_empty());
    }

    #[test]
    fn test_sequential_reads_both_directions() {
        let dir = tempfile::tempdir().unwrap();
        let mut store =
            ChunkedStore::create(options(dir.path()).with_chunk_byte_size(1)).unwrap();
        let all = records(3);
        store.append_records(&all, AppendOptions::default()).unwrap();
        store.complete_store(true).unwrap();

        let mut reader = ChunkedStore::open_existing(options(dir.path())).unwrap();
        let mut forward = Vec::new();
        while let Some(chunk) = reader.read_chunk_sequential(Direction::Next).unwrap() {
            forward.extend(chunk);
        }
        assert_eq!(forward, all);

        reader.reset_cursor();
        let first_back = reader.read_chunk_sequential(Direction::Previous).unwrap().unwrap();
        assert_eq!(first_back, vec![all[2].clone()]);
    }

    #[test]
    fn test_text_format() {
        let dir = tempfile::tempdir().unwrap();
        let opts = options(dir.path()).with_format(ChunkFormat::Text);
        let mut store = ChunkedStore::create(opts).unwrap();
        store.append_records(&records(4), AppendOptions::default()).unwrap();
        store.complete_store(true).unwrap();

        let file = store.written_files().remove(0);
        assert!(file.ends_with(".txt"));
        assert_eq!(store.read_all_records().unwrap(), records(4));
    }

    #[test]
    fn test_malformed_chunk_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = ChunkedStore::create(options(dir.path())).unwrap();
        store.append_records(&records(2), AppendOptions::default()).unwrap();
        store.complete_store(true).unwrap();

        let file = store.written_files().remove(0);
        std::fs::write(dir.path().join(&file), b"[{\"uid\":").unwrap();

        assert!(matches!(
            store.read_chunk_by_index(1),
            Err(StoreError::Malformed { .. })
        ));
    }

    #[test]
    fn test_unknown_chunk() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = ChunkedStore::create(options(dir.path())).unwrap();
        store.complete_store(true).unwrap();
        assert!(matches!(
            store.read_chunk_by_index(7),
            Err(StoreError::UnknownChunk(7))
        ));
    }

    #[test]
    fn test_open_existing_requires_directory() {
        let dir = tempfile::tempdir().unwrap();
        let result = ChunkedStore::open_existing(options(&dir.path().join("missing")));
        assert!(matches!(result, Err(StoreError::MissingDirectory(_))));
    }

    #[test]
    fn test_invalid_options() {
        let dir = tempfile::tempdir().unwrap();
        let result = ChunkedStore::create(options(dir.path()).with_chunk_byte_size(0));
        assert!(matches!(result, Err(StoreError::InvalidOptions(_))));
    }
}
