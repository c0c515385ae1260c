//! Chunked Content Store
//!
//! Streaming, append-only persistence for one logical collection (e.g.
//! "entries of content type X in locale Y"). Records are streamed into
//! bounded-size chunk files; an index maps chunk sequence numbers to
//! filenames and an optional sidecar carries a reduced projection of each
//! record.
//!
//! ## On-disk Layout
//!
//! ```text
//! <base>/<uuid>-<module>.json   chunk files 1..N
//! <base>/index.json             {"1": "<chunk 1>", "2": "<chunk 2>", ...}
//! <base>/metadata.json          {"<chunk>": [{picked fields}, ...]}
//! ```
//!
//! The index is the only way to enumerate chunks. It is written once, by
//! `complete_store`, so an interrupted pass leaves the collection void.

pub mod chunked;
pub mod error;
pub mod format;
pub mod fs;
pub mod index;
pub mod metadata;

pub use chunked::{
    AppendOptions, ChunkedStore, Direction, StoreOptions, StoreStats, DEFAULT_CHUNK_BYTE_SIZE,
    INDEX_FILE_NAME, METADATA_FILE_NAME,
};
pub use error::StoreError;
pub use format::{decode_chunk, records_from_value, ChunkFormat, Framing};
pub use fs::{
    is_plain_segment, list_files_recursively, list_subdirectories, read_json_file, write_bytes_atomic,
    write_json_atomic,
};
pub use index::{ChunkIndex, IndexFile};
pub use metadata::MetadataSidecar;
