//! Error type for chunked store operations

use std::io::{Error as IoError, ErrorKind};
use std::path::PathBuf;

/// Error type for chunked store operations
///
/// Every variant is fatal for the collection it was raised on; the store
/// never reports a partial read as success.
#[derive(Debug)]
pub enum StoreError {
    /// I/O error on a specific path
    Io { path: PathBuf, source: IoError },
    /// Existing file could not be parsed
    Malformed {
        path: PathBuf,
        source: serde_json::Error,
    },
    /// Serialization of an outgoing record failed
    Serialization(serde_json::Error),
    /// Required directory does not exist
    MissingDirectory(PathBuf),
    /// Index file not found (collection never completed)
    IndexNotFound(PathBuf),
    /// Sequence number not present in the index
    UnknownChunk(u64),
    /// Record lacks the field used as its key in key-mapped mode
    MissingKey { field: String },
    /// Append requested a different framing than the open chunk uses
    FramingMismatch,
    /// Store was already completed
    AlreadyCompleted,
    /// Invalid store options
    InvalidOptions(String),
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: IoError) -> Self {
        StoreError::Io {
            path: path.into(),
            source,
        }
    }

    /// Like [`StoreError::io`], but a missing path becomes `MissingDirectory`
    pub(crate) fn dir_io(path: impl Into<PathBuf>, source: IoError) -> Self {
        let path = path.into();
        if source.kind() == ErrorKind::NotFound {
            return StoreError::MissingDirectory(path);
        }
        StoreError::Io { path, source }
    }

    /// True when the error means "nothing is stored here yet"
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            StoreError::IndexNotFound(_) | StoreError::MissingDirectory(_)
        )
    }

    pub(crate) fn malformed(path: impl Into<PathBuf>, source: serde_json::Error) -> Self {
        StoreError::Malformed {
            path: path.into(),
            source,
        }
    }
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Io { path, source } => {
                write!(f, "I/O error on {}: {}", path.display(), source)
            }
            StoreError::Malformed { path, source } => {
                write!(f, "Malformed file {}: {}", path.display(), source)
            }
            StoreError::Serialization(e) => write!(f, "Serialization error: {}", e),
            StoreError::MissingDirectory(path) => {
                write!(f, "Missing directory: {}", path.display())
            }
            StoreError::IndexNotFound(path) => write!(f, "Index not found: {}", path.display()),
            StoreError::UnknownChunk(seq) => write!(f, "Chunk {} not present in index", seq),
            StoreError::MissingKey { field } => {
                write!(f, "Record is missing key field '{}'", field)
            }
            StoreError::FramingMismatch => {
                write!(f, "Append framing does not match the open chunk")
            }
            StoreError::AlreadyCompleted => write!(f, "Store already completed"),
            StoreError::InvalidOptions(msg) => write!(f, "Invalid store options: {}", msg),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StoreError::Io { source, .. } => Some(source),
            StoreError::Malformed { source, .. } => Some(source),
            StoreError::Serialization(e) => Some(e),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e)
    }
}
