//! Filesystem helpers shared by the store, the uid mapper and the importers
//!
//! ## Atomic Update Pattern (TigerStyle)
//!
//! 1. Write to `<name>.tmp`
//! 2. Rename temp to final (atomic on POSIX)
//! 3. On failure: temp file is orphaned, original intact

use crate::store::StoreError;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

/// Serialize `value` as pretty JSON and atomically replace `path`
pub fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), StoreError> {
    let data = serde_json::to_vec_pretty(value)?;
    write_bytes_atomic(path, &data)
}

/// Atomically replace `path` with `data`
pub fn write_bytes_atomic(path: &Path, data: &[u8]) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
    }

    let mut temp = path.as_os_str().to_owned();
    temp.push(".tmp");
    let temp = PathBuf::from(temp);

    std::fs::write(&temp, data).map_err(|e| StoreError::io(&temp, e))?;
    std::fs::rename(&temp, path).map_err(|e| StoreError::io(path, e))?;
    Ok(())
}

/// Read and parse a JSON file.
///
/// Returns `Ok(None)` when the file does not exist; a file that exists but
/// does not parse is an error, never an empty result.
pub fn read_json_file<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StoreError> {
    let data = match std::fs::read(path) {
        Ok(data) => data,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(StoreError::io(path, e)),
    };
    let value = serde_json::from_slice(&data).map_err(|e| StoreError::malformed(path, e))?;
    Ok(Some(value))
}

/// True if `name` is exactly one normal path component: no separators,
/// no `.` or `..`, not absolute. Names from remote records must pass this
/// before they are joined onto a local path.
pub fn is_plain_segment(name: &str) -> bool {
    if name.contains(['/', '\\']) {
        return false;
    }
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    )
}

/// Names of the immediate subdirectories of `dir`, sorted
pub fn list_subdirectories(dir: &Path) -> Result<Vec<String>, StoreError> {
    let mut names = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(|e| StoreError::dir_io(dir, e))? {
        let entry = entry.map_err(|e| StoreError::io(dir, e))?;
        let file_type = entry.file_type().map_err(|e| StoreError::io(entry.path(), e))?;
        if file_type.is_dir() {
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }
    }
    names.sort();
    Ok(names)
}

/// Every regular file under `dir`, at any depth, sorted.
///
/// Walks with an explicit stack rather than recursion.
pub fn list_files_recursively(dir: &Path) -> Result<Vec<PathBuf>, StoreError> {
    if !dir.is_dir() {
        return Err(StoreError::MissingDirectory(dir.to_path_buf()));
    }

    let mut files = Vec::new();
    let mut pending = vec![dir.to_path_buf()];

    while let Some(current) = pending.pop() {
        for entry in std::fs::read_dir(&current).map_err(|e| StoreError::dir_io(&current, e))? {
            let entry = entry.map_err(|e| StoreError::io(&current, e))?;
            let path = entry.path();
            let file_type = entry.file_type().map_err(|e| StoreError::io(&path, e))?;
            if file_type.is_dir() {
                pending.push(path);
            } else if file_type.is_file() {
                files.push(path);
            }
        }
    }

    files.sort();
    Ok(files)
}
