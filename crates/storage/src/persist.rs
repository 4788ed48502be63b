//! Reading and writing store snapshots as JSON files.

use serde::Serialize;
use serde::de::DeserializeOwned;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use timegraph_core::StorageError;

/// Load a snapshot. A missing file yields `None`. A file that cannot be read
/// or parsed is an error, so a damaged store is never mistaken for an empty
/// one and overwritten on the next flush.
pub(crate) fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StorageError> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(StorageError::Storage(format!(
                "Failed to read {}: {e}",
                path.display()
            )));
        }
    };

    serde_json::from_str(&content).map(Some).map_err(|e| {
        StorageError::Storage(format!(
            "Corrupted store file {}: {e}; fix or remove it before reopening",
            path.display()
        ))
    })
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Write a snapshot, creating the parent directory if needed. The content
/// goes to a sibling temp file first and is renamed over the target.
pub(crate) async fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), StorageError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(|e| {
            StorageError::Storage(format!("Failed to create directory {}: {e}", parent.display()))
        })?;
    }

    let content = serde_json::to_string_pretty(value).map_err(|e| {
        StorageError::Storage(format!("Failed to serialize {}: {e}", path.display()))
    })?;

    let tmp = temp_path(path);
    tokio::fs::write(&tmp, content).await.map_err(|e| {
        StorageError::Storage(format!("Failed to write {}: {e}", tmp.display()))
    })?;
    tokio::fs::rename(&tmp, path).await.map_err(|e| {
        StorageError::Storage(format!("Failed to replace {}: {e}", path.display()))
    })
}
