//! On-disk transform cache: `<image-dir>/transforms/<sha1(etag)>.<ext>`.

use std::io::ErrorKind;
use std::path::Path;

use common::storage::{StorageError, sha1_hex, write_atomic};

/// Prefix of in-flight cache writes. Readers and the GC ignore these.
pub const TEMP_PREFIX: &str = "tmp-transform-";

pub fn cache_file_name(etag: &str, extension: &str) -> String {
    format!("{}.{extension}", sha1_hex(etag))
}

pub fn is_temp_file(name: &str) -> bool {
    name.starts_with(TEMP_PREFIX)
}

/// Cached bytes, or `None` if the entry is missing.
pub async fn read(dir: &Path, name: &str) -> Result<Option<Vec<u8>>, StorageError> {
    match tokio::fs::read(dir.join(name)).await {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Store an entry through a temp file and rename.
pub async fn write(dir: &Path, name: &str, bytes: &[u8]) -> Result<(), StorageError> {
    tokio::fs::create_dir_all(dir).await?;
    write_atomic(dir, name, bytes, TEMP_PREFIX).await?;
    Ok(())
}

/// Remove every cached rendition in `dir`. Returns the number removed.
pub async fn clear(dir: &Path) -> Result<u64, StorageError> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e.into()),
    };
    let mut removed = 0;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        if is_temp_file(&name.to_string_lossy()) {
            continue;
        }
        if entry.file_type().await?.is_file() {
            tokio::fs::remove_file(entry.path()).await?;
            removed += 1;
        }
    }
    Ok(removed)
}
