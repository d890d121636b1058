//! On-disk layout of the image library.
//!
//! ```text
//! <library_root>/<uid>/<uid>.<ext>              original, byte-for-byte
//! <library_root>/<uid>/<uid>-thumbnail.jpeg     display thumbnail
//! <library_root>/<uid>/<uid>.xmp                sidecar
//! <library_root>/<uid>/transforms/<sha1>.<ext>  transform cache
//! <trash_root>/<uid>/...                        same layout, soft-deleted
//! ```

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::{debug, warn};

use super::error::StorageError;
use crate::uid;

/// Name of the per-image transform cache directory.
pub const TRANSFORMS_DIR: &str = "transforms";

/// Roots of the live library and of the trash.
#[derive(Debug, Clone)]
pub struct Library {
    library_root: PathBuf,
    trash_root: PathBuf,
}

impl Library {
    /// Open the library, creating both roots if needed.
    pub async fn open(
        library_root: impl Into<PathBuf>,
        trash_root: impl Into<PathBuf>,
    ) -> Result<Self, StorageError> {
        let library_root = library_root.into();
        let trash_root = trash_root.into();
        fs::create_dir_all(&library_root).await?;
        fs::create_dir_all(&trash_root).await?;
        Ok(Self {
            library_root,
            trash_root,
        })
    }

    pub fn library_root(&self) -> &Path {
        &self.library_root
    }

    pub fn trash_root(&self) -> &Path {
        &self.trash_root
    }

    /// Directory of a live image.
    pub fn image_dir(&self, uid: &str) -> Result<PathBuf, StorageError> {
        Ok(self.library_root.join(checked(uid)?))
    }

    /// Directory of a soft-deleted image.
    pub fn trash_dir(&self, uid: &str) -> Result<PathBuf, StorageError> {
        Ok(self.trash_root.join(checked(uid)?))
    }

    pub fn original_path(&self, uid: &str, file_name: &str) -> Result<PathBuf, StorageError> {
        Ok(self.image_dir(uid)?.join(file_name))
    }

    pub fn thumbnail_path(&self, uid: &str) -> Result<PathBuf, StorageError> {
        Ok(self.image_dir(uid)?.join(format!("{uid}-thumbnail.jpeg")))
    }

    pub fn sidecar_path(&self, uid: &str) -> Result<PathBuf, StorageError> {
        Ok(self.image_dir(uid)?.join(format!("{uid}.xmp")))
    }

    pub fn transforms_dir(&self, uid: &str) -> Result<PathBuf, StorageError> {
        Ok(self.image_dir(uid)?.join(TRANSFORMS_DIR))
    }

    /// Write an original into a fresh image directory.
    ///
    /// Fails with `AlreadyExists` if the directory is already there. The file
    /// lands under a temporary name first and is renamed into place.
    pub async fn write_original(
        &self,
        uid: &str,
        file_name: &str,
        data: &[u8],
    ) -> Result<PathBuf, StorageError> {
        let dir = self.image_dir(uid)?;
        if fs::try_exists(&dir).await? {
            return Err(StorageError::AlreadyExists(uid.to_string()));
        }
        fs::create_dir_all(dir.join(TRANSFORMS_DIR)).await?;

        match write_atomic(&dir, file_name, data, ".upload-").await {
            Ok(path) => Ok(path),
            Err(e) => {
                let _ = fs::remove_dir_all(&dir).await;
                Err(e)
            }
        }
    }

    /// Read a file of a live image.
    pub async fn read(&self, path: &Path) -> Result<Vec<u8>, StorageError> {
        match fs::read(path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(StorageError::NotFound(path.display().to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Move an image directory from the library into the trash.
    pub async fn move_to_trash(&self, uid: &str) -> Result<(), StorageError> {
        move_dir(&self.image_dir(uid)?, &self.trash_dir(uid)?).await
    }

    /// Move an image directory from the trash back into the library.
    pub async fn restore_from_trash(&self, uid: &str) -> Result<(), StorageError> {
        move_dir(&self.trash_dir(uid)?, &self.image_dir(uid)?).await
    }

    /// Remove an image directory from both roots. Returns true if anything
    /// was removed.
    pub async fn purge(&self, uid: &str) -> Result<bool, StorageError> {
        let mut removed = false;
        for dir in [self.image_dir(uid)?, self.trash_dir(uid)?] {
            match fs::remove_dir_all(&dir).await {
                Ok(()) => removed = true,
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(removed)
    }

    pub async fn in_library(&self, uid: &str) -> Result<bool, StorageError> {
        Ok(fs::try_exists(self.image_dir(uid)?).await?)
    }

    pub async fn in_trash(&self, uid: &str) -> Result<bool, StorageError> {
        Ok(fs::try_exists(self.trash_dir(uid)?).await?)
    }
}

fn checked(uid: &str) -> Result<&str, StorageError> {
    if uid::is_valid(uid) {
        Ok(uid)
    } else {
        Err(StorageError::InvalidUid(uid.to_string()))
    }
}

/// Canonical on-disk name of an original: `<uid>.<ext>` with the upload's
/// extension lowercased, or `<uid>` when there is none.
pub fn canonical_file_name(uid: &str, original_name: &str) -> String {
    match file_extension(original_name) {
        Some(ext) => format!("{uid}.{ext}"),
        None => uid.to_string(),
    }
}

/// Lowercase ASCII-alphanumeric extension of a file name.
pub fn file_extension(name: &str) -> Option<String> {
    let (stem, ext) = name.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() || ext.len() > 10 {
        return None;
    }
    if !ext.bytes().all(|b| b.is_ascii_alphanumeric()) {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

/// Write `data` to `dir/name` through a temporary file in the same
/// directory, then rename it into place.
pub async fn write_atomic(
    dir: &Path,
    name: &str,
    data: &[u8],
    temp_prefix: &str,
) -> Result<PathBuf, StorageError> {
    let final_path = dir.join(name);
    let temp_path = dir.join(format!("{temp_prefix}{}", uuid::Uuid::new_v4()));

    if let Err(e) = fs::write(&temp_path, data).await {
        let _ = fs::remove_file(&temp_path).await;
        return Err(e.into());
    }
    if let Err(e) = fs::rename(&temp_path, &final_path).await {
        let _ = fs::remove_file(&temp_path).await;
        return Err(e.into());
    }
    Ok(final_path)
}

/// Prefix of a source directory parked next to itself while a copied move
/// finishes.
const MOVING_PREFIX: &str = ".moving-";

/// Rename `from` to `to`; if the filesystem refuses (e.g. across devices),
/// copy recursively and delete the source.
///
/// The copied move either leaves the tree at `to` only or, on error, at
/// `from` only.
pub async fn move_dir(from: &Path, to: &Path) -> Result<(), StorageError> {
    if !fs::try_exists(from).await? {
        return Err(StorageError::NotFound(from.display().to_string()));
    }
    if fs::try_exists(to).await? {
        return Err(StorageError::AlreadyExists(to.display().to_string()));
    }
    if let Some(parent) = to.parent() {
        fs::create_dir_all(parent).await?;
    }

    match fs::rename(from, to).await {
        Ok(()) => Ok(()),
        Err(rename_err) => {
            debug!(
                from = %from.display(),
                to = %to.display(),
                error = %rename_err,
                "Rename refused, falling back to copy"
            );
            copy_then_remove(from, to).await
        }
    }
}

async fn copy_then_remove(from: &Path, to: &Path) -> Result<(), StorageError> {
    if let Err(copy_err) = copy_dir_recursive(from, to).await {
        discard_copy(to).await;
        return Err(copy_err);
    }

    // A same-directory rename cannot cross devices, and once it succeeds the
    // source is out of its root even if the delete below fails halfway.
    let parked = from.with_file_name(format!("{MOVING_PREFIX}{}", uuid::Uuid::new_v4()));
    if let Err(e) = fs::rename(from, &parked).await {
        warn!(path = %from.display(), error = %e, "Copied directory but could not detach source, undoing copy");
        discard_copy(to).await;
        return Err(e.into());
    }
    if let Err(e) = fs::remove_dir_all(&parked).await {
        warn!(path = %parked.display(), error = %e, "Moved directory but left the detached source behind");
    }
    Ok(())
}

async fn discard_copy(to: &Path) {
    if let Err(e) = fs::remove_dir_all(to).await
        && e.kind() != ErrorKind::NotFound
    {
        warn!(path = %to.display(), error = %e, "Failed to remove partial copy");
    }
}

async fn copy_dir_recursive(from: &Path, to: &Path) -> Result<(), StorageError> {
    let mut pending = vec![(from.to_path_buf(), to.to_path_buf())];
    while let Some((src, dst)) = pending.pop() {
        fs::create_dir_all(&dst).await?;
        let mut entries = fs::read_dir(&src).await?;
        while let Some(entry) = entries.next_entry().await? {
            let target = dst.join(entry.file_name());
            if entry.file_type().await?.is_dir() {
                pending.push((entry.path(), target));
            } else {
                fs::copy(entry.path(), target).await?;
            }
        }
    }
    Ok(())
}
