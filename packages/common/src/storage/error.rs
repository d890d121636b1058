use thiserror::Error;

/// Errors raised by the on-disk image library.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("not found on disk: {0}")]
    NotFound(String),

    #[error("storage IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The value is not a well-formed image UID.
    #[error("invalid image uid: {0}")]
    InvalidUid(String),

    /// Not 40 hex digits.
    #[error("invalid checksum: {0}")]
    InvalidChecksum(String),

    /// The destination of a write or move is already there.
    #[error("already exists on disk: {0}")]
    AlreadyExists(String),

    #[error("file exceeds size limit ({actual} > {limit} bytes)")]
    SizeLimitExceeded { actual: u64, limit: u64 },
}
