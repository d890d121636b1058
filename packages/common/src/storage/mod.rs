mod checksum;
mod error;

pub mod library;

pub use checksum::{Checksum, sha1_hex};
pub use error::StorageError;
pub use library::{Library, write_atomic};
