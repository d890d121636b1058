use std::fmt;

use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};

use super::error::StorageError;

/// SHA-1 of an original's bytes. Never changes after upload.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Checksum([u8; 20]);

impl Checksum {
    pub fn compute(data: &[u8]) -> Self {
        Self(Sha1::digest(data).into())
    }

    /// Parse a 40-character hex checksum (case-insensitive).
    pub fn from_hex(s: &str) -> Result<Self, StorageError> {
        if s.len() != 40 {
            return Err(StorageError::InvalidChecksum(format!(
                "expected 40 hex characters, got {}",
                s.len()
            )));
        }
        let bytes = hex::decode(s)
            .map_err(|e| StorageError::InvalidChecksum(format!("invalid hex: {e}")))?;
        let arr: [u8; 20] = bytes
            .try_into()
            .map_err(|_| StorageError::InvalidChecksum("decoded to wrong length".into()))?;
        Ok(Self(arr))
    }

    /// Lowercase hex form, as stored in `image_metadata.checksum`.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

/// Lowercase hex SHA-1 of arbitrary bytes.
pub fn sha1_hex(data: impl AsRef<[u8]>) -> String {
    hex::encode(Sha1::digest(data.as_ref()))
}

impl fmt::Debug for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Checksum({})", self.to_hex())
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl Serialize for Checksum {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Checksum {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}
