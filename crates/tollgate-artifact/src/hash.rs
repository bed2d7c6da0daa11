//! Content fingerprints for stored artifact versions
//!
//! Every version written to a store carries a [`ContentHash`] over its
//! canonical JSON encoding. Stores recompute it on read, so a record edited
//! on disk after finalization is detected instead of silently judged.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

/// 32-byte BLAKE3 digest of an artifact version
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct ContentHash([u8; 32]);

impl ContentHash {
    #[inline]
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    #[inline]
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Hash raw bytes
    #[inline]
    #[must_use]
    pub fn compute(data: &[u8]) -> Self {
        Self(*blake3::hash(data).as_bytes())
    }

    /// Hash the JSON encoding of a value
    ///
    /// Callers must only pass values with a deterministic encoding
    /// (ordered maps and sets), otherwise equal values may hash differently.
    ///
    /// # Errors
    /// Returns error if the value cannot be serialized
    pub fn of_json<T: Serialize>(value: &T) -> Result<Self, HashError> {
        let encoded = serde_json::to_vec(value)?;
        Ok(Self::compute(&encoded))
    }

    /// First 8 bytes as hex, for log lines and reports
    #[inline]
    #[must_use]
    pub fn short(&self) -> String {
        hex::encode(&self.0[..8])
    }
}

impl Display for ContentHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl FromStr for ContentHash {
    type Err = HashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s)?;
        let arr: [u8; 32] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| HashError::InvalidLength(bytes.len()))?;
        Ok(Self(arr))
    }
}

impl Serialize for ContentHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for ContentHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Errors from hashing or parsing a [`ContentHash`]
#[derive(Debug, thiserror::Error)]
pub enum HashError {
    #[error("invalid hash length: expected 32 bytes, got {0}")]
    InvalidLength(usize),

    #[error("invalid hex: {0}")]
    InvalidHex(#[from] hex::FromHexError),

    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}
