/// Blob storage data models
use crate::error::{MediaError, MediaResult};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;

/// SHA-256 digest of an original file's bytes.
///
/// Serialized as lowercase hex. Parsing also accepts standard base64,
/// which is what most mobile backup clients send.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Checksum([u8; Checksum::LEN]);

impl Checksum {
    pub const LEN: usize = 32;

    /// Digest of an in-memory buffer
    pub fn of(data: &[u8]) -> Self {
        Self::from_digest(Sha256::digest(data).into())
    }

    pub fn from_digest(digest: [u8; Checksum::LEN]) -> Self {
        Self(digest)
    }

    pub fn from_bytes(bytes: &[u8]) -> MediaResult<Self> {
        let digest: [u8; Checksum::LEN] = bytes.try_into().map_err(|_| {
            MediaError::Validation(format!(
                "Checksum must be {} bytes, got {}",
                Checksum::LEN,
                bytes.len()
            ))
        })?;
        Ok(Self(digest))
    }

    /// Parse a hex or base64 encoded checksum
    pub fn parse(value: &str) -> MediaResult<Self> {
        let value = value.trim();
        if value.is_empty() {
            return Err(MediaError::Validation("Checksum cannot be empty".to_string()));
        }

        if value.len() == Checksum::LEN * 2 {
            if let Ok(bytes) = hex::decode(value) {
                return Self::from_bytes(&bytes);
            }
        }

        let bytes = STANDARD
            .decode(value)
            .map_err(|_| MediaError::Validation(format!("Malformed checksum: {}", value)))?;
        Self::from_bytes(&bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Checksum({})", self.to_hex())
    }
}

impl Serialize for Checksum {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Checksum {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        Checksum::parse(&value).map_err(serde::de::Error::custom)
    }
}
