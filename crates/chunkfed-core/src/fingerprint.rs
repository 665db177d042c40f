//! Content fingerprinting: BLAKE3 and SHA-256 chunk hashes

use crate::error::CoreError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

/// Length of every supported digest in bytes.
pub const HASH_LEN: usize = 32;

/// A 32-byte digest identifying a chunk's content. Used as the chunk cache key
/// and as the identifier in the federated chunk protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContentHash(pub [u8; HASH_LEN]);

impl ContentHash {
    /// Return the hash as a lowercase hex string
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Return the raw bytes
    pub fn as_bytes(&self) -> &[u8; HASH_LEN] {
        &self.0
    }

    /// Parse a hex-encoded hash
    pub fn from_hex(input: &str) -> Result<Self, CoreError> {
        let raw = hex::decode(input).map_err(|e| CoreError::InvalidHash {
            input: input.to_string(),
            reason: e.to_string(),
        })?;
        let bytes: [u8; HASH_LEN] = raw.try_into().map_err(|v: Vec<u8>| CoreError::InvalidHash {
            input: input.to_string(),
            reason: format!("expected {} bytes, got {}", HASH_LEN, v.len()),
        })?;
        Ok(ContentHash(bytes))
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl FromStr for ContentHash {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl Serialize for ContentHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for ContentHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Supported chunk hash algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    /// BLAKE3 (default)
    #[default]
    Blake3,
    /// SHA-256
    Sha256,
}

impl HashAlgorithm {
    /// Name used in configuration and in serialized recipes.
    pub fn as_str(&self) -> &'static str {
        match self {
            HashAlgorithm::Blake3 => "blake3",
            HashAlgorithm::Sha256 => "sha256",
        }
    }

    /// Start an incremental hash.
    pub fn hasher(&self) -> ContentHasher {
        match self {
            HashAlgorithm::Blake3 => ContentHasher::Blake3(Box::new(blake3::Hasher::new())),
            HashAlgorithm::Sha256 => ContentHasher::Sha256(Sha256::new()),
        }
    }

    /// Hash a complete buffer.
    pub fn digest(&self, data: &[u8]) -> ContentHash {
        let mut hasher = self.hasher();
        hasher.update(data);
        hasher.finalize()
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HashAlgorithm {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "blake3" => Ok(HashAlgorithm::Blake3),
            "sha256" | "sha-256" => Ok(HashAlgorithm::Sha256),
            other => Err(CoreError::UnknownAlgorithm(other.to_string())),
        }
    }
}

/// Incremental hash accumulator for one chunk.
pub enum ContentHasher {
    /// BLAKE3 state
    Blake3(Box<blake3::Hasher>),
    /// SHA-256 state
    Sha256(Sha256),
}

impl ContentHasher {
    /// Feed more bytes.
    pub fn update(&mut self, data: &[u8]) {
        match self {
            ContentHasher::Blake3(h) => {
                h.update(data);
            }
            ContentHasher::Sha256(h) => h.update(data),
        }
    }

    /// Consume the accumulator and produce the digest.
    pub fn finalize(self) -> ContentHash {
        match self {
            ContentHasher::Blake3(h) => ContentHash(*h.finalize().as_bytes()),
            ContentHasher::Sha256(h) => ContentHash(h.finalize().into()),
        }
    }
}
