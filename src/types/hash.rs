//! 32-byte SHA3-256 hash type, incremental builder, and memoizing cache.

use crate::types::encoding::{Decode, DecodeError, Encode, EncodeSink};
use blocknet_derive::BinaryCodec;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha3::{Digest, Sha3_256};
use std::fmt;
use std::sync::OnceLock;

/// Hash length in bytes.
pub const HASH_LEN: usize = 32;

/// Fixed-size hash used as content identity for transactions, blocks,
/// collections, and minted assets.
///
/// `Copy` on purpose: hashes are passed around constantly and 32 bytes on
/// the stack beats reference indirection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, BinaryCodec)]
pub struct Hash(pub [u8; HASH_LEN]);

impl Hash {
    /// The all-zero hash, used as a sentinel for "not set".
    pub fn zero() -> Hash {
        Hash([0u8; HASH_LEN])
    }

    /// Returns `true` for the all-zero sentinel.
    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|&b| b == 0)
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }

    /// Starts an incremental SHA3-256 computation.
    pub fn sha3() -> HashBuilder {
        HashBuilder {
            hasher: Sha3_256::new(),
        }
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl Serialize for Hash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(self.0))
    }
}

impl<'de> Deserialize<'de> for Hash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        let raw = hex::decode(&text).map_err(D::Error::custom)?;
        let bytes: [u8; HASH_LEN] = raw
            .try_into()
            .map_err(|_| D::Error::custom("hash must be 32 bytes"))?;
        Ok(Hash(bytes))
    }
}

/// Incremental SHA3-256 builder.
///
/// Implements [`EncodeSink`], so any `Encode` type can be fed straight
/// into the hasher without an intermediate buffer.
pub struct HashBuilder {
    hasher: Sha3_256,
}

impl HashBuilder {
    pub fn update(&mut self, data: &[u8]) {
        self.hasher.update(data);
    }

    pub fn finalize(self) -> Hash {
        Hash(self.hasher.finalize().into())
    }
}

impl EncodeSink for HashBuilder {
    fn write(&mut self, bytes: &[u8]) {
        self.hasher.update(bytes);
    }
}

/// One-shot memoization slot for a lazily computed hash.
///
/// The cache never participates in equality, serialization, or hashing of
/// its owner; it is a performance detail. Owners are treated as immutable
/// once their hash has been observed.
#[derive(Debug, Default, Clone)]
pub struct HashCache(OnceLock<Hash>);

impl HashCache {
    pub fn new() -> Self {
        Self(OnceLock::new())
    }

    /// Returns the cached hash, computing and storing it on first call.
    pub fn get_or_compute(&self, compute: impl FnOnce() -> Hash) -> Hash {
        *self.0.get_or_init(compute)
    }
}

// Caches are invisible to comparisons: two values with identical fields
// are equal whether or not either has hashed itself yet.
impl PartialEq for HashCache {
    fn eq(&self, _other: &Self) -> bool {
        true
    }
}

impl Eq for HashCache {}

// Excluded from the wire format; decoding yields an empty slot.
impl Encode for HashCache {
    fn encode<S: EncodeSink>(&self, _out: &mut S) {}
}

impl Decode for HashCache {
    fn decode(_input: &mut &[u8]) -> Result<Self, DecodeError> {
        Ok(Self::new())
    }
}
