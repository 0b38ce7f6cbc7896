//! Signed transactions with a polymorphic inner payload.
//!
//! A transaction is constructed unsigned with a random nonce, optionally
//! given an inner payload (native NFT operations), then signed. Signing
//! sets the sender key first, because the sender is part of the hashed
//! content. Once a transaction has been hashed or signed it is treated as
//! immutable; the hash is memoized on first computation.

use crate::crypto::key_pair::{PrivateKey, PublicKey, Signature};
use crate::types::encoding::Encode;
use crate::types::hash::{Hash, HashCache};
use blocknet_derive::BinaryCodec;
use bytes::Bytes;
use rand_core::{OsRng, RngCore};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

/// Validation failures surfaced by [`Transaction::verify`].
#[derive(Debug, Error)]
pub enum TransactionError {
    #[error("transaction has no signature")]
    MissingSignature,
    #[error("transaction has no sender key")]
    MissingSender,
    #[error("invalid transaction signature")]
    InvalidSignature,
}

/// Declares a new NFT collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, BinaryCodec)]
pub struct CollectionPayload {
    pub fee: i64,
    #[serde(with = "hex_bytes")]
    pub metadata: Bytes,
}

/// Mints an asset into an existing collection.
///
/// Carries its own signature, distinct from the outer transaction
/// signature, so the collection owner can authorize the mint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, BinaryCodec)]
pub struct MintPayload {
    pub fee: i64,
    pub nft: Hash,
    pub collection: Hash,
    #[serde(with = "hex_bytes")]
    pub metadata: Bytes,
    pub collection_owner: PublicKey,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub signature: Option<Signature>,
}

/// Closed set of use-case specific transaction bodies.
///
/// The JSON form carries a `kind` discriminant. Decoding honors the tag
/// when present; untagged bodies (data written before the tag existed)
/// fall back to trial decoding in the historical order, collection shape
/// first, then mint shape.
#[derive(Debug, Clone, PartialEq, Serialize, BinaryCodec)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InnerPayload {
    Collection(CollectionPayload),
    Mint(MintPayload),
}

impl<'de> Deserialize<'de> for InnerPayload {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = serde_json::Value::deserialize(deserializer)?;

        if let Some(kind) = value.get("kind").and_then(|k| k.as_str()) {
            return match kind {
                "collection" => serde_json::from_value(value.clone())
                    .map(InnerPayload::Collection)
                    .map_err(D::Error::custom),
                "mint" => serde_json::from_value(value.clone())
                    .map(InnerPayload::Mint)
                    .map_err(D::Error::custom),
                other => Err(D::Error::custom(format!(
                    "unknown inner payload kind: {other}"
                ))),
            };
        }

        // Compatibility path for untagged bodies. The trial order is part
        // of the historical wire behavior and must not be reordered.
        if let Ok(collection) = serde_json::from_value(value.clone()) {
            return Ok(InnerPayload::Collection(collection));
        }
        if let Ok(mint) = serde_json::from_value(value) {
            return Ok(InnerPayload::Mint(mint));
        }
        Err(D::Error::custom("inner payload matches no known variant"))
    }
}

/// The unit of state change moved between nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, BinaryCodec)]
pub struct Transaction {
    /// Opaque payload for the downstream VM; may be empty.
    #[serde(with = "hex_bytes")]
    pub data: Bytes,
    /// Recipient of a direct transfer, if any.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub to: Option<PublicKey>,
    /// Transfer amount.
    pub value: u64,
    /// Native NFT body; absent for plain transfers and VM calls.
    #[serde(rename = "tx_inner", skip_serializing_if = "Option::is_none", default)]
    pub inner: Option<InnerPayload>,
    /// Sender key; set by [`Transaction::sign`].
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub from: Option<PublicKey>,
    /// Signature over the transaction hash; present once signed.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub signature: Option<Signature>,
    /// Random 63-bit value assigned at construction. Not a sequence
    /// counter; collisions are accepted.
    pub nonce: u64,

    #[serde(skip)]
    cached_hash: HashCache,
}

impl Transaction {
    /// Creates an unsigned transaction with a random nonce.
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self::with_nonce(data, OsRng.next_u64() >> 1)
    }

    /// Creates an unsigned transaction with an explicit nonce, for
    /// callers that inject their own randomness.
    pub fn with_nonce(data: impl Into<Bytes>, nonce: u64) -> Self {
        Self {
            data: data.into(),
            to: None,
            value: 0,
            inner: None,
            from: None,
            signature: None,
            nonce,
            cached_hash: HashCache::new(),
        }
    }

    /// Returns the content hash, computing and memoizing it on first use.
    ///
    /// Covers every field except the signature and the cache itself.
    pub fn hash(&self) -> Hash {
        self.cached_hash.get_or_compute(|| {
            let mut h = Hash::sha3();
            self.data.encode(&mut h);
            self.to.encode(&mut h);
            self.value.encode(&mut h);
            self.inner.encode(&mut h);
            self.from.encode(&mut h);
            self.nonce.encode(&mut h);
            h.finalize()
        })
    }

    /// Signs the transaction.
    ///
    /// The sender key is assigned before hashing: it is part of the
    /// hashed content, so the cache is reset to drop any hash observed
    /// while `from` was unset.
    pub fn sign(&mut self, key: &PrivateKey) {
        self.from = Some(key.public_key());
        self.cached_hash = HashCache::new();

        let hash = self.hash();
        self.signature = Some(key.sign(hash.as_slice()));
    }

    /// Checks the signature against the sender key and the content hash.
    pub fn verify(&self) -> Result<(), TransactionError> {
        let signature = self
            .signature
            .as_ref()
            .ok_or(TransactionError::MissingSignature)?;
        let from = self.from.as_ref().ok_or(TransactionError::MissingSender)?;

        if !from.verify(self.hash().as_slice(), signature) {
            return Err(TransactionError::InvalidSignature);
        }
        Ok(())
    }
}

/// Hex-string serde representation for opaque byte fields, keeping the
/// JSON form inspectable.
mod hex_bytes {
    use bytes::Bytes;
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Bytes, D::Error> {
        let text = String::deserialize(deserializer)?;
        hex::decode(&text).map(Bytes::from).map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signed(data: &'static [u8], key: &PrivateKey) -> Transaction {
        let mut tx = Transaction::new(data);
        tx.sign(key);
        tx
    }

    #[test]
    fn nonce_fits_in_63_bits() {
        for _ in 0..32 {
            let tx = Transaction::new(b"".as_slice());
            assert_eq!(tx.nonce >> 63, 0);
        }
    }

    #[test]
    fn hash_is_idempotent() {
        let tx = Transaction::with_nonce(b"payload".as_slice(), 1234);
        assert_eq!(tx.hash(), tx.hash());
        assert_eq!(tx.clone().hash(), tx.hash());
    }

    #[test]
    fn hash_covers_data_and_nonce() {
        let a = Transaction::with_nonce(b"a".as_slice(), 1);
        let b = Transaction::with_nonce(b"b".as_slice(), 1);
        let c = Transaction::with_nonce(b"a".as_slice(), 2);
        assert_ne!(a.hash(), b.hash());
        assert_ne!(a.hash(), c.hash());
    }

    #[test]
    fn hash_covers_inner_payload() {
        let plain = Transaction::with_nonce(b"x".as_slice(), 7);
        let mut with_inner = Transaction::with_nonce(b"x".as_slice(), 7);
        with_inner.inner = Some(InnerPayload::Collection(CollectionPayload {
            fee: 200,
            metadata: Bytes::from_static(b"meta"),
        }));
        assert_ne!(plain.hash(), with_inner.hash());
    }

    #[test]
    fn sign_then_verify() {
        let key = PrivateKey::new();
        let tx = signed(b"hello", &key);

        assert_eq!(tx.from, Some(key.public_key()));
        assert!(tx.signature.is_some());
        assert!(tx.verify().is_ok());
    }

    #[test]
    fn unsigned_transaction_fails_verification() {
        let tx = Transaction::new(b"unsigned".as_slice());
        assert!(matches!(
            tx.verify(),
            Err(TransactionError::MissingSignature)
        ));
    }

    #[test]
    fn tampered_data_fails_verification() {
        let key = PrivateKey::new();
        let mut tx = signed(b"original", &key);
        tx.data = Bytes::from_static(b"tampered");
        // A fresh cache models a receiver recomputing the hash.
        tx.cached_hash = HashCache::new();
        assert!(matches!(
            tx.verify(),
            Err(TransactionError::InvalidSignature)
        ));
    }

    #[test]
    fn tampered_sender_fails_verification() {
        let key = PrivateKey::new();
        let mut tx = signed(b"payload", &key);
        tx.from = Some(PrivateKey::new().public_key());
        tx.cached_hash = HashCache::new();
        assert!(matches!(
            tx.verify(),
            Err(TransactionError::InvalidSignature)
        ));
    }

    #[test]
    fn foreign_signature_fails_verification() {
        let key = PrivateKey::new();
        let mut tx = signed(b"payload", &key);

        let other = signed(b"other payload", &key);
        tx.signature = other.signature;
        assert!(matches!(
            tx.verify(),
            Err(TransactionError::InvalidSignature)
        ));
    }

    #[test]
    fn signing_after_hash_observation_resets_the_cache() {
        let key = PrivateKey::new();
        let mut tx = Transaction::new(b"observed early".as_slice());
        let unsigned_hash = tx.hash();

        tx.sign(&key);
        assert_ne!(tx.hash(), unsigned_hash);
        assert!(tx.verify().is_ok());
    }

    #[test]
    fn mint_payload_transaction_verifies() {
        let owner = PrivateKey::new();
        let collection = Transaction::with_nonce(b"".as_slice(), 1).hash();

        let mut tx = Transaction::new(b"".as_slice());
        tx.inner = Some(InnerPayload::Mint(MintPayload {
            fee: 200,
            nft: Hash([0xAB; 32]),
            collection,
            metadata: Bytes::from_static(b"{\"color\":\"green\"}"),
            collection_owner: owner.public_key(),
            signature: None,
        }));
        tx.sign(&owner);
        assert!(tx.verify().is_ok());
    }
}
