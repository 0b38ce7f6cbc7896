//! Schnorr key pairs on secp256k1.
//!
//! The rest of the crate only ever derives a public key, signs bytes, and
//! verifies a signature; key persistence is a concern of the embedding
//! process, not of this library.

use crate::types::encoding::{Decode, DecodeError, Encode, EncodeSink};
use k256::schnorr::signature::{Signer, Verifier};
use k256::schnorr::{Signature as SchnorrSignature, SigningKey, VerifyingKey};
use rand_core::OsRng;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Private signing key. Never serialized.
#[derive(Clone)]
pub struct PrivateKey {
    key: SigningKey,
}

impl PrivateKey {
    /// Generates a fresh key from OS entropy.
    pub fn new() -> Self {
        Self {
            key: SigningKey::random(&mut OsRng),
        }
    }

    /// Builds a key from raw scalar bytes; `None` if the bytes are not a
    /// valid secp256k1 scalar. Mainly useful for deterministic tests.
    pub fn from_bytes(bytes: &[u8; 32]) -> Option<Self> {
        SigningKey::from_bytes(bytes).ok().map(|key| Self { key })
    }

    /// Derives the corresponding public key.
    pub fn public_key(&self) -> PublicKey {
        PublicKey(*self.key.verifying_key())
    }

    /// Signs arbitrary bytes, producing a Schnorr signature.
    pub fn sign(&self, data: &[u8]) -> Signature {
        Signature(self.key.sign(data))
    }
}

impl Default for PrivateKey {
    fn default() -> Self {
        Self::new()
    }
}

/// Public verification key (32-byte x-only encoding on the wire).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct PublicKey(VerifyingKey);

impl PublicKey {
    /// Checks a signature over `data`.
    pub fn verify(&self, data: &[u8], signature: &Signature) -> bool {
        self.0.verify(data, &signature.0).is_ok()
    }

    pub fn to_bytes(&self) -> [u8; 32] {
        self.0.to_bytes().into()
    }
}

impl Encode for PublicKey {
    fn encode<S: EncodeSink>(&self, out: &mut S) {
        out.write(&self.to_bytes());
    }
}

impl Decode for PublicKey {
    fn decode(input: &mut &[u8]) -> Result<Self, DecodeError> {
        let raw = <[u8; 32]>::decode(input)?;
        let key = VerifyingKey::from_bytes(&raw).map_err(|_| DecodeError::InvalidValue)?;
        Ok(PublicKey(key))
    }
}

impl Serialize for PublicKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(self.to_bytes()))
    }
}

impl<'de> Deserialize<'de> for PublicKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        let raw = hex::decode(&text).map_err(D::Error::custom)?;
        let bytes: [u8; 32] = raw
            .try_into()
            .map_err(|_| D::Error::custom("public key must be 32 bytes"))?;
        let key = VerifyingKey::from_bytes(&bytes)
            .map_err(|_| D::Error::custom("not a valid secp256k1 public key"))?;
        Ok(PublicKey(key))
    }
}

/// Schnorr signature wrapper carrying the crate's codec impls.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Signature(pub SchnorrSignature);

impl Signature {
    pub fn to_bytes(&self) -> [u8; 64] {
        self.0.to_bytes()
    }
}

impl Encode for Signature {
    fn encode<S: EncodeSink>(&self, out: &mut S) {
        out.write(&self.to_bytes());
    }
}

impl Decode for Signature {
    fn decode(input: &mut &[u8]) -> Result<Self, DecodeError> {
        let raw = <[u8; 64]>::decode(input)?;
        let sig =
            SchnorrSignature::try_from(raw.as_slice()).map_err(|_| DecodeError::InvalidValue)?;
        Ok(Signature(sig))
    }
}

impl Serialize for Signature {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(self.to_bytes()))
    }
}

impl<'de> Deserialize<'de> for Signature {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        let raw = hex::decode(&text).map_err(D::Error::custom)?;
        let sig = SchnorrSignature::try_from(raw.as_slice())
            .map_err(|_| D::Error::custom("not a valid schnorr signature"))?;
        Ok(Signature(sig))
    }
}
