//! Pluggable transaction wire codecs.
//!
//! Encoding is a strategy chosen by the caller: the structured-text codec
//! for anything a human might read (API bodies, logs, fixtures) and the
//! compact binary codec for inter-node transport. The transaction type
//! itself is agnostic to the format in use.

use crate::core::transaction::Transaction;
use crate::types::encoding::{Decode, DecodeError, Encode};
use thiserror::Error;

/// Failures while encoding or decoding a transaction.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("json codec: {0}")]
    Json(#[from] serde_json::Error),
    #[error("binary codec: {0}")]
    Binary(#[from] DecodeError),
}

/// Serializes a transaction into a byte sink.
pub trait TxEncoder: Send + Sync {
    fn encode(&self, tx: &Transaction, out: &mut Vec<u8>) -> Result<(), CodecError>;
}

/// Deserializes a transaction from raw bytes.
pub trait TxDecoder: Send + Sync {
    fn decode(&self, input: &[u8]) -> Result<Transaction, CodecError>;
}

/// Human-inspectable JSON format; byte fields are hex strings.
pub struct JsonCodec;

impl TxEncoder for JsonCodec {
    fn encode(&self, tx: &Transaction, out: &mut Vec<u8>) -> Result<(), CodecError> {
        serde_json::to_writer(out, tx)?;
        Ok(())
    }
}

impl TxDecoder for JsonCodec {
    fn decode(&self, input: &[u8]) -> Result<Transaction, CodecError> {
        Ok(serde_json::from_slice(input)?)
    }
}

/// Compact deterministic binary format used between nodes.
pub struct BinaryCodec;

impl TxEncoder for BinaryCodec {
    fn encode(&self, tx: &Transaction, out: &mut Vec<u8>) -> Result<(), CodecError> {
        tx.encode(out);
        Ok(())
    }
}

impl TxDecoder for BinaryCodec {
    fn decode(&self, input: &[u8]) -> Result<Transaction, CodecError> {
        Ok(Transaction::from_bytes(input)?)
    }
}

impl Transaction {
    /// Serializes with the supplied strategy.
    pub fn encode_with(&self, codec: &dyn TxEncoder) -> Result<Vec<u8>, CodecError> {
        let mut out = Vec::new();
        codec.encode(self, &mut out)?;
        Ok(out)
    }

    /// Deserializes with the supplied strategy.
    pub fn decode_with(codec: &dyn TxDecoder, input: &[u8]) -> Result<Transaction, CodecError> {
        codec.decode(input)
    }
}
