//! Inbound RPC records and their decoding into typed messages.
//!
//! An [`Rpc`] pairs a sender address with raw payload bytes. Every peer
//! and transport publishes them onto one shared channel; the server
//! decodes them with [`decode_rpc`] and routes the result.

use crate::core::block::Block;
use crate::core::codec::{BinaryCodec, CodecError};
use crate::core::transaction::Transaction;
use crate::network::message::{Message, MessageError, MessageType};
use crate::network::transport::NetAddr;
use crate::types::encoding::{Decode, DecodeError};
use bytes::Bytes;
use thiserror::Error;

/// A received payload queued for processing.
#[derive(Debug, Clone)]
pub struct Rpc {
    pub from: NetAddr,
    pub payload: Bytes,
}

impl Rpc {
    pub fn new(from: impl Into<NetAddr>, payload: impl Into<Bytes>) -> Self {
        Self {
            from: from.into(),
            payload: payload.into(),
        }
    }
}

/// Why an RPC payload could not be turned into a typed message.
#[derive(Debug, Error)]
pub enum RpcError {
    #[error("malformed message envelope: {0}")]
    Envelope(#[from] MessageError),
    #[error("malformed transaction payload: {0}")]
    Transaction(#[from] CodecError),
    #[error("malformed block payload: {0}")]
    Block(#[from] DecodeError),
}

/// Typed payload of a decoded message.
#[derive(Debug)]
pub enum DecodedMessageData {
    Transaction(Transaction),
    Block(Block),
}

/// A fully decoded RPC: who sent it and what it carried.
#[derive(Debug)]
pub struct DecodedMessage {
    pub from: NetAddr,
    pub data: DecodedMessageData,
}

/// Default decode path: envelope first, then the typed payload via the
/// binary wire codec. Failures are reported to the caller, which drops
/// the message; nothing here retries.
pub fn decode_rpc(rpc: Rpc) -> Result<DecodedMessage, RpcError> {
    let message = Message::from_bytes(&rpc.payload)?;

    let data = match message.header {
        MessageType::Transaction => DecodedMessageData::Transaction(Transaction::decode_with(
            &BinaryCodec,
            &message.data,
        )?),
        MessageType::Block => DecodedMessageData::Block(Block::from_bytes(&message.data)?),
    };

    Ok(DecodedMessage {
        from: rpc.from,
        data,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::codec::BinaryCodec;
    use crate::crypto::key_pair::PrivateKey;

    #[test]
    fn transaction_rpc_decodes() {
        let key = PrivateKey::new();
        let mut tx = Transaction::with_nonce(b"payload".as_slice(), 11);
        tx.sign(&key);

        let msg = Message::new(
            MessageType::Transaction,
            tx.encode_with(&BinaryCodec).unwrap(),
        );
        let rpc = Rpc::new("node-a", msg.to_bytes());

        let decoded = decode_rpc(rpc).unwrap();
        assert_eq!(decoded.from, "node-a");
        match decoded.data {
            DecodedMessageData::Transaction(got) => {
                assert_eq!(got, tx);
                assert!(got.verify().is_ok());
            }
            other => panic!("expected transaction, got {other:?}"),
        }
    }

    #[test]
    fn corrupt_payload_is_a_decode_error() {
        let msg = Message::new(MessageType::Transaction, Bytes::from_static(b"\x00\x01"));
        let rpc = Rpc::new("node-a", msg.to_bytes());
        assert!(matches!(decode_rpc(rpc), Err(RpcError::Transaction(_))));
    }

    #[test]
    fn empty_payload_is_an_envelope_error() {
        let rpc = Rpc::new("node-a", Bytes::new());
        assert!(matches!(decode_rpc(rpc), Err(RpcError::Envelope(_))));
    }
}
