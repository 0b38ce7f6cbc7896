//! Wire message envelope: one type byte followed by the payload.
//!
//! The payload length is implicit, carried by the enclosing frame, so
//! the envelope itself costs exactly one byte. Only transaction
//! broadcast is in active use; the type byte reserves room for more.

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

/// Discriminant identifying how to interpret the message payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    Transaction = 0x1,
    Block = 0x2,
}

impl TryFrom<u8> for MessageType {
    type Error = MessageError;

    fn try_from(value: u8) -> Result<Self, MessageError> {
        match value {
            0x1 => Ok(MessageType::Transaction),
            0x2 => Ok(MessageType::Block),
            other => Err(MessageError::UnknownType(other)),
        }
    }
}

#[derive(Debug, Error)]
pub enum MessageError {
    #[error("message is empty")]
    Empty,
    #[error("unknown message type tag: {0:#04x}")]
    UnknownType(u8),
}

/// A typed byte envelope, immutable once constructed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub header: MessageType,
    pub data: Bytes,
}

impl Message {
    pub fn new(header: MessageType, data: impl Into<Bytes>) -> Self {
        Self {
            header,
            data: data.into(),
        }
    }

    /// Serializes to `[1 byte type][payload]`.
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(1 + self.data.len());
        buf.put_u8(self.header as u8);
        buf.put_slice(&self.data);
        buf.freeze()
    }

    /// Parses `[1 byte type][payload]`. The payload may be empty.
    pub fn from_bytes(raw: &[u8]) -> Result<Self, MessageError> {
        let (&tag, payload) = raw.split_first().ok_or(MessageError::Empty)?;
        Ok(Self {
            header: MessageType::try_from(tag)?,
            data: Bytes::copy_from_slice(payload),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        let msg = Message::new(MessageType::Transaction, Bytes::from_static(b"\xDE\xAD"));
        let decoded = Message::from_bytes(&msg.to_bytes()).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn first_byte_is_the_type_tag() {
        let tx = Message::new(MessageType::Transaction, Bytes::new());
        let block = Message::new(MessageType::Block, Bytes::new());
        assert_eq!(tx.to_bytes()[0], 0x1);
        assert_eq!(block.to_bytes()[0], 0x2);
    }

    #[test]
    fn empty_payload_is_valid() {
        let msg = Message::new(MessageType::Block, Bytes::new());
        let decoded = Message::from_bytes(&msg.to_bytes()).unwrap();
        assert_eq!(decoded.header, MessageType::Block);
        assert!(decoded.data.is_empty());
    }

    #[test]
    fn empty_input_is_rejected() {
        assert!(matches!(Message::from_bytes(&[]), Err(MessageError::Empty)));
    }

    #[test]
    fn unknown_tag_is_rejected() {
        assert!(matches!(
            Message::from_bytes(&[0x7F, 1, 2]),
            Err(MessageError::UnknownType(0x7F))
        ));
    }
}
