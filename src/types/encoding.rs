//! Deterministic binary serialization traits.
//!
//! Every wire-facing type in the crate encodes through these traits, so
//! the byte layout is fixed and suitable as input to cryptographic
//! hashing. Layout rules:
//!
//! - integers: little-endian, fixed width
//! - `bool`: one byte, 0 or 1
//! - `Vec<T>` / `String` / `Bytes`: u64 length prefix, then the elements
//! - `Option<T>`: one tag byte (0 = None, 1 = Some), then the value
//! - `[T; N]`: elements back to back, no prefix
//!
//! Most types get their impls from `#[derive(BinaryCodec)]`.

use bytes::Bytes;
use thiserror::Error;

/// Upper bound on decoded container lengths. A length prefix beyond this
/// is treated as corrupt input rather than an allocation request.
const MAX_SEQ_LEN: usize = 1 << 22;

/// Destination for encoded bytes.
///
/// Implemented by plain buffers and by the hash builder, so a type can be
/// hashed without first materializing its encoding.
pub trait EncodeSink {
    fn write(&mut self, bytes: &[u8]);
}

impl EncodeSink for Vec<u8> {
    fn write(&mut self, bytes: &[u8]) {
        self.extend_from_slice(bytes);
    }
}

/// Sink that only measures, used to pre-size the output buffer.
#[derive(Default)]
pub struct SizeCounter(usize);

impl SizeCounter {
    pub fn len(&self) -> usize {
        self.0
    }
}

impl EncodeSink for SizeCounter {
    fn write(&mut self, bytes: &[u8]) {
        self.0 += bytes.len();
    }
}

/// Serialization into the deterministic binary format.
pub trait Encode {
    fn encode<S: EncodeSink>(&self, out: &mut S);

    /// Encodes into a freshly allocated buffer of exact capacity.
    fn to_bytes(&self) -> Vec<u8> {
        let mut counter = SizeCounter::default();
        self.encode(&mut counter);

        let mut out = Vec::with_capacity(counter.len());
        self.encode(&mut out);
        out
    }
}

/// Why a decode failed.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("input ended before the value was complete")]
    UnexpectedEof,
    #[error("bytes do not form a valid value for the target type")]
    InvalidValue,
    #[error("length prefix exceeds the maximum allowed size")]
    LengthOverflow,
}

/// Deserialization from the deterministic binary format.
pub trait Decode: Sized {
    /// Decodes one value, advancing `input` past the consumed bytes.
    fn decode(input: &mut &[u8]) -> Result<Self, DecodeError>;

    /// Decodes a value that must consume the entire slice.
    fn from_bytes(data: &[u8]) -> Result<Self, DecodeError> {
        let mut input = data;
        let value = Self::decode(&mut input)?;
        if !input.is_empty() {
            return Err(DecodeError::InvalidValue);
        }
        Ok(value)
    }
}

fn take<'a>(input: &mut &'a [u8], n: usize) -> Result<&'a [u8], DecodeError> {
    if input.len() < n {
        return Err(DecodeError::UnexpectedEof);
    }
    let (head, rest) = input.split_at(n);
    *input = rest;
    Ok(head)
}

impl Encode for u8 {
    fn encode<S: EncodeSink>(&self, out: &mut S) {
        out.write(&[*self]);
    }
}

impl Decode for u8 {
    fn decode(input: &mut &[u8]) -> Result<Self, DecodeError> {
        Ok(take(input, 1)?[0])
    }
}

macro_rules! impl_le_int {
    ($($t:ty),*) => {
        $(
            impl Encode for $t {
                fn encode<S: EncodeSink>(&self, out: &mut S) {
                    out.write(&self.to_le_bytes());
                }
            }

            impl Decode for $t {
                fn decode(input: &mut &[u8]) -> Result<Self, DecodeError> {
                    let raw = take(input, std::mem::size_of::<$t>())?;
                    Ok(<$t>::from_le_bytes(raw.try_into().unwrap()))
                }
            }
        )*
    };
}

impl_le_int!(u16, u32, u64, i64);

// usize travels as u64 so 32- and 64-bit hosts agree on the format.
impl Encode for usize {
    fn encode<S: EncodeSink>(&self, out: &mut S) {
        (*self as u64).encode(out);
    }
}

impl Decode for usize {
    fn decode(input: &mut &[u8]) -> Result<Self, DecodeError> {
        let v = u64::decode(input)?;
        usize::try_from(v).map_err(|_| DecodeError::LengthOverflow)
    }
}

impl Encode for bool {
    fn encode<S: EncodeSink>(&self, out: &mut S) {
        out.write(&[*self as u8]);
    }
}

impl Decode for bool {
    fn decode(input: &mut &[u8]) -> Result<Self, DecodeError> {
        match u8::decode(input)? {
            0 => Ok(false),
            1 => Ok(true),
            _ => Err(DecodeError::InvalidValue),
        }
    }
}

impl<T: Encode> Encode for Vec<T> {
    fn encode<S: EncodeSink>(&self, out: &mut S) {
        self.len().encode(out);
        for item in self {
            item.encode(out);
        }
    }
}

impl<T: Decode> Decode for Vec<T> {
    fn decode(input: &mut &[u8]) -> Result<Self, DecodeError> {
        let len = usize::decode(input)?;
        if len > MAX_SEQ_LEN {
            return Err(DecodeError::LengthOverflow);
        }
        let mut items = Vec::with_capacity(len);
        for _ in 0..len {
            items.push(T::decode(input)?);
        }
        Ok(items)
    }
}

impl Encode for String {
    fn encode<S: EncodeSink>(&self, out: &mut S) {
        self.len().encode(out);
        out.write(self.as_bytes());
    }
}

impl Decode for String {
    fn decode(input: &mut &[u8]) -> Result<Self, DecodeError> {
        let raw = Vec::<u8>::decode(input)?;
        String::from_utf8(raw).map_err(|_| DecodeError::InvalidValue)
    }
}

impl<T: Encode> Encode for Option<T> {
    fn encode<S: EncodeSink>(&self, out: &mut S) {
        match self {
            None => 0u8.encode(out),
            Some(value) => {
                1u8.encode(out);
                value.encode(out);
            }
        }
    }
}

impl<T: Decode> Decode for Option<T> {
    fn decode(input: &mut &[u8]) -> Result<Self, DecodeError> {
        match u8::decode(input)? {
            0 => Ok(None),
            1 => Ok(Some(T::decode(input)?)),
            _ => Err(DecodeError::InvalidValue),
        }
    }
}

impl<T: Encode, const N: usize> Encode for [T; N] {
    fn encode<S: EncodeSink>(&self, out: &mut S) {
        for item in self {
            item.encode(out);
        }
    }
}

impl<const N: usize> Decode for [u8; N] {
    fn decode(input: &mut &[u8]) -> Result<Self, DecodeError> {
        let raw = take(input, N)?;
        Ok(raw.try_into().unwrap())
    }
}

// `bytes::Bytes` is the crate's payload buffer; it encodes like Vec<u8>
// but decodes without an element-by-element loop.
impl Encode for Bytes {
    fn encode<S: EncodeSink>(&self, out: &mut S) {
        self.len().encode(out);
        out.write(self);
    }
}

impl Decode for Bytes {
    fn decode(input: &mut &[u8]) -> Result<Self, DecodeError> {
        let len = usize::decode(input)?;
        if len > MAX_SEQ_LEN {
            return Err(DecodeError::LengthOverflow);
        }
        let raw = take(input, len)?;
        Ok(Bytes::copy_from_slice(raw))
    }
}
