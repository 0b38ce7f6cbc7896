//! Derive macros for the blocknet crate.
//!
//! Provides `#[derive(BinaryCodec)]`, which implements the crate's
//! deterministic binary serialization traits.

mod binary_codec;

use proc_macro::TokenStream;

/// Implements `Encode` and `Decode` for a struct or enum.
///
/// Fields are serialized in declaration order using the trait impls in
/// `crate::types::encoding`; enums gain a `u8` discriminant prefix.
#[proc_macro_derive(BinaryCodec)]
pub fn derive_binary_codec(input: TokenStream) -> TokenStream {
    binary_codec::expand(input)
}
