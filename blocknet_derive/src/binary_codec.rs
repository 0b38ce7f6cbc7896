//! Expansion logic for `#[derive(BinaryCodec)]`.
//!
//! The generated code mirrors what would be written by hand: every field
//! encoded in declaration order through `crate::types::encoding::Encode`,
//! and decoded back in the same order. Enum variants are prefixed with a
//! `u8` discriminant; an unknown discriminant is a decode error, so
//! adding a variant never silently reinterprets old bytes.

use proc_macro::TokenStream;
use quote::{format_ident, quote};
use syn::{parse_macro_input, Data, DeriveInput, Fields};

pub fn expand(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    let name = &input.ident;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    let (encode_body, decode_body) = match &input.data {
        Data::Struct(data) => struct_bodies(&data.fields),
        Data::Enum(data) => enum_bodies(data),
        Data::Union(_) => {
            return syn::Error::new_spanned(&input, "BinaryCodec does not support unions")
                .to_compile_error()
                .into();
        }
    };

    quote! {
        impl #impl_generics crate::types::encoding::Encode for #name #ty_generics #where_clause {
            fn encode<S: crate::types::encoding::EncodeSink>(&self, out: &mut S) {
                #encode_body
            }
        }

        impl #impl_generics crate::types::encoding::Decode for #name #ty_generics #where_clause {
            fn decode(
                input: &mut &[u8],
            ) -> ::std::result::Result<Self, crate::types::encoding::DecodeError> {
                #decode_body
            }
        }
    }
    .into()
}

/// Encode/decode bodies for a struct of any field shape.
fn struct_bodies(fields: &Fields) -> (proc_macro2::TokenStream, proc_macro2::TokenStream) {
    match fields {
        Fields::Named(named) => {
            let idents: Vec<_> = named.named.iter().map(|f| &f.ident).collect();
            let encode = quote! {
                #(crate::types::encoding::Encode::encode(&self.#idents, out);)*
            };
            let decode = quote! {
                Ok(Self {
                    #(#idents: crate::types::encoding::Decode::decode(input)?,)*
                })
            };
            (encode, decode)
        }
        Fields::Unnamed(unnamed) => {
            let indices: Vec<_> = (0..unnamed.unnamed.len()).map(syn::Index::from).collect();
            let decodes = indices
                .iter()
                .map(|_| quote! { crate::types::encoding::Decode::decode(input)? });
            let encode = quote! {
                #(crate::types::encoding::Encode::encode(&self.#indices, out);)*
            };
            let decode = quote! { Ok(Self(#(#decodes),*)) };
            (encode, decode)
        }
        Fields::Unit => (quote! {}, quote! { Ok(Self) }),
    }
}

/// Encode/decode bodies for an enum: `u8` discriminant, then the
/// variant's fields in declaration order.
fn enum_bodies(data: &syn::DataEnum) -> (proc_macro2::TokenStream, proc_macro2::TokenStream) {
    let mut encode_arms = Vec::new();
    let mut decode_arms = Vec::new();
    let mut next_tag: u8 = 0;

    for variant in &data.variants {
        let tag = variant
            .discriminant
            .as_ref()
            .map(|(_, expr)| literal_tag(expr))
            .unwrap_or(next_tag);
        next_tag = tag.wrapping_add(1);

        let ident = &variant.ident;
        match &variant.fields {
            Fields::Unit => {
                encode_arms.push(quote! {
                    Self::#ident => crate::types::encoding::Encode::encode(&#tag, out),
                });
                decode_arms.push(quote! { #tag => Ok(Self::#ident), });
            }
            Fields::Unnamed(unnamed) => {
                let bindings: Vec<_> = (0..unnamed.unnamed.len())
                    .map(|i| format_ident!("field{i}"))
                    .collect();
                let decodes = bindings
                    .iter()
                    .map(|_| quote! { crate::types::encoding::Decode::decode(input)? });
                encode_arms.push(quote! {
                    Self::#ident(#(#bindings),*) => {
                        crate::types::encoding::Encode::encode(&#tag, out);
                        #(crate::types::encoding::Encode::encode(#bindings, out);)*
                    }
                });
                decode_arms.push(quote! { #tag => Ok(Self::#ident(#(#decodes),*)), });
            }
            Fields::Named(named) => {
                let idents: Vec<_> = named.named.iter().map(|f| &f.ident).collect();
                encode_arms.push(quote! {
                    Self::#ident { #(#idents),* } => {
                        crate::types::encoding::Encode::encode(&#tag, out);
                        #(crate::types::encoding::Encode::encode(#idents, out);)*
                    }
                });
                decode_arms.push(quote! {
                    #tag => Ok(Self::#ident {
                        #(#idents: crate::types::encoding::Decode::decode(input)?,)*
                    }),
                });
            }
        }
    }

    let encode = quote! {
        match self {
            #(#encode_arms)*
        }
    };
    let decode = quote! {
        let tag: u8 = crate::types::encoding::Decode::decode(input)?;
        match tag {
            #(#decode_arms)*
            _ => Err(crate::types::encoding::DecodeError::InvalidValue),
        }
    };
    (encode, decode)
}

/// Extracts an explicit `Variant = N` discriminant as a `u8`.
fn literal_tag(expr: &syn::Expr) -> u8 {
    if let syn::Expr::Lit(lit) = expr {
        if let syn::Lit::Int(int) = &lit.lit {
            return int
                .base10_parse()
                .expect("enum discriminant must fit in a u8");
        }
    }
    panic!("enum discriminant must be an integer literal");
}
