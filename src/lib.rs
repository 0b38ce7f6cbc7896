//! Peer-to-peer blockchain node substrate.
//!
//! Moves signed transactions between nodes over a length-framed binary
//! wire protocol and provides the transaction data model that consensus
//! and storage layers build on: a TCP transport and an in-memory
//! transport behind one trait, an RPC hand-off decoupling connection I/O
//! from message processing, and a transaction type with pluggable wire
//! codecs, content-addressed identity, and Schnorr signatures.

pub mod core;
pub mod crypto;
pub mod network;
pub mod types;
pub mod utils;
