//! Peer-to-peer networking: transports, message envelope, RPC hand-off,
//! and the server loop that ties them together.
//!
//! - [`transport`]: the `Transport` trait shared by all variants
//! - [`local_transport`]: in-memory transport for multi-node simulation
//! - [`tcp_transport`]: framed TCP transport with per-peer read loops
//! - [`message`]: the `[type][payload]` wire envelope
//! - [`rpc`]: inbound records and their decoding into typed messages
//! - [`server`]: single processing loop over all transports
//! - [`txpool`]: pending transaction pool

pub mod local_transport;
pub mod message;
pub mod rpc;
pub mod server;
pub mod tcp_transport;
pub mod transport;
pub mod txpool;
