//! Transport abstraction shared by the TCP and in-memory variants.

use crate::network::rpc::Rpc;
use bytes::Bytes;
use thiserror::Error;
use tokio::sync::mpsc::Receiver;

/// Network address. A socket address string for TCP, an arbitrary name
/// for the in-memory transport.
pub type NetAddr = String;

/// Errors surfaced by transport operations.
#[derive(Debug, Error)]
pub enum TransportError {
    /// No route to the given address.
    #[error("peer not found: {0}")]
    PeerNotFound(NetAddr),

    /// The message could not be written to the peer.
    #[error("failed to send message to {0}")]
    SendFailed(NetAddr),

    /// The transport could not bind its listen address. Fatal to the
    /// transport instance.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: NetAddr,
        source: std::io::Error,
    },
}

/// One node-facing endpoint moving opaque message bytes between peers.
///
/// Every variant funnels received bytes, wrapped as [`Rpc`] records, into
/// a channel the owning server consumes. Connection establishment stays
/// on the concrete types, since its argument differs per variant.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    /// Starts background work (listeners, accept loops). Bind failures
    /// are fatal to this transport and reported here.
    async fn start(&self) -> Result<(), TransportError>;

    /// Takes the inbound RPC stream. May be called once per transport;
    /// subsequent calls panic, matching single-consumer channel semantics.
    async fn consume(&self) -> Receiver<Rpc>;

    /// Sends message bytes to one connected peer.
    async fn send_message(&self, to: &str, payload: Bytes) -> Result<(), TransportError>;

    /// Sends message bytes to every connected peer.
    async fn broadcast(&self, payload: Bytes) -> Result<(), TransportError>;

    /// The address this transport answers on.
    fn addr(&self) -> NetAddr;
}
