//! In-memory transport for deterministic multi-node simulation.
//!
//! Messages move between registered transports through channels, with no
//! sockets involved, so tests can build topologies and drive them without
//! timing dependence on real I/O.

use crate::network::rpc::Rpc;
use crate::network::transport::{NetAddr, Transport, TransportError};
use bytes::Bytes;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::mpsc::{channel, Receiver, Sender};
use tokio::sync::Mutex;

/// Capacity of each node's inbound RPC channel.
const INBOUND_CAPACITY: usize = 1024;

/// Transport that routes through an address table instead of a network.
pub struct LocalTransport {
    address: NetAddr,
    /// Registered peers, keyed by their address.
    peers: DashMap<NetAddr, Arc<LocalTransport>>,
    tx: Sender<Rpc>,
    /// Taken once by `consume`.
    rx: Mutex<Option<Receiver<Rpc>>>,
}

impl LocalTransport {
    pub fn new(address: impl Into<NetAddr>) -> Arc<Self> {
        let (tx, rx) = channel(INBOUND_CAPACITY);
        Arc::new(Self {
            address: address.into(),
            peers: DashMap::new(),
            tx,
            rx: Mutex::new(Some(rx)),
        })
    }

    /// Registers `other` in this transport's address table and vice
    /// versa, so either side can message the other afterwards.
    pub fn connect(self: &Arc<Self>, other: &Arc<LocalTransport>) {
        self.peers.insert(other.addr(), other.clone());
        other.peers.insert(self.addr(), self.clone());
    }

    /// Removes a peer from the address table, simulating a node leaving.
    /// Messages to the removed address fail with `PeerNotFound`.
    pub fn disconnect(&self, addr: &str) {
        self.peers.remove(addr);
    }

    /// Number of registered peers.
    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }
}

#[async_trait::async_trait]
impl Transport for LocalTransport {
    async fn start(&self) -> Result<(), TransportError> {
        // Nothing to bind; delivery happens through the address table.
        Ok(())
    }

    async fn consume(&self) -> Receiver<Rpc> {
        self.rx
            .lock()
            .await
            .take()
            .expect("inbound stream already taken")
    }

    async fn send_message(&self, to: &str, payload: Bytes) -> Result<(), TransportError> {
        let peer = self
            .peers
            .get(to)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| TransportError::PeerNotFound(to.to_string()))?;

        peer.tx
            .send(Rpc::new(self.address.clone(), payload))
            .await
            .map_err(|_| TransportError::SendFailed(to.to_string()))
    }

    async fn broadcast(&self, payload: Bytes) -> Result<(), TransportError> {
        let targets: Vec<NetAddr> = self.peers.iter().map(|entry| entry.key().clone()).collect();
        for addr in targets {
            self.send_message(&addr, payload.clone()).await?;
        }
        Ok(())
    }

    fn addr(&self) -> NetAddr {
        self.address.clone()
    }
}
