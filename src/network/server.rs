//! Node server: one processing loop over every transport.
//!
//! All inbound RPCs funnel into a single channel consumed here, so
//! message handling is serialized and the pool, peer table, and chain
//! state need no locking against the handler itself. Validators also run
//! a block ticker that drains the pool into a block and hands it to
//! storage.

use crate::core::block::{Block, Header};
use crate::core::codec::BinaryCodec;
use crate::core::storage::{MemoryStorage, Storage};
use crate::core::transaction::Transaction;
use crate::crypto::key_pair::PrivateKey;
use crate::network::message::{Message, MessageType};
use crate::network::rpc::{decode_rpc, DecodedMessageData, Rpc};
use crate::network::tcp_transport::PeerEvent;
use crate::network::transport::{Transport, TransportError};
use crate::network::txpool::TxPool;
use crate::types::hash::Hash;
use crate::{info, warn};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc::{channel, Receiver, Sender};
use tokio::sync::oneshot;
use tokio::time::interval;

/// Capacity of the server's aggregated inbound channel.
const INBOUND_CAPACITY: usize = 1024;

/// Server configuration.
pub struct ServerOpts {
    /// Human-readable node identifier used in logs.
    pub id: String,
    /// Transports whose inbound streams feed this server.
    pub transports: Vec<Arc<dyn Transport>>,
    /// Registration queue of the node's TCP transport, if it has one.
    pub peer_events: Option<Receiver<PeerEvent>>,
    /// Present on validator nodes; enables block production.
    pub private_key: Option<PrivateKey>,
    /// Transaction pool capacity hint.
    pub pool_capacity: Option<usize>,
    /// Interval between block production attempts.
    pub block_time: Duration,
    /// Sink for produced blocks. Defaults to in-memory storage.
    pub storage: Option<Arc<dyn Storage>>,
}

/// A running node's message-processing half.
pub struct Server {
    id: String,
    transports: Vec<Arc<dyn Transport>>,
    peer_events: Option<Receiver<PeerEvent>>,
    private_key: Option<PrivateKey>,
    block_time: Duration,
    storage: Arc<dyn Storage>,
    tx_pool: Arc<TxPool>,
    /// Server-side peer table, fed by the registration queue.
    peers: HashSet<SocketAddr>,
    height: u64,
    tip: Hash,
    rpc_tx: Sender<Rpc>,
    rpc_rx: Receiver<Rpc>,
}

impl Server {
    pub fn new(opts: ServerOpts) -> Self {
        let (rpc_tx, rpc_rx) = channel(INBOUND_CAPACITY);
        Self {
            id: opts.id,
            transports: opts.transports,
            peer_events: opts.peer_events,
            private_key: opts.private_key,
            block_time: opts.block_time,
            storage: opts
                .storage
                .unwrap_or_else(|| Arc::new(MemoryStorage::new())),
            tx_pool: Arc::new(TxPool::new(opts.pool_capacity)),
            peers: HashSet::new(),
            height: 0,
            tip: Hash::zero(),
            rpc_tx,
            rpc_rx,
        }
    }

    /// Shared handle to the pending-transaction pool.
    pub fn tx_pool(&self) -> Arc<TxPool> {
        self.tx_pool.clone()
    }

    /// Starts every transport and runs the processing loop until
    /// `shutdown` fires or all inbound channels close.
    pub async fn run(&mut self, mut shutdown: oneshot::Receiver<()>) -> Result<(), TransportError> {
        for transport in &self.transports {
            transport.start().await?;

            let mut inbound = transport.consume().await;
            let rpc_tx = self.rpc_tx.clone();
            tokio::spawn(async move {
                while let Some(rpc) = inbound.recv().await {
                    if rpc_tx.send(rpc).await.is_err() {
                        break;
                    }
                }
            });
        }

        let is_validator = self.private_key.is_some();
        let mut ticker = interval(self.block_time);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        info!("[{}] server started (validator: {is_validator})", self.id);
        loop {
            tokio::select! {
                maybe_rpc = self.rpc_rx.recv() => match maybe_rpc {
                    Some(rpc) => self.handle_rpc(rpc).await,
                    None => break,
                },
                event = recv_peer_event(&mut self.peer_events) => match event {
                    Some(PeerEvent::Connected(peer)) => {
                        info!("[{}] peer {} connected ({:?})", self.id, peer.addr(), peer.direction());
                        self.peers.insert(peer.addr());
                    }
                    Some(PeerEvent::Disconnected(addr)) => {
                        info!("[{}] peer {addr} disconnected", self.id);
                        self.peers.remove(&addr);
                    }
                    // Queue closed; stop polling it.
                    None => self.peer_events = None,
                },
                _ = ticker.tick(), if is_validator => {
                    self.create_block().await;
                }
                _ = &mut shutdown => break,
            }
        }

        info!("[{}] server shut down", self.id);
        Ok(())
    }

    /// Number of peers currently known through the registration queue.
    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    async fn handle_rpc(&mut self, rpc: Rpc) {
        let decoded = match decode_rpc(rpc) {
            Ok(decoded) => decoded,
            Err(e) => {
                warn!("[{}] dropping undecodable message: {e}", self.id);
                return;
            }
        };

        match decoded.data {
            DecodedMessageData::Transaction(tx) => {
                self.handle_transaction(tx).await;
            }
            DecodedMessageData::Block(block) => {
                // Chain validation is the consensus layer's concern.
                info!(
                    "[{}] received block {} from {}",
                    self.id,
                    block.hash(),
                    decoded.from
                );
            }
        }
    }

    async fn handle_transaction(&self, tx: Transaction) {
        if let Err(e) = tx.verify() {
            warn!("[{}] rejecting transaction {}: {e}", self.id, tx.hash());
            return;
        }
        if self.tx_pool.contains(tx.hash()) {
            return;
        }

        info!("[{}] pooling transaction {}", self.id, tx.hash());
        self.tx_pool.append(tx.clone());
        self.rebroadcast(&tx).await;
    }

    /// Forwards a freshly pooled transaction to every connected peer.
    /// Receivers already holding it drop the duplicate at the pool's
    /// hash check, so gossip terminates.
    async fn rebroadcast(&self, tx: &Transaction) {
        let encoded = match tx.encode_with(&BinaryCodec) {
            Ok(encoded) => encoded,
            Err(e) => {
                warn!("[{}] failed to encode transaction: {e}", self.id);
                return;
            }
        };
        let message = Message::new(MessageType::Transaction, encoded).to_bytes();

        for transport in &self.transports {
            if let Err(e) = transport.broadcast(message.clone()).await {
                warn!("[{}] broadcast on {} failed: {e}", self.id, transport.addr());
            }
        }
    }

    async fn create_block(&mut self) {
        if self.tx_pool.is_empty() {
            return;
        }

        let transactions = self.tx_pool.take_all();
        let header = Header {
            version: 1,
            height: self.height + 1,
            timestamp: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs(),
            previous_block: self.tip,
            data_hash: Hash::zero(),
        };
        let block = Block::new(header, transactions);

        info!(
            "[{}] produced block {} at height {} with {} transaction(s)",
            self.id,
            block.hash(),
            block.header.height,
            block.transactions.len()
        );

        self.height = block.header.height;
        self.tip = block.hash();
        if let Err(e) = self.storage.put(block) {
            warn!("[{}] storage rejected block: {e}", self.id);
        }
    }
}

/// Polls the optional registration queue; pends forever when the node has
/// no TCP transport so the select arm never fires.
async fn recv_peer_event(events: &mut Option<Receiver<PeerEvent>>) -> Option<PeerEvent> {
    match events {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::codec::{BinaryCodec, TxDecoder};
    use crate::network::local_transport::LocalTransport;
    use bytes::Bytes;
    use tokio::time::{sleep, timeout};

    fn signed_tx(data: &'static [u8], nonce: u64) -> Transaction {
        let mut tx = Transaction::with_nonce(data, nonce);
        tx.sign(&PrivateKey::new());
        tx
    }

    fn tx_message(tx: &Transaction) -> Bytes {
        let encoded = tx.encode_with(&BinaryCodec).unwrap();
        Message::new(MessageType::Transaction, encoded).to_bytes()
    }

    #[tokio::test]
    async fn transaction_message_flows_between_local_transports() {
        let a = LocalTransport::new("A");
        let b = LocalTransport::new("B");
        a.connect(&b);

        let mut inbound_a = a.consume().await;

        let tx = signed_tx(b"end to end", 77);
        b.send_message("A", tx_message(&tx)).await.unwrap();

        let rpc = timeout(Duration::from_secs(1), inbound_a.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(rpc.from, "B");
        assert!(inbound_a.try_recv().is_err());

        let message = Message::from_bytes(&rpc.payload).unwrap();
        assert_eq!(message.header, MessageType::Transaction);
        let decoded = BinaryCodec.decode(&message.data).unwrap();
        assert_eq!(decoded.data, tx.data);
        assert_eq!(decoded.nonce, tx.nonce);
        assert!(decoded.verify().is_ok());
    }

    #[tokio::test]
    async fn server_pools_and_rebroadcasts_valid_transactions() {
        let node = LocalTransport::new("node");
        let outsider = LocalTransport::new("outsider");
        node.connect(&outsider);

        let mut server = Server::new(ServerOpts {
            id: "node".into(),
            transports: vec![node.clone()],
            peer_events: None,
            private_key: None,
            pool_capacity: None,
            block_time: Duration::from_secs(60),
            storage: None,
        });
        let pool = server.tx_pool();

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let handle = tokio::spawn(async move { server.run(shutdown_rx).await });

        let mut outsider_inbound = outsider.consume().await;

        let tx = signed_tx(b"pool me", 5);
        outsider
            .send_message("node", tx_message(&tx))
            .await
            .unwrap();

        // The rebroadcast coming back is the observable completion signal.
        let echoed = timeout(Duration::from_secs(2), outsider_inbound.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(echoed.from, "node");
        assert_eq!(pool.len(), 1);
        assert!(pool.contains(tx.hash()));

        // A duplicate is dropped silently and not rebroadcast again.
        outsider
            .send_message("node", tx_message(&tx))
            .await
            .unwrap();
        sleep(Duration::from_millis(200)).await;
        assert_eq!(pool.len(), 1);
        assert!(outsider_inbound.try_recv().is_err());

        shutdown_tx.send(()).unwrap();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn invalid_transactions_never_reach_the_pool() {
        let node = LocalTransport::new("node");
        let outsider = LocalTransport::new("outsider");
        node.connect(&outsider);

        let mut server = Server::new(ServerOpts {
            id: "node".into(),
            transports: vec![node.clone()],
            peer_events: None,
            private_key: None,
            pool_capacity: None,
            block_time: Duration::from_secs(60),
            storage: None,
        });
        let pool = server.tx_pool();

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let handle = tokio::spawn(async move { server.run(shutdown_rx).await });

        // Unsigned transaction: fails verification.
        let unsigned = Transaction::with_nonce(b"no signature".as_slice(), 8);
        outsider
            .send_message("node", tx_message(&unsigned))
            .await
            .unwrap();

        // Garbage payload: fails decoding.
        outsider
            .send_message(
                "node",
                Message::new(MessageType::Transaction, Bytes::from_static(b"\x01\x02"))
                    .to_bytes(),
            )
            .await
            .unwrap();

        sleep(Duration::from_millis(200)).await;
        assert!(pool.is_empty());

        shutdown_tx.send(()).unwrap();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn validator_drains_the_pool_into_storage() {
        let node = LocalTransport::new("validator");
        let outsider = LocalTransport::new("outsider");
        node.connect(&outsider);

        let storage = Arc::new(MemoryStorage::new());
        let mut server = Server::new(ServerOpts {
            id: "validator".into(),
            transports: vec![node.clone()],
            peer_events: None,
            private_key: Some(PrivateKey::new()),
            pool_capacity: None,
            block_time: Duration::from_millis(50),
            storage: Some(storage.clone()),
        });
        let pool = server.tx_pool();

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let handle = tokio::spawn(async move { server.run(shutdown_rx).await });

        let tx = signed_tx(b"include me", 21);
        outsider
            .send_message("validator", tx_message(&tx))
            .await
            .unwrap();

        let mut produced = false;
        for _ in 0..40 {
            sleep(Duration::from_millis(50)).await;
            if storage.len() > 0 {
                produced = true;
                break;
            }
        }
        assert!(produced, "validator never produced a block");
        assert!(pool.is_empty());

        shutdown_tx.send(()).unwrap();
        handle.await.unwrap().unwrap();
    }
}
