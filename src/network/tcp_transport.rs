//! Framed TCP transport.
//!
//! Every frame on a connection is a 4-byte big-endian length followed by
//! exactly that many payload bytes; a zero-length body is a valid empty
//! message. Each accepted or dialed connection becomes a [`TcpPeer`] with
//! its own read loop task, and every read loop publishes into the
//! transport's single inbound RPC channel.
//!
//! Peer lifecycle: the accept/dial path inserts the peer into the routing
//! table and announces it on the registration queue; the peer's read loop
//! is the only code that removes it again, when the connection closes or
//! fails. End-of-stream on the length prefix means the peer closed and
//! ends the loop; a stall in the middle of a frame is bounded by a read
//! deadline and tears the peer down.

use crate::network::rpc::Rpc;
use crate::network::transport::{NetAddr, Transport, TransportError};
use crate::{info, warn};
use bytes::Bytes;
use dashmap::DashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, OnceLock};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::{channel, Receiver, Sender};
use tokio::sync::{watch, Mutex};
use tokio::time::{timeout, Duration};

/// Sanity bound on a single frame. Not a buffer size; allocation follows
/// the prefix. A larger announcement is treated as a framing error.
const MAX_FRAME_LEN: u32 = 32 * 1024 * 1024;

/// Deadline for the body of a frame whose length prefix has arrived. A
/// peer that stalls mid-frame is hung and gets disconnected.
const FRAME_BODY_TIMEOUT: Duration = Duration::from_secs(10);

/// Deadline for writing one outbound frame.
const SEND_TIMEOUT: Duration = Duration::from_secs(10);

/// Capacity of the inbound RPC and peer registration channels.
const CHANNEL_CAPACITY: usize = 1024;

/// Whether we dialed the peer or it dialed us.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Outgoing,
    Incoming,
}

/// One live TCP connection endpoint.
///
/// Owns the write half; the read half lives inside the peer's read loop
/// task, whose lifetime bounds the peer's.
pub struct TcpPeer {
    addr: SocketAddr,
    direction: Direction,
    writer: Mutex<OwnedWriteHalf>,
}

impl TcpPeer {
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Writes one frame: big-endian length, then the payload. The frame
    /// is written as a single logical operation under the writer lock;
    /// `write_all` retries partial writes internally.
    pub async fn send(&self, payload: &[u8]) -> io::Result<()> {
        let mut writer = self.writer.lock().await;
        let frame = async {
            writer
                .write_all(&(payload.len() as u32).to_be_bytes())
                .await?;
            writer.write_all(payload).await?;
            writer.flush().await
        };
        timeout(SEND_TIMEOUT, frame)
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "send deadline elapsed"))?
    }
}

/// Announcements on the peer registration queue, letting the owning
/// server track the peer table without locking the connection set.
pub enum PeerEvent {
    Connected(Arc<TcpPeer>),
    Disconnected(SocketAddr),
}

/// State shared between the transport handle and its spawned loops.
struct Shared {
    /// Routing table, keyed by the remote address string.
    peers: DashMap<NetAddr, Arc<TcpPeer>>,
    peer_events: Sender<PeerEvent>,
    rpc_tx: Sender<Rpc>,
    shutdown: watch::Sender<bool>,
}

impl Shared {
    /// Wires up an established connection: routing table insert,
    /// registration announcement, read loop task with removal on exit.
    async fn register(self: &Arc<Self>, stream: TcpStream, remote: SocketAddr, direction: Direction) {
        let (reader, writer) = stream.into_split();
        let peer = Arc::new(TcpPeer {
            addr: remote,
            direction,
            writer: Mutex::new(writer),
        });

        self.peers.insert(remote.to_string(), peer.clone());
        let _ = self.peer_events.send(PeerEvent::Connected(peer)).await;

        let shared = self.clone();
        let mut shutdown = self.shutdown.subscribe();
        tokio::spawn(async move {
            Self::read_loop(reader, remote, shared.rpc_tx.clone(), &mut shutdown).await;
            // Termination path: the read loop task owns the removal.
            shared.peers.remove(&remote.to_string());
            let _ = shared
                .peer_events
                .send(PeerEvent::Disconnected(remote))
                .await;
        });
    }

    /// Reads frames until the peer closes, errs, or the transport shuts
    /// down. Frames are published in arrival order, preserving per-peer
    /// FIFO into the shared channel.
    async fn read_loop(
        mut reader: OwnedReadHalf,
        remote: SocketAddr,
        rpc_tx: Sender<Rpc>,
        shutdown: &mut watch::Receiver<bool>,
    ) {
        loop {
            let mut len_buf = [0u8; 4];
            tokio::select! {
                result = reader.read_exact(&mut len_buf) => match result {
                    Ok(_) => {}
                    Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                        info!("peer {remote} closed the connection");
                        return;
                    }
                    Err(e) => {
                        warn!("read error from {remote}: {e}");
                        return;
                    }
                },
                _ = shutdown.changed() => return,
            }

            let len = u32::from_be_bytes(len_buf);
            if len > MAX_FRAME_LEN {
                warn!("peer {remote} announced an oversized frame ({len} bytes)");
                return;
            }

            // The length prefix arrived, so the body must follow promptly.
            let mut body = vec![0u8; len as usize];
            match timeout(FRAME_BODY_TIMEOUT, reader.read_exact(&mut body)).await {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => {
                    warn!("truncated frame from {remote}: {e}");
                    return;
                }
                Err(_) => {
                    warn!("peer {remote} stalled mid-frame");
                    return;
                }
            }

            let rpc = Rpc::new(remote.to_string(), body);
            if rpc_tx.send(rpc).await.is_err() {
                // Inbound channel consumer is gone; nothing left to do.
                return;
            }
        }
    }

    async fn accept_loop(self: Arc<Self>, listener: TcpListener) {
        let mut shutdown = self.shutdown.subscribe();
        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, remote)) => {
                        info!("new incoming connection from {remote}");
                        self.register(stream, remote, Direction::Incoming).await;
                    }
                    Err(e) => {
                        warn!("accept error: {e}");
                    }
                },
                _ = shutdown.changed() => return,
            }
        }
    }
}

/// TCP transport: a listener, an accept loop, and one read loop per peer.
pub struct TcpTransport {
    listen_addr: SocketAddr,
    /// Actual bound address, set by `start` (relevant when the requested
    /// port is 0).
    bound: OnceLock<SocketAddr>,
    shared: Arc<Shared>,
    rpc_rx: Mutex<Option<Receiver<Rpc>>>,
}

impl TcpTransport {
    /// Creates a transport for `listen_addr` and hands back the peer
    /// registration queue the owning server should consume.
    pub fn new(listen_addr: SocketAddr) -> (Arc<Self>, Receiver<PeerEvent>) {
        let (rpc_tx, rpc_rx) = channel(CHANNEL_CAPACITY);
        let (peer_events, peer_events_rx) = channel(CHANNEL_CAPACITY);
        let (shutdown, _) = watch::channel(false);

        let transport = Arc::new(Self {
            listen_addr,
            bound: OnceLock::new(),
            shared: Arc::new(Shared {
                peers: DashMap::new(),
                peer_events,
                rpc_tx,
                shutdown,
            }),
            rpc_rx: Mutex::new(Some(rpc_rx)),
        });
        (transport, peer_events_rx)
    }

    /// The address actually bound, once `start` has succeeded.
    pub fn bound_addr(&self) -> Option<SocketAddr> {
        self.bound.get().copied()
    }

    /// Addresses of the currently connected peers.
    pub fn peer_addrs(&self) -> Vec<NetAddr> {
        self.shared.peers.iter().map(|e| e.key().clone()).collect()
    }

    /// Dials a remote listener and registers it as an outgoing peer.
    pub async fn connect(&self, addr: SocketAddr) -> io::Result<()> {
        let stream = TcpStream::connect(addr).await?;
        info!("connected to peer {addr}");
        self.shared
            .register(stream, addr, Direction::Outgoing)
            .await;
        Ok(())
    }

    /// Signals every loop owned by this transport to stop.
    pub fn shutdown(&self) {
        let _ = self.shared.shutdown.send(true);
    }
}

#[async_trait::async_trait]
impl Transport for TcpTransport {
    async fn start(&self) -> Result<(), TransportError> {
        let listener =
            TcpListener::bind(self.listen_addr)
                .await
                .map_err(|source| TransportError::Bind {
                    addr: self.listen_addr.to_string(),
                    source,
                })?;

        let bound = listener
            .local_addr()
            .map_err(|source| TransportError::Bind {
                addr: self.listen_addr.to_string(),
                source,
            })?;
        let _ = self.bound.set(bound);
        info!("listening on {bound}");

        let shared = self.shared.clone();
        tokio::spawn(async move {
            shared.accept_loop(listener).await;
        });
        Ok(())
    }

    async fn consume(&self) -> Receiver<Rpc> {
        self.rpc_rx
            .lock()
            .await
            .take()
            .expect("inbound stream already taken")
    }

    async fn send_message(&self, to: &str, payload: Bytes) -> Result<(), TransportError> {
        let peer = self
            .shared
            .peers
            .get(to)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| TransportError::PeerNotFound(to.to_string()))?;

        peer.send(&payload)
            .await
            .map_err(|_| TransportError::SendFailed(to.to_string()))
    }

    async fn broadcast(&self, payload: Bytes) -> Result<(), TransportError> {
        let peers: Vec<Arc<TcpPeer>> = self
            .shared
            .peers
            .iter()
            .map(|e| e.value().clone())
            .collect();
        for peer in peers {
            // A failed write terminates that peer eventually; it must not
            // abort delivery to the others.
            if let Err(e) = peer.send(&payload).await {
                warn!("broadcast to {} failed: {e}", peer.addr());
            }
        }
        Ok(())
    }

    fn addr(&self) -> NetAddr {
        self.bound
            .get()
            .copied()
            .unwrap_or(self.listen_addr)
            .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;
    use tokio::time::timeout;

    const RECV_DEADLINE: Duration = Duration::from_secs(5);

    async fn started_transport() -> (Arc<TcpTransport>, Receiver<PeerEvent>, SocketAddr) {
        let (transport, peer_events) = TcpTransport::new("127.0.0.1:0".parse().unwrap());
        transport.start().await.unwrap();
        let addr = transport.bound_addr().unwrap();
        (transport, peer_events, addr)
    }

    async fn write_frame(stream: &mut TcpStream, payload: &[u8]) {
        stream
            .write_all(&(payload.len() as u32).to_be_bytes())
            .await
            .unwrap();
        stream.write_all(payload).await.unwrap();
        stream.flush().await.unwrap();
    }

    #[tokio::test]
    async fn bind_failure_is_fatal_to_start() {
        let (first, _events) = TcpTransport::new("127.0.0.1:0".parse().unwrap());
        first.start().await.unwrap();
        let taken = first.bound_addr().unwrap();

        let (second, _events) = TcpTransport::new(taken);
        assert!(matches!(
            second.start().await,
            Err(TransportError::Bind { .. })
        ));
    }

    #[tokio::test]
    async fn frames_arrive_in_order_with_exact_sizes() {
        let (transport, _events, addr) = started_transport().await;
        let mut inbound = transport.consume().await;

        let mut client = TcpStream::connect(addr).await.unwrap();
        let payloads: [Vec<u8>; 3] = [vec![], vec![0xAB; 10], vec![0xCD; 70_000]];
        for payload in &payloads {
            write_frame(&mut client, payload).await;
        }

        for expected in &payloads {
            let rpc = timeout(RECV_DEADLINE, inbound.recv())
                .await
                .unwrap()
                .unwrap();
            assert_eq!(rpc.payload.len(), expected.len());
            assert_eq!(rpc.payload.as_ref(), expected.as_slice());
        }
    }

    #[tokio::test]
    async fn accept_announces_peer_on_registration_queue() {
        let (_transport, mut events, addr) = started_transport().await;

        let _client = TcpStream::connect(addr).await.unwrap();

        match timeout(RECV_DEADLINE, events.recv()).await.unwrap().unwrap() {
            PeerEvent::Connected(peer) => {
                assert_eq!(peer.direction(), Direction::Incoming);
            }
            PeerEvent::Disconnected(addr) => panic!("unexpected disconnect of {addr}"),
        }
    }

    #[tokio::test]
    async fn clean_close_removes_the_peer() {
        let (transport, mut events, addr) = started_transport().await;

        let client = TcpStream::connect(addr).await.unwrap();
        match timeout(RECV_DEADLINE, events.recv()).await.unwrap().unwrap() {
            PeerEvent::Connected(_) => {}
            PeerEvent::Disconnected(addr) => panic!("unexpected disconnect of {addr}"),
        }
        assert_eq!(transport.peer_addrs().len(), 1);

        drop(client);
        match timeout(RECV_DEADLINE, events.recv()).await.unwrap().unwrap() {
            PeerEvent::Disconnected(_) => {}
            PeerEvent::Connected(_) => panic!("expected a disconnect"),
        }
        assert!(transport.peer_addrs().is_empty());
    }

    #[tokio::test]
    async fn messages_flow_between_two_transports() {
        let (receiver, mut receiver_events, receiver_addr) = started_transport().await;
        let (sender, _sender_events, _) = started_transport().await;

        sender.connect(receiver_addr).await.unwrap();
        match timeout(RECV_DEADLINE, receiver_events.recv())
            .await
            .unwrap()
            .unwrap()
        {
            PeerEvent::Connected(peer) => assert_eq!(peer.direction(), Direction::Incoming),
            PeerEvent::Disconnected(addr) => panic!("unexpected disconnect of {addr}"),
        }

        let mut inbound = receiver.consume().await;
        sender
            .send_message(&receiver_addr.to_string(), Bytes::from_static(b"over tcp"))
            .await
            .unwrap();

        let rpc = timeout(RECV_DEADLINE, inbound.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(rpc.payload, Bytes::from_static(b"over tcp"));
    }

    #[tokio::test]
    async fn oversized_frame_announcement_drops_the_peer() {
        let (transport, mut events, addr) = started_transport().await;

        let mut client = TcpStream::connect(addr).await.unwrap();
        match timeout(RECV_DEADLINE, events.recv()).await.unwrap().unwrap() {
            PeerEvent::Connected(_) => {}
            PeerEvent::Disconnected(addr) => panic!("unexpected disconnect of {addr}"),
        }

        client
            .write_all(&(MAX_FRAME_LEN + 1).to_be_bytes())
            .await
            .unwrap();
        client.flush().await.unwrap();

        match timeout(RECV_DEADLINE, events.recv()).await.unwrap().unwrap() {
            PeerEvent::Disconnected(_) => {}
            PeerEvent::Connected(_) => panic!("expected a disconnect"),
        }
        assert!(transport.peer_addrs().is_empty());
    }
}
