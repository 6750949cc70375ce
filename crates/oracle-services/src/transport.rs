//! Transport seam: what the oracle needs from the peer-to-peer layer.
//!
//! A transport can open a byte stream to a peer for a named protocol,
//! publish on a named topic, and report connects, disconnects, topic
//! messages and inbound streams as [`TransportEvent`]s.
//!
//! `MemoryHub` is an in-process implementation used by the devnet daemon
//! and by tests. Streams are `tokio::io::duplex` pairs; topic delivery goes
//! to every subscriber except the sender.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::{DashMap, DashSet};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;

use oracle_core::wire::{PeerId, WireError};

/// Buffer size of one in-memory stream direction.
const DUPLEX_BUFFER: usize = 64 * 1024;

/// A bidirectional byte stream to one peer.
pub trait WorkStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> WorkStream for T {}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("unknown peer {0}")]
    UnknownPeer(PeerId),
    #[error("peer {peer} does not serve {protocol}")]
    ProtocolNotSupported { peer: PeerId, protocol: String },
    #[error("transport closed")]
    Closed,
    #[error("stream i/o: {0}")]
    Io(#[from] std::io::Error),
    #[error("response exceeds {0} bytes")]
    ResponseTooLarge(usize),
    #[error(transparent)]
    Wire(#[from] WireError),
}

/// Something the transport observed.
pub enum TransportEvent {
    Connected { peer: PeerId, addr: String },
    Disconnected { peer: PeerId },
    Message { topic: String, from: PeerId, data: Bytes },
    InboundStream { peer: PeerId, protocol: String, stream: Box<dyn WorkStream> },
}

#[async_trait]
pub trait Transport: Send + Sync {
    fn local_peer_id(&self) -> &PeerId;

    /// Accept inbound streams for `protocol`.
    fn serve(&self, protocol: &str);

    /// Receive messages published on `topic`.
    fn subscribe(&self, topic: &str);

    async fn open_stream(
        &self,
        peer: &PeerId,
        protocol: &str,
    ) -> Result<Box<dyn WorkStream>, TransportError>;

    async fn publish(&self, topic: &str, data: Bytes) -> Result<(), TransportError>;
}

// ── In-memory transport ───────────────────────────────────────────────────────

struct Slot {
    addr: String,
    events: mpsc::UnboundedSender<TransportEvent>,
    protocols: Arc<DashSet<String>>,
    topics: Arc<DashSet<String>>,
}

/// Shared switchboard for in-process nodes. Cheap to clone.
#[derive(Clone, Default)]
pub struct MemoryHub {
    slots: Arc<DashMap<PeerId, Slot>>,
    links: Arc<DashSet<(PeerId, PeerId)>>,
}

/// One node's handle on a [`MemoryHub`].
pub struct MemoryTransport {
    peer_id: PeerId,
    hub: MemoryHub,
    protocols: Arc<DashSet<String>>,
    topics: Arc<DashSet<String>>,
}

fn link_key(a: &PeerId, b: &PeerId) -> (PeerId, PeerId) {
    if a <= b {
        (a.clone(), b.clone())
    } else {
        (b.clone(), a.clone())
    }
}

impl MemoryHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a node. Its events arrive on the returned receiver.
    pub fn join(
        &self,
        peer_id: PeerId,
        addr: impl Into<String>,
    ) -> (MemoryTransport, mpsc::UnboundedReceiver<TransportEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let protocols = Arc::new(DashSet::new());
        let topics = Arc::new(DashSet::new());
        self.slots.insert(
            peer_id.clone(),
            Slot {
                addr: addr.into(),
                events,
                protocols: protocols.clone(),
                topics: topics.clone(),
            },
        );
        let transport = MemoryTransport {
            peer_id,
            hub: self.clone(),
            protocols,
            topics,
        };
        (transport, rx)
    }

    fn endpoint(&self, peer: &PeerId) -> Option<(String, mpsc::UnboundedSender<TransportEvent>)> {
        self.slots
            .get(peer)
            .map(|s| (s.addr.clone(), s.events.clone()))
    }

    /// Connect two nodes. Both sides see `Connected`. Connecting an already
    /// linked pair is reported again, like a transport redial.
    pub fn connect(&self, a: &PeerId, b: &PeerId) -> Result<(), TransportError> {
        let (addr_a, tx_a) = self
            .endpoint(a)
            .ok_or_else(|| TransportError::UnknownPeer(a.clone()))?;
        let (addr_b, tx_b) = self
            .endpoint(b)
            .ok_or_else(|| TransportError::UnknownPeer(b.clone()))?;
        self.links.insert(link_key(a, b));
        let _ = tx_a.send(TransportEvent::Connected { peer: b.clone(), addr: addr_b });
        let _ = tx_b.send(TransportEvent::Connected { peer: a.clone(), addr: addr_a });
        Ok(())
    }

    /// Disconnect two nodes. Both sides see `Disconnected`.
    pub fn disconnect(&self, a: &PeerId, b: &PeerId) {
        if self.links.remove(&link_key(a, b)).is_none() {
            return;
        }
        if let Some((_, tx)) = self.endpoint(a) {
            let _ = tx.send(TransportEvent::Disconnected { peer: b.clone() });
        }
        if let Some((_, tx)) = self.endpoint(b) {
            let _ = tx.send(TransportEvent::Disconnected { peer: a.clone() });
        }
    }

    /// Connect every attached node to every other.
    pub fn connect_all(&self) {
        let peers: Vec<PeerId> = self.slots.iter().map(|s| s.key().clone()).collect();
        for (i, a) in peers.iter().enumerate() {
            for b in &peers[i + 1..] {
                let _ = self.connect(a, b);
            }
        }
    }

    /// Detach a node, disconnecting it from everyone.
    pub fn leave(&self, peer: &PeerId) {
        let linked: Vec<PeerId> = self
            .links
            .iter()
            .filter_map(|l| {
                let (a, b) = l.key();
                if a == peer {
                    Some(b.clone())
                } else if b == peer {
                    Some(a.clone())
                } else {
                    None
                }
            })
            .collect();
        for other in linked {
            self.disconnect(peer, &other);
        }
        self.slots.remove(peer);
    }

    pub fn is_connected(&self, a: &PeerId, b: &PeerId) -> bool {
        self.links.contains(&link_key(a, b))
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    fn local_peer_id(&self) -> &PeerId {
        &self.peer_id
    }

    fn serve(&self, protocol: &str) {
        self.protocols.insert(protocol.to_string());
    }

    fn subscribe(&self, topic: &str) {
        self.topics.insert(topic.to_string());
    }

    async fn open_stream(
        &self,
        peer: &PeerId,
        protocol: &str,
    ) -> Result<Box<dyn WorkStream>, TransportError> {
        let events = {
            let slot = self
                .hub
                .slots
                .get(peer)
                .ok_or_else(|| TransportError::UnknownPeer(peer.clone()))?;
            if !slot.protocols.contains(protocol) {
                return Err(TransportError::ProtocolNotSupported {
                    peer: peer.clone(),
                    protocol: protocol.to_string(),
                });
            }
            slot.events.clone()
        };

        let (local, remote) = tokio::io::duplex(DUPLEX_BUFFER);
        events
            .send(TransportEvent::InboundStream {
                peer: self.peer_id.clone(),
                protocol: protocol.to_string(),
                stream: Box::new(remote),
            })
            .map_err(|_| TransportError::Closed)?;
        Ok(Box::new(local))
    }

    async fn publish(&self, topic: &str, data: Bytes) -> Result<(), TransportError> {
        let targets: Vec<mpsc::UnboundedSender<TransportEvent>> = self
            .hub
            .slots
            .iter()
            .filter(|s| *s.key() != self.peer_id && s.topics.contains(topic))
            .map(|s| s.events.clone())
            .collect();
        for tx in targets {
            let _ = tx.send(TransportEvent::Message {
                topic: topic.to_string(),
                from: self.peer_id.clone(),
                data: data.clone(),
            });
        }
        Ok(())
    }
}
