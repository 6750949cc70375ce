//! Peer registry: the node's view of network membership.
//!
//! Three sources feed it: transport connect/disconnect notifications, the
//! local node's own record, and `NodeData` gossip from other peers. Every
//! mutation goes through this type; readers take a [`PeerRegistry::snapshot`]
//! copy. Lifecycle changes the rest of the network should hear about are
//! queued on the outbound gossip channel returned by [`PeerRegistry::new`].
//!
//! Gossip-derived changes are applied but not re-published. Each peer
//! publishes its own record, and transport events are published by the
//! node that observed them.

use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::mpsc;

use oracle_core::wire::PeerId;

use crate::peer::{unix_now, Activity, PeerRecord, PerformanceDelta};

/// Source of Unix-second timestamps. Swappable for tests.
pub type Clock = Arc<dyn Fn() -> u64 + Send + Sync>;

/// How long a duplicate connect may wait for its matching disconnect.
pub const DEFAULT_CONNECT_WINDOW: Duration = Duration::from_secs(60);

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("unknown peer {0}")]
    UnknownPeer(PeerId),
}

/// A connect reported for a peer that was already active.
#[derive(Debug, Clone)]
pub struct ConnectBufferEntry {
    pub record: PeerRecord,
    pub connect_time: u64,
}

/// What a connect/disconnect notification did to the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Unknown peer, self, or no state change.
    Ignored,
    /// Inactive record became active and was published.
    Joined,
    /// Already active; the connect was parked in the buffer.
    Buffered,
    /// Disconnect matched a buffered connect and was swallowed.
    Absorbed,
    /// Active record became inactive and was published.
    Left,
}

/// Result of applying one gossip message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GossipOutcome {
    Malformed,
    /// About ourselves, or an unknown peer that already left.
    Ignored,
    Inserted,
    Updated,
    /// `lastUpdatedAt` older than what we hold.
    Stale,
}

/// The peer registry. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct PeerRegistry {
    records: Arc<DashMap<PeerId, PeerRecord>>,
    connect_buffer: Arc<DashMap<PeerId, ConnectBufferEntry>>,
    self_id: PeerId,
    gossip_tx: mpsc::UnboundedSender<PeerRecord>,
    clock: Clock,
    connect_window: Duration,
}

impl PeerRegistry {
    /// Create an empty registry for the node `self_id`. The receiver yields
    /// records to publish on the gossip topic.
    pub fn new(self_id: PeerId) -> (Self, mpsc::UnboundedReceiver<PeerRecord>) {
        let (gossip_tx, gossip_rx) = mpsc::unbounded_channel();
        let registry = Self {
            records: Arc::new(DashMap::new()),
            connect_buffer: Arc::new(DashMap::new()),
            self_id,
            gossip_tx,
            clock: Arc::new(unix_now),
            connect_window: DEFAULT_CONNECT_WINDOW,
        };
        (registry, gossip_rx)
    }

    pub fn with_clock(mut self, clock: impl Fn() -> u64 + Send + Sync + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// A disconnect within `window` of a buffered connect is a flicker.
    pub fn with_connect_window(mut self, window: Duration) -> Self {
        self.connect_window = window;
        self
    }

    pub fn self_id(&self) -> &PeerId {
        &self.self_id
    }

    fn now(&self) -> u64 {
        (self.clock)()
    }

    fn publish(&self, record: &PeerRecord) {
        if self.gossip_tx.send(record.clone()).is_err() {
            tracing::trace!(peer = %record.peer_id.short(), "gossip channel closed, record not queued");
        }
    }

    // ── Transport notifications ──────────────────────────────────────────────

    /// Transport reported a connection to `peer` at `addr`.
    pub fn connected(&self, peer: &PeerId, addr: &str) -> Transition {
        if *peer == self.self_id {
            return Transition::Ignored;
        }
        let now = self.now();
        let Some(mut record) = self.records.get_mut(peer) else {
            tracing::trace!(peer = %peer.short(), "connect from unidentified peer ignored");
            return Transition::Ignored;
        };

        record.merge_address(addr);
        if record.is_active {
            self.connect_buffer.insert(
                peer.clone(),
                ConnectBufferEntry {
                    record: record.clone(),
                    connect_time: now,
                },
            );
            tracing::debug!(peer = %peer.short(), "duplicate connect buffered");
            return Transition::Buffered;
        }

        self.connect_buffer.remove(peer);
        record.joined(now);
        tracing::info!(peer = %peer.short(), staked = record.is_staked, "peer joined");
        self.publish(&record);
        Transition::Joined
    }

    /// Transport reported that the connection to `peer` closed.
    pub fn disconnected(&self, peer: &PeerId) -> Transition {
        let now = self.now();
        if let Some((_, entry)) = self.connect_buffer.remove(peer) {
            if now.saturating_sub(entry.connect_time) < self.connect_window.as_secs() {
                tracing::debug!(peer = %peer.short(), "connection flicker absorbed");
                return Transition::Absorbed;
            }
            tracing::debug!(peer = %peer.short(), "buffered connect outlived its window");
        }
        let Some(mut record) = self.records.get_mut(peer) else {
            return Transition::Ignored;
        };
        if record.activity == Activity::Left {
            tracing::debug!(peer = %peer.short(), "peer already marked as left");
            return Transition::Ignored;
        }

        record.left(now);
        tracing::info!(
            peer = %peer.short(),
            accumulated_uptime = record.accumulated_uptime,
            "peer left"
        );
        self.publish(&record);
        Transition::Left
    }

    // ── Gossip ───────────────────────────────────────────────────────────────

    /// Decode and apply one `NodeData` message. Malformed input is logged
    /// and dropped.
    pub fn handle_gossip_message(&self, bytes: &[u8]) -> GossipOutcome {
        match PeerRecord::from_json(bytes) {
            Ok(record) => self.apply_gossip(record),
            Err(e) => {
                tracing::warn!(error = %e, len = bytes.len(), "malformed node gossip dropped");
                GossipOutcome::Malformed
            }
        }
    }

    /// Reconcile a decoded gossip record with what we hold.
    pub fn apply_gossip(&self, mut incoming: PeerRecord) -> GossipOutcome {
        if incoming.peer_id == self.self_id {
            return GossipOutcome::Ignored;
        }
        incoming.self_identified = false;
        incoming.stats.clear();

        let mut slot = match self.records.entry(incoming.peer_id.clone()) {
            Entry::Vacant(slot) => {
                if incoming.activity == Activity::Left {
                    tracing::trace!(peer = %incoming.peer_id.short(), "unknown peer reported as left");
                    return GossipOutcome::Ignored;
                }
                let addresses = std::mem::take(&mut incoming.addresses);
                incoming.merge_addresses(addresses.iter());
                tracing::info!(
                    peer = %incoming.peer_id.short(),
                    staked = incoming.is_staked,
                    "peer discovered via gossip"
                );
                slot.insert(incoming);
                return GossipOutcome::Inserted;
            }
            Entry::Occupied(slot) => slot,
        };
        let existing = slot.get_mut();

        if incoming.last_updated_at < existing.last_updated_at {
            tracing::debug!(peer = %incoming.peer_id.short(), "stale node gossip dropped");
            return GossipOutcome::Stale;
        }

        reconcile(existing, &incoming);
        if existing.activity == Activity::Left {
            self.connect_buffer.remove(&incoming.peer_id);
        }
        GossipOutcome::Updated
    }

    // ── Local record ─────────────────────────────────────────────────────────

    /// Insert or refresh the local node's own record and queue it for
    /// gossip. An update is only queued when something changed or
    /// `force_gossip` is set.
    pub fn add_or_update(&self, mut record: PeerRecord, force_gossip: bool) {
        let now = self.now();
        match self.records.entry(record.peer_id.clone()) {
            Entry::Vacant(slot) => {
                record.self_identified = true;
                record.joined(now);
                tracing::info!(peer = %record.peer_id.short(), staked = record.is_staked, "node record added");
                let record = slot.insert(record);
                self.publish(&record);
            }
            Entry::Occupied(mut slot) => {
                let existing = slot.get_mut();
                let mut changed = existing.capabilities != record.capabilities
                    || existing.is_staked != record.is_staked
                    || existing.version != record.version;
                existing.capabilities = record.capabilities;
                existing.is_staked = record.is_staked;
                existing.version = record.version;
                existing.self_identified = true;
                changed |= existing.merge_addresses(record.addresses.iter());
                if existing.activity == Activity::Left {
                    existing.joined(now);
                    changed = true;
                }
                if changed || force_gossip {
                    existing.last_updated_at = now;
                    self.publish(existing);
                }
            }
        }
    }

    /// Re-stamp and re-queue the local node's own record.
    pub fn announce_self(&self) -> bool {
        let now = self.now();
        let Some(mut record) = self.records.get_mut(&self.self_id) else {
            return false;
        };
        record.last_updated_at = now;
        self.publish(&record);
        true
    }

    // ── Maintenance ──────────────────────────────────────────────────────────

    /// Promote buffered connects older than `window` into real rejoins.
    /// Returns how many were promoted.
    pub fn expire_connect_buffer(&self, window: Duration) -> usize {
        let now = self.now();
        let window = window.as_secs();
        let expired: Vec<PeerId> = self
            .connect_buffer
            .iter()
            .filter(|e| now.saturating_sub(e.connect_time) >= window)
            .map(|e| e.key().clone())
            .collect();

        let mut promoted = 0;
        for peer in expired {
            if self.connect_buffer.remove(&peer).is_none() {
                continue;
            }
            if let Some(mut record) = self.records.get_mut(&peer) {
                if !record.is_active {
                    continue;
                }
                record.rejoined(now);
                tracing::debug!(peer = %peer.short(), "buffered connect promoted to rejoin");
                self.publish(&record);
                promoted += 1;
            }
        }
        promoted
    }

    /// Mark remote records not updated within `max_age` as left. Records
    /// are kept for their history. Returns how many were marked.
    pub fn sweep_stale(&self, max_age: Duration) -> usize {
        let now = self.now();
        let max_age = max_age.as_secs();
        let mut marked = 0;
        for mut entry in self.records.iter_mut() {
            if *entry.key() == self.self_id || entry.activity == Activity::Left {
                continue;
            }
            if now.saturating_sub(entry.last_updated_at) > max_age {
                entry.left(now);
                self.connect_buffer.remove(entry.key());
                tracing::info!(peer = %entry.peer_id.short(), "stale peer marked as left");
                self.publish(&entry);
                marked += 1;
            }
        }
        marked
    }

    // ── Counters ─────────────────────────────────────────────────────────────

    pub fn update_performance_counters(
        &self,
        peer: &PeerId,
        delta: PerformanceDelta,
    ) -> Result<(), RegistryError> {
        let mut record = self
            .records
            .get_mut(peer)
            .ok_or_else(|| RegistryError::UnknownPeer(peer.clone()))?;
        record.apply_delta(&delta);
        Ok(())
    }

    // ── Reads ────────────────────────────────────────────────────────────────

    /// Copy of every record, oldest `lastUpdatedAt` first, peer id as tie-break.
    pub fn snapshot(&self) -> Vec<PeerRecord> {
        let mut records: Vec<PeerRecord> = self.records.iter().map(|e| e.value().clone()).collect();
        records.sort_by(|a, b| {
            a.last_updated_at
                .cmp(&b.last_updated_at)
                .then_with(|| a.peer_id.cmp(&b.peer_id))
        });
        records
    }

    pub fn get(&self, peer: &PeerId) -> Option<PeerRecord> {
        self.records.get(peer).map(|r| r.value().clone())
    }

    pub fn local_record(&self) -> Option<PeerRecord> {
        self.get(&self.self_id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn is_staked(&self, peer: &PeerId) -> bool {
        self.records.get(peer).map(|r| r.is_staked).unwrap_or(false)
    }

    /// Records updated at or after `since`.
    pub fn updated_since(&self, since: u64) -> Vec<PeerRecord> {
        self.snapshot()
            .into_iter()
            .filter(|r| r.last_updated_at >= since)
            .collect()
    }

    pub fn buffered_connects(&self) -> usize {
        self.connect_buffer.len()
    }
}

/// Merge a non-stale gossip record into the one we hold.
fn reconcile(existing: &mut PeerRecord, incoming: &PeerRecord) {
    // Lifecycle reported by the peer's neighbours. A join announced in the
    // same second as our recorded leave counts as a rejoin.
    if incoming.activity == Activity::Joined
        && existing.activity == Activity::Left
        && incoming.last_updated_at >= existing.last_left_at
    {
        let rejoin_at = incoming.last_joined_at.max(existing.last_left_at);
        existing.joined(rejoin_at);
    } else if incoming.activity == Activity::Left
        && existing.activity == Activity::Joined
        && incoming.last_left_at >= existing.last_joined_at
    {
        existing.left(incoming.last_left_at);
    }

    // Out-of-order repair: an earlier join that still falls after the last
    // leave, or a later leave that still precedes the current join.
    if incoming.last_joined_at > 0
        && incoming.last_joined_at < existing.last_joined_at
        && incoming.last_joined_at > existing.last_left_at
    {
        existing.last_joined_at = incoming.last_joined_at;
    }
    if incoming.last_left_at > 0
        && incoming.last_left_at > existing.last_left_at
        && incoming.last_left_at < existing.last_joined_at
    {
        existing.last_left_at = incoming.last_left_at;
    }
    if existing.first_joined_at == 0
        || (incoming.first_joined_at > 0 && incoming.first_joined_at < existing.first_joined_at)
    {
        existing.first_joined_at = incoming.first_joined_at;
    }

    existing.last_updated_at = existing.last_updated_at.max(incoming.last_updated_at);
    existing.accumulated_uptime = existing.accumulated_uptime.max(incoming.accumulated_uptime);

    if incoming.is_staked && !existing.is_staked {
        existing.is_staked = true;
    } else if !incoming.is_staked && existing.is_staked {
        tracing::debug!(peer = %incoming.peer_id.short(), "unstaked status in gossip ignored");
    }
    existing.capabilities = incoming.capabilities;
    if !incoming.version.is_empty() {
        existing.version = incoming.version.clone();
    }
    existing.merge_addresses(incoming.addresses.iter());
}
