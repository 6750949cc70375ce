//! Gossip tasks: keep the registry and the network in step.
//!
//! - `publisher_loop` drains the registry's outbound channel onto the topic.
//! - `broadcast_loop` re-announces the local record on an interval.
//! - `maintenance_loop` promotes expired connect-buffer entries and marks
//!   silent peers as left.
//!
//! Inbound gossip is fed to the registry by the node's event loop.

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;

use oracle_core::config::GossipSettings;

use crate::peer::PeerRecord;
use crate::registry::PeerRegistry;
use crate::transport::Transport;

/// Publish every record the registry queues. Returns when the registry
/// (every clone of it) is dropped.
pub async fn publisher_loop(
    mut gossip_rx: mpsc::UnboundedReceiver<PeerRecord>,
    transport: Arc<dyn Transport>,
    topic: String,
) {
    tracing::debug!(%topic, "gossip publisher starting");
    while let Some(record) = gossip_rx.recv().await {
        let data = match record.to_json() {
            Ok(d) => Bytes::from(d),
            Err(e) => {
                tracing::warn!(peer = %record.peer_id.short(), error = %e, "failed to encode node data");
                continue;
            }
        };
        match transport.publish(&topic, data).await {
            Ok(()) => tracing::trace!(peer = %record.peer_id.short(), activity = ?record.activity, "node data published"),
            Err(e) => tracing::warn!(error = %e, "node data publish failed"),
        }
    }
}

/// Re-announce the local record every `settings.broadcast_interval()`.
///
/// Runs forever; cancel by dropping the task handle.
pub async fn broadcast_loop(registry: PeerRegistry, settings: GossipSettings) {
    let mut interval = tokio::time::interval(settings.broadcast_interval());
    tracing::info!(
        interval_secs = settings.broadcast_interval().as_secs(),
        "node data broadcast starting"
    );
    loop {
        interval.tick().await;
        if !registry.announce_self() {
            tracing::trace!("no local record to announce yet");
        }
    }
}

/// Connect-buffer expiry and stale-peer sweep.
///
/// Runs forever; cancel by dropping the task handle.
pub async fn maintenance_loop(registry: PeerRegistry, settings: GossipSettings) {
    let mut interval = tokio::time::interval(settings.sweep_interval());
    loop {
        interval.tick().await;

        let promoted = registry.expire_connect_buffer(settings.connect_buffer_window());
        if promoted > 0 {
            tracing::debug!(promoted, "expired connect buffer entries");
        }
        if let Some(max_age) = settings.stale_after() {
            let marked = registry.sweep_stale(max_age);
            if marked > 0 {
                tracing::debug!(marked, "stale peers marked as left");
            }
        }
    }
}
