//! In-process devnet: N oracle nodes on one memory hub.
//!
//! Node 0 is the local node and takes its stake and capabilities from the
//! config. The rest are staked peers advertising the same capabilities, so
//! the dispatcher has somewhere to route work.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::Result;

use oracle_core::config::OracleConfig;
use oracle_core::wire::{PeerId, TestMessage, WorkPayload, WorkRequest};
use oracle_services::{default_handlers, eligible, MemoryHub, NodeOptions, OracleNode};

pub struct Devnet {
    pub hub: MemoryHub,
    pub nodes: Vec<Arc<OracleNode>>,
}

/// Deterministic id for devnet node `index`.
pub fn devnet_peer_id(index: usize) -> PeerId {
    let digest = blake3::hash(format!("oracle-devnet-{index}").as_bytes());
    PeerId::new(format!("oracle-{}", hex::encode(&digest.as_bytes()[..10])))
}

impl Devnet {
    pub fn start(config: &OracleConfig) -> Result<Self> {
        let count = config.devnet.nodes.max(1);
        let hub = MemoryHub::new();
        let mut nodes = Vec::with_capacity(count);

        for index in 0..count {
            let peer_id = devnet_peer_id(index);
            let address = format!("/memory/{index}/p2p/{peer_id}");
            let (transport, events) = hub.join(peer_id.clone(), address.clone());

            let mut options = NodeOptions::from_config(config, address);
            if index > 0 {
                options.staked = true;
            }
            let handlers = default_handlers(&options.capabilities);
            let node = OracleNode::start(Arc::new(transport), events, handlers, options);
            tracing::info!(index, peer = %peer_id.short(), "devnet node started");
            nodes.push(Arc::new(node));
        }

        hub.connect_all();
        tracing::info!(nodes = count, "devnet connected");
        Ok(Self { hub, nodes })
    }

    pub fn local(&self) -> Option<&Arc<OracleNode>> {
        self.nodes.first()
    }
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Dispatch a `test` probe from `node` every `interval` and report how
/// many remote workers each advertised category currently has.
///
/// Runs forever; cancel by dropping the task handle.
pub async fn probe_loop(node: Arc<OracleNode>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    let categories = node
        .registry()
        .local_record()
        .map(|r| r.capabilities.categories())
        .unwrap_or_default();
    let mut seq: u64 = 0;

    loop {
        ticker.tick().await;
        seq += 1;

        let payload = WorkPayload::Test(TestMessage {
            message: format!("probe-{seq}"),
        });
        let request = match WorkRequest::from_payload(&payload, unix_millis()) {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(error = %e, "failed to build probe request");
                continue;
            }
        };

        let started = tokio::time::Instant::now();
        let response = node.distribute_work(request).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;
        if response.is_success() {
            tracing::info!(
                seq,
                worker = %response.worker_peer_id.as_ref().map(|p| p.short()).unwrap_or("-"),
                elapsed_ms,
                "probe completed"
            );
        } else {
            tracing::warn!(seq, error = %response.error, "probe failed");
        }

        let snapshot = node.registry().snapshot();
        let active = snapshot.iter().filter(|r| r.is_active).count();
        for category in &categories {
            let candidates = eligible(&snapshot, node.peer_id(), *category);
            tracing::info!(
                %category,
                remote = candidates.remote.len(),
                local = candidates.local_eligible,
                "eligible workers"
            );
        }
        tracing::debug!(known = snapshot.len(), active, "registry status");
    }
}
