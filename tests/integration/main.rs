//! Oracle integration test harness.
//!
//! Tests run several oracle nodes in one process over a `MemoryHub`.
//! No network, no root, no external services.
//!
//!   cargo test --test integration
//!
//! Each test builds its own hub; tests never share nodes.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use oracle_core::config::{GossipSettings, WorkerSettings};
use oracle_core::wire::{Capabilities, PeerId, WorkResponse, WorkType, WorkerCategory};
use oracle_services::{MemoryHub, NodeOptions, OracleNode, WorkHandler, WorkHandlerRegistry};

mod dispatch;
mod membership;

// ── Harness ───────────────────────────────────────────────────────────────────

pub const VERSION: &str = "v0.0.4-beta";
pub const ENVIRONMENT: &str = "it";

pub fn caps(categories: &[WorkerCategory]) -> Capabilities {
    categories
        .iter()
        .fold(Capabilities::default(), |c, cat| c.with(*cat))
}

pub fn options(id: &str, staked: bool, capabilities: Capabilities) -> NodeOptions {
    NodeOptions {
        version: VERSION.to_string(),
        environment: ENVIRONMENT.to_string(),
        staked,
        capabilities,
        address: format!("/memory/{id}"),
        workers: WorkerSettings::default(),
        gossip: GossipSettings::default(),
    }
}

/// Start a node named `id` on `hub`.
pub fn spawn_node(
    hub: &MemoryHub,
    id: &str,
    handlers: WorkHandlerRegistry,
    options: NodeOptions,
) -> OracleNode {
    let (transport, events) = hub.join(PeerId::from(id), options.address.clone());
    OracleNode::start(Arc::new(transport), events, handlers, options)
}

/// Poll `check` until it holds or `what` times out.
pub async fn wait_until(what: &str, check: impl Fn() -> bool) -> Result<()> {
    for _ in 0..200 {
        if check() {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    bail!("timed out waiting for {what}")
}

/// Handler that counts calls and answers with a fixed response.
pub struct Counting {
    pub hits: Arc<AtomicUsize>,
    pub response: WorkResponse,
}

impl Counting {
    pub fn ok(data: serde_json::Value) -> (Arc<Self>, Arc<AtomicUsize>) {
        let hits = Arc::new(AtomicUsize::new(0));
        let handler = Arc::new(Self {
            hits: hits.clone(),
            response: WorkResponse::ok(data),
        });
        (handler, hits)
    }
}

#[async_trait]
impl WorkHandler for Counting {
    async fn handle_work(&self, _data: &[u8], _cancel: CancellationToken) -> WorkResponse {
        self.hits.fetch_add(1, Ordering::SeqCst);
        self.response.clone()
    }
}

/// Handler that never finishes unless cancelled.
pub struct Stalled {
    pub hits: Arc<AtomicUsize>,
}

#[async_trait]
impl WorkHandler for Stalled {
    async fn handle_work(&self, _data: &[u8], cancel: CancellationToken) -> WorkResponse {
        self.hits.fetch_add(1, Ordering::SeqCst);
        cancel.cancelled().await;
        WorkResponse::failed("cancelled")
    }
}

pub fn handlers_for(work_type: WorkType, handler: Arc<dyn WorkHandler>) -> WorkHandlerRegistry {
    let mut registry = WorkHandlerRegistry::new();
    registry.register(work_type, handler);
    registry
}
