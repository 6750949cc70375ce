//! Oracle node: one participant, wired to a transport.
//!
//! Owns the registry, handler registry and dispatcher, and the background
//! tasks that connect them to the network. Dropping the node aborts the
//! tasks.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use oracle_core::config::{GossipSettings, OracleConfig, WorkerSettings};
use oracle_core::wire::{
    protocol_id, topic_id, Capabilities, PeerId, WorkRequest, WorkResponse, WorkType,
    NODE_GOSSIP_TOPIC, ORACLE_PROTOCOL,
};

use crate::dispatcher::{DispatchSettings, Dispatcher};
use crate::gossip::{broadcast_loop, maintenance_loop, publisher_loop};
use crate::handlers::{TestHandler, WorkHandlerRegistry};
use crate::peer::PeerRecord;
use crate::registry::PeerRegistry;
use crate::transport::{Transport, TransportEvent};
use crate::worker_stream::handle_worker_stream;

/// Everything a node needs besides its transport.
#[derive(Debug, Clone)]
pub struct NodeOptions {
    pub version: String,
    pub environment: String,
    pub staked: bool,
    pub capabilities: Capabilities,
    /// Address advertised in the node's own record.
    pub address: String,
    pub workers: WorkerSettings,
    pub gossip: GossipSettings,
}

impl NodeOptions {
    pub fn from_config(config: &OracleConfig, address: impl Into<String>) -> Self {
        Self {
            version: config.node.version.clone(),
            environment: config.node.environment.clone(),
            staked: config.node.staked,
            capabilities: config.capabilities.to_capabilities(),
            address: address.into(),
            workers: config.workers.clone(),
            gossip: config.gossip.clone(),
        }
    }

    pub fn protocol(&self) -> String {
        protocol_id(ORACLE_PROTOCOL, &self.version, &self.environment)
    }

    pub fn topic(&self) -> String {
        topic_id(NODE_GOSSIP_TOPIC, &self.version, &self.environment)
    }
}

/// Handlers shipped with this crate, filtered by capability.
pub fn default_handlers(capabilities: &Capabilities) -> WorkHandlerRegistry {
    let mut handlers = WorkHandlerRegistry::new();
    handlers.register_if_capable(capabilities, WorkType::Test, Arc::new(TestHandler));
    handlers
}

pub struct OracleNode {
    peer_id: PeerId,
    registry: PeerRegistry,
    handlers: Arc<WorkHandlerRegistry>,
    dispatcher: Arc<Dispatcher>,
    tasks: Vec<JoinHandle<()>>,
}

impl OracleNode {
    /// Start a node on `transport`. Must be called inside a tokio runtime.
    pub fn start(
        transport: Arc<dyn Transport>,
        events: mpsc::UnboundedReceiver<TransportEvent>,
        handlers: WorkHandlerRegistry,
        options: NodeOptions,
    ) -> Self {
        let peer_id = transport.local_peer_id().clone();
        let protocol = options.protocol();
        let topic = options.topic();
        transport.serve(&protocol);
        transport.subscribe(&topic);

        let (registry, gossip_rx) = PeerRegistry::new(peer_id.clone());
        let registry = registry.with_connect_window(options.gossip.connect_buffer_window());
        let handlers = Arc::new(handlers);
        let dispatcher = Arc::new(Dispatcher::new(
            registry.clone(),
            handlers.clone(),
            transport.clone(),
            DispatchSettings::from_config(&options.workers, protocol.clone()),
        ));

        let tasks = vec![
            tokio::spawn(publisher_loop(gossip_rx, transport.clone(), topic.clone())),
            tokio::spawn(broadcast_loop(registry.clone(), options.gossip.clone())),
            tokio::spawn(maintenance_loop(registry.clone(), options.gossip.clone())),
            tokio::spawn(event_loop(
                events,
                EventContext {
                    registry: registry.clone(),
                    handlers: handlers.clone(),
                    self_id: peer_id.clone(),
                    topic,
                    protocol,
                    worker_timeout: options.workers.worker_timeout(),
                },
            )),
        ];

        let record = PeerRecord::new(peer_id.clone())
            .with_stake(options.staked)
            .with_capabilities(options.capabilities)
            .with_version(options.version.clone())
            .with_address(&options.address);
        registry.add_or_update(record, true);

        tracing::info!(
            peer = %peer_id.short(),
            staked = options.staked,
            capabilities = ?options.capabilities.categories(),
            "oracle node started"
        );

        Self {
            peer_id,
            registry,
            handlers,
            dispatcher,
            tasks,
        }
    }

    pub fn peer_id(&self) -> &PeerId {
        &self.peer_id
    }

    pub fn registry(&self) -> &PeerRegistry {
        &self.registry
    }

    pub fn handlers(&self) -> &Arc<WorkHandlerRegistry> {
        &self.handlers
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub async fn distribute_work(&self, request: WorkRequest) -> WorkResponse {
        self.dispatcher.distribute_work(request).await
    }
}

impl Drop for OracleNode {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

// ── Transport events ──────────────────────────────────────────────────────────

struct EventContext {
    registry: PeerRegistry,
    handlers: Arc<WorkHandlerRegistry>,
    self_id: PeerId,
    topic: String,
    protocol: String,
    worker_timeout: Duration,
}

/// Route transport events to the registry and the worker-stream server.
async fn event_loop(mut events: mpsc::UnboundedReceiver<TransportEvent>, ctx: EventContext) {
    while let Some(event) = events.recv().await {
        match event {
            TransportEvent::Connected { peer, addr } => {
                ctx.registry.connected(&peer, &addr);
            }
            TransportEvent::Disconnected { peer } => {
                ctx.registry.disconnected(&peer);
            }
            TransportEvent::Message { topic, from, data } => {
                if topic != ctx.topic {
                    tracing::trace!(%topic, "message on unrelated topic");
                    continue;
                }
                tracing::trace!(from = %from.short(), len = data.len(), "node gossip received");
                ctx.registry.handle_gossip_message(&data);
            }
            TransportEvent::InboundStream { peer, protocol, stream } => {
                if protocol != ctx.protocol {
                    tracing::debug!(%protocol, "inbound stream for unknown protocol dropped");
                    continue;
                }
                tokio::spawn(handle_worker_stream(
                    stream,
                    peer,
                    ctx.self_id.clone(),
                    ctx.handlers.clone(),
                    ctx.worker_timeout,
                ));
            }
        }
    }
    tracing::debug!(peer = %ctx.self_id.short(), "transport event stream closed");
}
