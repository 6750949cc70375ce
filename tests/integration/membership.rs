use crate::*;

use bytes::Bytes;
use oracle_services::peer::unix_now;
use oracle_services::{Activity, PeerRecord, Transport};

/// Raw participant: a bare transport subscribed to the gossip topic, used to
/// inject hand-built `NodeData`.
fn raw_peer(hub: &MemoryHub, id: &str, topic: &str) -> oracle_services::MemoryTransport {
    let (transport, _events) = hub.join(PeerId::from(id), format!("/memory/{id}"));
    transport.subscribe(topic);
    transport
}

fn joined_record(id: &str, staked: bool, capabilities: Capabilities) -> PeerRecord {
    let mut record = PeerRecord::new(PeerId::from(id))
        .with_stake(staked)
        .with_capabilities(capabilities)
        .with_version(VERSION)
        .with_address(&format!("/memory/{id}"));
    record.joined(unix_now());
    record
}

async fn gossip(from: &oracle_services::MemoryTransport, topic: &str, record: &PeerRecord) -> Result<()> {
    from.publish(topic, Bytes::from(record.to_json()?)).await?;
    Ok(())
}

/// A connection from a peer nobody has gossiped about is not recorded;
/// its `NodeData` is.
#[tokio::test]
async fn test_gossip_discovers_peer() -> Result<()> {
    let hub = MemoryHub::new();
    let opts = options("self", true, caps(&[WorkerCategory::Twitter]));
    let topic = opts.topic();
    let node = spawn_node(&hub, "self", WorkHandlerRegistry::new(), opts);

    let a = raw_peer(&hub, "a", &topic);
    hub.connect(node.peer_id(), &PeerId::from("a"))?;
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(node.registry().get(&PeerId::from("a")).is_none());

    gossip(&a, &topic, &joined_record("a", true, caps(&[WorkerCategory::Twitter]))).await?;
    wait_until("a discovered", || node.registry().get(&PeerId::from("a")).is_some()).await?;

    let candidates = node.dispatcher().candidates(WorkType::Twitter);
    let remote: Vec<&str> = candidates.remote.iter().map(|r| r.peer_id.as_str()).collect();
    assert_eq!(remote, ["a"]);
    assert!(candidates.local_eligible);

    // Unstaked peers are known but never eligible.
    gossip(&a, &topic, &joined_record("c", false, caps(&[WorkerCategory::Twitter]))).await?;
    wait_until("c discovered", || node.registry().get(&PeerId::from("c")).is_some()).await?;
    assert_eq!(node.dispatcher().candidates(WorkType::Twitter).remote.len(), 1);
    Ok(())
}

/// Two full nodes exchange their own records on start.
#[tokio::test]
async fn test_nodes_learn_each_other() -> Result<()> {
    let hub = MemoryHub::new();
    let first = spawn_node(&hub, "n1", WorkHandlerRegistry::new(), options("n1", true, caps(&[WorkerCategory::Web])));
    let second = spawn_node(&hub, "n2", WorkHandlerRegistry::new(), options("n2", false, caps(&[])));

    wait_until("n1 knows n2", || first.registry().get(second.peer_id()).is_some()).await?;

    let seen = first.registry().get(second.peer_id()).unwrap();
    assert!(!seen.self_identified);
    assert!(!seen.is_staked);
    assert_eq!(seen.version, VERSION);

    // n2 only learns n1 from the next broadcast; force one.
    first.registry().announce_self();
    wait_until("n2 knows n1", || second.registry().get(first.peer_id()).is_some()).await?;
    let n1 = second.registry().get(first.peer_id()).unwrap();
    assert!(n1.is_staked);
    assert!(n1.supports(WorkerCategory::Web));
    Ok(())
}

/// A redial of an active peer followed by its disconnect leaves the peer
/// active.
#[tokio::test]
async fn test_connection_flicker_is_absorbed() -> Result<()> {
    let hub = MemoryHub::new();
    let opts = options("self", true, caps(&[]));
    let topic = opts.topic();
    let node = spawn_node(&hub, "self", WorkHandlerRegistry::new(), opts);
    let a = raw_peer(&hub, "a", &topic);
    let a_id = PeerId::from("a");

    gossip(&a, &topic, &joined_record("a", true, caps(&[]))).await?;
    wait_until("a discovered", || node.registry().get(&a_id).is_some()).await?;

    hub.connect(node.peer_id(), &a_id)?;
    wait_until("connect buffered", || node.registry().buffered_connects() == 1).await?;

    hub.disconnect(node.peer_id(), &a_id);
    wait_until("flicker absorbed", || node.registry().buffered_connects() == 0).await?;

    let record = node.registry().get(&a_id).unwrap();
    assert!(record.is_active);
    assert_eq!(record.activity, Activity::Joined);
    Ok(())
}

/// Once the buffer window has passed, a disconnect is a real leave even
/// before maintenance gets to the buffered connect.
#[tokio::test]
async fn test_disconnect_after_window_marks_left() -> Result<()> {
    let hub = MemoryHub::new();
    let mut opts = options("self", true, caps(&[]));
    opts.gossip.connect_buffer_window_secs = 0;
    opts.gossip.sweep_interval_secs = 3_600;
    let topic = opts.topic();
    let node = spawn_node(&hub, "self", WorkHandlerRegistry::new(), opts);
    let a = raw_peer(&hub, "a", &topic);
    let a_id = PeerId::from("a");

    gossip(&a, &topic, &joined_record("a", true, caps(&[]))).await?;
    wait_until("a discovered", || node.registry().get(&a_id).is_some()).await?;

    hub.connect(node.peer_id(), &a_id)?;
    wait_until("connect buffered", || node.registry().buffered_connects() == 1).await?;

    hub.disconnect(node.peer_id(), &a_id);
    wait_until("a left", || {
        node.registry()
            .get(&a_id)
            .is_some_and(|r| r.activity == Activity::Left)
    })
    .await?;

    let record = node.registry().get(&a_id).unwrap();
    assert!(!record.is_active);
    assert!(record.last_left_at >= record.last_joined_at);
    assert_eq!(node.registry().buffered_connects(), 0);
    Ok(())
}

/// A peer reported gone by gossip, then seen again, leaves for real on
/// its next disconnect.
#[tokio::test]
async fn test_gossiped_leave_then_rejoin_then_disconnect() -> Result<()> {
    let hub = MemoryHub::new();
    let opts = options("self", true, caps(&[]));
    let topic = opts.topic();
    let node = spawn_node(&hub, "self", WorkHandlerRegistry::new(), opts);
    let a = raw_peer(&hub, "a", &topic);
    let a_id = PeerId::from("a");

    let mut record = joined_record("a", true, caps(&[]));
    gossip(&a, &topic, &record).await?;
    wait_until("a discovered", || node.registry().get(&a_id).is_some()).await?;

    hub.connect(node.peer_id(), &a_id)?;
    wait_until("connect buffered", || node.registry().buffered_connects() == 1).await?;

    record.left(unix_now());
    gossip(&a, &topic, &record).await?;
    wait_until("a reported left", || node.registry().get(&a_id).is_some_and(|r| !r.is_active)).await?;
    assert_eq!(node.registry().buffered_connects(), 0);

    // Redial: the link is still up on the hub, so drop it first.
    hub.disconnect(node.peer_id(), &a_id);
    hub.connect(node.peer_id(), &a_id)?;
    wait_until("a rejoined", || node.registry().get(&a_id).is_some_and(|r| r.is_active)).await?;

    hub.disconnect(node.peer_id(), &a_id);
    wait_until("a left again", || node.registry().get(&a_id).is_some_and(|r| !r.is_active)).await?;
    Ok(())
}

/// A `Left` report for a peer we never saw creates nothing.
#[tokio::test]
async fn test_unknown_leave_ignored() -> Result<()> {
    let hub = MemoryHub::new();
    let opts = options("self", true, caps(&[]));
    let topic = opts.topic();
    let node = spawn_node(&hub, "self", WorkHandlerRegistry::new(), opts);
    let a = raw_peer(&hub, "a", &topic);

    let mut ghost = joined_record("ghost", true, caps(&[]));
    ghost.left(unix_now());
    gossip(&a, &topic, &ghost).await?;
    gossip(&a, &topic, &joined_record("a", true, caps(&[]))).await?;

    wait_until("a discovered", || node.registry().get(&PeerId::from("a")).is_some()).await?;
    assert!(node.registry().get(&PeerId::from("ghost")).is_none());
    Ok(())
}
