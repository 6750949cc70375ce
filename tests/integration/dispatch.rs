use crate::*;

use oracle_services::DispatchEvent;
use serde_json::json;

fn twitter_request(id: &str) -> oracle_core::WorkRequest {
    oracle_core::WorkRequest::new(WorkType::Twitter, id, br#"{"query":"rust","count":5}"#.to_vec())
}

/// Work goes to the one eligible remote worker and comes back stamped with
/// its id.
#[tokio::test]
async fn test_remote_worker_serves_request() -> Result<()> {
    let hub = MemoryHub::new();
    let origin = spawn_node(&hub, "origin", WorkHandlerRegistry::new(), options("origin", false, caps(&[])));

    let (handler, hits) = Counting::ok(json!({"tweets": 5}));
    let worker = spawn_node(
        &hub,
        "worker",
        handlers_for(WorkType::Twitter, handler),
        options("worker", true, caps(&[WorkerCategory::Twitter])),
    );
    wait_until("origin knows worker", || origin.registry().get(worker.peer_id()).is_some()).await?;

    let response = origin.distribute_work(twitter_request("r-1")).await;
    assert!(response.is_success(), "unexpected error: {}", response.error);
    assert_eq!(response.worker_peer_id.as_ref(), Some(worker.peer_id()));
    assert_eq!(response.data, json!({"tweets": 5}));
    assert_eq!(hits.load(Ordering::SeqCst), 1);

    let stats = origin
        .registry()
        .get(worker.peer_id())
        .unwrap()
        .stats(WorkerCategory::Twitter);
    assert_eq!(stats.returned_count, 1);

    let events = origin.dispatcher().events().recent(10).await;
    assert!(events
        .iter()
        .any(|e| matches!(&e.event, DispatchEvent::WorkCompleted { success: true, .. })));
    Ok(())
}

/// With one remote attempt allowed and the first worker stalled, the
/// second worker is never contacted and the local node answers.
#[tokio::test(start_paused = true)]
async fn test_bounded_attempts_fall_back_to_local() -> Result<()> {
    let hub = MemoryHub::new();
    let mut opts = options("self", true, caps(&[WorkerCategory::Twitter]));
    opts.workers.max_remote_workers = 1;
    let (local, local_hits) = Counting::ok(json!({"from": "self"}));
    let origin = spawn_node(&hub, "self", handlers_for(WorkType::Twitter, local), opts);

    let stalled_hits = Arc::new(AtomicUsize::new(0));
    let a = spawn_node(
        &hub,
        "a",
        handlers_for(WorkType::Twitter, Arc::new(Stalled { hits: stalled_hits.clone() })),
        options("a", true, caps(&[WorkerCategory::Twitter])),
    );
    let (b_handler, b_hits) = Counting::ok(json!({"from": "b"}));
    let b = spawn_node(
        &hub,
        "b",
        handlers_for(WorkType::Twitter, b_handler),
        options("b", true, caps(&[WorkerCategory::Twitter])),
    );
    wait_until("both workers known", || {
        origin.dispatcher().candidates(WorkType::Twitter).remote.len() == 2
    })
    .await?;

    let remote = origin.dispatcher().candidates(WorkType::Twitter).remote;
    assert_eq!(&remote[0].peer_id, a.peer_id());

    let response = origin.distribute_work(twitter_request("r-2")).await;
    assert!(response.is_success(), "unexpected error: {}", response.error);
    assert_eq!(response.worker_peer_id.as_ref(), Some(origin.peer_id()));
    assert_eq!(stalled_hits.load(Ordering::SeqCst), 1);
    assert_eq!(b_hits.load(Ordering::SeqCst), 0);
    assert_eq!(local_hits.load(Ordering::SeqCst), 1);

    let a_stats = origin.registry().get(a.peer_id()).unwrap().stats(WorkerCategory::Twitter);
    assert_eq!(a_stats.timeout_count, 1);
    assert!(origin.registry().get(b.peer_id()).unwrap().stats(WorkerCategory::Twitter).returned_count == 0);
    Ok(())
}

/// Nobody can take the work and there is nothing to run locally.
#[tokio::test]
async fn test_no_eligible_workers() -> Result<()> {
    let hub = MemoryHub::new();
    let origin = spawn_node(&hub, "origin", WorkHandlerRegistry::new(), options("origin", false, caps(&[])));

    let response = origin.distribute_work(twitter_request("r-3")).await;
    assert!(!response.is_success());
    assert_eq!(response.error, "no eligible workers found");
    Ok(())
}

/// A failing remote and a failing local run are both reported.
#[tokio::test]
async fn test_all_workers_failed_lists_each_error() -> Result<()> {
    let hub = MemoryHub::new();
    let broken = Arc::new(oracle_services::FnHandler(|_data: &[u8]| WorkResponse::failed("quota exceeded")));
    let origin = spawn_node(
        &hub,
        "self",
        handlers_for(WorkType::Twitter, broken.clone()),
        options("self", true, caps(&[WorkerCategory::Twitter])),
    );
    let worker = spawn_node(
        &hub,
        "w",
        handlers_for(WorkType::Twitter, broken),
        options("w", true, caps(&[WorkerCategory::Twitter])),
    );
    wait_until("worker known", || origin.registry().get(worker.peer_id()).is_some()).await?;

    let response = origin.distribute_work(twitter_request("r-4")).await;
    assert!(!response.is_success());
    assert!(response.error.starts_with("All workers failed. Errors: "), "{}", response.error);
    assert!(response.error.contains("Worker w: quota exceeded"), "{}", response.error);
    assert!(response.error.contains("Local worker: quota exceeded"), "{}", response.error);
    Ok(())
}

/// `test` work never leaves the node.
#[tokio::test]
async fn test_probe_runs_locally() -> Result<()> {
    let hub = MemoryHub::new();
    let capabilities = caps(&[WorkerCategory::Web]);
    let origin = spawn_node(
        &hub,
        "self",
        oracle_services::default_handlers(&capabilities),
        options("self", true, capabilities),
    );
    let _peer = spawn_node(
        &hub,
        "peer",
        oracle_services::default_handlers(&capabilities),
        options("peer", true, capabilities),
    );

    let payload = oracle_core::WorkPayload::Test(oracle_core::wire::TestMessage { message: "ping".into() });
    let request = oracle_core::WorkRequest::from_payload(&payload, 1)?;
    let response = origin.distribute_work(request).await;
    assert!(response.is_success(), "unexpected error: {}", response.error);
    assert_eq!(response.worker_peer_id.as_ref(), Some(origin.peer_id()));
    assert_eq!(response.record_count, 1);
    Ok(())
}
