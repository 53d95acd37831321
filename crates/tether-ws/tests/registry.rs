//! Single-owner registry behaviour: registration, hand-off and shutdown.

mod common;

use std::sync::Arc;

use tether_ws::memory::{MemoryPeer, memory_pair};
use tether_ws::{ConnectionRegistry, WorkerConfig, WorkerState};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::timeout;

use common::{Recorder, TIMEOUT, TestHandler, next_json, wait_closed};

type Registry = ConnectionRegistry<TestHandler>;

fn registry(recorder: &Recorder, gate: Option<Arc<Semaphore>>) -> Arc<Registry> {
    let recorder = recorder.clone();
    Arc::new(ConnectionRegistry::new(WorkerConfig::new("test"), move |_key| {
        TestHandler {
            recorder: recorder.clone(),
            disconnect_gate: gate.clone(),
        }
    }))
}

/// Start a worker for `key` and wait for its greeting.
async fn connect(registry: &Arc<Registry>, key: &str) -> (MemoryPeer, JoinHandle<()>) {
    let (transport, mut peer) = memory_pair();
    let task = tokio::spawn({
        let registry = registry.clone();
        let key = key.to_owned();
        async move { registry.begin_unique(transport, key).await }
    });
    let _ = next_json(&mut peer).await;
    (peer, task)
}

#[tokio::test]
async fn registers_and_removes_on_disconnect() {
    let recorder = Recorder::default();
    let registry = registry(&recorder, None);
    assert_eq!(registry.connection_type(), "test");

    let (mut peer, task) = connect(&registry, "alice").await;
    assert!(registry.contains("alice"));
    assert_eq!(registry.len(), 1);
    let handle = registry.get("alice").unwrap();
    assert_eq!(handle.key().as_str(), "alice");
    assert_eq!(handle.state(), WorkerState::Active);

    peer.disconnect();
    timeout(TIMEOUT, task).await.unwrap().unwrap();
    assert!(registry.is_empty());
    assert!(registry.get("alice").is_none());
}

#[tokio::test]
async fn distinct_keys_coexist() {
    let recorder = Recorder::default();
    let registry = registry(&recorder, None);

    let (_bob, _t1) = connect(&registry, "bob").await;
    let (_alice, _t2) = connect(&registry, "alice").await;

    assert_eq!(registry.len(), 2);
    let keys: Vec<String> = registry.keys().into_iter().map(|k| k.into_inner()).collect();
    assert_eq!(keys, vec!["alice", "bob"]);
}

#[tokio::test]
async fn reconnect_displaces_the_old_worker() {
    let recorder = Recorder::default();
    let registry = registry(&recorder, None);

    let (mut first, first_task) = connect(&registry, "k").await;
    let first_handle = registry.get("k").unwrap();

    let (mut second, second_task) = connect(&registry, "k").await;
    let second_handle = registry.get("k").unwrap();
    assert!(!first_handle.same_worker(&second_handle));

    wait_closed(&mut first).await;
    timeout(TIMEOUT, first_task).await.unwrap().unwrap();

    // The finished worker must not evict its replacement
    assert_eq!(registry.len(), 1);
    assert!(registry.get("k").unwrap().same_worker(&second_handle));
    assert_eq!(first_handle.state(), WorkerState::Closed);
    assert_eq!(second_handle.state(), WorkerState::Active);

    second.disconnect();
    timeout(TIMEOUT, second_task).await.unwrap().unwrap();
    assert!(!registry.contains("k"));
}

#[tokio::test]
async fn replacement_is_registered_before_old_teardown_finishes() {
    let recorder = Recorder::default();
    let gate = Arc::new(Semaphore::new(0));
    let registry = registry(&recorder, Some(gate.clone()));

    let (mut first, first_task) = connect(&registry, "k").await;
    let first_handle = registry.get("k").unwrap();

    let (_second, _second_task) = connect(&registry, "k").await;

    // Old worker has closed its transport but is parked in on_disconnected
    timeout(TIMEOUT, first_handle.closed()).await.unwrap();
    wait_closed(&mut first).await;
    assert!(!first_task.is_finished());

    let current = registry.get("k").unwrap();
    assert!(!current.same_worker(&first_handle));
    assert!(current.is_connected());

    gate.add_permits(1);
    timeout(TIMEOUT, first_task).await.unwrap().unwrap();
    assert!(registry.get("k").unwrap().same_worker(&current));
}

#[tokio::test]
async fn rapid_reconnects_leave_exactly_the_last_worker() {
    let recorder = Recorder::default();
    let registry = registry(&recorder, None);

    let mut sessions = Vec::new();
    for _ in 0..8 {
        sessions.push(connect(&registry, "k").await);
    }
    let last = registry.get("k").unwrap();

    let (mut survivor, _survivor_task) = sessions.pop().unwrap();
    for (mut peer, task) in sessions {
        wait_closed(&mut peer).await;
        timeout(TIMEOUT, task).await.unwrap().unwrap();
    }

    assert_eq!(registry.len(), 1);
    assert!(registry.get("k").unwrap().same_worker(&last));
    assert!(survivor.send_text(r#"{"type":"echo","text":"ok"}"#));
    assert_eq!(next_json(&mut survivor).await["text"], "ok");
}

#[tokio::test]
async fn close_all_drains_the_registry() {
    let recorder = Recorder::default();
    let registry = registry(&recorder, None);

    let (mut a, _ta) = connect(&registry, "a").await;
    let (mut b, _tb) = connect(&registry, "b").await;

    assert_eq!(registry.close_all(), 2);
    timeout(TIMEOUT, registry.drained()).await.unwrap();
    wait_closed(&mut a).await;
    wait_closed(&mut b).await;
    assert!(registry.is_empty());

    let disconnects = recorder
        .events()
        .iter()
        .filter(|e| e.starts_with("disconnected:"))
        .count();
    assert_eq!(disconnects, 2);
}

#[tokio::test]
async fn drained_resolves_immediately_when_empty() {
    let registry = registry(&Recorder::default(), None);
    timeout(TIMEOUT, registry.drained()).await.unwrap();
    assert_eq!(registry.close_all(), 0);
}
