//! Shared test handler for the worker and registry suites.

#![allow(dead_code, missing_docs)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::{Value, json};
use tether_core::HandlerError;
use tether_ws::memory::MemoryPeer;
use tether_ws::{MessageRegistry, MessageSchema, WorkerHandle, WorkerHandler};
use tokio::sync::Semaphore;

pub const TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Deserialize)]
pub struct Echo {
    pub text: String,
}

impl MessageSchema for Echo {
    const TYPE: &'static str = "echo";
}

#[derive(Debug, Deserialize)]
pub struct Fail {}

impl MessageSchema for Fail {
    const TYPE: &'static str = "fail";
}

#[derive(Debug, Deserialize)]
pub struct Boom {}

impl MessageSchema for Boom {
    const TYPE: &'static str = "boom";
}

#[derive(Debug, Deserialize)]
pub struct Seq {
    pub n: u64,
}

impl MessageSchema for Seq {
    const TYPE: &'static str = "seq";
}

#[derive(Debug)]
pub enum Inbound {
    Echo(Echo),
    Fail(Fail),
    Boom(Boom),
    Seq(Seq),
}

/// Observations shared between a test and its handlers.
#[derive(Clone, Default)]
pub struct Recorder {
    events: Arc<Mutex<Vec<String>>>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
}

impl Recorder {
    pub fn push(&self, event: impl Into<String>) {
        self.events.lock().push(event.into());
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().clone()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

pub struct TestHandler {
    pub recorder: Recorder,
    /// When set, `on_disconnected` waits for a permit before returning.
    pub disconnect_gate: Option<Arc<Semaphore>>,
}

impl TestHandler {
    pub fn new(recorder: Recorder) -> Self {
        Self {
            recorder,
            disconnect_gate: None,
        }
    }
}

#[async_trait]
impl WorkerHandler for TestHandler {
    type Message = Inbound;

    fn messages(&self) -> MessageRegistry<Inbound> {
        MessageRegistry::new()
            .with(Inbound::Echo)
            .with(Inbound::Fail)
            .with(Inbound::Boom)
            .with(Inbound::Seq)
    }

    async fn on_connected(&self, worker: &WorkerHandle) {
        self.recorder.push(format!("connected:{}", worker.id()));
        let _ = worker.send_json(&json!({"type": "hello"})).await;
    }

    async fn on_message(&self, worker: &WorkerHandle, message: Inbound) -> Result<(), HandlerError> {
        match message {
            Inbound::Echo(Echo { text }) => {
                let _ = worker.send_json(&json!({"type": "echo", "text": text})).await;
                Ok(())
            }
            Inbound::Fail(_) => Err(HandlerError::new("nope")),
            Inbound::Boom(_) => panic!("boom"),
            Inbound::Seq(Seq { n }) => {
                let now = self.recorder.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                let _ = self.recorder.max_in_flight.fetch_max(now, Ordering::SeqCst);
                // Earlier jobs sleep longer, so overlap would reorder replies
                tokio::time::sleep(Duration::from_millis(20u64.saturating_sub(n))).await;
                self.recorder.push(format!("seq:{n}"));
                let _ = self.recorder.in_flight.fetch_sub(1, Ordering::SeqCst);
                let _ = worker.send_json(&json!({"type": "seq", "n": n})).await;
                Ok(())
            }
        }
    }

    async fn on_binary(&self, worker: &WorkerHandle, data: Bytes) -> Result<(), HandlerError> {
        let _ = worker.send_binary(data).await;
        Ok(())
    }

    async fn on_disconnected(&self, worker: &WorkerHandle) {
        let late = worker.send_text("late").await;
        self.recorder.push(format!("disconnected:{}", worker.id()));
        self.recorder.push(format!("late_send:{late}"));
        if let Some(gate) = &self.disconnect_gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }
    }
}

/// Next JSON frame from the worker, failing the test on timeout or close.
pub async fn next_json(peer: &mut MemoryPeer) -> Value {
    tokio::time::timeout(TIMEOUT, peer.recv_json())
        .await
        .expect("timed out waiting for frame")
        .expect("connection closed")
}

/// Wait until the worker closes the peer's connection.
pub async fn wait_closed(peer: &mut MemoryPeer) {
    tokio::time::timeout(TIMEOUT, async {
        while peer.recv().await.is_some() {}
    })
    .await
    .expect("timed out waiting for close");
}
