//! Teardown against a peer that has stopped reading.

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use serde_json::json;
use tether_core::TransportError;
use tether_ws::{
    ConnectionWorker, Frame, FrameSink, FrameStream, Transport, TransportState, WorkerConfig,
    WorkerHandle, WorkerState,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;

use common::{Recorder, TIMEOUT, TestHandler};

/// Accepts one write, then every later write (and optionally close) never
/// completes.
struct StalledTransport {
    inbound: mpsc::UnboundedReceiver<Frame>,
    writes: Arc<AtomicUsize>,
    stall_close: bool,
}

struct StalledSink {
    writes: Arc<AtomicUsize>,
    stall_close: bool,
}

struct StalledStream {
    inbound: mpsc::UnboundedReceiver<Frame>,
}

#[async_trait]
impl Transport for StalledTransport {
    type Sink = StalledSink;
    type Stream = StalledStream;

    fn state(&self) -> TransportState {
        TransportState::Pending
    }

    async fn accept(self) -> Result<(StalledSink, StalledStream), TransportError> {
        Ok((
            StalledSink {
                writes: self.writes,
                stall_close: self.stall_close,
            },
            StalledStream {
                inbound: self.inbound,
            },
        ))
    }
}

#[async_trait]
impl FrameSink for StalledSink {
    async fn send(&mut self, _frame: Frame) -> Result<(), TransportError> {
        if self.writes.fetch_add(1, Ordering::SeqCst) > 0 {
            std::future::pending::<()>().await;
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if self.stall_close {
            std::future::pending::<()>().await;
        }
        Ok(())
    }
}

#[async_trait]
impl FrameStream for StalledStream {
    async fn recv(&mut self) -> Result<Option<Frame>, TransportError> {
        Ok(self.inbound.recv().await)
    }
}

struct Stalled {
    to_server: mpsc::UnboundedSender<Frame>,
    writes: Arc<AtomicUsize>,
    handle: WorkerHandle,
    task: JoinHandle<()>,
}

async fn start(stall_close: bool) -> Stalled {
    let (to_server, inbound) = mpsc::unbounded_channel();
    let writes = Arc::new(AtomicUsize::new(0));
    let transport = StalledTransport {
        inbound,
        writes: writes.clone(),
        stall_close,
    };
    let worker = ConnectionWorker::new(
        "slow-reader",
        TestHandler::new(Recorder::default()),
        &WorkerConfig::new("test"),
    );
    let handle = worker.handle().clone();
    let task = tokio::spawn(worker.begin(transport));

    // The greeting takes the one write that goes through
    let mut states = handle.subscribe_state();
    let _ = timeout(TIMEOUT, states.wait_for(|s| *s == WorkerState::Active))
        .await
        .unwrap();
    while writes.load(Ordering::SeqCst) == 0 {
        tokio::task::yield_now().await;
    }

    Stalled {
        to_server,
        writes,
        handle,
        task,
    }
}

#[tokio::test(start_paused = true)]
async fn close_interrupts_a_stuck_error_frame() {
    let stalled = start(false).await;

    // The error frame write hangs inside the read loop
    stalled.to_server.send(Frame::Text("{bad json".into())).unwrap();
    while stalled.writes.load(Ordering::SeqCst) < 2 {
        tokio::task::yield_now().await;
    }

    stalled.handle.close();
    timeout(TIMEOUT, stalled.task).await.unwrap().unwrap();
    assert_eq!(stalled.handle.state(), WorkerState::Closed);
}

#[tokio::test(start_paused = true)]
async fn close_interrupts_a_send_from_outside_the_drain_task() {
    let stalled = start(false).await;

    let sender = tokio::spawn({
        let handle = stalled.handle.clone();
        async move { handle.send_json(&json!({"type": "late"})).await }
    });
    while stalled.writes.load(Ordering::SeqCst) < 2 {
        tokio::task::yield_now().await;
    }

    stalled.handle.close();
    timeout(TIMEOUT, stalled.task).await.unwrap().unwrap();
    assert!(!timeout(TIMEOUT, sender).await.unwrap().unwrap());
}

#[tokio::test(start_paused = true)]
async fn stuck_close_handshake_is_bounded() {
    let stalled = start(true).await;

    stalled.handle.close();
    timeout(TIMEOUT, stalled.task).await.unwrap().unwrap();
    assert_eq!(stalled.handle.state(), WorkerState::Closed);
}
