//! Per-connection worker.
//!
//! A [`ConnectionWorker`] owns one accepted connection from handshake to
//! teardown:
//!
//! 1. Checks the transport is still there and accepts it
//! 2. Runs `on_connected`
//! 3. Reads frames, decoding text through the [`MessageRegistry`] and passing
//!    binary through untouched, and queues them as jobs
//! 4. A drain task runs jobs one at a time, in arrival order
//! 5. On peer close, transport failure or [`WorkerHandle::close`], cancels the
//!    drain task, closes the transport and runs `on_disconnected`
//!
//! Handlers talk back to the peer through the [`WorkerHandle`] they are given.

use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use futures::FutureExt;
use metrics::{counter, gauge, histogram};
use serde::{Deserialize, Serialize};
use tether_core::{ClientKey, ConnectionId, ErrorFrame, FrameError, HandlerError};
use tokio::sync::{Mutex, watch};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::message::MessageRegistry;
use crate::metrics::{
    WS_CONNECTION_DURATION_SECONDS, WS_CONNECTIONS_ACTIVE, WS_CONNECTIONS_TOTAL,
    WS_FRAME_ERRORS_TOTAL, WS_FRAMES_RECEIVED_TOTAL, WS_HANDLER_ERRORS_TOTAL,
};
use crate::queue::{JobReceiver, QueueCapacity, inbound_queue};
use crate::transport::{Frame, FrameSink, FrameStream, Transport, TransportState};

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Upper bound on the final close handshake during teardown.
pub const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Lifecycle of a worker. Only moves forward.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum WorkerState {
    /// Constructed, `begin` not called yet.
    Idle,
    /// Handshake in progress.
    Accepting,
    /// Reading frames and accepting sends.
    Active,
    /// Read loop has stopped, tearing down.
    Draining,
    /// Transport closed.
    Closed,
}

/// The payload shape a connection type expects to carry.
///
/// Advisory: inbound routing is always by frame kind. Handlers can read it
/// through [`WorkerHandle::payload_mode`] to decide how to reply.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayloadMode {
    /// JSON text frames.
    #[default]
    Text,
    /// Raw binary frames.
    Binary,
}

impl PayloadMode {
    /// Lowercase label for logs and metrics.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Binary => "binary",
        }
    }
}

/// Settings shared by every worker of one connection type.
#[derive(Clone, Debug)]
pub struct WorkerConfig {
    /// Name used in logs and metrics labels.
    pub connection_type: String,
    /// Advisory payload mode.
    pub payload_mode: PayloadMode,
    /// Inbound queue sizing.
    pub queue: QueueCapacity,
}

impl WorkerConfig {
    /// Config with default payload mode and queue sizing.
    pub fn new(connection_type: impl Into<String>) -> Self {
        Self {
            connection_type: connection_type.into(),
            payload_mode: PayloadMode::default(),
            queue: QueueCapacity::default(),
        }
    }

    /// Set the payload mode.
    #[must_use]
    pub fn with_payload_mode(mut self, mode: PayloadMode) -> Self {
        self.payload_mode = mode;
        self
    }

    /// Set the inbound queue sizing.
    #[must_use]
    pub fn with_queue(mut self, queue: QueueCapacity) -> Self {
        self.queue = queue;
        self
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self::new("default")
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Handler trait
// ─────────────────────────────────────────────────────────────────────────────

/// Behaviour plugged into a [`ConnectionWorker`].
///
/// Callbacks for one connection never overlap: `on_message` and `on_binary`
/// run one job at a time from the drain task. An `Err` is logged and
/// reported to the peer as an error frame; the connection stays up.
#[async_trait]
pub trait WorkerHandler: Send + Sync + 'static {
    /// Closed set of inbound messages this worker understands.
    type Message: Send + 'static;

    /// Discriminator table. Called once per worker, at construction.
    fn messages(&self) -> MessageRegistry<Self::Message>;

    /// Runs once after the handshake, before any frame is read.
    async fn on_connected(&self, _worker: &WorkerHandle) {}

    /// Handle one decoded text message.
    async fn on_message(
        &self,
        worker: &WorkerHandle,
        message: Self::Message,
    ) -> Result<(), HandlerError>;

    /// Handle one binary frame. Ignored unless overridden.
    async fn on_binary(&self, _worker: &WorkerHandle, data: Bytes) -> Result<(), HandlerError> {
        debug!(len = data.len(), "binary frame ignored");
        Ok(())
    }

    /// Runs once after the transport is closed. Sends no longer succeed.
    async fn on_disconnected(&self, _worker: &WorkerHandle) {}
}

// ─────────────────────────────────────────────────────────────────────────────
// WorkerHandle
// ─────────────────────────────────────────────────────────────────────────────

struct Shared {
    id: ConnectionId,
    key: ClientKey,
    connection_type: String,
    payload_mode: PayloadMode,
    state: watch::Sender<WorkerState>,
    exit: CancellationToken,
    sink: Mutex<Option<Box<dyn FrameSink>>>,
}

/// Cheap, cloneable reference to a running worker.
///
/// Used by handlers to send, and by the registry to close displaced workers.
#[derive(Clone)]
pub struct WorkerHandle {
    shared: Arc<Shared>,
}

impl WorkerHandle {
    fn new(key: ClientKey, config: &WorkerConfig) -> Self {
        let (state, _) = watch::channel(WorkerState::Idle);
        Self {
            shared: Arc::new(Shared {
                id: ConnectionId::new(),
                key,
                connection_type: config.connection_type.clone(),
                payload_mode: config.payload_mode,
                state,
                exit: CancellationToken::new(),
                sink: Mutex::new(None),
            }),
        }
    }

    /// Unique id of this physical connection.
    pub fn id(&self) -> &ConnectionId {
        &self.shared.id
    }

    /// Client key this worker was started for.
    pub fn key(&self) -> &ClientKey {
        &self.shared.key
    }

    /// Connection type name.
    pub fn connection_type(&self) -> &str {
        &self.shared.connection_type
    }

    /// Advisory payload mode.
    pub fn payload_mode(&self) -> PayloadMode {
        self.shared.payload_mode
    }

    /// Current lifecycle state.
    pub fn state(&self) -> WorkerState {
        *self.shared.state.borrow()
    }

    /// Watch lifecycle transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<WorkerState> {
        self.shared.state.subscribe()
    }

    /// Whether sends can currently succeed.
    pub fn is_connected(&self) -> bool {
        self.state() == WorkerState::Active
    }

    /// Whether [`close`](Self::close) has been requested.
    pub fn exit_requested(&self) -> bool {
        self.shared.exit.is_cancelled()
    }

    /// Whether both handles refer to the same worker.
    pub fn same_worker(&self, other: &WorkerHandle) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    /// Serialize `value` and send it as a text frame.
    pub async fn send_json<T: Serialize + ?Sized>(&self, value: &T) -> bool {
        match serde_json::to_string(value) {
            Ok(text) => self.send_text(text).await,
            Err(err) => {
                warn!(error = %err, "failed to serialize outbound message");
                false
            }
        }
    }

    /// Send a text frame.
    pub async fn send_text(&self, text: impl Into<String>) -> bool {
        self.send_frame(Frame::Text(text.into())).await
    }

    /// Send a binary frame.
    pub async fn send_binary(&self, data: impl Into<Bytes>) -> bool {
        self.send_frame(Frame::Binary(data.into())).await
    }

    /// Send one frame. Returns `false` without writing unless the worker is
    /// active; write failures are logged and also return `false`.
    ///
    /// A write still pending when [`close`](Self::close) is called is
    /// abandoned, so a peer that stops reading cannot hold the sink.
    pub async fn send_frame(&self, frame: Frame) -> bool {
        if !self.is_connected() {
            debug!(kind = frame.kind(), state = ?self.state(), "send skipped, not connected");
            return false;
        }
        let exit = &self.shared.exit;
        let mut guard = tokio::select! {
            biased;
            () = exit.cancelled() => return false,
            guard = self.shared.sink.lock() => guard,
        };
        // Teardown may have taken the sink while we waited for the lock
        let Some(sink) = guard.as_mut() else {
            return false;
        };
        if !self.is_connected() {
            return false;
        }
        let frame_kind = frame.kind();
        let sent = tokio::select! {
            biased;
            () = exit.cancelled() => {
                debug!(kind = frame_kind, "send abandoned, exit requested");
                return false;
            }
            sent = sink.send(frame) => sent,
        };
        match sent {
            Ok(()) => true,
            Err(err) => {
                debug!(error = %err, "send failed");
                false
            }
        }
    }

    /// Ask the worker to stop. Returns immediately; safe to call repeatedly
    /// and before `begin`.
    pub fn close(&self) {
        self.shared.exit.cancel();
    }

    /// Wait until the worker has closed its transport.
    ///
    /// Never resolves for a worker that is never begun.
    pub async fn closed(&self) {
        let mut rx = self.shared.state.subscribe();
        let _ = rx.wait_for(|state| *state == WorkerState::Closed).await;
    }

    fn set_state(&self, state: WorkerState) {
        let _ = self.shared.state.send_replace(state);
    }

    /// Take the sink and close it. Callers cancel `exit` first, so any
    /// in-flight send gives the lock up promptly.
    async fn close_transport(&self) {
        let sink = self.shared.sink.lock().await.take();
        if let Some(mut sink) = sink {
            match tokio::time::timeout(CLOSE_TIMEOUT, sink.close()).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => debug!(error = %err, "close failed, peer already gone"),
                Err(_) => warn!(timeout = ?CLOSE_TIMEOUT, "close timed out, dropping transport"),
            }
        }
    }
}

impl fmt::Debug for WorkerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerHandle")
            .field("id", &self.shared.id)
            .field("key", &self.shared.key)
            .field("connection_type", &self.shared.connection_type)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// ConnectionWorker
// ─────────────────────────────────────────────────────────────────────────────

enum Job<M> {
    Message(M),
    Binary(Bytes),
}

impl<M> Job<M> {
    fn kind(&self) -> &'static str {
        match self {
            Self::Message(_) => "text",
            Self::Binary(_) => "binary",
        }
    }
}

/// Drives one connection through its lifecycle.
pub struct ConnectionWorker<H: WorkerHandler> {
    handle: WorkerHandle,
    handler: Arc<H>,
    messages: MessageRegistry<H::Message>,
    queue: QueueCapacity,
}

impl<H: WorkerHandler> ConnectionWorker<H> {
    /// Create an idle worker for `key`.
    pub fn new(key: impl Into<ClientKey>, handler: H, config: &WorkerConfig) -> Self {
        let messages = handler.messages();
        Self {
            handle: WorkerHandle::new(key.into(), config),
            handler: Arc::new(handler),
            messages,
            queue: config.queue,
        }
    }

    /// Handle for sending to and closing this worker.
    pub fn handle(&self) -> &WorkerHandle {
        &self.handle
    }

    /// The handler instance.
    pub fn handler(&self) -> &Arc<H> {
        &self.handler
    }

    /// Run the connection to completion.
    ///
    /// Returns after teardown, or immediately if the transport was already
    /// disconnected or [`WorkerHandle::close`] was called first.
    pub async fn begin<T: Transport>(self, transport: T) {
        let span = info_span!(
            "ws_worker",
            connection_id = %self.handle.id(),
            client_key = %self.handle.key(),
            connection_type = %self.handle.connection_type(),
        );
        self.run(transport).instrument(span).await;
    }

    async fn run<T: Transport>(self, transport: T) {
        let Self {
            handle,
            handler,
            messages,
            queue,
        } = self;

        if transport.state() == TransportState::Disconnected {
            debug!("transport disconnected before accept");
            handle.set_state(WorkerState::Closed);
            return;
        }
        if handle.exit_requested() {
            debug!("closed before accept");
            handle.set_state(WorkerState::Closed);
            return;
        }

        handle.set_state(WorkerState::Accepting);
        let (sink, mut stream) = match transport.accept().await {
            Ok(halves) => halves,
            Err(err) => {
                warn!(error = %err, "accept failed");
                handle.set_state(WorkerState::Closed);
                return;
            }
        };
        *handle.shared.sink.lock().await = Some(Box::new(sink));

        // Displaced while the handshake was in flight
        if handle.exit_requested() {
            debug!("closed during accept");
            handle.close_transport().await;
            handle.set_state(WorkerState::Closed);
            return;
        }

        handle.set_state(WorkerState::Active);
        let started = Instant::now();
        let connection_type = handle.connection_type().to_owned();
        info!(payload_mode = handle.payload_mode().as_str(), "connection accepted");
        counter!(
            WS_CONNECTIONS_TOTAL,
            "connection_type" => connection_type.clone(),
            "payload_mode" => handle.payload_mode().as_str()
        )
        .increment(1);
        gauge!(WS_CONNECTIONS_ACTIVE, "connection_type" => connection_type.clone()).increment(1.0);

        guarded("on_connected", handler.on_connected(&handle)).await;

        let (jobs, pending) = inbound_queue(queue);
        let drain = tokio::spawn(
            drain_jobs(handler.clone(), handle.clone(), pending).in_current_span(),
        );

        let exit = handle.shared.exit.clone();
        loop {
            let next = tokio::select! {
                biased;
                () = exit.cancelled() => {
                    debug!("exit requested");
                    break;
                }
                next = stream.recv() => next,
            };

            let job = match next {
                Ok(Some(Frame::Text(text))) => match messages.decode(&text) {
                    Ok(message) => Job::Message(message),
                    Err(err) => {
                        // Abandoned mid-write if exit is requested
                        reject_frame(&handle, &err).await;
                        continue;
                    }
                },
                Ok(Some(Frame::Binary(data))) => Job::Binary(data),
                Ok(None) => {
                    debug!("peer closed connection");
                    break;
                }
                Err(err) if err.is_closed() => {
                    debug!("transport closed");
                    break;
                }
                Err(err) => {
                    warn!(error = %err, "transport read failed");
                    break;
                }
            };

            counter!(WS_FRAMES_RECEIVED_TOTAL, "kind" => job.kind()).increment(1);
            // A full queue parks the read loop here until the drain catches up
            let queued = tokio::select! {
                biased;
                () = exit.cancelled() => break,
                pushed = jobs.push(job) => pushed.is_ok(),
            };
            if !queued {
                warn!("drain task gone, stopping read loop");
                break;
            }
        }

        // Teardown: drain first, then transport, then the hook
        handle.set_state(WorkerState::Draining);
        drain.abort();
        let _ = drain.await;
        drop(jobs);
        exit.cancel();
        handle.close_transport().await;
        handle.set_state(WorkerState::Closed);

        guarded("on_disconnected", handler.on_disconnected(&handle)).await;

        gauge!(WS_CONNECTIONS_ACTIVE, "connection_type" => connection_type.clone()).decrement(1.0);
        histogram!(WS_CONNECTION_DURATION_SECONDS, "connection_type" => connection_type)
            .record(started.elapsed().as_secs_f64());
        info!(duration_secs = started.elapsed().as_secs_f64(), "connection closed");
    }
}

impl<H: WorkerHandler> fmt::Debug for ConnectionWorker<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionWorker")
            .field("handle", &self.handle)
            .field("messages", &self.messages)
            .field("queue", &self.queue)
            .finish_non_exhaustive()
    }
}

/// Log a rejected frame and tell the peer why.
async fn reject_frame(worker: &WorkerHandle, err: &FrameError) {
    warn!(kind = err.kind(), error = %err, "rejected inbound frame");
    counter!(WS_FRAME_ERRORS_TOTAL, "kind" => err.kind()).increment(1);
    let _ = worker.send_json(&ErrorFrame::from_frame_error(err)).await;
}

async fn drain_jobs<H: WorkerHandler>(
    handler: Arc<H>,
    worker: WorkerHandle,
    mut pending: JobReceiver<Job<H::Message>>,
) {
    while let Some(job) = pending.pop().await {
        let kind = job.kind();
        let outcome = AssertUnwindSafe(dispatch(&*handler, &worker, job))
            .catch_unwind()
            .await;
        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                warn!(job = kind, error = %err, "handler failed");
                counter!(WS_HANDLER_ERRORS_TOTAL, "kind" => "error").increment(1);
                let _ = worker.send_json(&ErrorFrame::from_handler_error(&err)).await;
            }
            Err(payload) => {
                error!(job = kind, panic = panic_message(&*payload), "handler panicked");
                counter!(WS_HANDLER_ERRORS_TOTAL, "kind" => "panic").increment(1);
            }
        }
    }
}

async fn dispatch<H: WorkerHandler>(
    handler: &H,
    worker: &WorkerHandle,
    job: Job<H::Message>,
) -> Result<(), HandlerError> {
    match job {
        Job::Message(message) => handler.on_message(worker, message).await,
        Job::Binary(data) => handler.on_binary(worker, data).await,
    }
}

/// Run a lifecycle hook, logging instead of unwinding if it panics.
async fn guarded<F: Future<Output = ()>>(hook: &'static str, fut: F) {
    if let Err(payload) = AssertUnwindSafe(fut).catch_unwind().await {
        error!(hook, panic = panic_message(&*payload), "lifecycle hook panicked");
        counter!(WS_HANDLER_ERRORS_TOTAL, "kind" => "panic").increment(1);
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}
