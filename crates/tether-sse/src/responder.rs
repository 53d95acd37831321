//! One-shot push stream driver.
//!
//! [`PushStreamResponder::start`] runs the whole stream:
//!
//! 1. Write the preamble
//! 2. Spawn the producer with a [`Pusher`]
//! 3. Spawn a watcher that waits for the peer to go away
//! 4. Whichever ends first (producer done, [`PushHandle::close`], peer gone)
//!    stops the others
//! 5. Write the terminal frame, exactly once

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use metrics::{counter, gauge};
use serde::Serialize;
use tether_core::TransportError;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::metrics::{PUSH_EVENTS_TOTAL, PUSH_STREAMS_ACTIVE, PUSH_STREAMS_TOTAL};
use crate::sink::{PREAMBLE, PushSink, event_frame};

/// Errors raised while pushing an event.
#[derive(Debug, Error)]
pub enum PushError {
    /// The payload could not be serialized.
    #[error("failed to serialize event: {0}")]
    Serialize(#[from] serde_json::Error),

    /// The body could not be written.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The stream has already ended.
    #[error("push stream closed")]
    Closed,
}

/// How a push stream ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PushOutcome {
    /// The producer returned `Ok`.
    Completed,
    /// [`PushHandle::close`] was called.
    Cancelled,
    /// The peer went away.
    Disconnected,
    /// The producer returned an error or panicked.
    Failed,
}

impl PushOutcome {
    /// Lowercase label for logs and metrics.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Disconnected => "disconnected",
            Self::Failed => "failed",
        }
    }
}

struct Shared<S> {
    sink: Mutex<S>,
    terminated: AtomicBool,
    events: AtomicU64,
}

impl<S: PushSink> Shared<S> {
    /// Write the terminal frame unless it was already written.
    async fn terminate(&self) {
        if self.terminated.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Err(err) = self.sink.lock().await.finish().await {
            debug!(error = %err, "terminal frame not delivered");
        }
    }
}

/// Event writer handed to the producer.
///
/// Only the producer should push; concurrent pushes from elsewhere are not
/// ordered with respect to it.
pub struct Pusher<S> {
    shared: Arc<Shared<S>>,
}

impl<S: PushSink> Pusher<S> {
    /// Serialize `payload` to compact JSON and write it as one event.
    pub async fn push<T: Serialize + ?Sized>(&self, payload: &T) -> Result<(), PushError> {
        let json = serde_json::to_string(payload)?;
        if self.shared.terminated.load(Ordering::SeqCst) {
            return Err(PushError::Closed);
        }
        self.shared.sink.lock().await.send(event_frame(&json)).await?;
        let _ = self.shared.events.fetch_add(1, Ordering::Relaxed);
        counter!(PUSH_EVENTS_TOTAL).increment(1);
        Ok(())
    }

    /// Events written so far.
    pub fn events_sent(&self) -> u64 {
        self.shared.events.load(Ordering::Relaxed)
    }
}

/// Cancels or observes a running push stream from outside the producer.
#[derive(Clone, Debug)]
pub struct PushHandle {
    cancel: CancellationToken,
    done: CancellationToken,
}

impl PushHandle {
    /// Stop the producer and end the stream. Idempotent.
    pub fn close(&self) {
        self.cancel.cancel();
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Whether the stream has ended, however it ended.
    pub fn is_finished(&self) -> bool {
        self.done.is_cancelled()
    }

    /// Resolve once the stream has ended and the responder has stopped.
    ///
    /// Also resolves if the responder is dropped without being started.
    pub async fn finished(&self) {
        self.done.cancelled().await;
    }
}

/// Drives one push stream over a [`PushSink`].
pub struct PushStreamResponder<S> {
    shared: Arc<Shared<S>>,
    cancel: CancellationToken,
    done: CancellationToken,
}

// Fires `done` once `start` returns, or if the stream never started
impl<S> Drop for PushStreamResponder<S> {
    fn drop(&mut self) {
        self.done.cancel();
    }
}

impl<S: PushSink> PushStreamResponder<S> {
    /// Wrap a sink whose status and headers are already fixed.
    pub fn new(sink: S) -> Self {
        Self {
            shared: Arc::new(Shared {
                sink: Mutex::new(sink),
                terminated: AtomicBool::new(false),
                events: AtomicU64::new(0),
            }),
            cancel: CancellationToken::new(),
            done: CancellationToken::new(),
        }
    }

    /// Handle for cancelling the stream and waiting for it to end.
    pub fn handle(&self) -> PushHandle {
        PushHandle {
            cancel: self.cancel.clone(),
            done: self.done.clone(),
        }
    }

    /// Run the stream to completion and report how it ended.
    pub async fn start<F, Fut>(self, producer: F) -> PushOutcome
    where
        F: FnOnce(Pusher<S>) -> Fut + Send,
        Fut: Future<Output = Result<(), PushError>> + Send + 'static,
    {
        gauge!(PUSH_STREAMS_ACTIVE).increment(1.0);
        let outcome = self.run(producer).await;
        gauge!(PUSH_STREAMS_ACTIVE).decrement(1.0);
        counter!(PUSH_STREAMS_TOTAL, "outcome" => outcome.as_str()).increment(1);
        info!(
            outcome = outcome.as_str(),
            events = self.shared.events.load(Ordering::Relaxed),
            "push stream ended"
        );
        outcome
    }

    async fn run<F, Fut>(&self, producer: F) -> PushOutcome
    where
        F: FnOnce(Pusher<S>) -> Fut + Send,
        Fut: Future<Output = Result<(), PushError>> + Send + 'static,
    {
        let peer_gone = {
            let mut sink = self.shared.sink.lock().await;
            if let Err(err) = sink.send(bytes::Bytes::from_static(PREAMBLE)).await {
                debug!(error = %err, "preamble not delivered");
                drop(sink);
                self.shared.terminate().await;
                return PushOutcome::Disconnected;
            }
            sink.peer_gone()
        };

        let mut producer_task = tokio::spawn(producer(Pusher {
            shared: self.shared.clone(),
        }));
        let mut watcher = tokio::spawn(peer_gone);

        // Peer loss wins ties
        let outcome = tokio::select! {
            biased;
            _ = &mut watcher => {
                debug!("peer went away, stopping producer");
                producer_task.abort();
                let _ = producer_task.await;
                self.shared.terminate().await;
                return PushOutcome::Disconnected;
            }
            () = self.cancel.cancelled() => {
                debug!("push stream cancelled");
                producer_task.abort();
                let _ = producer_task.await;
                PushOutcome::Cancelled
            }
            joined = &mut producer_task => match joined {
                Ok(Ok(())) => PushOutcome::Completed,
                Ok(Err(err)) => {
                    warn!(error = %err, "push producer failed");
                    PushOutcome::Failed
                }
                Err(err) if err.is_cancelled() => PushOutcome::Cancelled,
                Err(err) => {
                    error!(error = %err, "push producer panicked");
                    PushOutcome::Failed
                }
            },
        };

        watcher.abort();
        let _ = watcher.await;
        self.shared.terminate().await;
        outcome
    }
}
