//! Recording sink.
//!
//! [`recording_pair`] returns a [`RecordingSink`] for a responder and a
//! [`RecordingPeer`] that can inspect what was written and simulate the
//! client going away.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::FutureExt;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde_json::Value;
use tether_core::TransportError;
use tokio_util::sync::CancellationToken;

use crate::sink::{PREAMBLE, PushSink};

/// One recorded write.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Chunk {
    /// A body chunk.
    Data(Bytes),
    /// The terminal empty frame.
    Terminal,
}

/// Sink that records every write.
pub struct RecordingSink {
    log: Arc<Mutex<Vec<Chunk>>>,
    gone: CancellationToken,
}

/// Observer side of a [`RecordingSink`].
#[derive(Clone)]
pub struct RecordingPeer {
    log: Arc<Mutex<Vec<Chunk>>>,
    gone: CancellationToken,
}

/// Create a connected sink/peer pair.
pub fn recording_pair() -> (RecordingSink, RecordingPeer) {
    let log = Arc::new(Mutex::new(Vec::new()));
    let gone = CancellationToken::new();
    (
        RecordingSink {
            log: log.clone(),
            gone: gone.clone(),
        },
        RecordingPeer { log, gone },
    )
}

#[async_trait]
impl PushSink for RecordingSink {
    async fn send(&mut self, chunk: Bytes) -> Result<(), TransportError> {
        if self.gone.is_cancelled() {
            return Err(TransportError::Closed);
        }
        self.log.lock().push(Chunk::Data(chunk));
        Ok(())
    }

    async fn finish(&mut self) -> Result<(), TransportError> {
        // Recorded even after disconnect so callers can count attempts
        self.log.lock().push(Chunk::Terminal);
        Ok(())
    }

    fn peer_gone(&self) -> BoxFuture<'static, ()> {
        self.gone.clone().cancelled_owned().boxed()
    }
}

impl RecordingPeer {
    /// Simulate the client closing the connection.
    pub fn disconnect(&self) {
        self.gone.cancel();
    }

    /// Everything written so far.
    pub fn chunks(&self) -> Vec<Chunk> {
        self.log.lock().clone()
    }

    /// How many terminal frames were written.
    pub fn terminal_count(&self) -> usize {
        self.log
            .lock()
            .iter()
            .filter(|c| matches!(c, Chunk::Terminal))
            .count()
    }

    /// Whether the preamble was the first write.
    pub fn saw_preamble(&self) -> bool {
        matches!(self.log.lock().first(), Some(Chunk::Data(b)) if b.as_ref() == PREAMBLE)
    }

    /// Event payloads written so far, parsed from their `data:` frames.
    pub fn events(&self) -> Vec<Value> {
        self.log
            .lock()
            .iter()
            .filter_map(|chunk| match chunk {
                Chunk::Data(bytes) => parse_event(bytes),
                Chunk::Terminal => None,
            })
            .collect()
    }
}

fn parse_event(bytes: &[u8]) -> Option<Value> {
    let text = std::str::from_utf8(bytes).ok()?;
    let json = text.strip_prefix("data: ")?.strip_suffix("\n\n")?;
    serde_json::from_str(json).ok()
}
