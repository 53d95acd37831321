//! Voice chat worker.
//!
//! Clients stream audio either as binary frames or as `audio_data` text
//! frames with a base64 payload. Chunks accumulate per connection; once the
//! client has been silent for the utterance gap, the worker reports the
//! finished utterance back as `{"type":"utterance","bytes":N,"chunks":M}`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use metrics::counter;
use parking_lot::Mutex;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::json;
use tether_core::{HandlerError, RestartableTimer};
use tether_ws::{MessageRegistry, MessageSchema, WorkerHandle, WorkerHandler};
use tracing::{debug, info};

use crate::metrics::CHAT_UTTERANCES_TOTAL;

/// Connection type label for chat sockets.
pub const CHAT_CONNECTION_TYPE: &str = "voice_chat";

/// One audio chunk sent as text.
#[derive(Debug, Deserialize)]
pub struct AudioData {
    /// Decoded audio bytes.
    #[serde(deserialize_with = "base64_bytes")]
    pub audio: Vec<u8>,
}

impl MessageSchema for AudioData {
    const TYPE: &'static str = "audio_data";
}

/// Liveness check, answered with `{"type":"pong"}`.
#[derive(Debug, Deserialize)]
pub struct Ping {}

impl MessageSchema for Ping {
    const TYPE: &'static str = "ping";
}

/// Text messages understood by the chat worker.
#[derive(Debug)]
pub enum ChatMessage {
    /// Base64 audio chunk.
    AudioData(AudioData),
    /// Liveness check.
    Ping(Ping),
}

fn base64_bytes<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
    let encoded = String::deserialize(deserializer)?;
    STANDARD
        .decode(encoded)
        .map_err(|e| serde::de::Error::custom(format!("audio is not valid base64: {e}")))
}

/// Audio collected since the last reported utterance.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Utterance {
    /// Total audio bytes.
    pub bytes: usize,
    /// Number of chunks.
    pub chunks: usize,
}

/// Per-connection voice chat handler.
pub struct VoiceChatHandler {
    gap: Duration,
    pending: Arc<Mutex<Utterance>>,
    timer: Mutex<RestartableTimer>,
}

impl VoiceChatHandler {
    /// Handler that closes an utterance after `gap` of silence.
    pub fn new(gap: Duration) -> Self {
        Self {
            gap,
            pending: Arc::new(Mutex::new(Utterance::default())),
            timer: Mutex::new(RestartableTimer::new()),
        }
    }

    /// Audio buffered but not yet reported.
    pub fn pending(&self) -> Utterance {
        *self.pending.lock()
    }

    fn record_chunk(&self, worker: &WorkerHandle, len: usize) {
        {
            let mut pending = self.pending.lock();
            pending.bytes += len;
            pending.chunks += 1;
        }

        let pending = self.pending.clone();
        let worker = worker.clone();
        self.timer.lock().schedule(self.gap, async move {
            let utterance = std::mem::take(&mut *pending.lock());
            if utterance.chunks == 0 {
                return;
            }
            counter!(CHAT_UTTERANCES_TOTAL).increment(1);
            debug!(
                bytes = utterance.bytes,
                chunks = utterance.chunks,
                "utterance complete"
            );
            let _ = worker
                .send_json(&json!({
                    "type": "utterance",
                    "bytes": utterance.bytes,
                    "chunks": utterance.chunks,
                }))
                .await;
        });
    }
}

#[async_trait]
impl WorkerHandler for VoiceChatHandler {
    type Message = ChatMessage;

    fn messages(&self) -> MessageRegistry<ChatMessage> {
        MessageRegistry::new()
            .with(ChatMessage::AudioData)
            .with(ChatMessage::Ping)
    }

    async fn on_connected(&self, worker: &WorkerHandle) {
        info!(client_key = %worker.key(), "voice chat connected");
    }

    async fn on_message(
        &self,
        worker: &WorkerHandle,
        message: ChatMessage,
    ) -> Result<(), HandlerError> {
        match message {
            ChatMessage::AudioData(data) => {
                if data.audio.is_empty() {
                    return Err(HandlerError::new("empty audio chunk"));
                }
                self.record_chunk(worker, data.audio.len());
            }
            ChatMessage::Ping(_) => {
                let _ = worker.send_json(&json!({"type": "pong"})).await;
            }
        }
        Ok(())
    }

    async fn on_binary(&self, worker: &WorkerHandle, data: Bytes) -> Result<(), HandlerError> {
        if data.is_empty() {
            return Err(HandlerError::new("empty audio chunk"));
        }
        self.record_chunk(worker, data.len());
        Ok(())
    }

    async fn on_disconnected(&self, worker: &WorkerHandle) {
        self.timer.lock().cancel();
        let dropped = std::mem::take(&mut *self.pending.lock());
        info!(
            client_key = %worker.key(),
            unreported_chunks = dropped.chunks,
            "voice chat disconnected"
        );
    }
}
