//! Response body abstraction for push streams.

use async_trait::async_trait;
use bytes::Bytes;
use futures::future::BoxFuture;
use tether_core::TransportError;

/// Preamble written before any event: a bare comment line that some clients
/// need to see before they trust the stream.
pub const PREAMBLE: &[u8] = b":\n\n";

/// Streaming response body of a push stream.
#[async_trait]
pub trait PushSink: Send + 'static {
    /// Write one body chunk.
    async fn send(&mut self, chunk: Bytes) -> Result<(), TransportError>;

    /// Write the terminal empty frame, ending the body.
    async fn finish(&mut self) -> Result<(), TransportError>;

    /// Future that resolves once the peer has gone away.
    ///
    /// Must not borrow the sink: it runs on its own task while the producer
    /// writes.
    fn peer_gone(&self) -> BoxFuture<'static, ()>;
}

/// Frame one event: `data: <json>\n\n`.
pub fn event_frame(json: &str) -> Bytes {
    let mut frame = String::with_capacity(json.len() + 8);
    frame.push_str("data: ");
    frame.push_str(json);
    frame.push_str("\n\n");
    Bytes::from(frame)
}
