//! In-process transport pair.
//!
//! [`memory_pair`] returns a [`MemoryTransport`] for the worker side and a
//! [`MemoryPeer`] that plays the remote client. Used by tests and by anything
//! that wants to drive a worker without a socket.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;
use tether_core::TransportError;
use tokio::sync::mpsc;

use crate::transport::{Frame, FrameSink, FrameStream, Transport, TransportState};

#[derive(Default)]
struct Shared {
    accepted: AtomicBool,
    closed_by_server: AtomicBool,
    close_calls: AtomicUsize,
    writes: AtomicUsize,
}

/// Worker-side end of an in-memory connection.
pub struct MemoryTransport {
    inbound: mpsc::UnboundedReceiver<Frame>,
    outbound: mpsc::UnboundedSender<Frame>,
    shared: Arc<Shared>,
    disconnected: bool,
}

/// Client-side end of an in-memory connection.
pub struct MemoryPeer {
    to_server: Option<mpsc::UnboundedSender<Frame>>,
    from_server: mpsc::UnboundedReceiver<Frame>,
    shared: Arc<Shared>,
}

/// Create a connected transport/peer pair.
pub fn memory_pair() -> (MemoryTransport, MemoryPeer) {
    let (to_server, inbound) = mpsc::unbounded_channel();
    let (outbound, from_server) = mpsc::unbounded_channel();
    let shared = Arc::new(Shared::default());
    (
        MemoryTransport {
            inbound,
            outbound,
            shared: shared.clone(),
            disconnected: false,
        },
        MemoryPeer {
            to_server: Some(to_server),
            from_server,
            shared,
        },
    )
}

impl MemoryTransport {
    /// Mark the transport as gone before the handshake.
    #[must_use]
    pub fn disconnected(mut self) -> Self {
        self.disconnected = true;
        self
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    type Sink = MemorySink;
    type Stream = MemoryStream;

    fn state(&self) -> TransportState {
        if self.disconnected {
            TransportState::Disconnected
        } else {
            TransportState::Pending
        }
    }

    async fn accept(self) -> Result<(MemorySink, MemoryStream), TransportError> {
        if self.disconnected {
            return Err(TransportError::Closed);
        }
        self.shared.accepted.store(true, Ordering::SeqCst);
        Ok((
            MemorySink {
                outbound: Some(self.outbound),
                shared: self.shared,
            },
            MemoryStream {
                inbound: self.inbound,
            },
        ))
    }
}

/// Write half of a [`MemoryTransport`].
pub struct MemorySink {
    outbound: Option<mpsc::UnboundedSender<Frame>>,
    shared: Arc<Shared>,
}

#[async_trait]
impl FrameSink for MemorySink {
    async fn send(&mut self, frame: Frame) -> Result<(), TransportError> {
        let Some(tx) = &self.outbound else {
            return Err(TransportError::Closed);
        };
        tx.send(frame).map_err(|_| TransportError::Closed)?;
        let _ = self.shared.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        let _ = self.shared.close_calls.fetch_add(1, Ordering::SeqCst);
        // Dropping the sender ends the peer's receive side
        if self.outbound.take().is_some() {
            self.shared.closed_by_server.store(true, Ordering::SeqCst);
        }
        Ok(())
    }
}

/// Read half of a [`MemoryTransport`].
pub struct MemoryStream {
    inbound: mpsc::UnboundedReceiver<Frame>,
}

#[async_trait]
impl FrameStream for MemoryStream {
    async fn recv(&mut self) -> Result<Option<Frame>, TransportError> {
        Ok(self.inbound.recv().await)
    }
}

impl MemoryPeer {
    /// Send a text frame to the worker. Returns `false` after
    /// [`disconnect`](Self::disconnect) or once the worker stopped reading.
    pub fn send_text(&self, text: impl Into<String>) -> bool {
        self.send(Frame::Text(text.into()))
    }

    /// Send a JSON value as a text frame.
    pub fn send_json(&self, value: &Value) -> bool {
        self.send_text(value.to_string())
    }

    /// Send a binary frame.
    pub fn send_binary(&self, data: impl Into<Bytes>) -> bool {
        self.send(Frame::Binary(data.into()))
    }

    fn send(&self, frame: Frame) -> bool {
        self.to_server
            .as_ref()
            .is_some_and(|tx| tx.send(frame).is_ok())
    }

    /// Close the client side; the worker's read loop sees a clean close.
    pub fn disconnect(&mut self) {
        self.to_server = None;
    }

    /// Next frame written by the worker; `None` once the worker closed.
    pub async fn recv(&mut self) -> Option<Frame> {
        self.from_server.recv().await
    }

    /// Next frame, parsed as JSON. Binary frames and invalid JSON yield `None`.
    pub async fn recv_json(&mut self) -> Option<Value> {
        match self.recv().await? {
            Frame::Text(text) => serde_json::from_str(&text).ok(),
            Frame::Binary(_) => None,
        }
    }

    /// Next frame if one is already buffered.
    pub fn try_recv(&mut self) -> Option<Frame> {
        self.from_server.try_recv().ok()
    }

    /// Whether the worker completed the handshake.
    pub fn was_accepted(&self) -> bool {
        self.shared.accepted.load(Ordering::SeqCst)
    }

    /// Whether the worker closed the connection.
    pub fn closed_by_server(&self) -> bool {
        self.shared.closed_by_server.load(Ordering::SeqCst)
    }

    /// How many times the worker called close.
    pub fn close_calls(&self) -> usize {
        self.shared.close_calls.load(Ordering::SeqCst)
    }

    /// Frames successfully written by the worker so far.
    pub fn writes(&self) -> usize {
        self.shared.writes.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn accept_then_exchange_frames() {
        let (transport, mut peer) = memory_pair();
        assert_eq!(transport.state(), TransportState::Pending);
        let (mut sink, mut stream) = transport.accept().await.unwrap();
        assert!(peer.was_accepted());

        assert!(peer.send_text("hello"));
        assert_eq!(stream.recv().await.unwrap(), Some(Frame::Text("hello".into())));

        sink.send(Frame::Binary(Bytes::from_static(b"\x00\x01"))).await.unwrap();
        assert_eq!(
            peer.recv().await,
            Some(Frame::Binary(Bytes::from_static(b"\x00\x01")))
        );
        assert_eq!(peer.writes(), 1);
    }

    #[tokio::test]
    async fn peer_disconnect_ends_stream() {
        let (transport, mut peer) = memory_pair();
        let (_sink, mut stream) = transport.accept().await.unwrap();
        peer.disconnect();
        assert!(!peer.send_text("late"));
        assert_eq!(stream.recv().await.unwrap(), None);
    }

    #[tokio::test]
    async fn close_is_idempotent_and_blocks_sends() {
        let (transport, mut peer) = memory_pair();
        let (mut sink, _stream) = transport.accept().await.unwrap();
        sink.close().await.unwrap();
        sink.close().await.unwrap();
        assert!(peer.closed_by_server());
        assert_eq!(peer.close_calls(), 2);
        assert!(sink.send(Frame::Text("x".into())).await.unwrap_err().is_closed());
        assert_eq!(peer.recv().await, None);
    }

    #[tokio::test]
    async fn disconnected_transport_refuses_accept() {
        let (transport, peer) = memory_pair();
        let transport = transport.disconnected();
        assert_eq!(transport.state(), TransportState::Disconnected);
        assert!(transport.accept().await.is_err());
        assert!(!peer.was_accepted());
    }
}
