//! Duplex transport abstraction.
//!
//! A [`Transport`] is a connection that has not been accepted yet. Accepting
//! it splits it into a [`FrameSink`] (writes, shared by every sender) and a
//! [`FrameStream`] (reads, owned by the worker's read loop).

use async_trait::async_trait;
use bytes::Bytes;
use tether_core::TransportError;

/// One discrete message on the wire.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Frame {
    /// UTF-8 text payload (JSON on the typed path).
    Text(String),
    /// Opaque binary payload.
    Binary(Bytes),
}

impl Frame {
    /// Payload length in bytes.
    pub fn len(&self) -> usize {
        match self {
            Self::Text(t) => t.len(),
            Self::Binary(b) => b.len(),
        }
    }

    /// Whether the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Short label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Text(_) => "text",
            Self::Binary(_) => "binary",
        }
    }
}

/// Connectivity of a transport that has not been accepted yet.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransportState {
    /// Waiting for the handshake to be completed.
    Pending,
    /// The peer went away before the handshake.
    Disconnected,
}

/// A connection awaiting accept.
#[async_trait]
pub trait Transport: Send + Sized + 'static {
    /// Write half produced by [`accept`](Self::accept).
    type Sink: FrameSink;
    /// Read half produced by [`accept`](Self::accept).
    type Stream: FrameStream;

    /// Current connectivity, checked before accepting.
    fn state(&self) -> TransportState;

    /// Complete the handshake and split into write and read halves.
    async fn accept(self) -> Result<(Self::Sink, Self::Stream), TransportError>;
}

/// Write half of an accepted connection.
#[async_trait]
pub trait FrameSink: Send + 'static {
    /// Write one frame.
    async fn send(&mut self, frame: Frame) -> Result<(), TransportError>;

    /// Close the connection. Calling this more than once must be harmless.
    async fn close(&mut self) -> Result<(), TransportError>;
}

/// Read half of an accepted connection.
#[async_trait]
pub trait FrameStream: Send + 'static {
    /// Next data frame; `Ok(None)` once the peer has closed cleanly.
    ///
    /// Control frames (ping/pong) are consumed internally.
    async fn recv(&mut self) -> Result<Option<Frame>, TransportError>;
}
