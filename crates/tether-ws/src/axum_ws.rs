//! [`Transport`] over an upgraded axum websocket.
//!
//! axum completes the HTTP upgrade before handing over the socket, so
//! [`AxumTransport::accept`] only splits it. Ping/pong is answered by the
//! websocket layer and never reaches the worker.

use async_trait::async_trait;
use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tether_core::TransportError;

use crate::transport::{Frame, FrameSink, FrameStream, Transport, TransportState};

/// An upgraded websocket, ready to hand to a worker.
pub struct AxumTransport {
    socket: WebSocket,
}

impl AxumTransport {
    /// Wrap an upgraded socket.
    pub fn new(socket: WebSocket) -> Self {
        Self { socket }
    }
}

#[async_trait]
impl Transport for AxumTransport {
    type Sink = AxumSink;
    type Stream = AxumStream;

    fn state(&self) -> TransportState {
        TransportState::Pending
    }

    async fn accept(self) -> Result<(AxumSink, AxumStream), TransportError> {
        let (tx, rx) = self.socket.split();
        Ok((AxumSink { tx, closed: false }, AxumStream { rx }))
    }
}

/// Write half of an [`AxumTransport`].
pub struct AxumSink {
    tx: SplitSink<WebSocket, Message>,
    closed: bool,
}

#[async_trait]
impl FrameSink for AxumSink {
    async fn send(&mut self, frame: Frame) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        let message = match frame {
            Frame::Text(text) => Message::Text(text.into()),
            Frame::Binary(data) => Message::Binary(data),
        };
        self.tx.send(message).await.map_err(TransportError::io)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let _ = self.tx.send(Message::Close(None)).await;
        self.tx.close().await.map_err(TransportError::io)
    }
}

/// Read half of an [`AxumTransport`].
pub struct AxumStream {
    rx: SplitStream<WebSocket>,
}

#[async_trait]
impl FrameStream for AxumStream {
    async fn recv(&mut self) -> Result<Option<Frame>, TransportError> {
        loop {
            let Some(message) = self.rx.next().await else {
                return Ok(None);
            };
            match message.map_err(TransportError::io)? {
                Message::Text(text) => return Ok(Some(Frame::Text(text.as_str().to_owned()))),
                Message::Binary(data) => return Ok(Some(Frame::Binary(data))),
                Message::Close(_) => return Ok(None),
                Message::Ping(_) | Message::Pong(_) => {}
            }
        }
    }
}

/// Close an upgraded socket with a policy-violation code before any worker
/// takes it over.
pub async fn refuse(mut socket: WebSocket, reason: &str) {
    let frame = CloseFrame {
        code: axum::extract::ws::close_code::POLICY,
        reason: reason.to_owned().into(),
    };
    let _ = socket.send(Message::Close(Some(frame))).await;
}
