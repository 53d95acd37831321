//! Push streams as axum responses.
//!
//! The response is returned immediately with `content-type:
//! text/event-stream`; the responder runs on its own task and feeds the body
//! through a channel. When the client goes away hyper drops the body, which
//! closes the channel and trips the disconnect watcher.

use std::convert::Infallible;
use std::future::Future;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use futures::FutureExt;
use futures::future::BoxFuture;
use tether_core::TransportError;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::Instrument;

use crate::responder::{PushError, PushHandle, PushStreamResponder, Pusher};
use crate::sink::PushSink;

/// Body chunks buffered before the producer waits on the client.
const BODY_BUFFER: usize = 32;

type BodyTx = mpsc::Sender<Result<Bytes, Infallible>>;

/// [`PushSink`] feeding a streaming axum [`Body`].
pub struct BodySink {
    tx: Option<BodyTx>,
}

/// Create a sink and the body it feeds.
pub fn body_channel() -> (BodySink, Body) {
    let (tx, rx) = mpsc::channel(BODY_BUFFER);
    (
        BodySink { tx: Some(tx) },
        Body::from_stream(ReceiverStream::new(rx)),
    )
}

#[async_trait]
impl PushSink for BodySink {
    async fn send(&mut self, chunk: Bytes) -> Result<(), TransportError> {
        let Some(tx) = &self.tx else {
            return Err(TransportError::Closed);
        };
        tx.send(Ok(chunk)).await.map_err(|_| TransportError::Closed)
    }

    async fn finish(&mut self) -> Result<(), TransportError> {
        // Dropping the last sender ends the body; hyper writes the final
        // zero-length chunk
        let _ = self.tx.take();
        Ok(())
    }

    fn peer_gone(&self) -> BoxFuture<'static, ()> {
        match &self.tx {
            Some(tx) => {
                let tx = tx.clone();
                async move { tx.closed().await }.boxed()
            }
            None => futures::future::ready(()).boxed(),
        }
    }
}

/// Start a push stream and return the response that carries it, plus a
/// handle for cancelling it.
pub fn push_response<F, Fut>(producer: F) -> (Response, PushHandle)
where
    F: FnOnce(Pusher<BodySink>) -> Fut + Send + 'static,
    Fut: Future<Output = Result<(), PushError>> + Send + 'static,
{
    let (sink, body) = body_channel();
    let responder = PushStreamResponder::new(sink);
    let handle = responder.handle();
    let _task = tokio::spawn(responder.start(producer).in_current_span());

    let mut response = (StatusCode::OK, body).into_response();
    let headers = response.headers_mut();
    let _ = headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/event-stream"),
    );
    let _ = headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    (response, handle)
}
