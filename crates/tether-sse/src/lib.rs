//! # tether-sse
//!
//! Unidirectional server-push streams in `text/event-stream` framing.
//!
//! A [`PushStreamResponder`] writes a keep-alive preamble, runs a producer
//! that emits events through a [`Pusher`], watches for the peer going away,
//! and ends the body exactly once however the stream stops.
//!
//! - [`sink`]: the [`PushSink`] body abstraction
//! - [`responder`]: [`PushStreamResponder`], [`Pusher`], [`PushOutcome`]
//! - [`axum_body`]: streaming axum response bodies
//! - [`memory`]: recording sink for tests

#![deny(unsafe_code)]

pub mod axum_body;
pub mod memory;
pub mod metrics;
pub mod responder;
pub mod sink;

pub use responder::{PushError, PushHandle, PushOutcome, PushStreamResponder, Pusher};
pub use sink::PushSink;
