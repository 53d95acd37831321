//! # tether-ws
//!
//! Real-time connection core for duplex (websocket-style) transports.
//!
//! - [`message`]: discriminator → typed message decoding ([`MessageRegistry`])
//! - [`queue`]: the per-connection single-consumer job queue
//! - [`worker`]: [`ConnectionWorker`]: handshake, read loop, drain loop, teardown
//! - [`registry`]: [`ConnectionRegistry`]: one live worker per client key,
//!   with hand-off from an old connection to a new one
//! - [`transport`]: the transport traits plus [`axum_ws`] and [`memory`]
//!   implementations

#![deny(unsafe_code)]

pub mod axum_ws;
pub mod memory;
pub mod message;
pub mod metrics;
pub mod queue;
pub mod registry;
pub mod transport;
pub mod worker;

pub use message::{MessageRegistry, MessageSchema};
pub use queue::QueueCapacity;
pub use registry::ConnectionRegistry;
pub use transport::{Frame, FrameSink, FrameStream, Transport, TransportState};
pub use worker::{ConnectionWorker, PayloadMode, WorkerConfig, WorkerHandle, WorkerHandler, WorkerState};
