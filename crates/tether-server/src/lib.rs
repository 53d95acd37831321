//! # tether-server
//!
//! Axum HTTP + WebSocket server on top of the Tether connection core.
//!
//! - `GET /chat`: authenticated voice chat socket, one per token subject
//! - `GET /ticks?count=N`: demo push stream
//! - `GET /health`, `GET /metrics`: liveness and Prometheus text
//!
//! Handshake auth lives in [`auth`], the chat worker in [`chat`], and the
//! routing and lifecycle in [`server::TetherServer`].

#![deny(unsafe_code)]

pub mod auth;
pub mod chat;
pub mod config;
pub mod health;
pub mod metrics;
pub mod server;
pub mod shutdown;
pub mod ticker;

pub use config::ServerConfig;
pub use server::{AppState, TetherServer};
