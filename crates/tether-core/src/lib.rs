//! # tether-core
//!
//! Foundation types shared by every Tether crate.
//!
//! - **Errors**: [`FrameError`], [`HandlerError`], [`TransportError`] and the
//!   wire-level [`ErrorFrame`] sent back to peers
//! - **Branded IDs**: [`ConnectionId`] and [`ClientKey`] newtypes
//! - **Logging**: [`logging::init_subscriber`] for the `tracing` stack
//! - **Timers**: [`RestartableTimer`] for debounce-style scheduling

#![deny(unsafe_code)]

pub mod errors;
pub mod ids;
pub mod logging;
pub mod timer;

pub use errors::{ErrorFrame, FrameError, HandlerError, TransportError};
pub use ids::{ClientKey, ConnectionId};
pub use timer::RestartableTimer;
