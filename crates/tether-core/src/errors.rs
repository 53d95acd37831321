//! Error taxonomy for the connection core.
//!
//! - [`FrameError`]: one inbound frame could not be turned into a typed
//!   message. Always recovered; the peer gets an [`ErrorFrame`].
//! - [`HandlerError`]: a typed callback failed while processing a job.
//! - [`TransportError`]: the underlying duplex transport refused a read/write.
//!
//! Every error reported to a peer goes through [`ErrorFrame`], which renders
//! as `{"message": "<Kind>: <detail>", "type": "error"}`.

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ─────────────────────────────────────────────────────────────────────────────
// FrameError
// ─────────────────────────────────────────────────────────────────────────────

/// A single inbound frame failed to decode into a registered message.
#[derive(Debug, Error)]
pub enum FrameError {
    /// The frame was not syntactically valid JSON.
    #[error("{0}")]
    Decode(#[from] serde_json::Error),

    /// The frame was a JSON value without a string `type` field.
    #[error("No type field in message: {raw}")]
    MissingDiscriminator {
        /// The offending payload, re-serialized.
        raw: String,
    },

    /// The discriminator is not registered for this worker.
    #[error("Invalid data model in message: {discriminator}")]
    Unrecognized {
        /// The unknown discriminator value.
        discriminator: String,
    },

    /// The discriminator is known but the fields failed validation.
    #[error("{discriminator}: {message}")]
    Validation {
        /// Discriminator of the schema that rejected the payload.
        discriminator: String,
        /// Validation failure detail.
        message: String,
    },
}

impl FrameError {
    /// Condition kind reported in the wire error frame.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Decode(_) => "DecodeError",
            Self::MissingDiscriminator { .. } => "MissingDiscriminator",
            Self::Unrecognized { .. } => "UnrecognizedMessage",
            Self::Validation { .. } => "ValidationError",
        }
    }

    /// Whether the failure happened before a schema was selected.
    pub fn is_syntax(&self) -> bool {
        matches!(self, Self::Decode(_))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// HandlerError
// ─────────────────────────────────────────────────────────────────────────────

/// Failure raised by a typed message callback.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct HandlerError {
    /// Human-readable message.
    pub message: String,
}

impl HandlerError {
    /// Create a handler error from any displayable message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Condition kind reported in the wire error frame.
    pub fn kind(&self) -> &'static str {
        "HandlerError"
    }
}

impl From<serde_json::Error> for HandlerError {
    fn from(err: serde_json::Error) -> Self {
        Self::new(err.to_string())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// TransportError
// ─────────────────────────────────────────────────────────────────────────────

/// Errors surfaced by a duplex transport.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The connection is already closed or closing.
    #[error("connection closed")]
    Closed,

    /// Any other transport-level failure.
    #[error("transport error: {0}")]
    Io(String),
}

impl TransportError {
    /// Build an [`TransportError::Io`] from a displayable source.
    pub fn io(err: impl std::fmt::Display) -> Self {
        Self::Io(err.to_string())
    }

    /// Whether this error only means the peer is going away.
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// ErrorFrame
// ─────────────────────────────────────────────────────────────────────────────

/// Error notification sent to a peer on the same connection.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorFrame {
    /// `"<ConditionKind>: <detail>"`.
    pub message: String,
    /// Always `"error"`.
    #[serde(rename = "type")]
    pub frame_type: String,
}

impl ErrorFrame {
    /// Build an error frame from a condition kind and detail.
    pub fn new(kind: &str, detail: impl std::fmt::Display) -> Self {
        Self {
            message: format!("{kind}: {detail}"),
            frame_type: "error".to_owned(),
        }
    }

    /// Error frame for a frame that failed to decode.
    pub fn from_frame_error(err: &FrameError) -> Self {
        Self::new(err.kind(), err)
    }

    /// Error frame for a failed handler.
    pub fn from_handler_error(err: &HandlerError) -> Self {
        Self::new(err.kind(), err)
    }
}
