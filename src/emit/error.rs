//! Emit-specific error types.

use thiserror::Error;

/// Errors that can occur while emitting batches.
#[derive(Debug, Error)]
pub enum EmitError {
    /// Writing to the output stream failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Envelope serialization failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Failed to send command to the emit actor.
    #[error("failed to send command to emit actor")]
    ChannelSend,

    /// Internal error (e.g., actor join failure).
    #[error("internal error: {0}")]
    Internal(String),
}
