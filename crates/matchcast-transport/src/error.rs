//! Transport errors.

use thiserror::Error;

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Failed to write to the socket.
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// The writer task panicked or was cancelled.
    #[error("Writer task failed: {0}")]
    Writer(String),
}
