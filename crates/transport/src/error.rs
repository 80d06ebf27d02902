//! Error types for discovery transports.

use std::io;
use std::time::Duration;
use thiserror::Error;

/// Errors raised while connecting, streaming or fetching.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Could not establish a channel to the control plane.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Channel exists but cannot carry new calls.
    #[error("Channel unavailable: {0}")]
    Unavailable(String),

    /// Stream ended without an error status.
    #[error("Stream closed")]
    StreamClosed,

    /// Server terminated the stream with an error status.
    #[error("Stream failed with status {code}: {message}")]
    Status {
        /// Status code reported by the server.
        code: i32,
        /// Status message reported by the server.
        message: String,
    },

    /// Inbound message exceeded the configured limit.
    #[error("Message size {size} exceeds maximum {max}")]
    MessageTooLarge {
        /// Size of the message.
        size: usize,
        /// Maximum allowed size.
        max: usize,
    },

    /// Operation timed out.
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    /// Channel has been shut down.
    #[error("Channel is shut down")]
    Shutdown,

    /// Frame or message could not be encoded/decoded.
    #[error("Protocol error: {0}")]
    Protocol(#[from] enforcer_xds_protocol::Error),

    /// TLS setup or handshake error.
    #[error("TLS error: {0}")]
    Tls(String),

    /// Generic I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}
