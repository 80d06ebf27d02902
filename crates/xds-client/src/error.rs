//! Error types for the discovery client.

use enforcer_handlers::HandlerError;
use enforcer_transport::TransportError;
use std::time::Duration;
use thiserror::Error;

/// Errors of a discovery session.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The channel or stream could not be established.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// A response carried another category's resources.
    #[error("response type {actual} does not match session type {expected}")]
    UnexpectedType {
        /// Session type URL.
        expected: String,
        /// Type URL of the response.
        actual: String,
    },

    /// The handler rejected the response.
    #[error(transparent)]
    Handler(#[from] HandlerError),

    /// The session has been shut down.
    #[error("session shut down")]
    Shutdown,
}

/// Errors of one configuration bootstrap attempt.
#[derive(Debug, Error)]
pub enum BootstrapError {
    /// The fetch failed.
    #[error("config fetch failed: {0}")]
    Transport(#[from] TransportError),

    /// The fetch did not complete within the deadline.
    #[error("config fetch timed out after {0:?}")]
    Timeout(Duration),

    /// The fetched configuration was rejected.
    #[error("config rejected: {0}")]
    Handler(#[from] HandlerError),
}
