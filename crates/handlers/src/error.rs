//! Error types for response handlers.

use thiserror::Error;

/// Reasons a discovery response is rejected. The store is left untouched
/// whenever one of these is returned.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// A resource could not be decoded.
    #[error("Failed to unpack resource {index}: {source}")]
    Unpack {
        /// Position of the resource in the response.
        index: usize,
        /// The underlying error.
        #[source]
        source: enforcer_xds_protocol::Error,
    },

    /// A resource decoded but failed validation.
    #[error("Invalid resource {index}: {reason}")]
    Invalid {
        /// Position of the resource in the response.
        index: usize,
        /// What is wrong with it.
        reason: String,
    },

    /// The response carried the wrong number of resources.
    #[error("Expected {expected} resource(s), got {actual}")]
    ResourceCount {
        /// Number of resources expected.
        expected: &'static str,
        /// Number of resources received.
        actual: usize,
    },

    /// A `$env{...}` placeholder names an unset variable.
    #[error("Environment variable {0} referenced by configuration is not set")]
    MissingEnv(String),
}

impl HandlerError {
    pub(crate) fn invalid(index: usize, reason: impl Into<String>) -> Self {
        Self::Invalid {
            index,
            reason: reason.into(),
        }
    }
}
