//! Error types for TLS setup.

use enforcer_transport::TransportError;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while building the TLS client configuration.
#[derive(Debug, Error)]
pub enum TlsError {
    /// A certificate or key file could not be read.
    #[error("Failed to read {path}: {source}")]
    Read {
        /// Path that could not be read.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: io::Error,
    },

    /// No usable trust anchors were found.
    #[error("No trusted certificates found in {0}")]
    NoCertificates(PathBuf),

    /// The key file did not contain a private key.
    #[error("No private key found in {0}")]
    NoPrivateKey(PathBuf),

    /// Only one half of the client identity was configured.
    #[error("Client certificate and private key must be configured together")]
    IncompleteIdentity,

    /// Host name cannot be used for certificate verification.
    #[error("Invalid server name: {0}")]
    InvalidServerName(String),

    /// Rustls rejected the configuration.
    #[error("Rustls error: {0}")]
    Rustls(#[from] rustls::Error),
}

impl From<TlsError> for TransportError {
    fn from(e: TlsError) -> Self {
        Self::Tls(e.to_string())
    }
}
