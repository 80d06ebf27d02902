//! Transport abstraction for talking to the discovery control plane.
//!
//! This crate provides a transport-agnostic interface for discovery calls.
//! Concrete transports (TLS, in-memory) live in separate crates.
//!
//! A transport produces [`Channel`]s. A channel carries:
//! - Long-lived bidirectional discovery streams
//! - One-shot fetch calls
//!
//! [`ConnectionManager`] owns at most one channel and replaces it when it
//! becomes unhealthy.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod manager;

use async_trait::async_trait;
use enforcer_xds_protocol::{DiscoveryRequest, DiscoveryResponse, ResourceCategory};
use futures::Stream;
use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

pub use error::TransportError;
pub use manager::{ConnectionManager, ConnectionManagerConfig};

/// Connectivity state reported by a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// No activity yet.
    Idle,
    /// Handshake in progress.
    Connecting,
    /// Able to carry calls.
    Ready,
    /// Last attempt failed; the channel will not recover by itself.
    TransientFailure,
    /// Closed.
    Shutdown,
}

impl ChannelState {
    /// Whether a channel in this state must be replaced before use.
    #[must_use]
    pub const fn needs_reinit(self) -> bool {
        matches!(self, Self::TransientFailure | Self::Shutdown)
    }
}

/// Address of the control plane.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    /// Host name or IP address.
    pub host: String,
    /// Port number.
    pub port: u16,
}

impl Endpoint {
    /// Create a new endpoint.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Stream of responses pushed by the control plane.
pub type ResponseStream =
    Pin<Box<dyn Stream<Item = Result<DiscoveryResponse, TransportError>> + Send>>;

/// Non-blocking sender for the client half of a discovery stream.
#[derive(Debug, Clone)]
pub struct RequestSender {
    tx: mpsc::UnboundedSender<DiscoveryRequest>,
}

impl RequestSender {
    /// Wrap the outbound queue of a stream.
    #[must_use]
    pub const fn new(tx: mpsc::UnboundedSender<DiscoveryRequest>) -> Self {
        Self { tx }
    }

    /// Queue a request without waiting for it to be written.
    ///
    /// # Errors
    ///
    /// Returns an error if the stream has already terminated.
    pub fn send(&self, request: DiscoveryRequest) -> Result<(), TransportError> {
        self.tx
            .send(request)
            .map_err(|_| TransportError::StreamClosed)
    }

    /// Whether the stream behind this sender has terminated.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// An open bidirectional discovery stream.
pub struct DiscoveryStream {
    /// Outbound requests.
    pub requests: RequestSender,
    /// Inbound responses; ends when the stream terminates.
    pub responses: ResponseStream,
}

impl fmt::Debug for DiscoveryStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiscoveryStream")
            .field("requests", &self.requests)
            .finish_non_exhaustive()
    }
}

/// A connection to the control plane able to carry discovery calls.
#[async_trait]
pub trait Channel: Send + Sync + 'static {
    /// Current connectivity state.
    fn state(&self) -> ChannelState;

    /// Open a discovery stream for `category`.
    async fn open_stream(
        &self,
        category: ResourceCategory,
    ) -> Result<DiscoveryStream, TransportError>;

    /// Send a single request and wait for a single response.
    async fn fetch(&self, request: DiscoveryRequest) -> Result<DiscoveryResponse, TransportError>;

    /// Close the channel, waiting up to `grace` for in-flight calls before
    /// terminating them.
    async fn shutdown(&self, grace: Duration) -> Result<(), TransportError>;
}

/// Factory for channels.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Channel type produced by this transport.
    type Channel: Channel;

    /// Establish a new channel to `endpoint`.
    async fn connect(&self, endpoint: &Endpoint) -> Result<Arc<Self::Channel>, TransportError>;
}

/// Configuration shared by transports.
#[derive(Debug, Clone)]
pub struct Config {
    /// Connection timeout.
    pub connection_timeout: Duration,
    /// Keep-alive interval on open streams.
    pub keep_alive_interval: Duration,
    /// Maximum inbound message size in bytes.
    pub max_message_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            connection_timeout: Duration::from_secs(10),
            keep_alive_interval: Duration::from_secs(30),
            max_message_size: 4 * 1024 * 1024, // 4MB
        }
    }
}
