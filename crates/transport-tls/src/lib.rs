//! TLS transport for the discovery control plane.
//!
//! Every stream and fetch runs on its own TLS connection carrying
//! length-prefixed CBOR frames. The channel tracks connectivity: a failed
//! dial or a broken connection moves it to `TransientFailure`, which tells
//! the connection manager to replace it.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod certs;
pub mod connection;
pub mod error;

use async_trait::async_trait;
use enforcer_transport::{
    Channel, ChannelState, Config, DiscoveryStream, Endpoint, Transport, TransportError,
};
use enforcer_xds_protocol::{DiscoveryRequest, DiscoveryResponse, ResourceCategory};
use parking_lot::{Mutex, RwLock};
use rustls::ClientConfig;
use rustls_pki_types::ServerName;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_rustls::TlsConnector;
use tokio_rustls::client::TlsStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use connection::CallConfig;
pub use error::TlsError;

/// Configuration for the TLS transport
#[derive(Debug, Clone)]
pub struct TlsConfig {
    /// CA bundle file, or directory of PEM files, used to verify the server
    pub trusted_ca_path: PathBuf,
    /// Also trust the bundled web PKI roots
    pub trust_default_certs: bool,
    /// Client certificate chain for mutual TLS
    pub client_cert_path: Option<PathBuf>,
    /// Client private key for mutual TLS
    pub client_key_path: Option<PathBuf>,
    /// Name to verify the server certificate against, defaults to the endpoint host
    pub server_name: Option<String>,
    /// Generic transport settings
    pub transport: Config,
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            trusted_ca_path: PathBuf::from("/home/wso2/security/truststore"),
            trust_default_certs: true,
            client_cert_path: None,
            client_key_path: None,
            server_name: None,
            transport: Config::default(),
        }
    }
}

/// TLS transport implementation
#[derive(Clone)]
pub struct TlsTransport {
    connector: TlsConnector,
    server_name: Option<String>,
    transport: Config,
}

impl TlsTransport {
    /// Build the transport, loading trust anchors and the client identity.
    ///
    /// # Errors
    ///
    /// Returns an error if certificates cannot be loaded or rustls rejects them.
    pub fn new(config: &TlsConfig) -> Result<Self, TlsError> {
        let roots = certs::load_root_store(&config.trusted_ca_path, config.trust_default_certs)?;

        let provider = Arc::new(rustls::crypto::aws_lc_rs::default_provider());
        let builder = ClientConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()?
            .with_root_certificates(roots);

        let client_config = match (&config.client_cert_path, &config.client_key_path) {
            (Some(cert), Some(key)) => {
                let (chain, key) = certs::load_identity(cert, key)?;
                builder.with_client_auth_cert(chain, key)?
            }
            (None, None) => builder.with_no_client_auth(),
            _ => return Err(TlsError::IncompleteIdentity),
        };

        Ok(Self {
            connector: TlsConnector::from(Arc::new(client_config)),
            server_name: config.server_name.clone(),
            transport: config.transport.clone(),
        })
    }
}

#[async_trait]
impl Transport for TlsTransport {
    type Channel = TlsChannel;

    #[instrument(skip_all, fields(endpoint = %endpoint))]
    async fn connect(&self, endpoint: &Endpoint) -> Result<Arc<TlsChannel>, TransportError> {
        let name = self.server_name.clone().unwrap_or_else(|| endpoint.host.clone());
        let server_name = ServerName::try_from(name.clone())
            .map_err(|_| TlsError::InvalidServerName(name))?;

        let channel = Arc::new(TlsChannel {
            endpoint: endpoint.clone(),
            server_name,
            connector: self.connector.clone(),
            config: self.transport.clone(),
            state: Arc::new(RwLock::new(ChannelState::Connecting)),
            spare: tokio::sync::Mutex::new(None),
            shutdown: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        });

        // Handshake up front so an unreachable control plane fails the connect
        let io = channel.dial().await?;
        *channel.spare.lock().await = Some(io);
        *channel.state.write() = ChannelState::Ready;

        info!("TLS channel ready to {}", endpoint);

        Ok(channel)
    }
}

/// A logical channel to the control plane
pub struct TlsChannel {
    endpoint: Endpoint,
    server_name: ServerName<'static>,
    connector: TlsConnector,
    config: Config,
    state: Arc<RwLock<ChannelState>>,
    spare: tokio::sync::Mutex<Option<TlsStream<TcpStream>>>,
    shutdown: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl TlsChannel {
    async fn dial(&self) -> Result<TlsStream<TcpStream>, TransportError> {
        let result = self.try_dial().await;
        if result.is_err() {
            *self.state.write() = ChannelState::TransientFailure;
        }
        result
    }

    async fn try_dial(&self) -> Result<TlsStream<TcpStream>, TransportError> {
        let timeout = self.config.connection_timeout;
        let addr = (self.endpoint.host.as_str(), self.endpoint.port);

        let tcp = tokio::time::timeout(timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| TransportError::Timeout(timeout))?
            .map_err(|e| {
                TransportError::ConnectionFailed(format!("{}: {e}", self.endpoint))
            })?;
        tcp.set_nodelay(true)?;

        tokio::time::timeout(timeout, self.connector.connect(self.server_name.clone(), tcp))
            .await
            .map_err(|_| TransportError::Timeout(timeout))?
            .map_err(|e| TransportError::Tls(format!("handshake with {} failed: {e}", self.endpoint)))
    }

    async fn connection(&self) -> Result<TlsStream<TcpStream>, TransportError> {
        match self.state() {
            ChannelState::Shutdown => return Err(TransportError::Shutdown),
            ChannelState::TransientFailure => {
                return Err(TransportError::Unavailable(format!(
                    "channel to {} has failed",
                    self.endpoint
                )));
            }
            _ => {}
        }

        if let Some(io) = self.spare.lock().await.take() {
            return Ok(io);
        }
        self.dial().await
    }

    fn call_config(&self) -> CallConfig {
        CallConfig {
            max_message_size: self.config.max_message_size,
            keep_alive_interval: self.config.keep_alive_interval,
        }
    }
}

#[async_trait]
impl Channel for TlsChannel {
    fn state(&self) -> ChannelState {
        *self.state.read()
    }

    #[instrument(skip(self), fields(endpoint = %self.endpoint))]
    async fn open_stream(
        &self,
        category: ResourceCategory,
    ) -> Result<DiscoveryStream, TransportError> {
        let io = self.connection().await?;

        let (stream, tasks) = connection::open_stream(
            io,
            category,
            &self.call_config(),
            self.shutdown.child_token(),
            Arc::clone(&self.state),
        )
        .await?;

        let mut handles = self.tasks.lock();
        handles.retain(|handle| !handle.is_finished());
        handles.push(tasks.writer);
        handles.push(tasks.reader);

        debug!("Opened {} stream", category);

        Ok(stream)
    }

    #[instrument(skip(self, request), fields(endpoint = %self.endpoint, type_url = %request.type_url))]
    async fn fetch(&self, request: DiscoveryRequest) -> Result<DiscoveryResponse, TransportError> {
        let io = self.connection().await?;
        let max = self.config.max_message_size;

        tokio::select! {
            () = self.shutdown.cancelled() => Err(TransportError::Shutdown),
            result = connection::fetch(io, request, max) => result,
        }
    }

    async fn shutdown(&self, grace: Duration) -> Result<(), TransportError> {
        *self.state.write() = ChannelState::Shutdown;
        self.spare.lock().await.take();

        // Writers send a close frame on cancellation
        self.shutdown.cancel();

        let mut handles = std::mem::take(&mut *self.tasks.lock());
        let drained = tokio::time::timeout(
            grace,
            futures::future::join_all(handles.iter_mut()),
        )
        .await
        .is_ok();

        if !drained {
            warn!("Forcing {} stream tasks closed to {}", handles.len(), self.endpoint);
            for handle in &handles {
                handle.abort();
            }
        }

        Ok(())
    }
}
