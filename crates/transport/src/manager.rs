//! Channel lifecycle management.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::{Channel, ChannelState, Endpoint, Transport, TransportError};

/// Default grace period when replacing an unhealthy channel
const DEFAULT_REINIT_GRACE: Duration = Duration::from_secs(1);

/// Default bound on a final shutdown
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Configuration for the connection manager
#[derive(Debug, Clone)]
pub struct ConnectionManagerConfig {
    /// Time an unhealthy channel is given to drain before it is forced closed
    pub reinit_grace: Duration,
    /// Bound on `shutdown`
    pub shutdown_timeout: Duration,
}

impl Default for ConnectionManagerConfig {
    fn default() -> Self {
        Self {
            reinit_grace: DEFAULT_REINIT_GRACE,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }
}

/// Owns the channel to the control plane and replaces it when unhealthy.
pub struct ConnectionManager<T>
where
    T: Transport,
{
    transport: Arc<T>,
    endpoint: Endpoint,
    channel: Mutex<Option<Arc<T::Channel>>>,
    config: ConnectionManagerConfig,
}

impl<T> ConnectionManager<T>
where
    T: Transport,
{
    /// Create a manager with default configuration. No channel is opened yet.
    pub fn new(transport: Arc<T>, endpoint: Endpoint) -> Self {
        Self::with_config(transport, endpoint, ConnectionManagerConfig::default())
    }

    /// Create a manager with custom configuration.
    pub fn with_config(
        transport: Arc<T>,
        endpoint: Endpoint,
        config: ConnectionManagerConfig,
    ) -> Self {
        Self {
            transport,
            endpoint,
            channel: Mutex::new(None),
            config,
        }
    }

    /// Return a usable channel, creating one if there is none or the current
    /// one is in `TransientFailure` or `Shutdown`.
    ///
    /// # Errors
    ///
    /// Returns the transport's error if a new channel cannot be established.
    pub async fn ensure_connected(&self) -> Result<Arc<T::Channel>, TransportError> {
        let mut current = self.channel.lock().await;

        if let Some(channel) = current.as_ref() {
            let state = channel.state();
            if !state.needs_reinit() {
                return Ok(Arc::clone(channel));
            }

            debug!("Channel to {} is {:?}, reinitializing", self.endpoint, state);
            if let Some(stale) = current.take() {
                self.close(&stale, self.config.reinit_grace).await;
            }
        }

        info!("Connecting to control plane at {}", self.endpoint);
        let channel = self.transport.connect(&self.endpoint).await?;
        *current = Some(Arc::clone(&channel));

        Ok(channel)
    }

    /// Whether `channel` can carry calls right now.
    pub fn is_ready(&self, channel: &T::Channel) -> bool {
        channel.state() == ChannelState::Ready
    }

    /// The channel currently held, if any.
    pub async fn current(&self) -> Option<Arc<T::Channel>> {
        self.channel.lock().await.clone()
    }

    /// Close the current channel, bounded by the shutdown timeout.
    pub async fn shutdown(&self) {
        let channel = self.channel.lock().await.take();

        if let Some(channel) = channel {
            info!("Shutting down channel to {}", self.endpoint);
            self.close(&channel, self.config.shutdown_timeout).await;
        }
    }

    async fn close(&self, channel: &T::Channel, grace: Duration) {
        // The channel forces its calls closed after `grace`; the outer
        // timeout bounds a channel that does not honour it.
        match tokio::time::timeout(grace * 2, channel.shutdown(grace)).await {
            Ok(Ok(())) => debug!("Channel to {} closed", self.endpoint),
            Ok(Err(e)) => warn!("Channel to {} failed to close: {}", self.endpoint, e),
            Err(_) => warn!("Channel to {} timed out while closing", self.endpoint),
        }
    }
}
