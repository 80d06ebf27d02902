//! Initial configuration fetch and the startup gate.

use async_trait::async_trait;
use enforcer_handlers::{ConfigHandler, ResponseHandler};
use enforcer_transport::{Channel, ConnectionManager, Transport};
use enforcer_xds_protocol::{DiscoveryRequest, DiscoveryResponse, NodeIdentity, ResourceCategory};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info};

use crate::error::BootstrapError;
use crate::scheduler::{Reconnect, RetryScheduler};

/// Latch that opens once and stays open.
#[derive(Debug, Clone)]
pub struct StartupGate {
    open: Arc<watch::Sender<bool>>,
    releases: Arc<AtomicUsize>,
}

impl StartupGate {
    /// A closed gate.
    #[must_use]
    pub fn new() -> Self {
        let (open, _) = watch::channel(false);
        Self {
            open: Arc::new(open),
            releases: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Open the gate. Returns whether this call opened it.
    pub fn release(&self) -> bool {
        let opened = self.open.send_if_modified(|open| {
            if *open {
                false
            } else {
                *open = true;
                true
            }
        });

        if opened {
            self.releases.fetch_add(1, Ordering::SeqCst);
        }
        opened
    }

    /// Whether the gate is open.
    #[must_use]
    pub fn is_released(&self) -> bool {
        *self.open.borrow()
    }

    /// Wait until the gate is open.
    pub async fn wait(&self) {
        let mut open = self.open.subscribe();
        // The sender lives as long as `self`, so this cannot fail.
        let _ = open.wait_for(|open| *open).await;
    }

    /// Number of times the gate was opened; never more than one.
    #[must_use]
    pub fn release_count(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }
}

impl Default for StartupGate {
    fn default() -> Self {
        Self::new()
    }
}

/// Fetches the runtime configuration before anything else starts.
///
/// A failed attempt hands the `Config` category to the retry scheduler,
/// which keeps trying until one succeeds. The gate opens on the first
/// success and never otherwise.
pub struct ConfigBootstrap<T>
where
    T: Transport,
{
    node: Arc<NodeIdentity>,
    connection: ConnectionManager<T>,
    handler: Arc<ConfigHandler>,
    scheduler: RetryScheduler,
    gate: StartupGate,
    timeout: Duration,
    attempts: AtomicUsize,
    running: tokio::sync::Mutex<()>,
}

impl<T> ConfigBootstrap<T>
where
    T: Transport,
{
    /// Create a bootstrap and register it as the `Config` reconnect target.
    pub fn new(
        connection: ConnectionManager<T>,
        handler: Arc<ConfigHandler>,
        node: Arc<NodeIdentity>,
        scheduler: RetryScheduler,
        timeout: Duration,
    ) -> Arc<Self> {
        let bootstrap = Arc::new(Self {
            node,
            connection,
            handler,
            scheduler,
            gate: StartupGate::new(),
            timeout,
            attempts: AtomicUsize::new(0),
            running: tokio::sync::Mutex::new(()),
        });

        let target: Weak<dyn Reconnect> = Arc::downgrade(&bootstrap) as Weak<dyn Reconnect>;
        bootstrap
            .scheduler
            .register(ResourceCategory::Config, target);

        bootstrap
    }

    /// Gate released once the configuration is applied.
    pub fn gate(&self) -> StartupGate {
        self.gate.clone()
    }

    /// Number of fetch attempts made.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Make one attempt, unless the configuration is already loaded.
    ///
    /// # Errors
    ///
    /// Returns why the attempt failed; a retry is scheduled in that case.
    pub async fn run(&self) -> Result<(), BootstrapError> {
        let _guard = self.running.lock().await;
        if self.gate.is_released() {
            self.scheduler.stop_retry(ResourceCategory::Config);
            return Ok(());
        }

        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        debug!("Requesting initial configuration, attempt {}", attempt);

        match self.fetch_and_apply().await {
            Ok(()) => {
                self.gate.release();
                self.scheduler.stop_retry(ResourceCategory::Config);
                info!("Initial configuration applied after {} attempts", attempt);
                self.connection.shutdown().await;
                Ok(())
            }
            Err(e) => {
                error!("Initial configuration attempt {} failed: {}", attempt, e);
                self.scheduler.start_retry(ResourceCategory::Config);
                Err(e)
            }
        }
    }

    async fn fetch_and_apply(&self) -> Result<(), BootstrapError> {
        let response = tokio::time::timeout(self.timeout, self.fetch())
            .await
            .map_err(|_| BootstrapError::Timeout(self.timeout))??;

        self.handler.apply(&response.resources)?;
        Ok(())
    }

    async fn fetch(&self) -> Result<DiscoveryResponse, BootstrapError> {
        let channel = self.connection.ensure_connected().await?;
        let request = DiscoveryRequest::initial(&self.node, ResourceCategory::Config, "");

        Ok(channel.fetch(request).await?)
    }
}

#[async_trait]
impl<T> Reconnect for ConfigBootstrap<T>
where
    T: Transport,
{
    async fn reconnect(&self) {
        if let Err(e) = self.run().await {
            debug!("Configuration retry failed: {}", e);
        }
    }
}
