//! Discovery client keeping the enforcer's stores in sync with the control
//! plane.
//!
//! Every resource category runs its own [`DiscoverySession`] over its own
//! channel. The runtime configuration is fetched first by
//! [`ConfigBootstrap`]; nothing else starts until its [`StartupGate`] opens.
//! Failures of either are handed to the shared [`RetryScheduler`].

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod bootstrap;
pub mod config;
pub mod error;
pub mod scheduler;
pub mod session;
pub mod state;

pub use bootstrap::{ConfigBootstrap, StartupGate};
pub use config::{RetryPolicy, XdsClientConfig};
pub use error::{BootstrapError, SessionError};
pub use scheduler::{Reconnect, RetryScheduler};
pub use session::DiscoverySession;
pub use state::{ConnectionState, ReceivedResponse, SessionState, SessionStatus};

use enforcer_config_store::ConfigStores;
use enforcer_handlers::{ConfigHandler, ResponseHandler, handler_for};
use enforcer_transport::{ConnectionManager, Transport};
use enforcer_xds_protocol::ResourceCategory;
use futures::future::join_all;
use std::sync::Arc;
use tracing::{debug, info};

/// Session with a type-erased handler.
pub type CategorySession<T> = DiscoverySession<T, dyn ResponseHandler>;

/// All discovery sessions of the process plus the configuration bootstrap.
pub struct XdsClient<T>
where
    T: Transport,
{
    scheduler: RetryScheduler,
    bootstrap: Arc<ConfigBootstrap<T>>,
    sessions: Vec<Arc<CategorySession<T>>>,
}

impl<T> XdsClient<T>
where
    T: Transport,
{
    /// Build the bootstrap and one session per streamed category, writing
    /// into `stores`. Nothing connects yet.
    pub fn new(transport: &Arc<T>, config: &XdsClientConfig, stores: &ConfigStores) -> Self {
        let scheduler = RetryScheduler::new(config.retry);
        let node = Arc::new(config.node.clone());
        let manager = || ConnectionManager::new(Arc::clone(transport), config.endpoint.clone());

        let bootstrap = ConfigBootstrap::new(
            manager(),
            Arc::new(ConfigHandler::new(Arc::clone(&stores.config))),
            Arc::clone(&node),
            scheduler.clone(),
            config.bootstrap_timeout,
        );

        // The runtime configuration is only fetched, never streamed.
        let sessions = ResourceCategory::ALL
            .into_iter()
            .filter(|category| *category != ResourceCategory::Config)
            .map(|category| {
                DiscoverySession::new(
                    manager(),
                    handler_for(category, stores),
                    Arc::clone(&node),
                    scheduler.clone(),
                )
            })
            .collect();

        Self {
            scheduler,
            bootstrap,
            sessions,
        }
    }

    /// Fetch the runtime configuration, retrying until it is applied.
    pub async fn bootstrap(&self) {
        let gate = self.bootstrap.gate();
        if !gate.is_released() {
            // A failed first attempt has already scheduled the retries.
            if let Err(e) = self.bootstrap.run().await {
                debug!("First configuration attempt failed: {}", e);
            }
            gate.wait().await;
        }
    }

    /// Gate opened by the configuration bootstrap.
    pub fn startup_gate(&self) -> StartupGate {
        self.bootstrap.gate()
    }

    /// Open every category's stream. Categories that fail are retried by
    /// the scheduler.
    pub async fn start(&self) {
        join_all(self.sessions.iter().map(|session| session.start())).await;
        info!("Started {} discovery sessions", self.sessions.len());
    }

    /// Sessions, one per streamed category.
    pub fn sessions(&self) -> &[Arc<CategorySession<T>>] {
        &self.sessions
    }

    /// Session of `category`, if it is streamed.
    pub fn session(&self, category: ResourceCategory) -> Option<&Arc<CategorySession<T>>> {
        self.sessions
            .iter()
            .find(|session| session.category() == category)
    }

    /// Shared retry scheduler.
    pub const fn scheduler(&self) -> &RetryScheduler {
        &self.scheduler
    }

    /// Stop all retries and close every session.
    pub async fn shutdown(&self) {
        self.scheduler.shutdown();
        join_all(self.sessions.iter().map(|session| session.shutdown())).await;
        info!("Discovery client shut down");
    }
}
