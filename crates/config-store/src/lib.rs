//! Configuration stores read by the enforcer's request path.
//!
//! This crate provides:
//! - Resource schemas delivered by the control plane
//! - One store per configuration category
//!
//! Snapshot categories are replaced atomically with `arc-swap`, so readers
//! never observe a partially applied update. Revoked tokens are merged
//! incrementally into a `DashMap`.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod api;
pub mod keymgt;
pub mod model;
pub mod runtime;
pub mod snapshot;
pub mod subscription;
pub mod throttle;

use std::sync::Arc;

pub use api::{ApiFilter, ApiTable};
pub use keymgt::{KeyManagerRegistry, RevokedTokenStore};
pub use runtime::RuntimeConfig;
pub use snapshot::SnapshotMap;
pub use subscription::SubscriptionStore;
pub use throttle::ThrottleSnapshot;

/// Every store, shared between the discovery sessions that write them and
/// the request path that reads them.
#[derive(Debug, Clone, Default)]
pub struct ConfigStores {
    /// Routing table.
    pub apis: Arc<ApiTable>,
    /// Subscription validation data.
    pub subscriptions: Arc<SubscriptionStore>,
    /// Token issuers from key managers.
    pub key_managers: Arc<KeyManagerRegistry>,
    /// Revoked tokens.
    pub revoked_tokens: Arc<RevokedTokenStore>,
    /// Throttle data.
    pub throttle: Arc<ThrottleSnapshot>,
    /// Runtime configuration.
    pub config: Arc<RuntimeConfig>,
}

impl ConfigStores {
    /// Create empty stores.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}
