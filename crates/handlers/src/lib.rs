//! Category-specific response handlers.
//!
//! A handler turns the resources of one discovery response into an update
//! of its store. Every resource is unpacked and validated before the store
//! is touched, so a rejected response never leaves a partial update behind.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod api;
pub mod config;
pub mod error;
pub mod keymgt;
pub mod subscription;
pub mod throttle;

use enforcer_config_store::ConfigStores;
use enforcer_xds_protocol::{Any, ResourceCategory};
use serde::de::DeserializeOwned;
use std::sync::Arc;

pub use api::ApiHandler;
pub use config::{ConfigHandler, substitute_env};
pub use error::HandlerError;
pub use keymgt::{KeyManagerHandler, RevokedTokenHandler};
pub use subscription::{
    ApiListHandler, ApplicationHandler, ApplicationPolicyHandler, KeyMappingHandler,
    SubscriptionHandler, SubscriptionPolicyHandler,
};
pub use throttle::ThrottleDataHandler;

/// How an applied response relates to the existing store contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergePolicy {
    /// The response is the complete state; absent entries are removed.
    Snapshot,
    /// The response adds to the existing state.
    Incremental,
}

/// Applies discovery responses of one category to its store.
pub trait ResponseHandler: Send + Sync + 'static {
    /// Category this handler accepts.
    fn category(&self) -> ResourceCategory;

    /// How updates are merged.
    fn merge_policy(&self) -> MergePolicy {
        MergePolicy::Snapshot
    }

    /// Unpack, validate and apply `resources`; returns the number of
    /// entries applied.
    ///
    /// # Errors
    ///
    /// Returns an error if any resource is malformed or invalid. The store is
    /// unchanged in that case.
    fn apply(&self, resources: &[Any]) -> Result<usize, HandlerError>;
}

/// Unpack every resource as `T`, failing on the first bad one.
pub(crate) fn unpack_all<T: DeserializeOwned>(
    category: ResourceCategory,
    resources: &[Any],
) -> Result<Vec<T>, HandlerError> {
    resources
        .iter()
        .enumerate()
        .map(|(index, resource)| {
            resource
                .unpack(category.type_url())
                .map_err(|source| HandlerError::Unpack { index, source })
        })
        .collect()
}

/// Handler applying `category` to the matching store in `stores`.
#[must_use]
pub fn handler_for(category: ResourceCategory, stores: &ConfigStores) -> Arc<dyn ResponseHandler> {
    match category {
        ResourceCategory::Apis => Arc::new(ApiHandler::new(Arc::clone(&stores.apis))),
        ResourceCategory::ApiList => {
            Arc::new(ApiListHandler::new(Arc::clone(&stores.subscriptions)))
        }
        ResourceCategory::Applications => {
            Arc::new(ApplicationHandler::new(Arc::clone(&stores.subscriptions)))
        }
        ResourceCategory::Subscriptions => {
            Arc::new(SubscriptionHandler::new(Arc::clone(&stores.subscriptions)))
        }
        ResourceCategory::ApplicationKeyMappings => {
            Arc::new(KeyMappingHandler::new(Arc::clone(&stores.subscriptions)))
        }
        ResourceCategory::ApplicationPolicies => Arc::new(ApplicationPolicyHandler::new(
            Arc::clone(&stores.subscriptions),
        )),
        ResourceCategory::SubscriptionPolicies => Arc::new(SubscriptionPolicyHandler::new(
            Arc::clone(&stores.subscriptions),
        )),
        ResourceCategory::KeyManagers => {
            Arc::new(KeyManagerHandler::new(Arc::clone(&stores.key_managers)))
        }
        ResourceCategory::RevokedTokens => {
            Arc::new(RevokedTokenHandler::new(Arc::clone(&stores.revoked_tokens)))
        }
        ResourceCategory::ThrottleData => {
            Arc::new(ThrottleDataHandler::new(Arc::clone(&stores.throttle)))
        }
        ResourceCategory::Config => Arc::new(ConfigHandler::new(Arc::clone(&stores.config))),
    }
}
