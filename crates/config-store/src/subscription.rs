//! Subscription validation data.

use std::sync::Arc;

use crate::model::{
    ApiListEntry, Application, ApplicationKeyMapping, ApplicationPolicy, Subscription,
    SubscriptionPolicy,
};
use crate::snapshot::SnapshotMap;

/// Tables consulted when validating that a caller is subscribed to an API.
///
/// Each table is synchronized by its own discovery session and replaced
/// independently of the others.
#[derive(Debug, Default)]
pub struct SubscriptionStore {
    apis: SnapshotMap<ApiListEntry>,
    applications: SnapshotMap<Application>,
    subscriptions: SnapshotMap<Subscription>,
    key_mappings: SnapshotMap<ApplicationKeyMapping>,
    application_policies: SnapshotMap<ApplicationPolicy>,
    subscription_policies: SnapshotMap<SubscriptionPolicy>,
}

impl SubscriptionStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the API list, keyed by API UUID.
    pub fn replace_apis(&self, apis: Vec<ApiListEntry>) {
        self.apis
            .replace(apis.into_iter().map(|api| (api.uuid.clone(), api)));
    }

    /// Replace the applications, keyed by application UUID.
    pub fn replace_applications(&self, applications: Vec<Application>) {
        self.applications
            .replace(applications.into_iter().map(|app| (app.uuid.clone(), app)));
    }

    /// Replace the subscriptions, keyed by application and API.
    pub fn replace_subscriptions(&self, subscriptions: Vec<Subscription>) {
        self.subscriptions.replace(
            subscriptions
                .into_iter()
                .map(|sub| (subscription_key(&sub.app_uuid, &sub.api_uuid), sub)),
        );
    }

    /// Replace the key mappings, keyed by consumer key and key manager.
    pub fn replace_key_mappings(&self, mappings: Vec<ApplicationKeyMapping>) {
        self.key_mappings.replace(mappings.into_iter().map(|mapping| {
            (
                key_mapping_key(&mapping.consumer_key, &mapping.key_manager),
                mapping,
            )
        }));
    }

    /// Replace the application policies, keyed by name.
    pub fn replace_application_policies(&self, policies: Vec<ApplicationPolicy>) {
        self.application_policies
            .replace(policies.into_iter().map(|policy| (policy.name.clone(), policy)));
    }

    /// Replace the subscription policies, keyed by name.
    pub fn replace_subscription_policies(&self, policies: Vec<SubscriptionPolicy>) {
        self.subscription_policies
            .replace(policies.into_iter().map(|policy| (policy.name.clone(), policy)));
    }

    /// Deployed API by UUID.
    #[must_use]
    pub fn api_by_uuid(&self, uuid: &str) -> Option<Arc<ApiListEntry>> {
        self.apis.get(uuid)
    }

    /// Deployed API by context and version.
    #[must_use]
    pub fn api_by_context(&self, context: &str, version: &str) -> Option<Arc<ApiListEntry>> {
        self.apis
            .snapshot()
            .values()
            .find(|api| api.context == context && api.version == version)
            .cloned()
    }

    /// Application by UUID.
    #[must_use]
    pub fn application_by_uuid(&self, uuid: &str) -> Option<Arc<Application>> {
        self.applications.get(uuid)
    }

    /// Subscription of `app_uuid` to `api_uuid`.
    #[must_use]
    pub fn subscription(&self, app_uuid: &str, api_uuid: &str) -> Option<Arc<Subscription>> {
        self.subscriptions.get(&subscription_key(app_uuid, api_uuid))
    }

    /// Key mapping for a consumer key issued by `key_manager`.
    #[must_use]
    pub fn key_mapping(
        &self,
        consumer_key: &str,
        key_manager: &str,
    ) -> Option<Arc<ApplicationKeyMapping>> {
        self.key_mappings
            .get(&key_mapping_key(consumer_key, key_manager))
    }

    /// Application policy by name.
    #[must_use]
    pub fn application_policy(&self, name: &str) -> Option<Arc<ApplicationPolicy>> {
        self.application_policies.get(name)
    }

    /// Subscription policy by name.
    #[must_use]
    pub fn subscription_policy(&self, name: &str) -> Option<Arc<SubscriptionPolicy>> {
        self.subscription_policies.get(name)
    }

    /// Number of deployed APIs.
    #[must_use]
    pub fn api_count(&self) -> usize {
        self.apis.len()
    }

    /// Number of subscriptions.
    #[must_use]
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }
}

fn subscription_key(app_uuid: &str, api_uuid: &str) -> String {
    format!("{app_uuid}:{api_uuid}")
}

fn key_mapping_key(consumer_key: &str, key_manager: &str) -> String {
    format!("{consumer_key}:{key_manager}")
}
