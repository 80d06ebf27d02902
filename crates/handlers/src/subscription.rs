//! Subscription validation data.
//!
//! Each category delivers list resources; the entries of every list in a
//! response together form the new table.

use enforcer_config_store::SubscriptionStore;
use enforcer_config_store::model::{
    ApiList, ApiListEntry, ApplicationKeyMapping, ApplicationKeyMappingList, ApplicationList,
    ApplicationPolicyList, SubscriptionList, SubscriptionPolicyList,
};
use enforcer_xds_protocol::{Any, ResourceCategory};
use serde::de::DeserializeOwned;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::debug;

use crate::{HandlerError, ResponseHandler, unpack_all};

/// A list resource stored in the [`SubscriptionStore`].
pub trait SubscriptionResource: DeserializeOwned + Send + Sync + 'static {
    /// Category delivering this resource.
    const CATEGORY: ResourceCategory;

    /// Entry type of the list.
    type Entry;

    /// Take the entries out of the list.
    fn into_entries(self) -> Vec<Self::Entry>;

    /// Reason `entry` cannot be stored, if any.
    fn validate(entry: &Self::Entry) -> Option<String>;

    /// Replace the matching table of `store`.
    fn store(store: &SubscriptionStore, entries: Vec<Self::Entry>);
}

/// Replaces one table of the [`SubscriptionStore`].
pub struct ListHandler<R> {
    store: Arc<SubscriptionStore>,
    _resource: PhantomData<fn() -> R>,
}

impl<R> ListHandler<R> {
    /// Create a handler writing to `store`.
    #[must_use]
    pub const fn new(store: Arc<SubscriptionStore>) -> Self {
        Self {
            store,
            _resource: PhantomData,
        }
    }
}

impl<R> ResponseHandler for ListHandler<R>
where
    R: SubscriptionResource,
{
    fn category(&self) -> ResourceCategory {
        R::CATEGORY
    }

    fn apply(&self, resources: &[Any]) -> Result<usize, HandlerError> {
        let lists: Vec<R> = unpack_all(R::CATEGORY, resources)?;

        let mut entries = Vec::new();
        for (index, list) in lists.into_iter().enumerate() {
            for entry in list.into_entries() {
                if let Some(reason) = R::validate(&entry) {
                    return Err(HandlerError::invalid(index, reason));
                }
                entries.push(entry);
            }
        }

        let count = entries.len();
        R::store(&self.store, entries);
        debug!("Applied {} {} entries", count, R::CATEGORY);

        Ok(count)
    }
}

/// Handler for the deployed API list.
pub type ApiListHandler = ListHandler<ApiList>;
/// Handler for applications.
pub type ApplicationHandler = ListHandler<ApplicationList>;
/// Handler for subscriptions.
pub type SubscriptionHandler = ListHandler<SubscriptionList>;
/// Handler for application key mappings.
pub type KeyMappingHandler = ListHandler<ApplicationKeyMappingList>;
/// Handler for application policies.
pub type ApplicationPolicyHandler = ListHandler<ApplicationPolicyList>;
/// Handler for subscription policies.
pub type SubscriptionPolicyHandler = ListHandler<SubscriptionPolicyList>;

fn required(value: &str, what: &str) -> Option<String> {
    value.is_empty().then(|| format!("{what} is empty"))
}

impl SubscriptionResource for ApiList {
    const CATEGORY: ResourceCategory = ResourceCategory::ApiList;
    type Entry = ApiListEntry;

    fn into_entries(self) -> Vec<ApiListEntry> {
        self.list
    }

    fn validate(entry: &ApiListEntry) -> Option<String> {
        required(&entry.uuid, "API uuid")
    }

    fn store(store: &SubscriptionStore, entries: Vec<ApiListEntry>) {
        store.replace_apis(entries);
    }
}

impl SubscriptionResource for ApplicationList {
    const CATEGORY: ResourceCategory = ResourceCategory::Applications;
    type Entry = enforcer_config_store::model::Application;

    fn into_entries(self) -> Vec<Self::Entry> {
        self.list
    }

    fn validate(entry: &Self::Entry) -> Option<String> {
        required(&entry.uuid, "application uuid")
    }

    fn store(store: &SubscriptionStore, entries: Vec<Self::Entry>) {
        store.replace_applications(entries);
    }
}

impl SubscriptionResource for SubscriptionList {
    const CATEGORY: ResourceCategory = ResourceCategory::Subscriptions;
    type Entry = enforcer_config_store::model::Subscription;

    fn into_entries(self) -> Vec<Self::Entry> {
        self.list
    }

    fn validate(entry: &Self::Entry) -> Option<String> {
        required(&entry.app_uuid, "subscribing application uuid")
            .or_else(|| required(&entry.api_uuid, "subscribed API uuid"))
    }

    fn store(store: &SubscriptionStore, entries: Vec<Self::Entry>) {
        store.replace_subscriptions(entries);
    }
}

impl SubscriptionResource for ApplicationKeyMappingList {
    const CATEGORY: ResourceCategory = ResourceCategory::ApplicationKeyMappings;
    type Entry = ApplicationKeyMapping;

    fn into_entries(self) -> Vec<ApplicationKeyMapping> {
        self.list
    }

    fn validate(entry: &ApplicationKeyMapping) -> Option<String> {
        required(&entry.consumer_key, "consumer key")
    }

    fn store(store: &SubscriptionStore, entries: Vec<ApplicationKeyMapping>) {
        store.replace_key_mappings(entries);
    }
}

impl SubscriptionResource for ApplicationPolicyList {
    const CATEGORY: ResourceCategory = ResourceCategory::ApplicationPolicies;
    type Entry = enforcer_config_store::model::ApplicationPolicy;

    fn into_entries(self) -> Vec<Self::Entry> {
        self.list
    }

    fn validate(entry: &Self::Entry) -> Option<String> {
        required(&entry.name, "policy name")
    }

    fn store(store: &SubscriptionStore, entries: Vec<Self::Entry>) {
        store.replace_application_policies(entries);
    }
}

impl SubscriptionResource for SubscriptionPolicyList {
    const CATEGORY: ResourceCategory = ResourceCategory::SubscriptionPolicies;
    type Entry = enforcer_config_store::model::SubscriptionPolicy;

    fn into_entries(self) -> Vec<Self::Entry> {
        self.list
    }

    fn validate(entry: &Self::Entry) -> Option<String> {
        required(&entry.name, "policy name")
    }

    fn store(store: &SubscriptionStore, entries: Vec<Self::Entry>) {
        store.replace_subscription_policies(entries);
    }
}
