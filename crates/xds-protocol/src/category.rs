//! Resource categories served by the control plane.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::ProtocolError;

const TYPE_URL_PREFIX: &str = "type.googleapis.com/wso2.discovery.";

/// A category of configuration, each synchronized over its own stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ResourceCategory {
    /// API definitions used for routing.
    Apis,
    /// Summary list of deployed APIs used by subscription validation.
    ApiList,
    /// Applications known to the key manager.
    Applications,
    /// Application to API subscriptions.
    Subscriptions,
    /// Consumer key to application mappings.
    ApplicationKeyMappings,
    /// Application throttling policies.
    ApplicationPolicies,
    /// Subscription throttling policies.
    SubscriptionPolicies,
    /// Key manager (token issuer) configurations.
    KeyManagers,
    /// Revoked token identifiers.
    RevokedTokens,
    /// Throttle key templates and blocking conditions.
    ThrottleData,
    /// Enforcer runtime configuration.
    Config,
}

impl ResourceCategory {
    /// Every category, in start-up order.
    pub const ALL: [Self; 11] = [
        Self::Config,
        Self::Apis,
        Self::ApiList,
        Self::Applications,
        Self::Subscriptions,
        Self::ApplicationKeyMappings,
        Self::ApplicationPolicies,
        Self::SubscriptionPolicies,
        Self::KeyManagers,
        Self::RevokedTokens,
        Self::ThrottleData,
    ];

    /// Type URL identifying this category on the wire.
    #[must_use]
    pub const fn type_url(self) -> &'static str {
        match self {
            Self::Apis => "type.googleapis.com/wso2.discovery.api.Api",
            Self::ApiList => "type.googleapis.com/wso2.discovery.subscription.APIList",
            Self::Applications => "type.googleapis.com/wso2.discovery.subscription.ApplicationList",
            Self::Subscriptions => {
                "type.googleapis.com/wso2.discovery.subscription.SubscriptionList"
            }
            Self::ApplicationKeyMappings => {
                "type.googleapis.com/wso2.discovery.subscription.ApplicationKeyMappingList"
            }
            Self::ApplicationPolicies => {
                "type.googleapis.com/wso2.discovery.subscription.ApplicationPolicyList"
            }
            Self::SubscriptionPolicies => {
                "type.googleapis.com/wso2.discovery.subscription.SubscriptionPolicyList"
            }
            Self::KeyManagers => "type.googleapis.com/wso2.discovery.keymgt.KeyManagerConfig",
            Self::RevokedTokens => "type.googleapis.com/wso2.discovery.keymgt.RevokedToken",
            Self::ThrottleData => "type.googleapis.com/wso2.discovery.throttle.ThrottleData",
            Self::Config => "type.googleapis.com/wso2.discovery.config.enforcer.Config",
        }
    }

    /// Resolve a category from its type URL.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL does not belong to any category.
    pub fn from_type_url(type_url: &str) -> Result<Self, ProtocolError> {
        if !type_url.starts_with(TYPE_URL_PREFIX) {
            return Err(ProtocolError::UnknownTypeUrl(type_url.to_string()));
        }

        Self::ALL
            .into_iter()
            .find(|category| category.type_url() == type_url)
            .ok_or_else(|| ProtocolError::UnknownTypeUrl(type_url.to_string()))
    }

    /// Short name used in logs.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Apis => "apis",
            Self::ApiList => "api-list",
            Self::Applications => "applications",
            Self::Subscriptions => "subscriptions",
            Self::ApplicationKeyMappings => "application-key-mappings",
            Self::ApplicationPolicies => "application-policies",
            Self::SubscriptionPolicies => "subscription-policies",
            Self::KeyManagers => "key-managers",
            Self::RevokedTokens => "revoked-tokens",
            Self::ThrottleData => "throttle-data",
            Self::Config => "config",
        }
    }
}

impl fmt::Display for ResourceCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_type_urls_are_distinct_and_resolvable() {
        let urls: HashSet<_> = ResourceCategory::ALL.iter().map(|c| c.type_url()).collect();
        assert_eq!(urls.len(), ResourceCategory::ALL.len());

        for category in ResourceCategory::ALL {
            assert_eq!(
                ResourceCategory::from_type_url(category.type_url()).unwrap(),
                category
            );
        }
    }

    #[test]
    fn test_unknown_type_url() {
        assert!(ResourceCategory::from_type_url("type.googleapis.com/envoy.Cluster").is_err());
        assert!(
            ResourceCategory::from_type_url("type.googleapis.com/wso2.discovery.api.Nope")
                .is_err()
        );
    }
}
