//! Key managers and revoked tokens.

use chrono::Utc;
use enforcer_config_store::model::{KeyManagerConfig, RevokedToken};
use enforcer_config_store::{KeyManagerRegistry, RevokedTokenStore};
use enforcer_xds_protocol::{Any, ResourceCategory};
use std::sync::Arc;
use tracing::debug;

use crate::{HandlerError, MergePolicy, ResponseHandler, unpack_all};

/// Replaces the token issuer registry.
pub struct KeyManagerHandler {
    registry: Arc<KeyManagerRegistry>,
}

impl KeyManagerHandler {
    /// Create a handler writing to `registry`.
    #[must_use]
    pub const fn new(registry: Arc<KeyManagerRegistry>) -> Self {
        Self { registry }
    }
}

impl ResponseHandler for KeyManagerHandler {
    fn category(&self) -> ResourceCategory {
        ResourceCategory::KeyManagers
    }

    fn apply(&self, resources: &[Any]) -> Result<usize, HandlerError> {
        let configs: Vec<KeyManagerConfig> = unpack_all(self.category(), resources)?;

        for (index, config) in configs.iter().enumerate() {
            if config.enabled && config.issuer.is_empty() {
                return Err(HandlerError::invalid(
                    index,
                    format!("key manager {} has no issuer", config.name),
                ));
            }
        }

        let count = configs.len();
        self.registry.replace(configs);
        debug!("Applied {} key managers", count);

        Ok(count)
    }
}

/// Merges revoked tokens into the revocation store.
pub struct RevokedTokenHandler {
    store: Arc<RevokedTokenStore>,
}

impl RevokedTokenHandler {
    /// Create a handler writing to `store`.
    #[must_use]
    pub const fn new(store: Arc<RevokedTokenStore>) -> Self {
        Self { store }
    }
}

impl ResponseHandler for RevokedTokenHandler {
    fn category(&self) -> ResourceCategory {
        ResourceCategory::RevokedTokens
    }

    fn merge_policy(&self) -> MergePolicy {
        MergePolicy::Incremental
    }

    fn apply(&self, resources: &[Any]) -> Result<usize, HandlerError> {
        let tokens: Vec<RevokedToken> = unpack_all(self.category(), resources)?;

        if let Some(index) = tokens.iter().position(|token| token.jti.is_empty()) {
            return Err(HandlerError::invalid(index, "revoked token has no jti"));
        }

        let count = tokens.len();
        self.store.merge(tokens);
        let pruned = self.store.prune_expired(Utc::now().timestamp());
        debug!("Merged {} revoked tokens, pruned {} expired", count, pruned);

        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn revoked(jti: &str, expiry_time: i64) -> Any {
        Any::pack(
            ResourceCategory::RevokedTokens.type_url(),
            &RevokedToken {
                jti: jti.to_string(),
                expiry_time,
            },
        )
        .unwrap()
    }

    #[test]
    fn test_incremental_merge() {
        let store = Arc::new(RevokedTokenStore::new());
        let handler = RevokedTokenHandler::new(Arc::clone(&store));

        handler.apply(&[revoked("x", 4_000_000_000)]).unwrap();
        handler.apply(&[revoked("y", 4_000_000_000)]).unwrap();

        assert_eq!(store.len(), 2);
        assert!(store.is_revoked("x"));
        assert!(store.is_revoked("y"));
    }

    #[test]
    fn test_expired_tokens_pruned_on_apply() {
        let store = Arc::new(RevokedTokenStore::new());
        let handler = RevokedTokenHandler::new(Arc::clone(&store));
        store.merge(vec![RevokedToken {
            jti: "stale".to_string(),
            expiry_time: 100,
        }]);
        assert_eq!(store.len(), 1);

        handler.apply(&[revoked("fresh", 4_000_000_000)]).unwrap();

        assert_eq!(store.len(), 1);
        assert_eq!(store.expiry("stale"), None);
        assert!(store.is_revoked("fresh"));
    }

    #[test]
    fn test_empty_jti_rejected() {
        let store = Arc::new(RevokedTokenStore::new());
        let handler = RevokedTokenHandler::new(Arc::clone(&store));

        assert!(matches!(
            handler.apply(&[revoked("a", 10), revoked("", 10)]),
            Err(HandlerError::Invalid { index: 1, .. })
        ));
        assert!(store.is_empty());
    }

    #[test]
    fn test_key_managers_replace_registry() {
        let registry = Arc::new(KeyManagerRegistry::new());
        let handler = KeyManagerHandler::new(Arc::clone(&registry));

        let config = |name: &str, issuer: &str| {
            Any::pack(
                ResourceCategory::KeyManagers.type_url(),
                &KeyManagerConfig {
                    name: name.to_string(),
                    enabled: true,
                    organization: "org".to_string(),
                    issuer: issuer.to_string(),
                    ..KeyManagerConfig::default()
                },
            )
            .unwrap()
        };

        handler.apply(&[config("km1", "https://one")]).unwrap();
        handler.apply(&[config("km2", "https://two")]).unwrap();

        assert!(registry.issuer("org", "https://one").is_none());
        assert_eq!(registry.issuer("org", "https://two").unwrap().name, "km2");
        assert!(handler.apply(&[config("km3", "")]).is_err());
    }
}
