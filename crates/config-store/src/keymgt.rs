//! Token issuers and revoked tokens.

use arc_swap::ArcSwap;
use chrono::Utc;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::model::{KeyManagerConfig, RevokedToken, TokenIssuer};

type IssuerTable = HashMap<String, HashMap<String, Arc<TokenIssuer>>>;

/// Token issuers per organization, built from key manager configurations.
#[derive(Debug)]
pub struct KeyManagerRegistry {
    issuers: ArcSwap<IssuerTable>,
}

impl KeyManagerRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            issuers: ArcSwap::from_pointee(HashMap::new()),
        }
    }

    /// Replace every issuer. Disabled key managers are left out.
    pub fn replace(&self, configs: Vec<KeyManagerConfig>) {
        let mut table = IssuerTable::new();

        for config in configs {
            if !config.enabled {
                debug!("Skipping disabled key manager {}", config.name);
                continue;
            }

            let organization = config.organization.clone();
            let issuer = TokenIssuer::from(config);
            table
                .entry(organization)
                .or_default()
                .insert(issuer.issuer.clone(), Arc::new(issuer));
        }

        self.issuers.store(Arc::new(table));
    }

    /// Issuer trusted by `organization` for tokens with issuer claim `issuer`.
    #[must_use]
    pub fn issuer(&self, organization: &str, issuer: &str) -> Option<Arc<TokenIssuer>> {
        self.issuers
            .load()
            .get(organization)
            .and_then(|issuers| issuers.get(issuer))
            .cloned()
    }

    /// Every issuer trusted by `organization`.
    #[must_use]
    pub fn issuers_for(&self, organization: &str) -> Vec<Arc<TokenIssuer>> {
        self.issuers
            .load()
            .get(organization)
            .map(|issuers| issuers.values().cloned().collect())
            .unwrap_or_default()
    }
}

impl Default for KeyManagerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Revoked token identifiers with their expiry.
///
/// Updates are additive. Entries whose token has expired are dropped when
/// they are looked up or when [`prune_expired`](Self::prune_expired) runs.
#[derive(Debug, Default)]
pub struct RevokedTokenStore {
    tokens: DashMap<String, i64>,
}

impl RevokedTokenStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge `tokens` into the store, keeping the later expiry on conflict.
    pub fn merge(&self, tokens: Vec<RevokedToken>) {
        for token in tokens {
            self.tokens
                .entry(token.jti)
                .and_modify(|expiry| *expiry = (*expiry).max(token.expiry_time))
                .or_insert(token.expiry_time);
        }
    }

    /// Whether the token `jti` is revoked and not yet expired.
    #[must_use]
    pub fn is_revoked(&self, jti: &str) -> bool {
        self.is_revoked_at(jti, Utc::now().timestamp())
    }

    /// Whether the token `jti` is revoked as of `now` (seconds since the epoch).
    #[must_use]
    pub fn is_revoked_at(&self, jti: &str, now: i64) -> bool {
        let Some(expiry) = self.expiry(jti) else {
            return false;
        };

        if expiry <= now {
            self.tokens.remove_if(jti, |_, expiry| *expiry <= now);
            return false;
        }

        true
    }

    /// Stored expiry of `jti`, expired or not.
    #[must_use]
    pub fn expiry(&self, jti: &str) -> Option<i64> {
        self.tokens.get(jti).map(|entry| *entry.value())
    }

    /// Drop every entry that expired at or before `now`; returns how many.
    pub fn prune_expired(&self, now: i64) -> usize {
        let before = self.tokens.len();
        self.tokens.retain(|_, expiry| *expiry > now);
        before - self.tokens.len()
    }

    /// Number of stored entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    /// Whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}
