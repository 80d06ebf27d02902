//! Throttle key templates and blocking conditions.

use arc_swap::ArcSwap;
use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::Arc;

use crate::model::{IpBlockingCondition, ThrottleData};

#[derive(Debug, Default)]
struct ThrottleIndex {
    key_templates: HashSet<String>,
    blocked: HashSet<(String, String)>,
    ip_conditions: Vec<IpBlockingCondition>,
}

/// Latest throttle data published by the control plane.
#[derive(Debug)]
pub struct ThrottleSnapshot {
    index: ArcSwap<ThrottleIndex>,
}

impl ThrottleSnapshot {
    /// Create an empty snapshot.
    #[must_use]
    pub fn new() -> Self {
        Self {
            index: ArcSwap::from_pointee(ThrottleIndex::default()),
        }
    }

    /// Replace the throttle data.
    pub fn replace(&self, data: ThrottleData) {
        let blocked = data
            .blocking_conditions
            .into_iter()
            .filter(|condition| condition.enabled)
            .map(|condition| (condition.condition_type, condition.value))
            .collect();

        self.index.store(Arc::new(ThrottleIndex {
            key_templates: data.key_templates.into_iter().collect(),
            blocked,
            ip_conditions: data.ip_blocking_conditions,
        }));
    }

    /// Whether `template` is a configured custom key template.
    #[must_use]
    pub fn is_key_template(&self, template: &str) -> bool {
        self.index.load().key_templates.contains(template)
    }

    /// Whether an enabled condition of `condition_type` blocks `value`.
    #[must_use]
    pub fn is_blocked(&self, condition_type: &str, value: &str) -> bool {
        self.index
            .load()
            .blocked
            .contains(&(condition_type.to_string(), value.to_string()))
    }

    /// Whether requests from `ip` are blocked for `tenant`.
    #[must_use]
    pub fn is_ip_blocked(&self, ip: IpAddr, tenant: &str) -> bool {
        self.index
            .load()
            .ip_conditions
            .iter()
            .filter(|condition| condition.tenant == tenant)
            .any(|condition| condition.condition.contains(ip) != condition.invert)
    }
}

impl Default for ThrottleSnapshot {
    fn default() -> Self {
        Self::new()
    }
}
