//! Runtime configuration published by the control plane.

use arc_swap::ArcSwapOption;
use std::sync::Arc;

use crate::model::EnforcerConfig;

/// Holder of the current enforcer configuration. Empty until the first
/// configuration is applied.
#[derive(Debug, Default)]
pub struct RuntimeConfig {
    current: ArcSwapOption<EnforcerConfig>,
}

impl RuntimeConfig {
    /// Create an empty holder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a new configuration.
    pub fn publish(&self, config: EnforcerConfig) {
        self.current.store(Some(Arc::new(config)));
    }

    /// The current configuration, if one has been applied.
    #[must_use]
    pub fn current(&self) -> Option<Arc<EnforcerConfig>> {
        self.current.load_full()
    }

    /// Whether a configuration has been applied.
    #[must_use]
    pub fn is_loaded(&self) -> bool {
        self.current.load().is_some()
    }
}
