//! Throttle data.

use enforcer_config_store::ThrottleSnapshot;
use enforcer_config_store::model::ThrottleData;
use enforcer_xds_protocol::{Any, ResourceCategory};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::{HandlerError, ResponseHandler};

/// Replaces the throttle snapshot. The control plane sends one resource;
/// only the first is used.
pub struct ThrottleDataHandler {
    snapshot: Arc<ThrottleSnapshot>,
}

impl ThrottleDataHandler {
    /// Create a handler writing to `snapshot`.
    #[must_use]
    pub const fn new(snapshot: Arc<ThrottleSnapshot>) -> Self {
        Self { snapshot }
    }
}

impl ResponseHandler for ThrottleDataHandler {
    fn category(&self) -> ResourceCategory {
        ResourceCategory::ThrottleData
    }

    fn apply(&self, resources: &[Any]) -> Result<usize, HandlerError> {
        if resources.len() > 1 {
            warn!("Ignoring {} extra throttle data resources", resources.len() - 1);
        }

        let first = resources.first().ok_or(HandlerError::ResourceCount {
            expected: "at least 1",
            actual: 0,
        })?;
        let data: ThrottleData = first
            .unpack(self.category().type_url())
            .map_err(|source| HandlerError::Unpack { index: 0, source })?;

        let count = data.key_templates.len()
            + data.blocking_conditions.len()
            + data.ip_blocking_conditions.len();
        self.snapshot.replace(data);
        debug!("Applied throttle data with {} entries", count);

        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_resource_used() {
        let snapshot = Arc::new(ThrottleSnapshot::new());
        let handler = ThrottleDataHandler::new(Arc::clone(&snapshot));

        let pack = |template: &str| {
            Any::pack(
                ResourceCategory::ThrottleData.type_url(),
                &ThrottleData {
                    key_templates: vec![template.to_string()],
                    ..ThrottleData::default()
                },
            )
            .unwrap()
        };

        assert_eq!(handler.apply(&[pack("$userId"), pack("$appId")]).unwrap(), 1);
        assert!(snapshot.is_key_template("$userId"));
        assert!(!snapshot.is_key_template("$appId"));
    }

    #[test]
    fn test_empty_response_rejected() {
        let handler = ThrottleDataHandler::new(Arc::new(ThrottleSnapshot::new()));
        assert!(matches!(
            handler.apply(&[]),
            Err(HandlerError::ResourceCount { actual: 0, .. })
        ));
    }
}
