//! Identity of this data-plane node as presented to the control plane.

use serde::{Deserialize, Serialize};

use crate::ResourceCategory;

/// Label shared by every enforcer for categories the control plane serves
/// identically to all nodes.
pub const COMMON_ENFORCER_LABEL: &str = "commonEnforcerLabel";

/// Node identity included on every discovery request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeIdentity {
    /// Deployment label used by the control plane to select configuration.
    pub label: String,
    /// Unique instance identifier, usually the host name.
    pub instance_id: String,
}

impl NodeIdentity {
    /// Create a new node identity.
    pub fn new(label: impl Into<String>, instance_id: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            instance_id: instance_id.into(),
        }
    }

    /// Identity to present when requesting `category`.
    ///
    /// Revoked tokens are published once for all enforcers, so they are
    /// requested under the common label.
    #[must_use]
    pub fn for_category(&self, category: ResourceCategory) -> Self {
        match category {
            ResourceCategory::RevokedTokens => Self {
                label: COMMON_ENFORCER_LABEL.to_string(),
                instance_id: self.instance_id.clone(),
            },
            _ => self.clone(),
        }
    }
}

impl std::fmt::Display for NodeIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.label, self.instance_id)
    }
}
