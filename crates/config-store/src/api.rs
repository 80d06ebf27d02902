//! Routing table of deployed APIs.

use std::sync::Arc;
use tracing::debug;

use crate::model::Api;
use crate::snapshot::SnapshotMap;

/// Optional criteria for [`ApiTable::matching`]. Empty criteria match everything.
#[derive(Debug, Clone, Default)]
pub struct ApiFilter {
    /// Substring of the API title.
    pub name: Option<String>,
    /// Exact base path.
    pub context: Option<String>,
    /// Exact version.
    pub version: Option<String>,
    /// Exact API id.
    pub uuid: Option<String>,
}

/// APIs keyed by `vhost:base_path:version`.
#[derive(Debug, Default)]
pub struct ApiTable {
    apis: SnapshotMap<Api>,
}

impl ApiTable {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Key an API is stored under.
    #[must_use]
    pub fn key(vhost: &str, base_path: &str, version: &str) -> String {
        format!("{vhost}:{base_path}:{version}")
    }

    /// Replace every API.
    pub fn replace(&self, apis: Vec<Api>) {
        let entries = apis
            .into_iter()
            .map(|api| (Self::key(&api.vhost, &api.base_path, &api.version), api));
        self.apis.replace(entries);
        debug!("Total APIs in new table: {}", self.apis.len());
    }

    /// API routed at `vhost`, `base_path` and `version`.
    #[must_use]
    pub fn lookup(&self, vhost: &str, base_path: &str, version: &str) -> Option<Arc<Api>> {
        self.apis.get(&Self::key(vhost, base_path, version))
    }

    /// Every API satisfying all given criteria of `filter`.
    #[must_use]
    pub fn matching(&self, filter: &ApiFilter) -> Vec<Arc<Api>> {
        fn given(field: Option<&String>) -> Option<&str> {
            field.map(String::as_str).filter(|value| !value.is_empty())
        }

        let name = given(filter.name.as_ref());
        let context = given(filter.context.as_ref());
        let version = given(filter.version.as_ref());
        let uuid = given(filter.uuid.as_ref());

        self.apis
            .snapshot()
            .values()
            .filter(|api| name.is_none_or(|n| api.title.contains(n)))
            .filter(|api| context.is_none_or(|c| api.base_path == c))
            .filter(|api| version.is_none_or(|v| api.version == v))
            .filter(|api| uuid.is_none_or(|u| api.id == u))
            .cloned()
            .collect()
    }

    /// Number of APIs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.apis.len()
    }

    /// Whether there are no APIs.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.apis.is_empty()
    }
}
