//! API definitions.

use enforcer_config_store::ApiTable;
use enforcer_config_store::model::Api;
use enforcer_xds_protocol::{Any, ResourceCategory};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

use crate::{HandlerError, ResponseHandler, unpack_all};

/// Replaces the routing table with the APIs of each response.
pub struct ApiHandler {
    table: Arc<ApiTable>,
}

impl ApiHandler {
    /// Create a handler writing to `table`.
    #[must_use]
    pub const fn new(table: Arc<ApiTable>) -> Self {
        Self { table }
    }
}

impl ResponseHandler for ApiHandler {
    fn category(&self) -> ResourceCategory {
        ResourceCategory::Apis
    }

    fn apply(&self, resources: &[Any]) -> Result<usize, HandlerError> {
        let apis: Vec<Api> = unpack_all(self.category(), resources)?;

        let mut routes = HashSet::with_capacity(apis.len());
        for (index, api) in apis.iter().enumerate() {
            if api.base_path.is_empty() {
                return Err(HandlerError::invalid(index, format!("API {} has no base path", api.id)));
            }
            if api.vhost.is_empty() {
                return Err(HandlerError::invalid(index, format!("API {} has no vhost", api.id)));
            }
            let route = ApiTable::key(&api.vhost, &api.base_path, &api.version);
            if !routes.insert(route) {
                return Err(HandlerError::invalid(
                    index,
                    format!("API {} repeats route {}:{}", api.id, api.base_path, api.version),
                ));
            }
        }

        let count = apis.len();
        self.table.replace(apis);
        debug!("Applied {} APIs", count);

        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pack(api: &Api) -> Any {
        Any::pack(ResourceCategory::Apis.type_url(), api).unwrap()
    }

    fn api(id: &str, base_path: &str) -> Api {
        Api {
            id: id.to_string(),
            title: id.to_string(),
            version: "v1".to_string(),
            base_path: base_path.to_string(),
            vhost: "localhost".to_string(),
            ..Api::default()
        }
    }

    #[test]
    fn test_snapshot_replaces_table() {
        let table = Arc::new(ApiTable::new());
        let handler = ApiHandler::new(Arc::clone(&table));

        handler
            .apply(&[pack(&api("a", "/a")), pack(&api("b", "/b"))])
            .unwrap();
        handler
            .apply(&[pack(&api("b", "/b")), pack(&api("c", "/c"))])
            .unwrap();

        assert_eq!(table.len(), 2);
        assert!(table.lookup("localhost", "/a", "v1").is_none());
        assert!(table.lookup("localhost", "/b", "v1").is_some());
        assert!(table.lookup("localhost", "/c", "v1").is_some());
    }

    #[test]
    fn test_invalid_api_leaves_table_unchanged() {
        let table = Arc::new(ApiTable::new());
        let handler = ApiHandler::new(Arc::clone(&table));
        handler.apply(&[pack(&api("a", "/a"))]).unwrap();

        let err = handler
            .apply(&[pack(&api("b", "/b")), pack(&api("c", ""))])
            .unwrap_err();

        assert!(matches!(err, HandlerError::Invalid { index: 1, .. }));
        assert_eq!(table.len(), 1);
        assert!(table.lookup("localhost", "/a", "v1").is_some());
    }

    #[test]
    fn test_duplicate_route_rejected() {
        let table = Arc::new(ApiTable::new());
        let handler = ApiHandler::new(Arc::clone(&table));
        handler.apply(&[pack(&api("a", "/a"))]).unwrap();

        let err = handler
            .apply(&[pack(&api("b", "/b")), pack(&api("b2", "/b"))])
            .unwrap_err();

        assert!(matches!(err, HandlerError::Invalid { index: 1, .. }));
        assert_eq!(table.len(), 1);
        assert!(table.lookup("localhost", "/a", "v1").is_some());
    }
}
