//! Acknowledgement state of one discovery session.
//!
//! [`SessionState`] holds no I/O. The session engine feeds it stream events
//! and sends whatever request it hands back.

use enforcer_xds_protocol::{DiscoveryRequest, DiscoveryResponse, NodeIdentity, ResourceCategory};
use std::fmt;
use std::sync::Arc;

/// Connection state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// No stream and no reconnect in progress.
    Disconnected,
    /// A stream is being opened, or opened but nothing applied on it yet.
    Connecting,
    /// A response has been applied on the current stream.
    Streaming,
    /// The last stream or response failed; waiting for the retry scheduler.
    ErrorBackoff,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Streaming => "streaming",
            Self::ErrorBackoff => "error-backoff",
        };
        f.write_str(name)
    }
}

/// Version and nonce of a received response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedResponse {
    /// Version of the response.
    pub version: String,
    /// Nonce of the response.
    pub nonce: String,
}

impl ReceivedResponse {
    fn matches(&self, response: &DiscoveryResponse) -> bool {
        self.version == response.version_info && self.nonce == response.nonce
    }
}

/// Point-in-time view of a session, for logs and tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStatus {
    /// Category of the session.
    pub category: ResourceCategory,
    /// Connection state.
    pub connection: ConnectionState,
    /// Last version applied successfully; empty before the first.
    pub latest_acked_version: String,
    /// Last response received, applied or not.
    pub latest_received: Option<ReceivedResponse>,
}

/// Ack/nack bookkeeping for one category.
#[derive(Debug)]
pub struct SessionState {
    category: ResourceCategory,
    node: Arc<NodeIdentity>,
    connection: ConnectionState,
    latest_received: Option<ReceivedResponse>,
    latest_acked_version: String,
}

impl SessionState {
    /// Cold state: nothing received, empty acked version.
    #[must_use]
    pub const fn new(category: ResourceCategory, node: Arc<NodeIdentity>) -> Self {
        Self {
            category,
            node,
            connection: ConnectionState::Disconnected,
            latest_received: None,
            latest_acked_version: String::new(),
        }
    }

    /// Category of the session.
    #[must_use]
    pub const fn category(&self) -> ResourceCategory {
        self.category
    }

    /// Current connection state.
    #[must_use]
    pub const fn connection(&self) -> ConnectionState {
        self.connection
    }

    /// Last version applied successfully.
    #[must_use]
    pub fn latest_acked_version(&self) -> &str {
        &self.latest_acked_version
    }

    /// Last response received.
    #[must_use]
    pub const fn latest_received(&self) -> Option<&ReceivedResponse> {
        self.latest_received.as_ref()
    }

    /// Snapshot of the state.
    #[must_use]
    pub fn status(&self) -> SessionStatus {
        SessionStatus {
            category: self.category,
            connection: self.connection,
            latest_acked_version: self.latest_acked_version.clone(),
            latest_received: self.latest_received.clone(),
        }
    }

    /// A new stream is being opened.
    pub fn begin_connect(&mut self) {
        self.connection = ConnectionState::Connecting;
    }

    /// First request on a new stream, resuming from the acked version.
    #[must_use]
    pub fn initial_request(&self) -> DiscoveryRequest {
        DiscoveryRequest::initial(&self.node, self.category, self.latest_acked_version.clone())
    }

    /// Record `response` before it is applied.
    pub fn record_received(&mut self, response: &DiscoveryResponse) {
        self.latest_received = Some(ReceivedResponse {
            version: response.version_info.clone(),
            nonce: response.nonce.clone(),
        });
    }

    /// `response` was applied; returns its ack.
    ///
    /// Returns `None` if `response` is not the latest one received.
    pub fn on_applied(&mut self, response: &DiscoveryResponse) -> Option<DiscoveryRequest> {
        let received = self.latest_received.as_ref().filter(|r| r.matches(response))?;

        let ack = DiscoveryRequest::ack(
            &self.node,
            self.category,
            received.version.clone(),
            received.nonce.clone(),
        );
        self.latest_acked_version.clone_from(&received.version);
        self.connection = ConnectionState::Streaming;

        Some(ack)
    }

    /// `response` was rejected; returns its nack.
    ///
    /// The nack points back at the last acked version. Nothing is sent unless
    /// `response` is the latest one received.
    pub fn on_rejected(
        &mut self,
        response: &DiscoveryResponse,
        reason: &str,
    ) -> Option<DiscoveryRequest> {
        self.connection = ConnectionState::ErrorBackoff;

        let received = self.latest_received.as_ref().filter(|r| r.matches(response))?;
        Some(DiscoveryRequest::nack(
            &self.node,
            self.category,
            self.latest_acked_version.clone(),
            received.nonce.clone(),
            reason,
        ))
    }

    /// The stream ended, with an error or cleanly.
    pub fn on_stream_terminated(&mut self) {
        self.connection = ConnectionState::ErrorBackoff;
    }

    /// The channel or stream could not be opened.
    pub fn on_connect_failed(&mut self) {
        self.connection = ConnectionState::ErrorBackoff;
    }

    /// The session was shut down.
    pub fn on_shutdown(&mut self) {
        self.connection = ConnectionState::Disconnected;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use enforcer_xds_protocol::NACK_STATUS_CODE;
    use pretty_assertions::assert_eq;

    fn state(category: ResourceCategory) -> SessionState {
        SessionState::new(category, Arc::new(NodeIdentity::new("enforcer", "pod-1")))
    }

    fn response(category: ResourceCategory, version: &str, nonce: &str) -> DiscoveryResponse {
        DiscoveryResponse::new(category, version, nonce, Vec::new())
    }

    #[test]
    fn test_cold_start_requests_empty_version() {
        let mut state = state(ResourceCategory::Apis);
        assert_eq!(state.connection(), ConnectionState::Disconnected);

        state.begin_connect();
        let request = state.initial_request();

        assert_eq!(state.connection(), ConnectionState::Connecting);
        assert_eq!(request.version_info, "");
        assert_eq!(request.response_nonce, "");
        assert_eq!(request.type_url, ResourceCategory::Apis.type_url());
        assert!(!request.is_nack());
    }

    #[test]
    fn test_ack_tracks_last_applied_version() {
        let mut state = state(ResourceCategory::Subscriptions);
        state.begin_connect();

        let v1 = response(ResourceCategory::Subscriptions, "v1", "n1");
        state.record_received(&v1);
        let ack = state.on_applied(&v1).unwrap();
        assert_eq!(ack.version_info, "v1");
        assert_eq!(ack.response_nonce, "n1");
        assert_eq!(state.connection(), ConnectionState::Streaming);

        let v2 = response(ResourceCategory::Subscriptions, "v2", "n2");
        state.record_received(&v2);
        let nack = state.on_rejected(&v2, "bad entry").unwrap();
        assert_eq!(nack.version_info, "v1");
        assert_eq!(nack.response_nonce, "n2");
        assert_eq!(state.latest_acked_version(), "v1");
        assert_eq!(state.connection(), ConnectionState::ErrorBackoff);

        let v3 = response(ResourceCategory::Subscriptions, "v3", "n3");
        state.record_received(&v3);
        state.on_applied(&v3).unwrap();
        assert_eq!(state.latest_acked_version(), "v3");
        assert_eq!(state.initial_request().version_info, "v3");
    }

    #[test]
    fn test_nack_carries_error_detail() {
        let mut state = state(ResourceCategory::ApiList);
        let v7 = response(ResourceCategory::ApiList, "v7", "n7");
        state.record_received(&v7);

        let nack = state.on_rejected(&v7, "resource 0 is malformed").unwrap();
        let detail = nack.error_detail.unwrap();

        assert_eq!(detail.code, NACK_STATUS_CODE);
        assert_eq!(detail.message, "resource 0 is malformed");
        assert_eq!(nack.version_info, "");
    }

    #[test]
    fn test_nack_suppressed_before_first_response() {
        let mut state = state(ResourceCategory::KeyManagers);
        let v1 = response(ResourceCategory::KeyManagers, "v1", "n1");
        assert!(state.on_rejected(&v1, "stream reset").is_none());
        assert!(state.on_applied(&v1).is_none());
        assert_eq!(state.latest_acked_version(), "");
    }

    #[test]
    fn test_superseded_response_is_not_acked() {
        let mut state = state(ResourceCategory::Apis);
        let v1 = response(ResourceCategory::Apis, "v1", "n1");
        let v2 = response(ResourceCategory::Apis, "v2", "n2");
        state.record_received(&v1);
        state.on_applied(&v1).unwrap();

        state.record_received(&v2);
        assert!(state.on_applied(&v1).is_none());
        assert!(state.on_rejected(&v1, "late").is_none());
        assert_eq!(state.latest_acked_version(), "v1");

        let ack = state.on_applied(&v2).unwrap();
        assert_eq!(ack.version_info, "v2");
        assert_eq!(ack.response_nonce, "n2");
    }

    #[test]
    fn test_revoked_tokens_use_common_label() {
        let mut state = state(ResourceCategory::RevokedTokens);
        let v1 = response(ResourceCategory::RevokedTokens, "v1", "n1");
        state.record_received(&v1);

        let ack = state.on_applied(&v1).unwrap();
        assert_eq!(ack.node.label, enforcer_xds_protocol::COMMON_ENFORCER_LABEL);
        assert_eq!(ack.node.instance_id, "pod-1");
    }

    #[test]
    fn test_status_snapshot() {
        let mut state = state(ResourceCategory::ThrottleData);
        state.begin_connect();
        state.record_received(&response(ResourceCategory::ThrottleData, "v1", "n1"));
        state.on_stream_terminated();

        assert_eq!(
            state.status(),
            SessionStatus {
                category: ResourceCategory::ThrottleData,
                connection: ConnectionState::ErrorBackoff,
                latest_acked_version: String::new(),
                latest_received: Some(ReceivedResponse {
                    version: "v1".to_string(),
                    nonce: "n1".to_string(),
                }),
            }
        );
    }
}
