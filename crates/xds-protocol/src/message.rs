//! Discovery request/response messages.

use bytes::Bytes;
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::codec;
use crate::error::{ProtocolError, Result};
use crate::{NodeIdentity, ResourceCategory};

/// Status code carried by negative acknowledgements (gRPC `INTERNAL`).
pub const NACK_STATUS_CODE: i32 = 13;

/// Opaque, self-describing resource envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Any {
    /// Type URL describing how to decode `value`.
    pub type_url: String,
    /// Encoded resource body.
    pub value: Bytes,
}

impl Any {
    /// Encode `resource` and wrap it with `type_url`.
    ///
    /// # Errors
    ///
    /// Returns an error if the resource cannot be serialized.
    pub fn pack<T: Serialize>(type_url: impl Into<String>, resource: &T) -> Result<Self> {
        Ok(Self {
            type_url: type_url.into(),
            value: codec::encode(resource)?,
        })
    }

    /// Decode the body as `T`, checking that the envelope carries `expected_type_url`.
    ///
    /// # Errors
    ///
    /// Returns an error on a type URL mismatch or a malformed body.
    pub fn unpack<T: DeserializeOwned>(&self, expected_type_url: &str) -> Result<T> {
        if self.type_url != expected_type_url {
            return Err(ProtocolError::UnexpectedType {
                expected: expected_type_url.to_string(),
                actual: self.type_url.clone(),
            }
            .into());
        }

        codec::decode(&self.value)
    }
}

/// Error attached to a negative acknowledgement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetail {
    /// Status code.
    pub code: i32,
    /// Human readable reason the response was rejected.
    pub message: String,
}

/// Request sent by the data plane on a discovery stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryRequest {
    /// Requesting node.
    pub node: NodeIdentity,
    /// Category being requested.
    pub type_url: String,
    /// Last accepted version (ack) or last good version (nack).
    pub version_info: String,
    /// Nonce of the response being acknowledged; empty on the initial request.
    pub response_nonce: String,
    /// Present only on a negative acknowledgement.
    pub error_detail: Option<ErrorDetail>,
}

impl DiscoveryRequest {
    /// Initial request on a freshly opened stream.
    pub fn initial(
        node: &NodeIdentity,
        category: ResourceCategory,
        version_info: impl Into<String>,
    ) -> Self {
        Self {
            node: node.for_category(category),
            type_url: category.type_url().to_string(),
            version_info: version_info.into(),
            response_nonce: String::new(),
            error_detail: None,
        }
    }

    /// Acknowledge an applied response.
    pub fn ack(
        node: &NodeIdentity,
        category: ResourceCategory,
        version_info: impl Into<String>,
        nonce: impl Into<String>,
    ) -> Self {
        Self {
            node: node.for_category(category),
            type_url: category.type_url().to_string(),
            version_info: version_info.into(),
            response_nonce: nonce.into(),
            error_detail: None,
        }
    }

    /// Reject a response, pointing the server back at the last good version.
    pub fn nack(
        node: &NodeIdentity,
        category: ResourceCategory,
        last_good_version: impl Into<String>,
        nonce: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            node: node.for_category(category),
            type_url: category.type_url().to_string(),
            version_info: last_good_version.into(),
            response_nonce: nonce.into(),
            error_detail: Some(ErrorDetail {
                code: NACK_STATUS_CODE,
                message: reason.into(),
            }),
        }
    }

    /// Whether this request rejects a response.
    #[must_use]
    pub const fn is_nack(&self) -> bool {
        self.error_detail.is_some()
    }
}

/// Response pushed by the control plane.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryResponse {
    /// Version of this configuration snapshot.
    pub version_info: String,
    /// Server generated nonce identifying this response.
    pub nonce: String,
    /// Resources of `type_url`.
    pub resources: Vec<Any>,
    /// Category of the resources.
    pub type_url: String,
}

impl DiscoveryResponse {
    /// Build a response for `category` from already packed resources.
    pub fn new(
        category: ResourceCategory,
        version_info: impl Into<String>,
        nonce: impl Into<String>,
        resources: Vec<Any>,
    ) -> Self {
        Self {
            version_info: version_info.into(),
            nonce: nonce.into(),
            resources,
            type_url: category.type_url().to_string(),
        }
    }
}
