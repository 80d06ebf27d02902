//! Wire-level types for the enforcer's discovery protocol.
//!
//! This crate provides:
//! - Node identity sent on every discovery request
//! - Resource categories and their type URLs
//! - Discovery request/response messages and the `Any` resource envelope
//! - CBOR encoding for messages and resource bodies
//! - Length-prefixed, checksummed framing for stream transports

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod category;
pub mod codec;
pub mod error;
pub mod framing;
pub mod identity;
pub mod message;

pub use category::ResourceCategory;
pub use error::{CodecError, Error, ProtocolError, Result};
pub use framing::{Frame, FrameCodec, FrameType, OpenMethod, OpenStream, StreamStatus};
pub use identity::{COMMON_ENFORCER_LABEL, NodeIdentity};
pub use message::{Any, DiscoveryRequest, DiscoveryResponse, ErrorDetail, NACK_STATUS_CODE};

pub use bytes::Bytes;
