//! Message framing for stream transports.
//!
//! Every frame is `length (u32) | type (u8) | crc32 (u32) | payload`. Payloads
//! are CBOR: [`OpenStream`] for `Open`, [`DiscoveryRequest`] for `Request`,
//! [`DiscoveryResponse`] for `Response` and [`StreamStatus`] for `Status`.
//!
//! [`DiscoveryRequest`]: crate::DiscoveryRequest
//! [`DiscoveryResponse`]: crate::DiscoveryResponse

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use std::io;
use tokio_util::codec::{Decoder, Encoder};

use crate::codec;
use crate::error::{ProtocolError, Result};

/// Default maximum frame size, matching the default maximum message size (4MB).
pub const MAX_FRAME_SIZE: usize = 4 * 1024 * 1024;

/// Frame header size (4 bytes length + 1 byte type + 4 bytes checksum).
pub const FRAME_HEADER_SIZE: usize = 9;

/// Type of frame being sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameType {
    /// First client frame, selects the method and category.
    Open = 0x01,
    /// Discovery request from the client.
    Request = 0x02,
    /// Discovery response from the server.
    Response = 0x03,
    /// Terminal status from the server.
    Status = 0x04,
    /// Keep-alive, ignored by readers.
    Heartbeat = 0x05,
    /// Orderly close.
    Close = 0x06,
}

impl TryFrom<u8> for FrameType {
    type Error = ProtocolError;

    fn try_from(value: u8) -> std::result::Result<Self, ProtocolError> {
        match value {
            0x01 => Ok(Self::Open),
            0x02 => Ok(Self::Request),
            0x03 => Ok(Self::Response),
            0x04 => Ok(Self::Status),
            0x05 => Ok(Self::Heartbeat),
            0x06 => Ok(Self::Close),
            _ => Err(ProtocolError::InvalidFrame(format!(
                "Unknown frame type: {value:#x}"
            ))),
        }
    }
}

/// How the client intends to use a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OpenMethod {
    /// Long-lived bidirectional discovery stream.
    Stream,
    /// Single request, single response.
    Fetch,
}

/// Payload of an `Open` frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenStream {
    /// Requested method.
    pub method: OpenMethod,
    /// Category served on this connection.
    pub type_url: String,
}

/// Payload of a `Status` frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamStatus {
    /// Status code, zero for success.
    pub code: i32,
    /// Description of the status.
    pub message: String,
}

/// A frame in the wire protocol.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Type of this frame.
    pub frame_type: FrameType,
    /// Frame payload.
    pub payload: Bytes,
    /// Optional checksum for integrity.
    pub checksum: Option<u32>,
}

impl Frame {
    /// Create a new frame.
    pub fn new(frame_type: FrameType, payload: Bytes) -> Self {
        let checksum = Some(crc32fast::hash(&payload));
        Self {
            frame_type,
            payload,
            checksum,
        }
    }

    /// Create a frame whose payload is the CBOR encoding of `value`.
    ///
    /// # Errors
    ///
    /// Returns an error if `value` cannot be serialized.
    pub fn encode<T: Serialize>(frame_type: FrameType, value: &T) -> Result<Self> {
        Ok(Self::new(frame_type, codec::encode(value)?))
    }

    /// Create a payload-less heartbeat frame.
    #[must_use]
    pub fn heartbeat() -> Self {
        Self::new(FrameType::Heartbeat, Bytes::new())
    }

    /// Create a payload-less close frame.
    #[must_use]
    pub fn close() -> Self {
        Self::new(FrameType::Close, Bytes::new())
    }

    /// Decode the CBOR payload.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload is not a valid `T`.
    pub fn decode<T: serde::de::DeserializeOwned>(&self) -> Result<T> {
        codec::decode(&self.payload)
    }

    /// Verify the checksum if present.
    ///
    /// # Errors
    ///
    /// Returns an error if the checksum is invalid.
    pub fn verify_checksum(&self) -> Result<()> {
        if let Some(expected) = self.checksum {
            let actual = crc32fast::hash(&self.payload);
            if expected != actual {
                return Err(ProtocolError::ChecksumMismatch { expected, actual }.into());
            }
        }
        Ok(())
    }
}

/// Codec for encoding/decoding frames.
pub struct FrameCodec {
    max_frame_size: usize,
    verify_checksum: bool,
}

impl FrameCodec {
    /// Create a new frame codec.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            max_frame_size: MAX_FRAME_SIZE,
            verify_checksum: true,
        }
    }

    /// Create a codec with custom max frame size.
    #[must_use]
    pub const fn with_max_frame_size(mut self, size: usize) -> Self {
        self.max_frame_size = size;
        self
    }

    /// Disable checksum verification.
    #[must_use]
    pub const fn without_checksum_verification(mut self) -> Self {
        self.verify_checksum = false;
        self
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = io::Error;

    fn decode(
        &mut self,
        buf: &mut BytesMut,
    ) -> std::result::Result<Option<Self::Item>, Self::Error> {
        if buf.len() < FRAME_HEADER_SIZE {
            return Ok(None);
        }

        // Peek the header; nothing is consumed until the whole frame is buffered
        let mut header = &buf[..FRAME_HEADER_SIZE];
        let payload_len = header.get_u32() as usize;
        let frame_type_byte = header.get_u8();
        let checksum = header.get_u32();

        if payload_len > self.max_frame_size {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                ProtocolError::FrameTooLarge {
                    size: payload_len,
                    max: self.max_frame_size,
                },
            ));
        }

        let frame_len = FRAME_HEADER_SIZE + payload_len;
        if buf.len() < frame_len {
            buf.reserve(frame_len - buf.len());
            return Ok(None);
        }

        let frame_type = FrameType::try_from(frame_type_byte)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

        buf.advance(FRAME_HEADER_SIZE);
        let payload = buf.split_to(payload_len).freeze();

        let frame = Frame {
            frame_type,
            payload,
            checksum: if checksum != 0 { Some(checksum) } else { None },
        };

        if self.verify_checksum {
            frame
                .verify_checksum()
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        }

        Ok(Some(frame))
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = io::Error;

    fn encode(&mut self, frame: Frame, buf: &mut BytesMut) -> std::result::Result<(), Self::Error> {
        let payload_len = frame.payload.len();

        if payload_len > self.max_frame_size {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                ProtocolError::FrameTooLarge {
                    size: payload_len,
                    max: self.max_frame_size,
                },
            ));
        }

        buf.reserve(FRAME_HEADER_SIZE + payload_len);

        #[allow(clippy::cast_possible_truncation)]
        buf.put_u32(payload_len as u32);
        buf.put_u8(frame.frame_type as u8);
        buf.put_u32(frame.checksum.unwrap_or(0));
        buf.put(frame.payload);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{DiscoveryResponse, ResourceCategory};

    #[test]
    fn test_response_frame_decodes_after_split_delivery() {
        let mut codec = FrameCodec::new();
        let mut wire = BytesMut::new();

        let response = DiscoveryResponse::new(ResourceCategory::RevokedTokens, "v1", "n1", vec![]);
        codec
            .encode(Frame::encode(FrameType::Response, &response).unwrap(), &mut wire)
            .unwrap();

        // Deliver the bytes in two chunks
        let tail = wire.split_off(FRAME_HEADER_SIZE + 2);
        let mut buf = wire;
        assert!(codec.decode(&mut buf).unwrap().is_none());

        buf.unsplit(tail);
        let frame = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(frame.frame_type, FrameType::Response);
        assert_eq!(frame.decode::<DiscoveryResponse>().unwrap(), response);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_partial_header() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::new();

        buf.put_u32(100);
        buf.put_u8(FrameType::Request as u8);

        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_checksum_verification() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::new();

        let payload = b"not really cbor";
        #[allow(clippy::cast_possible_truncation)]
        buf.put_u32(payload.len() as u32);
        buf.put_u8(FrameType::Request as u8);
        buf.put_u32(12345);
        buf.put_slice(payload);

        assert!(codec.decode(&mut buf).is_err());
    }

    #[test]
    fn test_oversized_frame_rejected() {
        let mut codec = FrameCodec::new().with_max_frame_size(8);
        let mut buf = BytesMut::new();

        buf.put_u32(9);
        buf.put_u8(FrameType::Response as u8);
        buf.put_u32(0);

        let err = codec.decode(&mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);

        let mut out = BytesMut::new();
        assert!(
            codec
                .encode(Frame::new(FrameType::Request, Bytes::from_static(&[0; 9])), &mut out)
                .is_err()
        );
    }

    #[test]
    fn test_unknown_frame_type() {
        let mut codec = FrameCodec::new().without_checksum_verification();
        let mut buf = BytesMut::new();

        buf.put_u32(0);
        buf.put_u8(0x7f);
        buf.put_u32(0);

        assert!(codec.decode(&mut buf).is_err());
    }
}
