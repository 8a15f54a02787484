//! Frame header and frame types.
//!
//! A `Frame` is one message unit on the wire:
//! - 8-byte length prefix (unsigned, Big Endian)
//! - exactly that many payload bytes (UTF-8 JSON text)
//!
//! This module is pure data manipulation over in-memory buffers. Stream I/O
//! lives in [`crate::read_frame`] and [`crate::write_frame`].

use std::str::Utf8Error;

use bytes::{BufMut, Bytes};

use crate::errors::{ProtocolError, Result};

/// Fixed 8-byte length prefix (Big Endian network byte order).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameHeader {
    payload_size: [u8; 8],
}

impl FrameHeader {
    /// Size of the serialized header (8 bytes)
    pub const SIZE: usize = 8;

    /// Default upper bound on payload size (64 MiB).
    ///
    /// The wire format allows any `u64` length. Readers enforce a limit so a
    /// corrupt or hostile prefix cannot make the relay allocate unbounded
    /// memory.
    pub const DEFAULT_MAX_PAYLOAD_SIZE: u64 = 64 * 1024 * 1024;

    /// Create a header announcing `payload_size` bytes.
    #[must_use]
    pub fn new(payload_size: u64) -> Self {
        Self { payload_size: payload_size.to_be_bytes() }
    }

    /// Header from an exact 8-byte prefix.
    #[must_use]
    pub fn from_prefix(prefix: [u8; Self::SIZE]) -> Self {
        Self { payload_size: prefix }
    }

    /// Parse the header from the start of `bytes`.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::FrameTooShort` if fewer than 8 bytes are available
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let prefix: [u8; Self::SIZE] = bytes
            .get(..Self::SIZE)
            .and_then(|b| b.try_into().ok())
            .ok_or(ProtocolError::FrameTooShort { expected: Self::SIZE, actual: bytes.len() })?;

        Ok(Self::from_prefix(prefix))
    }

    /// Announced payload length in bytes.
    #[must_use]
    pub fn payload_size(&self) -> u64 {
        u64::from_be_bytes(self.payload_size)
    }

    /// Serialized prefix.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        self.payload_size
    }

    /// Announced payload length as `usize`, checked against `max_payload`.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::PayloadTooLarge` if the size exceeds `max_payload` or
    ///   does not fit in memory on this platform
    pub fn checked_payload_len(&self, max_payload: u64) -> Result<usize> {
        let size = self.payload_size();
        if size > max_payload {
            return Err(ProtocolError::PayloadTooLarge { size, max: max_payload });
        }

        usize::try_from(size).map_err(|_| ProtocolError::PayloadTooLarge { size, max: max_payload })
    }
}

/// Complete protocol frame.
///
/// Layout on the wire: `[FrameHeader: 8 bytes] + [payload: variable bytes]`
///
/// # Invariants
///
/// - Size Consistency: the header is always derived from `payload.len()`, so
///   a `Frame` can never announce a different size than it carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Raw payload bytes (UTF-8 JSON text when well-formed)
    pub payload: Bytes,
}

impl Frame {
    /// Create a frame around raw payload bytes.
    #[must_use]
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self { payload: payload.into() }
    }

    /// Create a frame carrying `text` encoded as UTF-8.
    #[must_use]
    pub fn text(text: &str) -> Self {
        Self::new(Bytes::copy_from_slice(text.as_bytes()))
    }

    /// Header announcing this frame's payload length.
    #[must_use]
    pub fn header(&self) -> FrameHeader {
        FrameHeader::new(self.payload.len() as u64)
    }

    /// Total size on the wire.
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        FrameHeader::SIZE + self.payload.len()
    }

    /// Encode frame into buffer.
    ///
    /// Writes: `[header (8 bytes)] + [payload (variable)]`
    pub fn encode(&self, dst: &mut impl BufMut) {
        dst.put_slice(&self.header().to_bytes());
        dst.put_slice(&self.payload);
    }

    /// Decode one frame from the start of `bytes`.
    ///
    /// Trailing bytes after the announced payload are ignored.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::FrameTooShort` if the prefix is incomplete
    /// - `ProtocolError::PayloadTooLarge` if the prefix exceeds `max_payload`
    /// - `ProtocolError::FrameTruncated` if fewer payload bytes are available
    ///   than announced
    ///
    /// # Security
    ///
    /// The size limit is checked before anything is copied, so a hostile
    /// prefix is rejected without allocating.
    pub fn decode(bytes: &[u8], max_payload: u64) -> Result<Self> {
        let header = FrameHeader::from_bytes(bytes)?;
        let payload_len = header.checked_payload_len(max_payload)?;

        let total_size = FrameHeader::SIZE.checked_add(payload_len).ok_or(
            ProtocolError::PayloadTooLarge { size: header.payload_size(), max: max_payload },
        )?;

        let payload = bytes.get(FrameHeader::SIZE..total_size).ok_or(
            ProtocolError::FrameTruncated {
                expected: payload_len,
                actual: bytes.len().saturating_sub(FrameHeader::SIZE),
            },
        )?;

        Ok(Self { payload: Bytes::copy_from_slice(payload) })
    }

    /// Payload decoded as UTF-8 with trailing whitespace stripped.
    ///
    /// # Errors
    ///
    /// Returns the UTF-8 error if the payload is not valid text. The frame is
    /// still structurally valid; deciding what to do with it is up to the
    /// caller.
    pub fn to_text(&self) -> std::result::Result<String, Utf8Error> {
        decode_text(&self.payload)
    }
}

/// Decode payload bytes as UTF-8 and strip trailing whitespace.
///
/// # Errors
///
/// Returns the UTF-8 error for invalid text.
pub fn decode_text(payload: &[u8]) -> std::result::Result<String, Utf8Error> {
    std::str::from_utf8(payload).map(|text| text.trim_end().to_owned())
}
