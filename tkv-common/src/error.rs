//! # Protocol Errors
//!
//! Purpose: Describe every way a request can fail to encode or a bounded
//! response frame can fail to decode.
//!
//! Decoding errors never carry framing consequences: by the time a decoder
//! runs, the frame boundary is already known, so the caller can skip the frame
//! and keep reading.

use thiserror::Error;

/// Result type for encode/decode operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors produced by the codec leaves.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// A key or channel name does not fit its 1-byte length prefix.
    #[error("{field} is {len} bytes, maximum is 255")]
    NameTooLong { field: &'static str, len: usize },

    /// An integer field is larger than the configured width can carry.
    #[error("{field} value {value} does not fit in {width} byte(s)")]
    IntegerOverflow {
        field: &'static str,
        value: u64,
        width: usize,
    },

    /// Connection ids must be exactly 16 bytes (32 hex characters).
    #[error("invalid connection id")]
    InvalidConnectionId,

    /// The frame ended before a field could be read.
    #[error("truncated frame: needed {needed} bytes at offset {offset}, frame is {len} bytes")]
    Truncated {
        offset: usize,
        needed: usize,
        len: usize,
    },

    /// The frame had more bytes than its layout accounts for.
    #[error("frame has {extra} trailing byte(s)")]
    TrailingBytes { extra: usize },

    /// The leading status byte was neither 0x00 nor 0x01.
    #[error("invalid status byte 0x{0:02x}")]
    InvalidStatus(u8),

    /// Unknown TTL type discriminant.
    #[error("unknown ttl type 0x{0:02x}")]
    UnknownTtlType(u8),

    /// Unknown key type discriminant.
    #[error("unknown key type 0x{0:02x}")]
    UnknownKeyType(u8),

    /// A push frame did not start with the event tag.
    #[error("not an event frame (tag 0x{0:02x})")]
    NotAnEvent(u8),
}
