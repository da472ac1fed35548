//! # Request Encoding
//!
//! Purpose: Turn typed requests into their exact wire layout.
//!
//! ## Design Principles
//! 1. **One Variant per Kind**: Each variant carries only what its layout needs.
//! 2. **Buffer Reuse**: Callers pass the output buffer so one submit can encode
//!    a whole batch into a single write.
//! 3. **All-or-Nothing**: A request that fails validation appends nothing.
//!
//! ## Layouts (`W` = configured integer width)
//!
//! ```text
//! INSERT   tag | quota:W | ttl_type:1 | ttl:W | key_len:1 | key
//! SET      tag | ttl_type:1 | ttl:W | key_len:1 | value_len:W | key | value
//! UPDATE   tag | attribute:1 | change:1 | value:W | key_len:1 | key
//! QUERY, GET, PURGE, STAT            tag | key_len:1 | key
//! SUBSCRIBE, UNSUBSCRIBE, CHANNEL    tag | channel_len:1 | channel
//! PUBLISH, EVENT                     tag | channel_len:1 | value_len:W | channel | value
//! CONNECTION                         tag | id:16
//! LIST, INFO, STATS, CONNECTIONS, CHANNELS, WHOAMI    tag
//! ```

use std::fmt;
use std::str::FromStr;

use bytes::{BufMut, Bytes};

use crate::error::{ProtocolError, ProtocolResult};
use crate::event::Subscriber;
use crate::kinds::{Attribute, Change, RequestKind, ResponseKind, TtlType};
use crate::width::IntegerWidth;

/// Maximum key or channel length (1-byte length prefix).
pub const MAX_NAME_LEN: usize = u8::MAX as usize;

/// 16-byte server-assigned connection identifier.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ConnectionId(pub [u8; 16]);

impl ConnectionId {
    /// Parses 32 hex characters.
    pub fn from_hex(hex: &str) -> ProtocolResult<Self> {
        let hex = hex.as_bytes();
        if hex.len() != 32 {
            return Err(ProtocolError::InvalidConnectionId);
        }
        let mut id = [0u8; 16];
        for (idx, pair) in hex.chunks_exact(2).enumerate() {
            let high = hex_digit(pair[0]).ok_or(ProtocolError::InvalidConnectionId)?;
            let low = hex_digit(pair[1]).ok_or(ProtocolError::InvalidConnectionId)?;
            id[idx] = (high << 4) | low;
        }
        Ok(ConnectionId(id))
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

fn hex_digit(byte: u8) -> Option<u8> {
    match byte {
        b'0'..=b'9' => Some(byte - b'0'),
        b'a'..=b'f' => Some(byte - b'a' + 10),
        b'A'..=b'F' => Some(byte - b'A' + 10),
        _ => None,
    }
}

impl FromStr for ConnectionId {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ConnectionId::from_hex(s)
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

impl fmt::Debug for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ConnectionId({})", self)
    }
}

/// A typed protocol request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Insert {
        key: String,
        quota: u64,
        ttl_type: TtlType,
        ttl: u64,
    },
    Query {
        key: String,
    },
    Update {
        key: String,
        attribute: Attribute,
        change: Change,
        value: u64,
    },
    Purge {
        key: String,
    },
    Set {
        key: String,
        value: Bytes,
        ttl_type: TtlType,
        ttl: u64,
    },
    Get {
        key: String,
    },
    List,
    Info,
    Stat {
        key: String,
    },
    Stats,
    /// The subscriber is kept client-side; only the channel is sent.
    Subscribe {
        channel: String,
        subscriber: Subscriber,
    },
    Unsubscribe {
        channel: String,
    },
    Publish {
        channel: String,
        value: Bytes,
    },
    Connections,
    Connection {
        id: ConnectionId,
    },
    Channels,
    Channel {
        channel: String,
    },
    WhoAmI,
    Event {
        channel: String,
        value: Bytes,
    },
}

impl Request {
    /// Kind of this request (its tag).
    pub fn kind(&self) -> RequestKind {
        match self {
            Request::Insert { .. } => RequestKind::Insert,
            Request::Query { .. } => RequestKind::Query,
            Request::Update { .. } => RequestKind::Update,
            Request::Purge { .. } => RequestKind::Purge,
            Request::Set { .. } => RequestKind::Set,
            Request::Get { .. } => RequestKind::Get,
            Request::List => RequestKind::List,
            Request::Info => RequestKind::Info,
            Request::Stat { .. } => RequestKind::Stat,
            Request::Stats => RequestKind::Stats,
            Request::Subscribe { .. } => RequestKind::Subscribe,
            Request::Unsubscribe { .. } => RequestKind::Unsubscribe,
            Request::Publish { .. } => RequestKind::Publish,
            Request::Connections => RequestKind::Connections,
            Request::Connection { .. } => RequestKind::Connection,
            Request::Channels => RequestKind::Channels,
            Request::Channel { .. } => RequestKind::Channel,
            Request::WhoAmI => RequestKind::WhoAmI,
            Request::Event { .. } => RequestKind::Event,
        }
    }

    /// Layout the server answers this request with.
    #[inline]
    pub fn response_kind(&self) -> ResponseKind {
        self.kind().response_kind()
    }

    /// Appends the wire form of this request to `out`.
    ///
    /// # Errors
    /// Returns a `ProtocolError` if a name exceeds 255 bytes or an integer does
    /// not fit `width`. `out` is left untouched on error.
    pub fn encode(&self, width: IntegerWidth, out: &mut Vec<u8>) -> ProtocolResult<()> {
        let start = out.len();
        let result = self.encode_inner(width, out);
        if result.is_err() {
            out.truncate(start);
        }
        result
    }

    /// Encodes into a fresh buffer.
    pub fn to_bytes(&self, width: IntegerWidth) -> ProtocolResult<Vec<u8>> {
        let mut out = Vec::with_capacity(32);
        self.encode(width, &mut out)?;
        Ok(out)
    }

    fn encode_inner(&self, width: IntegerWidth, out: &mut Vec<u8>) -> ProtocolResult<()> {
        out.put_u8(self.kind().as_u8());
        match self {
            Request::Insert {
                key,
                quota,
                ttl_type,
                ttl,
            } => {
                let key = name_bytes("key", key)?;
                width.put(out, "quota", *quota)?;
                out.put_u8(ttl_type.as_u8());
                width.put(out, "ttl", *ttl)?;
                put_name(out, key);
            }
            Request::Set {
                key,
                value,
                ttl_type,
                ttl,
            } => {
                let key = name_bytes("key", key)?;
                out.put_u8(ttl_type.as_u8());
                width.put(out, "ttl", *ttl)?;
                out.put_u8(key.len() as u8);
                width.put(out, "value length", value.len() as u64)?;
                out.put_slice(key);
                out.put_slice(value);
            }
            Request::Update {
                key,
                attribute,
                change,
                value,
            } => {
                let key = name_bytes("key", key)?;
                out.put_u8(*attribute as u8);
                out.put_u8(*change as u8);
                width.put(out, "value", *value)?;
                put_name(out, key);
            }
            Request::Query { key }
            | Request::Get { key }
            | Request::Purge { key }
            | Request::Stat { key } => {
                put_name(out, name_bytes("key", key)?);
            }
            Request::Subscribe { channel, .. }
            | Request::Unsubscribe { channel }
            | Request::Channel { channel } => {
                put_name(out, name_bytes("channel", channel)?);
            }
            Request::Publish { channel, value } | Request::Event { channel, value } => {
                let channel = name_bytes("channel", channel)?;
                out.put_u8(channel.len() as u8);
                width.put(out, "value length", value.len() as u64)?;
                out.put_slice(channel);
                out.put_slice(value);
            }
            Request::Connection { id } => {
                out.put_slice(id.as_bytes());
            }
            Request::List
            | Request::Info
            | Request::Stats
            | Request::Connections
            | Request::Channels
            | Request::WhoAmI => {}
        }
        Ok(())
    }
}

fn name_bytes<'a>(field: &'static str, name: &'a str) -> ProtocolResult<&'a [u8]> {
    if name.len() > MAX_NAME_LEN {
        return Err(ProtocolError::NameTooLong {
            field,
            len: name.len(),
        });
    }
    Ok(name.as_bytes())
}

fn put_name(out: &mut Vec<u8>, name: &[u8]) {
    out.put_u8(name.len() as u8);
    out.put_slice(name);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(request: &Request, width: IntegerWidth) -> Vec<u8> {
        request.to_bytes(width).unwrap()
    }

    #[test]
    fn test_insert_layout_uint16() {
        let request = Request::Insert {
            key: "k".into(),
            quota: 7,
            ttl_type: TtlType::Seconds,
            ttl: 60,
        };
        assert_eq!(
            encode(&request, IntegerWidth::U16),
            vec![0x01, 0x07, 0x00, 0x04, 0x3c, 0x00, 0x01, b'k']
        );
    }

    #[test]
    fn test_set_layout() {
        let request = Request::Set {
            key: "ab".into(),
            value: Bytes::from_static(b"xyz"),
            ttl_type: TtlType::Milliseconds,
            ttl: 5,
        };
        assert_eq!(
            encode(&request, IntegerWidth::U8),
            vec![0x05, 0x03, 0x05, 0x02, 0x03, b'a', b'b', b'x', b'y', b'z']
        );
    }

    #[test]
    fn test_update_layout_uint32() {
        let request = Request::Update {
            key: "k".into(),
            attribute: Attribute::Quota,
            change: Change::Decrease,
            value: 7,
        };
        assert_eq!(
            encode(&request, IntegerWidth::U32),
            vec![0x03, 0x00, 0x02, 0x07, 0x00, 0x00, 0x00, 0x01, b'k']
        );
    }

    #[test]
    fn test_key_and_channel_layouts() {
        for (request, tag) in [
            (Request::Query { key: "ab".into() }, 0x02),
            (Request::Get { key: "ab".into() }, 0x06),
            (Request::Purge { key: "ab".into() }, 0x04),
            (Request::Stat { key: "ab".into() }, 0x09),
            (Request::Unsubscribe { channel: "ab".into() }, 0x12),
            (Request::Channel { channel: "ab".into() }, 0x17),
        ] {
            assert_eq!(encode(&request, IntegerWidth::U64), vec![tag, 0x02, b'a', b'b']);
        }

        let subscribe = Request::Subscribe {
            channel: "ab".into(),
            subscriber: Subscriber::new(|_| {}),
        };
        assert_eq!(encode(&subscribe, IntegerWidth::U8), vec![0x11, 0x02, b'a', b'b']);
    }

    #[test]
    fn test_publish_and_event_layout() {
        let publish = Request::Publish {
            channel: "c".into(),
            value: Bytes::from_static(b"hi"),
        };
        assert_eq!(
            encode(&publish, IntegerWidth::U16),
            vec![0x13, 0x01, 0x02, 0x00, b'c', b'h', b'i']
        );
        let event = Request::Event {
            channel: "c".into(),
            value: Bytes::new(),
        };
        assert_eq!(encode(&event, IntegerWidth::U8), vec![0x19, 0x01, 0x00, b'c']);
    }

    #[test]
    fn test_tag_only_and_connection_layouts() {
        for request in [
            Request::List,
            Request::Info,
            Request::Stats,
            Request::Connections,
            Request::Channels,
            Request::WhoAmI,
        ] {
            let bytes = encode(&request, IntegerWidth::U32);
            assert_eq!(bytes, vec![request.kind().as_u8()]);
        }

        let id = ConnectionId::from_hex("000102030405060708090a0b0c0d0e0f").unwrap();
        let bytes = encode(&Request::Connection { id }, IntegerWidth::U8);
        assert_eq!(bytes.len(), 17);
        assert_eq!(bytes[0], 0x15);
        assert_eq!(&bytes[1..], &id.0);
    }

    #[test]
    fn test_encode_failure_leaves_buffer_untouched() {
        let mut out = vec![0xaa];
        let err = Request::Insert {
            key: "k".into(),
            quota: 300,
            ttl_type: TtlType::Seconds,
            ttl: 1,
        }
        .encode(IntegerWidth::U8, &mut out)
        .unwrap_err();
        assert!(matches!(err, ProtocolError::IntegerOverflow { field: "quota", .. }));
        assert_eq!(out, vec![0xaa]);

        let long = "x".repeat(256);
        let err = Request::Get { key: long }.encode(IntegerWidth::U8, &mut out).unwrap_err();
        assert_eq!(err, ProtocolError::NameTooLong { field: "key", len: 256 });
        assert_eq!(out, vec![0xaa]);
    }

    #[test]
    fn test_connection_id_hex() {
        let hex = "00ff10203040506070809000a0b0c0d0";
        let id: ConnectionId = hex.parse().unwrap();
        assert_eq!(id.to_string(), hex);
        assert_eq!(ConnectionId::from_hex("abc"), Err(ProtocolError::InvalidConnectionId));
        assert_eq!(
            ConnectionId::from_hex("zz0102030405060708090a0b0c0d0e0f"),
            Err(ProtocolError::InvalidConnectionId)
        );
    }
}
