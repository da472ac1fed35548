//! # Push Events
//!
//! Purpose: Decode server-initiated push frames and carry the callbacks that
//! receive them.
//!
//! ```text
//! Push frame:
//! +--------+---------------+-------------+-----------+---------+
//! | tag:1B | channel_len:1B| value_len:W | channel   | value   |
//! +--------+---------------+-------------+-----------+---------+
//! ```

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;

use crate::error::{ProtocolError, ProtocolResult};
use crate::kinds::TAG_EVENT;
use crate::width::IntegerWidth;

/// A message delivered to a channel subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushEvent {
    pub channel: String,
    pub value: Bytes,
}

impl PushEvent {
    /// Decodes exactly one complete push frame.
    pub fn decode(frame: &[u8], width: IntegerWidth) -> ProtocolResult<Self> {
        let header = 2 + width.bytes();
        let tag = *frame.first().ok_or(ProtocolError::Truncated {
            offset: 0,
            needed: 1,
            len: 0,
        })?;
        if tag != TAG_EVENT {
            return Err(ProtocolError::NotAnEvent(tag));
        }
        if frame.len() < header {
            return Err(ProtocolError::Truncated {
                offset: 0,
                needed: header,
                len: frame.len(),
            });
        }

        let channel_len = frame[1] as usize;
        let value_len = width.read(&frame[2..]).unwrap_or(0) as usize;
        let expected = header + channel_len + value_len;
        if frame.len() < expected {
            return Err(ProtocolError::Truncated {
                offset: header,
                needed: channel_len + value_len,
                len: frame.len(),
            });
        }
        if frame.len() > expected {
            return Err(ProtocolError::TrailingBytes {
                extra: frame.len() - expected,
            });
        }

        let channel = &frame[header..header + channel_len];
        let value = &frame[header + channel_len..expected];
        Ok(PushEvent {
            channel: String::from_utf8_lossy(channel).into_owned(),
            value: Bytes::copy_from_slice(value),
        })
    }
}

/// Callback invoked for every push event on a subscribed channel.
///
/// Cloning shares the same closure; equality is identity of the closure.
#[derive(Clone)]
pub struct Subscriber(Arc<dyn Fn(&PushEvent) + Send + Sync>);

impl Subscriber {
    pub fn new<F>(callback: F) -> Self
    where
        F: Fn(&PushEvent) + Send + Sync + 'static,
    {
        Subscriber(Arc::new(callback))
    }

    /// Hands the event to the callback.
    #[inline]
    pub fn notify(&self, event: &PushEvent) {
        (self.0)(event)
    }
}

impl PartialEq for Subscriber {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for Subscriber {}

impl fmt::Debug for Subscriber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Subscriber(..)")
    }
}
