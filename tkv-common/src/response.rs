//! # Response Decoding
//!
//! Purpose: Turn one complete, correctly bounded response frame into a typed
//! record. Boundary detection is not done here; callers slice the frame first.
//!
//! ## Design Principles
//! 1. **Exact Frames**: A frame must be consumed byte-for-byte; short frames
//!    and trailing bytes are both errors.
//! 2. **Failure Shapes**: Kinds with a failure shape decode the lone `0x00`
//!    byte to `success: false` with empty payload.
//! 3. **Symmetric Writer**: `Response::encode` writes the server-side layout so
//!    mock servers and tests can produce byte-exact frames.
//!
//! ## Layouts (`W` = configured integer width, `8` = always 8 bytes)
//!
//! ```text
//! STATUS      status:1
//! QUERY       0x00 | status:1 quota:W ttl_type:1 ttl:W
//! GET         0x00 | status:1 ttl_type:1 ttl:W value_len:W value
//! STAT        0x00 | status:1 reads_pm:8 writes_pm:8 reads:8 writes:8          (33B)
//! CONNECTION  0x00 | status:1 record:237                                      (238B)
//! CHANNEL     status:1 count:8 { id:16 subscribed_at:8 read:8 write:8 }*count
//! INFO        status:1 counters:52*8 version:16                               (433B)
//! WHOAMI      status:1 id:16                                                  (17B)
//!
//! LIST / STATS / CHANNELS / CONNECTIONS:
//! +----------+-------------+--------------------------------------------------+
//! | status:1 | fragments:8 | fragment*                                        |
//! +----------+-------------+--------------------------------------------------+
//! fragment = id:8 | count:8 | record*count | name bytes, one run per record
//!
//! LIST record      key_len:1 key_type:1 ttl_type:1 expires_at:8 bytes_used:W  (11+W)
//! STATS record     key_len:1 reads_pm:8 writes_pm:8 reads:8 writes:8          (33B)
//! CHANNELS record  channel_len:1 read:8 write:8 connections:8                 (25B)
//! CONNECTIONS record = connection record, no trailing names                   (237B)
//! ```

use bytes::{BufMut, Bytes};

use crate::error::{ProtocolError, ProtocolResult};
use crate::kinds::{KeyType, ResponseKind, TtlType, STATUS_FAILURE, STATUS_SUCCESS};
use crate::request::ConnectionId;
use crate::width::IntegerWidth;

/// WHOAMI frame length.
pub const WHOAMI_LEN: usize = 17;
/// INFO frame length.
pub const INFO_LEN: usize = 433;
/// Successful STAT frame length.
pub const STAT_LEN: usize = 33;
/// Successful CONNECTION frame length.
pub const CONNECTION_LEN: usize = 1 + CONNECTION_RECORD_LEN;
/// One connection record inside CONNECTION / CONNECTIONS.
pub const CONNECTION_RECORD_LEN: usize = 237;
/// One subscriber entry inside CHANNEL.
pub const CHANNEL_SUBSCRIBER_LEN: usize = 40;
/// Fixed record of a STATS item.
pub const STATS_RECORD_LEN: usize = 33;
/// Fixed record of a CHANNELS item.
pub const CHANNELS_RECORD_LEN: usize = 25;
/// Status byte plus an 8-byte count.
pub const COUNTED_HEADER_LEN: usize = 9;
/// Fragment id plus item count.
pub const FRAGMENT_HEADER_LEN: usize = 16;

const VERSION_LEN: usize = 16;
const IP_LEN: usize = 16;

/// Fixed record size of a LIST item; `bytes_used` is width-sized.
#[inline]
pub const fn list_record_len(width: IntegerWidth) -> usize {
    11 + width.bytes()
}

/// Single status byte responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatusResponse {
    pub success: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QueryResponse {
    pub success: bool,
    pub quota: u64,
    pub ttl_type: TtlType,
    pub ttl: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GetResponse {
    pub success: bool,
    pub ttl_type: TtlType,
    pub ttl: u64,
    pub value: Bytes,
}

/// One key of a LIST response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListItem {
    pub key: String,
    pub key_type: KeyType,
    pub ttl_type: TtlType,
    pub expires_at: u64,
    pub bytes_used: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ListResponse {
    pub success: bool,
    pub keys: Vec<ListItem>,
}

/// A running total paired with its last-minute rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rate {
    pub total: u64,
    pub per_minute: u64,
}

/// Server-wide counters.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct InfoResponse {
    pub success: bool,
    pub timestamp: u64,
    pub requests: Rate,
    pub insert_requests: Rate,
    pub query_requests: Rate,
    pub update_requests: Rate,
    pub purge_requests: Rate,
    pub get_requests: Rate,
    pub set_requests: Rate,
    pub list_requests: Rate,
    pub info_requests: Rate,
    pub stats_requests: Rate,
    pub stat_requests: Rate,
    pub subscribe_requests: Rate,
    pub unsubscribe_requests: Rate,
    pub publish_requests: Rate,
    pub channel_requests: Rate,
    pub channels_requests: Rate,
    pub whoami_requests: Rate,
    pub connection_requests: Rate,
    pub connections_requests: Rate,
    pub read_bytes: Rate,
    pub write_bytes: Rate,
    pub total_keys: u64,
    pub total_counters: u64,
    pub total_buffers: u64,
    pub allocated_bytes_on_counters: u64,
    pub allocated_bytes_on_buffers: u64,
    pub total_subscriptions: u64,
    pub total_channels: u64,
    pub startup_timestamp: u64,
    pub total_connections: u64,
    pub version: String,
}

impl InfoResponse {
    fn rates(&self) -> [&Rate; 21] {
        [
            &self.requests,
            &self.insert_requests,
            &self.query_requests,
            &self.update_requests,
            &self.purge_requests,
            &self.get_requests,
            &self.set_requests,
            &self.list_requests,
            &self.info_requests,
            &self.stats_requests,
            &self.stat_requests,
            &self.subscribe_requests,
            &self.unsubscribe_requests,
            &self.publish_requests,
            &self.channel_requests,
            &self.channels_requests,
            &self.whoami_requests,
            &self.connection_requests,
            &self.connections_requests,
            &self.read_bytes,
            &self.write_bytes,
        ]
    }

    fn rates_mut(&mut self) -> [&mut Rate; 21] {
        [
            &mut self.requests,
            &mut self.insert_requests,
            &mut self.query_requests,
            &mut self.update_requests,
            &mut self.purge_requests,
            &mut self.get_requests,
            &mut self.set_requests,
            &mut self.list_requests,
            &mut self.info_requests,
            &mut self.stats_requests,
            &mut self.stat_requests,
            &mut self.subscribe_requests,
            &mut self.unsubscribe_requests,
            &mut self.publish_requests,
            &mut self.channel_requests,
            &mut self.channels_requests,
            &mut self.whoami_requests,
            &mut self.connection_requests,
            &mut self.connections_requests,
            &mut self.read_bytes,
            &mut self.write_bytes,
        ]
    }

    fn totals(&self) -> [u64; 9] {
        [
            self.total_keys,
            self.total_counters,
            self.total_buffers,
            self.allocated_bytes_on_counters,
            self.allocated_bytes_on_buffers,
            self.total_subscriptions,
            self.total_channels,
            self.startup_timestamp,
            self.total_connections,
        ]
    }

    fn totals_mut(&mut self) -> [&mut u64; 9] {
        [
            &mut self.total_keys,
            &mut self.total_counters,
            &mut self.total_buffers,
            &mut self.allocated_bytes_on_counters,
            &mut self.allocated_bytes_on_buffers,
            &mut self.total_subscriptions,
            &mut self.total_channels,
            &mut self.startup_timestamp,
            &mut self.total_connections,
        ]
    }
}

/// Read/write statistics of one key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct KeyStats {
    pub reads_per_minute: u64,
    pub writes_per_minute: u64,
    pub total_reads: u64,
    pub total_writes: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatResponse {
    pub success: bool,
    pub stats: Option<KeyStats>,
}

/// One key of a STATS response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatsItem {
    pub key: String,
    pub stats: KeyStats,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StatsResponse {
    pub success: bool,
    pub keys: Vec<StatsItem>,
}

/// Per-kind request counters of one connection, in wire order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RequestCounts {
    pub insert: u64,
    pub set: u64,
    pub query: u64,
    pub get: u64,
    pub update: u64,
    pub purge: u64,
    pub list: u64,
    pub info: u64,
    pub stat: u64,
    pub stats: u64,
    pub publish: u64,
    pub subscribe: u64,
    pub unsubscribe: u64,
    pub connections: u64,
    pub connection: u64,
    pub channels: u64,
    pub channel: u64,
    pub whoami: u64,
}

impl RequestCounts {
    fn as_array(&self) -> [u64; 18] {
        [
            self.insert,
            self.set,
            self.query,
            self.get,
            self.update,
            self.purge,
            self.list,
            self.info,
            self.stat,
            self.stats,
            self.publish,
            self.subscribe,
            self.unsubscribe,
            self.connections,
            self.connection,
            self.channels,
            self.channel,
            self.whoami,
        ]
    }

    fn from_array(v: [u64; 18]) -> Self {
        RequestCounts {
            insert: v[0],
            set: v[1],
            query: v[2],
            get: v[3],
            update: v[4],
            purge: v[5],
            list: v[6],
            info: v[7],
            stat: v[8],
            stats: v[9],
            publish: v[10],
            subscribe: v[11],
            unsubscribe: v[12],
            connections: v[13],
            connection: v[14],
            channels: v[15],
            channel: v[16],
            whoami: v[17],
        }
    }
}

/// A server-side view of one client connection (237 bytes on the wire).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ConnectionRecord {
    pub id: ConnectionId,
    pub connection_type: u8,
    pub kind: u8,
    pub ip_version: u8,
    pub ip: String,
    pub port: u16,
    pub connected_at: u64,
    pub read_bytes: u64,
    pub write_bytes: u64,
    pub published_bytes: u64,
    pub received_bytes: u64,
    pub allocated_bytes: u64,
    pub consumed_bytes: u64,
    pub requests: RequestCounts,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ConnectionsResponse {
    pub success: bool,
    pub connections: Vec<ConnectionRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ConnectionResponse {
    pub success: bool,
    pub connection: Option<ConnectionRecord>,
}

/// One channel of a CHANNELS response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelItem {
    pub channel: String,
    pub read_bytes: u64,
    pub write_bytes: u64,
    pub connections: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ChannelsResponse {
    pub success: bool,
    pub channels: Vec<ChannelItem>,
}

/// One subscriber of a CHANNEL response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelSubscriber {
    pub id: ConnectionId,
    pub subscribed_at: u64,
    pub read_bytes: u64,
    pub write_bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ChannelResponse {
    pub success: bool,
    pub connections: Vec<ChannelSubscriber>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WhoAmIResponse {
    pub success: bool,
    pub id: ConnectionId,
}

/// A decoded response, one variant per [`ResponseKind`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Status(StatusResponse),
    Query(QueryResponse),
    Get(GetResponse),
    List(ListResponse),
    Info(InfoResponse),
    Stat(StatResponse),
    Stats(StatsResponse),
    Connections(ConnectionsResponse),
    Connection(ConnectionResponse),
    Channels(ChannelsResponse),
    Channel(ChannelResponse),
    WhoAmI(WhoAmIResponse),
}

impl Response {
    pub fn kind(&self) -> ResponseKind {
        match self {
            Response::Status(_) => ResponseKind::Status,
            Response::Query(_) => ResponseKind::Query,
            Response::Get(_) => ResponseKind::Get,
            Response::List(_) => ResponseKind::List,
            Response::Info(_) => ResponseKind::Info,
            Response::Stat(_) => ResponseKind::Stat,
            Response::Stats(_) => ResponseKind::Stats,
            Response::Connections(_) => ResponseKind::Connections,
            Response::Connection(_) => ResponseKind::Connection,
            Response::Channels(_) => ResponseKind::Channels,
            Response::Channel(_) => ResponseKind::Channel,
            Response::WhoAmI(_) => ResponseKind::WhoAmI,
        }
    }

    /// Leading status flag, common to every layout.
    pub fn success(&self) -> bool {
        match self {
            Response::Status(r) => r.success,
            Response::Query(r) => r.success,
            Response::Get(r) => r.success,
            Response::List(r) => r.success,
            Response::Info(r) => r.success,
            Response::Stat(r) => r.success,
            Response::Stats(r) => r.success,
            Response::Connections(r) => r.success,
            Response::Connection(r) => r.success,
            Response::Channels(r) => r.success,
            Response::Channel(r) => r.success,
            Response::WhoAmI(r) => r.success,
        }
    }

    /// Decodes exactly one complete frame of the given kind.
    ///
    /// # Errors
    /// Any length mismatch or unknown discriminant yields a `ProtocolError`.
    pub fn decode(kind: ResponseKind, frame: &[u8], width: IntegerWidth) -> ProtocolResult<Self> {
        let mut r = FrameReader::new(frame);
        let success = r.status()?;
        let response = match kind {
            ResponseKind::Status => Response::Status(StatusResponse { success }),
            ResponseKind::Query => {
                if !success {
                    r.finish()?;
                    return Ok(Response::Query(QueryResponse::default()));
                }
                Response::Query(QueryResponse {
                    success,
                    quota: r.uint(width)?,
                    ttl_type: r.ttl_type()?,
                    ttl: r.uint(width)?,
                })
            }
            ResponseKind::Get => {
                if !success {
                    r.finish()?;
                    return Ok(Response::Get(GetResponse::default()));
                }
                let ttl_type = r.ttl_type()?;
                let ttl = r.uint(width)?;
                let value_len = r.uint(width)?;
                let value = r.take(usize::try_from(value_len).unwrap_or(usize::MAX))?;
                Response::Get(GetResponse {
                    success,
                    ttl_type,
                    ttl,
                    value: Bytes::copy_from_slice(value),
                })
            }
            ResponseKind::Stat => {
                if !success {
                    r.finish()?;
                    return Ok(Response::Stat(StatResponse::default()));
                }
                Response::Stat(StatResponse {
                    success,
                    stats: Some(r.key_stats()?),
                })
            }
            ResponseKind::Connection => {
                if !success {
                    r.finish()?;
                    return Ok(Response::Connection(ConnectionResponse::default()));
                }
                Response::Connection(ConnectionResponse {
                    success,
                    connection: Some(r.connection_record()?),
                })
            }
            ResponseKind::WhoAmI => Response::WhoAmI(WhoAmIResponse {
                success,
                id: r.connection_id()?,
            }),
            ResponseKind::Info => {
                let mut info = InfoResponse {
                    success,
                    timestamp: r.fixed8()?,
                    ..InfoResponse::default()
                };
                for rate in info.rates_mut() {
                    rate.total = r.fixed8()?;
                    rate.per_minute = r.fixed8()?;
                }
                for total in info.totals_mut() {
                    *total = r.fixed8()?;
                }
                info.version = r.padded_text(VERSION_LEN)?;
                Response::Info(info)
            }
            ResponseKind::Channel => {
                let count = r.count(CHANNEL_SUBSCRIBER_LEN)?;
                let mut connections = Vec::with_capacity(count);
                for _ in 0..count {
                    connections.push(ChannelSubscriber {
                        id: r.connection_id()?,
                        subscribed_at: r.fixed8()?,
                        read_bytes: r.fixed8()?,
                        write_bytes: r.fixed8()?,
                    });
                }
                Response::Channel(ChannelResponse {
                    success,
                    connections,
                })
            }
            ResponseKind::List => {
                let mut keys: Vec<ListItem> = Vec::new();
                r.fragments(list_record_len(width), &mut keys, |r| {
                    let key_len = r.u8()? as usize;
                    let key_type = r.u8()?;
                    let key_type =
                        KeyType::from_u8(key_type).ok_or(ProtocolError::UnknownKeyType(key_type))?;
                    let item = ListItem {
                        key: String::new(),
                        key_type,
                        ttl_type: r.ttl_type()?,
                        expires_at: r.fixed8()?,
                        bytes_used: r.uint(width)?,
                    };
                    Ok((item, key_len))
                }, |item, name| item.key = name)?;
                Response::List(ListResponse { success, keys })
            }
            ResponseKind::Stats => {
                let mut keys: Vec<StatsItem> = Vec::new();
                r.fragments(STATS_RECORD_LEN, &mut keys, |r| {
                    let key_len = r.u8()? as usize;
                    let item = StatsItem {
                        key: String::new(),
                        stats: r.key_stats()?,
                    };
                    Ok((item, key_len))
                }, |item, name| item.key = name)?;
                Response::Stats(StatsResponse { success, keys })
            }
            ResponseKind::Channels => {
                let mut channels: Vec<ChannelItem> = Vec::new();
                r.fragments(CHANNELS_RECORD_LEN, &mut channels, |r| {
                    let channel_len = r.u8()? as usize;
                    let item = ChannelItem {
                        channel: String::new(),
                        read_bytes: r.fixed8()?,
                        write_bytes: r.fixed8()?,
                        connections: r.fixed8()?,
                    };
                    Ok((item, channel_len))
                }, |item, name| item.channel = name)?;
                Response::Channels(ChannelsResponse { success, channels })
            }
            ResponseKind::Connections => {
                let mut connections: Vec<ConnectionRecord> = Vec::new();
                r.fragments(CONNECTION_RECORD_LEN, &mut connections, |r| {
                    Ok((r.connection_record()?, 0))
                }, |_, _| {})?;
                Response::Connections(ConnectionsResponse {
                    success,
                    connections,
                })
            }
        };
        r.finish()?;
        Ok(response)
    }

    /// Appends the server-side wire form of this response.
    ///
    /// Listing responses are written as a single fragment; see
    /// [`Response::encode_fragmented`] to split them.
    pub fn encode(&self, width: IntegerWidth, out: &mut Vec<u8>) -> ProtocolResult<()> {
        self.encode_fragmented(width, usize::MAX, out)
    }

    /// Like [`Response::encode`], with at most `per_fragment` items per fragment.
    pub fn encode_fragmented(
        &self,
        width: IntegerWidth,
        per_fragment: usize,
        out: &mut Vec<u8>,
    ) -> ProtocolResult<()> {
        let start = out.len();
        let result = self.encode_inner(width, per_fragment.max(1), out);
        if result.is_err() {
            out.truncate(start);
        }
        result
    }

    fn encode_inner(
        &self,
        width: IntegerWidth,
        per_fragment: usize,
        out: &mut Vec<u8>,
    ) -> ProtocolResult<()> {
        out.put_u8(if self.success() { STATUS_SUCCESS } else { STATUS_FAILURE });
        match self {
            Response::Status(_) => {}
            Response::Query(q) => {
                if q.success {
                    width.put(out, "quota", q.quota)?;
                    out.put_u8(q.ttl_type.as_u8());
                    width.put(out, "ttl", q.ttl)?;
                }
            }
            Response::Get(g) => {
                if g.success {
                    out.put_u8(g.ttl_type.as_u8());
                    width.put(out, "ttl", g.ttl)?;
                    width.put(out, "value length", g.value.len() as u64)?;
                    out.put_slice(&g.value);
                }
            }
            Response::Stat(s) => {
                if let (true, Some(stats)) = (s.success, s.stats.as_ref()) {
                    put_key_stats(out, stats);
                }
            }
            Response::Connection(c) => {
                if let (true, Some(record)) = (c.success, c.connection.as_ref()) {
                    put_connection_record(out, record);
                }
            }
            Response::WhoAmI(w) => out.put_slice(w.id.as_bytes()),
            Response::Info(info) => {
                out.put_u64_le(info.timestamp);
                for rate in info.rates() {
                    out.put_u64_le(rate.total);
                    out.put_u64_le(rate.per_minute);
                }
                for total in info.totals() {
                    out.put_u64_le(total);
                }
                put_padded(out, &info.version, VERSION_LEN);
            }
            Response::Channel(c) => {
                out.put_u64_le(c.connections.len() as u64);
                for sub in &c.connections {
                    out.put_slice(sub.id.as_bytes());
                    out.put_u64_le(sub.subscribed_at);
                    out.put_u64_le(sub.read_bytes);
                    out.put_u64_le(sub.write_bytes);
                }
            }
            Response::List(l) => {
                put_fragments(out, &l.keys, per_fragment, |out, item| {
                    out.put_u8(short_len("key", &item.key)?);
                    out.put_u8(item.key_type as u8);
                    out.put_u8(item.ttl_type.as_u8());
                    out.put_u64_le(item.expires_at);
                    width.put(out, "bytes used", item.bytes_used)?;
                    Ok(item.key.as_bytes())
                })?;
            }
            Response::Stats(s) => {
                put_fragments(out, &s.keys, per_fragment, |out, item| {
                    out.put_u8(short_len("key", &item.key)?);
                    put_key_stats(out, &item.stats);
                    Ok(item.key.as_bytes())
                })?;
            }
            Response::Channels(c) => {
                put_fragments(out, &c.channels, per_fragment, |out, item| {
                    out.put_u8(short_len("channel", &item.channel)?);
                    out.put_u64_le(item.read_bytes);
                    out.put_u64_le(item.write_bytes);
                    out.put_u64_le(item.connections);
                    Ok(item.channel.as_bytes())
                })?;
            }
            Response::Connections(c) => {
                put_fragments(out, &c.connections, per_fragment, |out, record| {
                    put_connection_record(out, record);
                    Ok(&[][..])
                })?;
            }
        }
        Ok(())
    }
}

fn short_len(field: &'static str, name: &str) -> ProtocolResult<u8> {
    u8::try_from(name.len()).map_err(|_| ProtocolError::NameTooLong {
        field,
        len: name.len(),
    })
}

fn put_padded(out: &mut Vec<u8>, text: &str, len: usize) {
    let bytes = text.as_bytes();
    let used = bytes.len().min(len);
    out.put_slice(&bytes[..used]);
    out.put_bytes(0, len - used);
}

fn put_key_stats(out: &mut Vec<u8>, stats: &KeyStats) {
    out.put_u64_le(stats.reads_per_minute);
    out.put_u64_le(stats.writes_per_minute);
    out.put_u64_le(stats.total_reads);
    out.put_u64_le(stats.total_writes);
}

fn put_connection_record(out: &mut Vec<u8>, record: &ConnectionRecord) {
    out.put_slice(record.id.as_bytes());
    out.put_u8(record.connection_type);
    out.put_u8(record.kind);
    out.put_u8(record.ip_version);
    put_padded(out, &record.ip, IP_LEN);
    out.put_u16_le(record.port);
    for value in [
        record.connected_at,
        record.read_bytes,
        record.write_bytes,
        record.published_bytes,
        record.received_bytes,
        record.allocated_bytes,
        record.consumed_bytes,
    ] {
        out.put_u64_le(value);
    }
    for value in record.requests.as_array() {
        out.put_u64_le(value);
    }
}

/// Writes `fragments:8` followed by fragments of at most `per_fragment` items.
///
/// `put_record` writes one fixed record and returns the item's trailing name.
fn put_fragments<'a, T, F>(
    out: &mut Vec<u8>,
    items: &'a [T],
    per_fragment: usize,
    mut put_record: F,
) -> ProtocolResult<()>
where
    F: FnMut(&mut Vec<u8>, &'a T) -> ProtocolResult<&'a [u8]>,
{
    let fragments = items.len().div_ceil(per_fragment);
    out.put_u64_le(fragments as u64);
    for (fragment_id, chunk) in items.chunks(per_fragment).enumerate() {
        out.put_u64_le(fragment_id as u64);
        out.put_u64_le(chunk.len() as u64);
        let mut names = Vec::with_capacity(chunk.len());
        for item in chunk {
            names.push(put_record(out, item)?);
        }
        for name in names {
            out.put_slice(name);
        }
    }
    Ok(())
}

/// Bounds-checked cursor over one frame.
struct FrameReader<'a> {
    frame: &'a [u8],
    pos: usize,
}

impl<'a> FrameReader<'a> {
    fn new(frame: &'a [u8]) -> Self {
        FrameReader { frame, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.frame.len() - self.pos
    }

    fn take(&mut self, len: usize) -> ProtocolResult<&'a [u8]> {
        if self.remaining() < len {
            return Err(ProtocolError::Truncated {
                offset: self.pos,
                needed: len,
                len: self.frame.len(),
            });
        }
        let slice = &self.frame[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    fn u8(&mut self) -> ProtocolResult<u8> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> ProtocolResult<u16> {
        let bytes = self.take(2)?;
        Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    fn uint(&mut self, width: IntegerWidth) -> ProtocolResult<u64> {
        let bytes = self.take(width.bytes())?;
        Ok(width.read(bytes).unwrap_or(0))
    }

    fn fixed8(&mut self) -> ProtocolResult<u64> {
        self.uint(IntegerWidth::U64)
    }

    fn status(&mut self) -> ProtocolResult<bool> {
        match self.u8()? {
            STATUS_SUCCESS => Ok(true),
            STATUS_FAILURE => Ok(false),
            other => Err(ProtocolError::InvalidStatus(other)),
        }
    }

    fn ttl_type(&mut self) -> ProtocolResult<TtlType> {
        let raw = self.u8()?;
        TtlType::from_u8(raw).ok_or(ProtocolError::UnknownTtlType(raw))
    }

    fn connection_id(&mut self) -> ProtocolResult<ConnectionId> {
        let mut id = [0u8; 16];
        id.copy_from_slice(self.take(16)?);
        Ok(ConnectionId(id))
    }

    fn padded_text(&mut self, len: usize) -> ProtocolResult<String> {
        let raw = self.take(len)?;
        let end = raw.iter().rposition(|&b| b != 0).map_or(0, |idx| idx + 1);
        Ok(String::from_utf8_lossy(&raw[..end]).into_owned())
    }

    /// Reads an 8-byte count and caps preallocation by what the frame can hold.
    fn count(&mut self, record_len: usize) -> ProtocolResult<usize> {
        let count = self.fixed8()?;
        let fits = self.remaining() / record_len.max(1);
        if count > fits as u64 {
            return Err(ProtocolError::Truncated {
                offset: self.pos,
                needed: (count as usize).saturating_mul(record_len),
                len: self.frame.len(),
            });
        }
        Ok(count as usize)
    }

    fn key_stats(&mut self) -> ProtocolResult<KeyStats> {
        Ok(KeyStats {
            reads_per_minute: self.fixed8()?,
            writes_per_minute: self.fixed8()?,
            total_reads: self.fixed8()?,
            total_writes: self.fixed8()?,
        })
    }

    fn connection_record(&mut self) -> ProtocolResult<ConnectionRecord> {
        let id = self.connection_id()?;
        let connection_type = self.u8()?;
        let kind = self.u8()?;
        let ip_version = self.u8()?;
        let ip = self.padded_text(IP_LEN)?;
        let port = self.u16()?;
        let mut fixed = [0u64; 7];
        for value in fixed.iter_mut() {
            *value = self.fixed8()?;
        }
        let mut counts = [0u64; 18];
        for value in counts.iter_mut() {
            *value = self.fixed8()?;
        }
        Ok(ConnectionRecord {
            id,
            connection_type,
            kind,
            ip_version,
            ip,
            port,
            connected_at: fixed[0],
            read_bytes: fixed[1],
            write_bytes: fixed[2],
            published_bytes: fixed[3],
            received_bytes: fixed[4],
            allocated_bytes: fixed[5],
            consumed_bytes: fixed[6],
            requests: RequestCounts::from_array(counts),
        })
    }

    /// Walks `fragments:8` fragments; each record is read by `read_record`,
    /// which returns the item and its trailing name length.
    fn fragments<T, R, N>(
        &mut self,
        record_len: usize,
        items: &mut Vec<T>,
        mut read_record: R,
        mut set_name: N,
    ) -> ProtocolResult<()>
    where
        R: FnMut(&mut Self) -> ProtocolResult<(T, usize)>,
        N: FnMut(&mut T, String),
    {
        let fragments = self.count(FRAGMENT_HEADER_LEN)?;
        for _ in 0..fragments {
            let _fragment_id = self.fixed8()?;
            let count = self.count(record_len)?;
            let first = items.len();
            let mut name_lens = Vec::with_capacity(count);
            for _ in 0..count {
                let (item, name_len) = read_record(self)?;
                items.push(item);
                name_lens.push(name_len);
            }
            for (offset, name_len) in name_lens.into_iter().enumerate() {
                let name = String::from_utf8_lossy(self.take(name_len)?).into_owned();
                set_name(&mut items[first + offset], name);
            }
        }
        Ok(())
    }

    fn finish(self) -> ProtocolResult<()> {
        match self.remaining() {
            0 => Ok(()),
            extra => Err(ProtocolError::TrailingBytes { extra }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(response: &Response, width: IntegerWidth) -> Response {
        let mut frame = Vec::new();
        response.encode(width, &mut frame).unwrap();
        Response::decode(response.kind(), &frame, width).unwrap()
    }

    fn sample_record(seed: u64) -> ConnectionRecord {
        ConnectionRecord {
            id: ConnectionId([seed as u8; 16]),
            connection_type: 0,
            kind: 1,
            ip_version: 4,
            ip: "127.0.0.1".into(),
            port: 9000,
            connected_at: seed,
            read_bytes: seed + 1,
            consumed_bytes: seed + 7,
            requests: RequestCounts {
                insert: 3,
                whoami: 9,
                ..RequestCounts::default()
            },
            ..ConnectionRecord::default()
        }
    }

    #[test]
    fn test_status_decode() {
        let ok = Response::decode(ResponseKind::Status, &[0x01], IntegerWidth::U16).unwrap();
        assert_eq!(ok, Response::Status(StatusResponse { success: true }));
        let err = Response::decode(ResponseKind::Status, &[0x01, 0x00], IntegerWidth::U16);
        assert_eq!(err, Err(ProtocolError::TrailingBytes { extra: 1 }));
        let err = Response::decode(ResponseKind::Status, &[0x07], IntegerWidth::U16);
        assert_eq!(err, Err(ProtocolError::InvalidStatus(0x07)));
    }

    #[test]
    fn test_query_decode_uint16() {
        let frame = [0x01, 0x07, 0x00, 0x04, 0x3c, 0x00];
        let decoded = Response::decode(ResponseKind::Query, &frame, IntegerWidth::U16).unwrap();
        assert_eq!(
            decoded,
            Response::Query(QueryResponse {
                success: true,
                quota: 7,
                ttl_type: TtlType::Seconds,
                ttl: 60,
            })
        );
    }

    #[test]
    fn test_failure_shapes() {
        for kind in [
            ResponseKind::Query,
            ResponseKind::Get,
            ResponseKind::Stat,
            ResponseKind::Connection,
        ] {
            let decoded = Response::decode(kind, &[0x00], IntegerWidth::U32).unwrap();
            assert!(!decoded.success());
            assert_eq!(decoded.kind(), kind);
        }
    }

    #[test]
    fn test_get_roundtrip_all_widths() {
        for width in IntegerWidth::ALL {
            let response = Response::Get(GetResponse {
                success: true,
                ttl_type: TtlType::Minutes,
                ttl: 42,
                value: Bytes::from_static(b"payload"),
            });
            assert_eq!(roundtrip(&response, width), response);
        }
    }

    #[test]
    fn test_unknown_ttl_type_is_malformed() {
        let frame = [0x01, 0x07, 0x09, 0x3c];
        let err = Response::decode(ResponseKind::Query, &frame, IntegerWidth::U8).unwrap_err();
        assert_eq!(err, ProtocolError::UnknownTtlType(0x09));
    }

    #[test]
    fn test_fixed_frame_lengths() {
        let mut frame = Vec::new();
        Response::Info(InfoResponse {
            success: true,
            version: "5.0.0".into(),
            ..InfoResponse::default()
        })
        .encode(IntegerWidth::U8, &mut frame)
        .unwrap();
        assert_eq!(frame.len(), INFO_LEN);

        frame.clear();
        Response::WhoAmI(WhoAmIResponse::default())
            .encode(IntegerWidth::U8, &mut frame)
            .unwrap();
        assert_eq!(frame.len(), WHOAMI_LEN);

        frame.clear();
        Response::Stat(StatResponse {
            success: true,
            stats: Some(KeyStats::default()),
        })
        .encode(IntegerWidth::U8, &mut frame)
        .unwrap();
        assert_eq!(frame.len(), STAT_LEN);

        frame.clear();
        Response::Connection(ConnectionResponse {
            success: true,
            connection: Some(sample_record(1)),
        })
        .encode(IntegerWidth::U8, &mut frame)
        .unwrap();
        assert_eq!(frame.len(), CONNECTION_LEN);
    }

    #[test]
    fn test_info_roundtrip_keeps_field_order() {
        let info = InfoResponse {
            success: true,
            timestamp: 1,
            requests: Rate { total: 2, per_minute: 3 },
            whoami_requests: Rate { total: 4, per_minute: 5 },
            write_bytes: Rate { total: 6, per_minute: 7 },
            total_keys: 8,
            total_connections: 9,
            version: "5.0.0".into(),
            ..InfoResponse::default()
        };
        let mut frame = Vec::new();
        Response::Info(info.clone()).encode(IntegerWidth::U16, &mut frame).unwrap();
        assert_eq!(u64::from_le_bytes(frame[1..9].try_into().unwrap()), 1);
        assert_eq!(u64::from_le_bytes(frame[9..17].try_into().unwrap()), 2);
        assert_eq!(u64::from_le_bytes(frame[409..417].try_into().unwrap()), 9);
        assert_eq!(&frame[417..422], b"5.0.0");
        assert_eq!(roundtrip(&Response::Info(info.clone()), IntegerWidth::U16), Response::Info(info));
    }

    #[test]
    fn test_list_names_follow_records_per_fragment() {
        let keys = vec![
            ListItem {
                key: "alpha".into(),
                key_type: KeyType::Counter,
                ttl_type: TtlType::Seconds,
                expires_at: 10,
                bytes_used: 16,
            },
            ListItem {
                key: "b".into(),
                key_type: KeyType::Buffer,
                ttl_type: TtlType::Hours,
                expires_at: 20,
                bytes_used: 300,
            },
            ListItem {
                key: "gamma".into(),
                key_type: KeyType::Counter,
                ttl_type: TtlType::Milliseconds,
                expires_at: 30,
                bytes_used: 1,
            },
        ];
        let response = Response::List(ListResponse { success: true, keys });
        let width = IntegerWidth::U16;

        let mut frame = Vec::new();
        response.encode_fragmented(width, 2, &mut frame).unwrap();
        let record = list_record_len(width);
        let expected = COUNTED_HEADER_LEN
            + (FRAGMENT_HEADER_LEN + 2 * record + 6)
            + (FRAGMENT_HEADER_LEN + record + 5);
        assert_eq!(frame.len(), expected);
        // Names of the first fragment sit right after its two records.
        let names_at = COUNTED_HEADER_LEN + FRAGMENT_HEADER_LEN + 2 * record;
        assert_eq!(&frame[names_at..names_at + 6], b"alphab");

        let decoded = Response::decode(ResponseKind::List, &frame, width).unwrap();
        assert_eq!(decoded, response);
    }

    #[test]
    fn test_listing_roundtrips() {
        let stats = Response::Stats(StatsResponse {
            success: true,
            keys: vec![StatsItem {
                key: "k1".into(),
                stats: KeyStats {
                    reads_per_minute: 1,
                    writes_per_minute: 2,
                    total_reads: 3,
                    total_writes: 4,
                },
            }],
        });
        let channels = Response::Channels(ChannelsResponse {
            success: true,
            channels: vec![ChannelItem {
                channel: "news".into(),
                read_bytes: 5,
                write_bytes: 6,
                connections: 2,
            }],
        });
        let connections = Response::Connections(ConnectionsResponse {
            success: true,
            connections: vec![sample_record(1), sample_record(2)],
        });
        let channel = Response::Channel(ChannelResponse {
            success: true,
            connections: vec![ChannelSubscriber {
                id: ConnectionId([7; 16]),
                subscribed_at: 11,
                read_bytes: 12,
                write_bytes: 13,
            }],
        });
        for response in [stats, channels, connections, channel] {
            assert_eq!(roundtrip(&response, IntegerWidth::U32), response);
        }
    }

    #[test]
    fn test_empty_listing() {
        let frame = [0x01, 0, 0, 0, 0, 0, 0, 0, 0];
        let decoded = Response::decode(ResponseKind::Channels, &frame, IntegerWidth::U8).unwrap();
        assert_eq!(
            decoded,
            Response::Channels(ChannelsResponse {
                success: true,
                channels: Vec::new()
            })
        );
    }

    #[test]
    fn test_absurd_count_is_truncated_not_allocated() {
        let mut frame = vec![0x01];
        frame.extend_from_slice(&u64::MAX.to_le_bytes());
        let err = Response::decode(ResponseKind::Channel, &frame, IntegerWidth::U8).unwrap_err();
        assert!(matches!(err, ProtocolError::Truncated { .. }));
    }
}
