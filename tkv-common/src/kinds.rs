// kinds.rs - wire discriminants for the tagged binary protocol
//
// Every request starts with a one-byte tag. Responses carry no tag: the
// client knows what to expect from the order in which it wrote requests.
// The single exception is the server-initiated push frame, which reuses the
// EVENT tag so it can be recognised at any frame boundary.
//
// Response frames always begin with a status byte (0x00 or 0x01), which
// never collides with TAG_EVENT.

use std::fmt;

/// Status byte signalling failure in a response frame.
pub const STATUS_FAILURE: u8 = 0x00;

/// Status byte signalling success in a response frame.
pub const STATUS_SUCCESS: u8 = 0x01;

pub const TAG_INSERT: u8 = 0x01;
pub const TAG_QUERY: u8 = 0x02;
pub const TAG_UPDATE: u8 = 0x03;
pub const TAG_PURGE: u8 = 0x04;
pub const TAG_SET: u8 = 0x05;
pub const TAG_GET: u8 = 0x06;
pub const TAG_LIST: u8 = 0x07;
pub const TAG_INFO: u8 = 0x08;
pub const TAG_STAT: u8 = 0x09;
pub const TAG_STATS: u8 = 0x10;
pub const TAG_SUBSCRIBE: u8 = 0x11;
pub const TAG_UNSUBSCRIBE: u8 = 0x12;
pub const TAG_PUBLISH: u8 = 0x13;
pub const TAG_CONNECTIONS: u8 = 0x14;
pub const TAG_CONNECTION: u8 = 0x15;
pub const TAG_CHANNELS: u8 = 0x16;
pub const TAG_CHANNEL: u8 = 0x17;
pub const TAG_WHOAMI: u8 = 0x18;

/// Tag of client-sent events and of server push frames.
pub const TAG_EVENT: u8 = 0x19;

/// All request kinds understood by the server.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    Insert = TAG_INSERT,
    Query = TAG_QUERY,
    Update = TAG_UPDATE,
    Purge = TAG_PURGE,
    Set = TAG_SET,
    Get = TAG_GET,
    List = TAG_LIST,
    Info = TAG_INFO,
    Stat = TAG_STAT,
    Stats = TAG_STATS,
    Subscribe = TAG_SUBSCRIBE,
    Unsubscribe = TAG_UNSUBSCRIBE,
    Publish = TAG_PUBLISH,
    Connections = TAG_CONNECTIONS,
    Connection = TAG_CONNECTION,
    Channels = TAG_CHANNELS,
    Channel = TAG_CHANNEL,
    WhoAmI = TAG_WHOAMI,
    Event = TAG_EVENT,
}

impl RequestKind {
    /// Convert kind to its tag byte
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Try to create a kind from its tag byte
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            TAG_INSERT => Some(Self::Insert),
            TAG_QUERY => Some(Self::Query),
            TAG_UPDATE => Some(Self::Update),
            TAG_PURGE => Some(Self::Purge),
            TAG_SET => Some(Self::Set),
            TAG_GET => Some(Self::Get),
            TAG_LIST => Some(Self::List),
            TAG_INFO => Some(Self::Info),
            TAG_STAT => Some(Self::Stat),
            TAG_STATS => Some(Self::Stats),
            TAG_SUBSCRIBE => Some(Self::Subscribe),
            TAG_UNSUBSCRIBE => Some(Self::Unsubscribe),
            TAG_PUBLISH => Some(Self::Publish),
            TAG_CONNECTIONS => Some(Self::Connections),
            TAG_CONNECTION => Some(Self::Connection),
            TAG_CHANNELS => Some(Self::Channels),
            TAG_CHANNEL => Some(Self::Channel),
            TAG_WHOAMI => Some(Self::WhoAmI),
            TAG_EVENT => Some(Self::Event),
            _ => None,
        }
    }

    /// Get human-readable kind name
    pub const fn name(self) -> &'static str {
        match self {
            Self::Insert => "INSERT",
            Self::Query => "QUERY",
            Self::Update => "UPDATE",
            Self::Purge => "PURGE",
            Self::Set => "SET",
            Self::Get => "GET",
            Self::List => "LIST",
            Self::Info => "INFO",
            Self::Stat => "STAT",
            Self::Stats => "STATS",
            Self::Subscribe => "SUBSCRIBE",
            Self::Unsubscribe => "UNSUBSCRIBE",
            Self::Publish => "PUBLISH",
            Self::Connections => "CONNECTIONS",
            Self::Connection => "CONNECTION",
            Self::Channels => "CHANNELS",
            Self::Channel => "CHANNEL",
            Self::WhoAmI => "WHOAMI",
            Self::Event => "EVENT",
        }
    }

    /// Shape of the response the server sends back for this kind.
    pub const fn response_kind(self) -> ResponseKind {
        match self {
            Self::Insert
            | Self::Update
            | Self::Purge
            | Self::Set
            | Self::Subscribe
            | Self::Unsubscribe
            | Self::Publish
            | Self::Event => ResponseKind::Status,
            Self::Query => ResponseKind::Query,
            Self::Get => ResponseKind::Get,
            Self::List => ResponseKind::List,
            Self::Info => ResponseKind::Info,
            Self::Stat => ResponseKind::Stat,
            Self::Stats => ResponseKind::Stats,
            Self::Connections => ResponseKind::Connections,
            Self::Connection => ResponseKind::Connection,
            Self::Channels => ResponseKind::Channels,
            Self::Channel => ResponseKind::Channel,
            Self::WhoAmI => ResponseKind::WhoAmI,
        }
    }

    /// Check if the kind must be fanned out to every link of a pool
    pub const fn is_subscription(self) -> bool {
        matches!(self, Self::Subscribe | Self::Unsubscribe)
    }
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Response layouts, one per distinct wire shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResponseKind {
    /// Single status byte.
    Status,
    /// Failure byte, or quota + ttl header.
    Query,
    /// Failure byte, or ttl header + length-prefixed value.
    Get,
    /// Fragmented key listing.
    List,
    /// Fixed server counters.
    Info,
    /// Failure byte, or fixed per-key statistics.
    Stat,
    /// Fragmented per-key statistics.
    Stats,
    /// Fragmented connection records.
    Connections,
    /// Failure byte, or one connection record.
    Connection,
    /// Fragmented channel listing.
    Channels,
    /// Subscribers of one channel.
    Channel,
    /// Caller's own connection id.
    WhoAmI,
}

impl fmt::Display for ResponseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// TTL unit attached to a key.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TtlType {
    #[default]
    Nanoseconds = 0x01,
    Microseconds = 0x02,
    Milliseconds = 0x03,
    Seconds = 0x04,
    Minutes = 0x05,
    Hours = 0x06,
}

impl TtlType {
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(Self::Nanoseconds),
            0x02 => Some(Self::Microseconds),
            0x03 => Some(Self::Milliseconds),
            0x04 => Some(Self::Seconds),
            0x05 => Some(Self::Minutes),
            0x06 => Some(Self::Hours),
            _ => None,
        }
    }
}

/// Attribute targeted by an UPDATE request.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Attribute {
    Quota = 0x00,
    Ttl = 0x01,
}

/// How an UPDATE request changes the attribute.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Change {
    /// Overwrite with the given value.
    Patch = 0x00,
    Increase = 0x01,
    Decrease = 0x02,
}

/// Storage class of a listed key.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyType {
    /// Created by INSERT, holds a quota.
    Counter = 0x00,
    /// Created by SET, holds bytes.
    Buffer = 0x01,
}

impl KeyType {
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x00 => Some(Self::Counter),
            0x01 => Some(Self::Buffer),
            _ => None,
        }
    }
}
