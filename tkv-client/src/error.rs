//! Error types for the async client.

use std::io;
use std::sync::Arc;

use thiserror::Error;
use tkv_common::ProtocolError;

/// Result type for client operations.
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors surfaced by sessions, the pool and the client facade.
///
/// Transport errors are cloned into every operation pending on the failed
/// link, so the IO source is shared behind an `Arc`.
#[derive(Debug, Clone, Error)]
pub enum ClientError {
    /// Socket level failure while connecting, reading or writing.
    #[error("io error: {0}")]
    Io(Arc<io::Error>),

    /// The peer closed the connection.
    #[error("connection closed by peer")]
    Disconnected,

    /// The session was closed locally.
    #[error("connection closed")]
    Closed,

    /// TCP connect did not finish within the configured timeout.
    #[error("connect timed out")]
    ConnectTimeout,

    /// The socket never reported writable during the probe.
    #[error("socket not writable after {attempts} attempts")]
    WritableTimeout { attempts: u32 },

    /// Host/port could not be resolved to a socket address.
    #[error("invalid address {0}")]
    InvalidAddress(String),

    /// A correctly sized frame failed to decode; only its operation fails.
    #[error("malformed response: {0}")]
    Malformed(#[source] ProtocolError),

    /// Frame sizing overflowed; the stream position is lost.
    #[error("protocol desync: {0}")]
    ProtocolDesync(&'static str),

    /// No live session could be found or revived.
    #[error("no available connections")]
    PoolExhausted,

    /// A request could not be encoded; nothing was sent.
    #[error("encode failed: {0}")]
    Encode(#[source] ProtocolError),

    /// Empty batch, or subscribe/unsubscribe mixed into a batch.
    #[error("invalid batch: {0}")]
    InvalidBatch(&'static str),

    /// The response kind did not match the request issued by the facade.
    #[error("unexpected response")]
    UnexpectedResponse,

    /// Configuration could not be parsed or failed validation.
    #[error("invalid config: {0}")]
    Config(String),
}

impl ClientError {
    /// True for errors that leave the session unusable.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            ClientError::Io(_)
                | ClientError::Disconnected
                | ClientError::Closed
                | ClientError::ConnectTimeout
                | ClientError::WritableTimeout { .. }
                | ClientError::ProtocolDesync(_)
        )
    }
}

impl From<io::Error> for ClientError {
    fn from(err: io::Error) -> Self {
        ClientError::Io(Arc::new(err))
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(err: serde_json::Error) -> Self {
        ClientError::Config(err.to_string())
    }
}
