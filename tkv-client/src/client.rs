//! # Async Client API
//!
//! Purpose: Expose one typed async method per protocol operation on top of
//! the connection pool.
//!
//! ## Design Principles
//! 1. **Facade Pattern**: `Client` hides pooling, framing and encoding.
//! 2. **Typed Results**: Each method returns the response struct of its kind;
//!    a kind mismatch is `ClientError::UnexpectedResponse`.
//! 3. **Status as Data**: A server-side failure (`success: false`) is a value,
//!    not an error. Errors mean transport, framing or usage problems.

use bytes::Bytes;

use tkv_common::{
    Attribute, Change, ChannelResponse, ChannelsResponse, ConnectionId, ConnectionResponse,
    ConnectionsResponse, GetResponse, InfoResponse, ListResponse, PushEvent, QueryResponse,
    Request, Response, StatResponse, StatsResponse, StatusResponse, Subscriber, TtlType,
    WhoAmIResponse,
};

use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};
use crate::metrics::MetricsSnapshot;
use crate::pool::ConnectionPool;

/// Async client with a fixed pool of pipelined connections.
pub struct Client {
    pool: ConnectionPool,
}

impl Client {
    /// Connects to `host:port` with default settings.
    pub async fn connect(host: impl Into<String>, port: u16) -> ClientResult<Self> {
        Self::with_config(ClientConfig::new(host, port)).await
    }

    /// Connects every pool link described by `config`.
    pub async fn with_config(config: ClientConfig) -> ClientResult<Self> {
        let pool = ConnectionPool::new(config)?;
        pool.connect().await?;
        Ok(Client { pool })
    }

    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.pool.metrics()
    }

    /// Sends one request and returns its response.
    ///
    /// Subscriptions go to every link; the combined status is successful only
    /// if every link accepted it.
    pub async fn send(&self, request: Request) -> ClientResult<Response> {
        let fan_out = request.kind().is_subscription();
        let mut responses = self.pool.send(std::slice::from_ref(&request)).await?;
        if fan_out {
            let success = responses.iter().all(Response::success);
            return Ok(Response::Status(StatusResponse { success }));
        }
        responses.pop().ok_or(ClientError::UnexpectedResponse)
    }

    /// Pipelines a batch on one link; responses come back in request order.
    pub async fn send_batch(&self, requests: &[Request]) -> ClientResult<Vec<Response>> {
        self.pool.send(requests).await
    }

    pub async fn disconnect(&self) {
        self.pool.disconnect().await;
    }

    /// Creates a counter with `quota` units.
    pub async fn insert(
        &self,
        key: impl Into<String>,
        quota: u64,
        ttl_type: TtlType,
        ttl: u64,
    ) -> ClientResult<bool> {
        self.status(Request::Insert {
            key: key.into(),
            quota,
            ttl_type,
            ttl,
        })
        .await
    }

    pub async fn query(&self, key: impl Into<String>) -> ClientResult<QueryResponse> {
        match self.send(Request::Query { key: key.into() }).await? {
            Response::Query(response) => Ok(response),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    /// Patches, increases or decreases a counter's quota or TTL.
    pub async fn update(
        &self,
        key: impl Into<String>,
        attribute: Attribute,
        change: Change,
        value: u64,
    ) -> ClientResult<bool> {
        self.status(Request::Update {
            key: key.into(),
            attribute,
            change,
            value,
        })
        .await
    }

    pub async fn purge(&self, key: impl Into<String>) -> ClientResult<bool> {
        self.status(Request::Purge { key: key.into() }).await
    }

    /// Stores a buffer under `key`.
    pub async fn set(
        &self,
        key: impl Into<String>,
        value: impl Into<Bytes>,
        ttl_type: TtlType,
        ttl: u64,
    ) -> ClientResult<bool> {
        self.status(Request::Set {
            key: key.into(),
            value: value.into(),
            ttl_type,
            ttl,
        })
        .await
    }

    pub async fn get(&self, key: impl Into<String>) -> ClientResult<GetResponse> {
        match self.send(Request::Get { key: key.into() }).await? {
            Response::Get(response) => Ok(response),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    pub async fn list(&self) -> ClientResult<ListResponse> {
        match self.send(Request::List).await? {
            Response::List(response) => Ok(response),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    pub async fn info(&self) -> ClientResult<InfoResponse> {
        match self.send(Request::Info).await? {
            Response::Info(response) => Ok(response),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    pub async fn stat(&self, key: impl Into<String>) -> ClientResult<StatResponse> {
        match self.send(Request::Stat { key: key.into() }).await? {
            Response::Stat(response) => Ok(response),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    pub async fn stats(&self) -> ClientResult<StatsResponse> {
        match self.send(Request::Stats).await? {
            Response::Stats(response) => Ok(response),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    /// Subscribes on every link; `callback` runs on the reader task of
    /// whichever link carries the event, so it should return quickly.
    pub async fn subscribe<F>(&self, channel: impl Into<String>, callback: F) -> ClientResult<bool>
    where
        F: Fn(&PushEvent) + Send + Sync + 'static,
    {
        self.status(Request::Subscribe {
            channel: channel.into(),
            subscriber: Subscriber::new(callback),
        })
        .await
    }

    pub async fn unsubscribe(&self, channel: impl Into<String>) -> ClientResult<bool> {
        self.status(Request::Unsubscribe {
            channel: channel.into(),
        })
        .await
    }

    pub async fn publish(
        &self,
        channel: impl Into<String>,
        value: impl Into<Bytes>,
    ) -> ClientResult<bool> {
        self.status(Request::Publish {
            channel: channel.into(),
            value: value.into(),
        })
        .await
    }

    pub async fn connections(&self) -> ClientResult<ConnectionsResponse> {
        match self.send(Request::Connections).await? {
            Response::Connections(response) => Ok(response),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    pub async fn connection(&self, id: ConnectionId) -> ClientResult<ConnectionResponse> {
        match self.send(Request::Connection { id }).await? {
            Response::Connection(response) => Ok(response),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    pub async fn channels(&self) -> ClientResult<ChannelsResponse> {
        match self.send(Request::Channels).await? {
            Response::Channels(response) => Ok(response),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    pub async fn channel(&self, channel: impl Into<String>) -> ClientResult<ChannelResponse> {
        match self
            .send(Request::Channel {
                channel: channel.into(),
            })
            .await?
        {
            Response::Channel(response) => Ok(response),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    /// Id the server assigned to the link that carried this request.
    pub async fn whoami(&self) -> ClientResult<WhoAmIResponse> {
        match self.send(Request::WhoAmI).await? {
            Response::WhoAmI(response) => Ok(response),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    async fn status(&self, request: Request) -> ClientResult<bool> {
        match self.send(request).await? {
            Response::Status(status) => Ok(status.success),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }
}
