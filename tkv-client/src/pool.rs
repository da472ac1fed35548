//! # Connection Pool
//!
//! Purpose: Spread requests over a fixed set of links to one endpoint, revive
//! links that died, and fan subscriptions out to every link.
//!
//! ## Design Principles
//! 1. **Round Robin**: An atomic cursor picks the next link; dead links are
//!    skipped after one revive attempt each.
//! 2. **All-or-Nothing Connect**: If any link fails to open, the ones already
//!    open are closed again.
//! 3. **Fan-Out Subscriptions**: Any link may carry a push frame, so every
//!    link must know every subscriber.
//! 4. **No Payload Retry**: Only the transport is retried; a failed request
//!    is reported, never resent.

use std::slice;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tracing::{debug, warn};

use tkv_common::{Request, Response, Subscriber};

use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};
use crate::metrics::{Metrics, MetricsSnapshot};
use crate::session::LinkSession;
use crate::subscriptions::SubscriptionTable;

/// Fixed-size set of sessions to one endpoint.
pub struct ConnectionPool {
    config: Arc<ClientConfig>,
    sessions: Vec<Arc<LinkSession>>,
    next: AtomicUsize,
    metrics: Arc<Metrics>,
}

impl ConnectionPool {
    /// Builds `max_connections` unopened sessions.
    pub fn new(config: ClientConfig) -> ClientResult<Self> {
        config.validate()?;
        let config = Arc::new(config);
        let metrics = Arc::new(Metrics::new());
        let sessions = (0..config.max_connections)
            .map(|id| Arc::new(LinkSession::new(id, config.clone(), metrics.clone())))
            .collect();
        Ok(ConnectionPool {
            config,
            sessions,
            next: AtomicUsize::new(0),
            metrics,
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn sessions(&self) -> &[Arc<LinkSession>] {
        &self.sessions
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Opens every session in order.
    pub async fn connect(&self) -> ClientResult<()> {
        for (idx, session) in self.sessions.iter().enumerate() {
            if let Err(err) = session.open().await {
                warn!(session = idx, error = %err, "connect failed, closing opened links");
                for opened in &self.sessions[..idx] {
                    opened.close().await;
                }
                return Err(err);
            }
        }
        debug!(
            endpoint = %self.config.endpoint(),
            links = self.sessions.len(),
            "pool connected"
        );
        Ok(())
    }

    /// Sends a batch and returns one response per request.
    ///
    /// A SUBSCRIBE or UNSUBSCRIBE must be the only request; it is written to
    /// every link and yields one response per link.
    pub async fn send(&self, requests: &[Request]) -> ClientResult<Vec<Response>> {
        if requests.is_empty() {
            return Err(ClientError::InvalidBatch("empty batch"));
        }
        let fan_out = requests.iter().any(|r| r.kind().is_subscription());
        if fan_out && requests.len() != 1 {
            return Err(ClientError::InvalidBatch(
                "subscribe/unsubscribe must be sent alone",
            ));
        }

        let _timer = self.metrics.start_request();
        let result = if fan_out {
            self.fan_out(&requests[0]).await
        } else {
            match self.pick().await {
                Ok(session) => session.submit(requests).await,
                Err(err) => Err(err),
            }
        };
        if result.is_err() {
            self.metrics.record_error();
        }
        result
    }

    /// Closes every session.
    pub async fn disconnect(&self) {
        for session in &self.sessions {
            session.close().await;
        }
    }

    /// Next live session in rotation, reviving dead ones on the way.
    async fn pick(&self) -> ClientResult<Arc<LinkSession>> {
        let count = self.sessions.len();
        for _ in 0..count {
            let idx = self.next.fetch_add(1, Ordering::Relaxed) % count;
            let session = &self.sessions[idx];
            if session.is_alive() {
                return Ok(session.clone());
            }
            match session.revive().await {
                Ok(()) => return Ok(session.clone()),
                Err(err) => debug!(session = idx, error = %err, "skipping dead link"),
            }
        }
        Err(ClientError::PoolExhausted)
    }

    /// Writes one subscription request to every link, then waits for all.
    ///
    /// Each link's table changes right before its write and is restored if
    /// that link cannot be revived or refuses the write. Links written before
    /// such a failure keep the change; their responses are consumed but not
    /// reported.
    async fn fan_out(&self, request: &Request) -> ClientResult<Vec<Response>> {
        let mut batches = Vec::with_capacity(self.sessions.len());
        for session in &self.sessions {
            if !session.is_alive() {
                session.revive().await?;
            }
            let previous = apply_subscription(session.subscriptions(), request);
            match session.dispatch(slice::from_ref(request)).await {
                Ok(batch) => batches.push(batch),
                Err(err) => {
                    restore_subscription(session.subscriptions(), request, previous);
                    return Err(err);
                }
            }
        }

        let mut responses = Vec::with_capacity(batches.len());
        for batch in batches {
            responses.extend(batch.wait().await?);
        }
        Ok(responses)
    }
}

/// Applies a SUBSCRIBE or UNSUBSCRIBE to `table`, returning what it replaced.
fn apply_subscription(table: &SubscriptionTable, request: &Request) -> Option<Subscriber> {
    match request {
        Request::Subscribe {
            channel,
            subscriber,
        } => table.register(channel.clone(), subscriber.clone()),
        Request::Unsubscribe { channel } => table.unregister(channel),
        _ => None,
    }
}

fn restore_subscription(table: &SubscriptionTable, request: &Request, previous: Option<Subscriber>) {
    let channel = match request {
        Request::Subscribe { channel, .. } | Request::Unsubscribe { channel } => channel,
        _ => return,
    };
    match previous {
        Some(subscriber) => {
            table.register(channel.clone(), subscriber);
        }
        None => {
            table.unregister(channel);
        }
    }
}