//! # tkv Async Client
//!
//! Purpose: Talk to a tagged-binary key/counter and pub/sub server over a
//! small pool of pipelined TCP connections.
//!
//! ## Design Principles
//! 1. **Facade Pattern**: `Client` hides pooling, framing and encoding.
//! 2. **Streaming Framing**: Responses are carved out of a raw byte stream by
//!    per-kind length rules, whatever the TCP chunking.
//! 3. **FIFO Correlation**: Each link answers in the order it was written to.
//! 4. **Transport-Only Recovery**: Dead links are reconnected; failed
//!    requests are never resent.

mod client;
mod config;
mod dispatcher;
mod error;
pub mod frame;
mod metrics;
mod pool;
mod session;
mod subscriptions;

pub use client::Client;
pub use config::{ClientConfig, ENV_HOST, ENV_MAX_CONNECTIONS, ENV_PORT, ENV_WIDTH};
pub use dispatcher::{DispatchStats, FrameDispatcher, PendingOperation, PendingQueue};
pub use error::{ClientError, ClientResult};
pub use metrics::{
    LatencySnapshot, Metrics, MetricsSnapshot, RequestTimer, DEFAULT_LATENCY_BUCKETS_US,
};
pub use pool::ConnectionPool;
pub use session::{LinkSession, PendingBatch};
pub use subscriptions::SubscriptionTable;

pub use tkv_common as protocol;
