//! # Link Session
//!
//! Purpose: Own one TCP connection, pipeline requests over it and hand each
//! response back to the caller that wrote the matching request.
//!
//! ## Design Principles
//! 1. **Split Halves**: Writers share the write half behind an async mutex;
//!    the read half belongs to a single reader task.
//! 2. **Ordered Submission**: Pending operations are queued under the writer
//!    lock before their bytes hit the socket, so queue order equals wire order.
//!    The write itself runs on a spawned task holding the lock, so a caller
//!    that gives up mid-write cannot leave half a frame behind.
//! 3. **Fail Everything Together**: Any transport fault rejects every pending
//!    operation on the link and marks it dead until reconnected.
//!
//! ```text
//!            submit()                          reader task
//!   encode ─► [writer lock] ─► write_all ──►  TCP  ──► read ─► FrameDispatcher
//!                 │                                               │
//!                 └── push PendingOperation ─► FIFO ◄── pop ──────┘
//! ```
//!
//! States: CONNECTING → CONNECTED → DEAD → (reconnect) → CONNECTING.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{oneshot, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use tkv_common::{Request, Response};

use crate::config::ClientConfig;
use crate::dispatcher::{FrameDispatcher, PendingOperation, PendingQueue};
use crate::error::{ClientError, ClientResult};
use crate::metrics::Metrics;
use crate::subscriptions::SubscriptionTable;

const READ_CHUNK: usize = 16 * 1024;

/// Receivers for a batch that has already been written.
///
/// Returned by [`LinkSession::dispatch`] so a caller can write to several
/// links before waiting on any of them.
pub struct PendingBatch {
    receivers: Vec<oneshot::Receiver<ClientResult<Response>>>,
}

impl PendingBatch {
    /// Waits for every response in submission order; the first failure wins.
    pub async fn wait(self) -> ClientResult<Vec<Response>> {
        let mut responses = Vec::with_capacity(self.receivers.len());
        for rx in self.receivers {
            responses.push(rx.await.map_err(|_| ClientError::Closed)??);
        }
        Ok(responses)
    }
}

/// One physical connection with its own FIFO and subscription table.
pub struct LinkSession {
    id: usize,
    config: Arc<ClientConfig>,
    metrics: Arc<Metrics>,
    pending: PendingQueue,
    subscriptions: SubscriptionTable,
    writer: Arc<AsyncMutex<Option<OwnedWriteHalf>>>,
    reader: parking_lot::Mutex<Option<JoinHandle<()>>>,
    alive: Arc<AtomicBool>,
    /// Serializes open, close and reconnect.
    lifecycle: AsyncMutex<()>,
}

impl LinkSession {
    /// Creates a session in the DEAD state; call [`LinkSession::open`].
    pub fn new(id: usize, config: Arc<ClientConfig>, metrics: Arc<Metrics>) -> Self {
        LinkSession {
            id,
            config,
            metrics,
            pending: PendingQueue::new(),
            subscriptions: SubscriptionTable::new(),
            writer: Arc::new(AsyncMutex::new(None)),
            reader: parking_lot::Mutex::new(None),
            alive: Arc::new(AtomicBool::new(false)),
            lifecycle: AsyncMutex::new(()),
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn subscriptions(&self) -> &SubscriptionTable {
        &self.subscriptions
    }

    /// Operations written but not yet answered.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Alive flag set and reader task still running.
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
            && self
                .reader
                .lock()
                .as_ref()
                .is_some_and(|handle| !handle.is_finished())
    }

    /// Connects, probes writability and starts the reader task.
    pub async fn open(&self) -> ClientResult<()> {
        let _guard = self.lifecycle.lock().await;
        self.open_locked().await
    }

    /// Stops the reader, shuts the socket and rejects pending work with
    /// `ClientError::Closed`.
    pub async fn close(&self) {
        let _guard = self.lifecycle.lock().await;
        self.close_locked().await;
    }

    /// Closes and reopens the link unconditionally.
    pub async fn reconnect(&self) -> ClientResult<()> {
        let _guard = self.lifecycle.lock().await;
        self.reconnect_locked().await
    }

    /// Reconnects only if the link is still dead once the lifecycle lock is
    /// held, so concurrent callers trigger a single reconnect.
    pub async fn revive(&self) -> ClientResult<()> {
        let _guard = self.lifecycle.lock().await;
        if self.is_alive() {
            return Ok(());
        }
        self.reconnect_locked().await
    }

    /// Writes a batch and waits for all of its responses.
    pub async fn submit(&self, requests: &[Request]) -> ClientResult<Vec<Response>> {
        self.dispatch(requests).await?.wait().await
    }

    /// Encodes and writes a batch without waiting for responses.
    ///
    /// Nothing is written if any request fails to encode. Once the operations
    /// are queued the write runs on its own task, so dropping this future
    /// never leaves a partial frame on the wire.
    pub async fn dispatch(&self, requests: &[Request]) -> ClientResult<PendingBatch> {
        let mut buf = Vec::with_capacity(requests.len() * 32);
        for request in requests {
            request
                .encode(self.config.width, &mut buf)
                .map_err(ClientError::Encode)?;
        }

        let mut ops = Vec::with_capacity(requests.len());
        let mut receivers = Vec::with_capacity(requests.len());
        for request in requests {
            let (op, rx) = PendingOperation::new(request.response_kind());
            ops.push(op);
            receivers.push(rx);
        }

        let mut writer = self.writer.clone().lock_owned().await;
        if writer.is_none() {
            return Err(ClientError::Closed);
        }
        self.pending.push_batch(ops)?;

        let id = self.id;
        let pending = self.pending.clone();
        let alive = self.alive.clone();
        let write = tokio::spawn(async move {
            let Some(stream) = writer.as_mut() else {
                return;
            };
            if let Err(err) = stream.write_all(&buf).await {
                let err = ClientError::from(err);
                warn!(session = id, error = %err, "write failed, marking link dead");
                alive.store(false, Ordering::Release);
                pending.reject_all(err);
            }
        });
        // Dropping this await detaches the task; the write still completes.
        let _ = write.await;
        Ok(PendingBatch { receivers })
    }

    async fn reconnect_locked(&self) -> ClientResult<()> {
        self.metrics.record_reconnect();
        self.close_locked().await;
        match self.open_locked().await {
            Ok(()) => {
                info!(session = self.id, endpoint = %self.config.endpoint(), "link reconnected");
                Ok(())
            }
            Err(err) => {
                warn!(session = self.id, error = %err, "reconnect failed");
                Err(err)
            }
        }
    }

    async fn open_locked(&self) -> ClientResult<()> {
        let stream = connect(&self.config).await?;
        probe_writable(&stream, &self.config).await?;
        stream.set_nodelay(true)?;

        let (read_half, write_half) = stream.into_split();
        *self.writer.lock().await = Some(write_half);
        self.pending.reopen();
        self.alive.store(true, Ordering::Release);

        let dispatcher = FrameDispatcher::new(
            self.config.width,
            self.pending.clone(),
            self.subscriptions.clone(),
        );
        let handle = tokio::spawn(read_loop(
            self.id,
            read_half,
            dispatcher,
            self.pending.clone(),
            self.alive.clone(),
            self.metrics.clone(),
        ));
        *self.reader.lock() = Some(handle);

        debug!(session = self.id, endpoint = %self.config.endpoint(), "link open");
        Ok(())
    }

    async fn close_locked(&self) {
        self.alive.store(false, Ordering::Release);
        let reader = self.reader.lock().take();
        if let Some(handle) = reader {
            handle.abort();
            let _ = handle.await;
        }
        let writer = self.writer.lock().await.take();
        if let Some(mut stream) = writer {
            let _ = stream.shutdown().await;
        }
        self.pending.reject_all(ClientError::Closed);
        debug!(session = self.id, "link closed");
    }
}

impl Drop for LinkSession {
    fn drop(&mut self) {
        if let Some(handle) = self.reader.get_mut().take() {
            handle.abort();
        }
    }
}

async fn connect(config: &ClientConfig) -> ClientResult<TcpStream> {
    let attempt = async {
        let addrs: Vec<SocketAddr> = tokio::net::lookup_host((config.host.as_str(), config.port))
            .await
            .map_err(|_| ClientError::InvalidAddress(config.endpoint()))?
            .collect();
        if addrs.is_empty() {
            return Err(ClientError::InvalidAddress(config.endpoint()));
        }
        Ok::<_, ClientError>(TcpStream::connect(&addrs[..]).await?)
    };
    match config.connect_timeout() {
        Some(limit) => timeout(limit, attempt)
            .await
            .map_err(|_| ClientError::ConnectTimeout)?,
        None => attempt.await,
    }
}

/// Waits until the kernel reports the socket writable, in bounded attempts.
async fn probe_writable(stream: &TcpStream, config: &ClientConfig) -> ClientResult<()> {
    for attempt in 1..=config.writable_attempts {
        match timeout(config.writable_delay(), stream.writable()).await {
            Ok(Ok(())) => return Ok(()),
            Ok(Err(err)) => return Err(err.into()),
            Err(_) => debug!(attempt, "socket not writable yet"),
        }
    }
    Err(ClientError::WritableTimeout {
        attempts: config.writable_attempts,
    })
}

async fn read_loop(
    session: usize,
    mut reader: OwnedReadHalf,
    mut dispatcher: FrameDispatcher,
    pending: PendingQueue,
    alive: Arc<AtomicBool>,
    metrics: Arc<Metrics>,
) {
    let mut chunk = vec![0u8; READ_CHUNK];
    let failure = loop {
        match reader.read(&mut chunk).await {
            Ok(0) => break ClientError::Disconnected,
            Ok(n) => match dispatcher.on_bytes(&chunk[..n]) {
                Ok(stats) => metrics.record_events(stats.events),
                Err(err) => {
                    error!(session, error = %err, "stream desynchronized");
                    break err;
                }
            },
            Err(err) => break ClientError::from(err),
        }
    };
    alive.store(false, Ordering::Release);
    debug!(session, reason = %failure, "reader stopped");
    pending.reject_all(failure);
}
