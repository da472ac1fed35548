//! # Frame Dispatcher
//!
//! Purpose: Turn an unframed byte stream into responses for pending
//! operations and push events for subscribers.
//!
//! ## Design Principles
//! 1. **Single Owner**: Only a session's reader task holds the dispatcher,
//!    so chunks are processed strictly one at a time and in arrival order.
//! 2. **FIFO Correlation**: Responses carry no id; the n-th response frame
//!    belongs to the n-th request written on the socket.
//! 3. **Frame-Local Failures**: A frame that decodes badly fails only its own
//!    operation. Only a sizing failure poisons the stream.
//!
//! ```text
//! chunk ──► residual ──► [0x19?] ──yes──► event frame ──► subscriber
//!                           │
//!                           no ──► head op kind ──► frame length ──► decode ──► reply
//! ```

use std::collections::VecDeque;
use std::sync::Arc;

use bytes::{Buf, BytesMut};
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{debug, trace, warn};

use tkv_common::{IntegerWidth, PushEvent, Response, ResponseKind, TAG_EVENT};

use crate::error::{ClientError, ClientResult};
use crate::frame::{event_frame_len, response_frame_len, FrameLength};
use crate::subscriptions::SubscriptionTable;

/// A request that has been written (or is about to be) and awaits its frame.
#[derive(Debug)]
pub struct PendingOperation {
    pub kind: ResponseKind,
    reply: oneshot::Sender<ClientResult<Response>>,
}

impl PendingOperation {
    pub fn new(kind: ResponseKind) -> (Self, oneshot::Receiver<ClientResult<Response>>) {
        let (reply, rx) = oneshot::channel();
        (PendingOperation { kind, reply }, rx)
    }

    /// Settles the operation; a caller that stopped waiting is ignored.
    pub fn complete(self, result: ClientResult<Response>) {
        let _ = self.reply.send(result);
    }
}

struct QueueState {
    ops: VecDeque<PendingOperation>,
    /// Set while the link is down; new operations are refused with it.
    closed: Option<ClientError>,
}

/// FIFO of pending operations shared by the writer side and the reader task.
///
/// The lock is held only to push, pop or drain, never across I/O.
#[derive(Clone)]
pub struct PendingQueue {
    state: Arc<Mutex<QueueState>>,
}

impl Default for PendingQueue {
    fn default() -> Self {
        PendingQueue {
            state: Arc::new(Mutex::new(QueueState {
                ops: VecDeque::new(),
                closed: Some(ClientError::Closed),
            })),
        }
    }
}

impl PendingQueue {
    /// Creates a queue that refuses work until [`PendingQueue::reopen`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a batch atomically, or returns the error the queue was closed
    /// with.
    pub fn push_batch(&self, ops: Vec<PendingOperation>) -> ClientResult<()> {
        let mut state = self.state.lock();
        if let Some(err) = &state.closed {
            return Err(err.clone());
        }
        state.ops.extend(ops);
        Ok(())
    }

    pub fn head_kind(&self) -> Option<ResponseKind> {
        self.state.lock().ops.front().map(|op| op.kind)
    }

    pub fn pop_front(&self) -> Option<PendingOperation> {
        self.state.lock().ops.pop_front()
    }

    pub fn len(&self) -> usize {
        self.state.lock().ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().ops.is_empty()
    }

    /// Closes the queue and fails everything in it with `err`.
    pub fn reject_all(&self, err: ClientError) {
        let drained: Vec<PendingOperation> = {
            let mut state = self.state.lock();
            state.closed = Some(err.clone());
            state.ops.drain(..).collect()
        };
        if !drained.is_empty() {
            debug!(count = drained.len(), error = %err, "rejecting pending operations");
        }
        for op in drained {
            op.complete(Err(err.clone()));
        }
    }

    pub fn reopen(&self) {
        self.state.lock().closed = None;
    }
}

/// What one call to [`FrameDispatcher::on_bytes`] delivered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub responses: usize,
    pub events: usize,
}

/// Per-session stream demultiplexer.
pub struct FrameDispatcher {
    width: IntegerWidth,
    residual: BytesMut,
    pending: PendingQueue,
    subscriptions: SubscriptionTable,
}

impl FrameDispatcher {
    pub fn new(width: IntegerWidth, pending: PendingQueue, subscriptions: SubscriptionTable) -> Self {
        FrameDispatcher {
            width,
            residual: BytesMut::with_capacity(4096),
            pending,
            subscriptions,
        }
    }

    /// Bytes received but not yet claimed by a complete frame.
    pub fn residual_len(&self) -> usize {
        self.residual.len()
    }

    /// Consumes one chunk in arrival order.
    ///
    /// Every complete frame at the head of the stream is delivered; partial
    /// frames and bytes nobody is waiting for stay in the residual buffer.
    ///
    /// # Errors
    /// `ClientError::ProtocolDesync` when a frame cannot be sized. The stream
    /// is unusable afterwards.
    pub fn on_bytes(&mut self, chunk: &[u8]) -> ClientResult<DispatchStats> {
        self.residual.extend_from_slice(chunk);

        let mut stats = DispatchStats::default();
        let mut offset = 0;
        let result = loop {
            let buf = &self.residual[offset..];
            let Some(&first) = buf.first() else {
                break Ok(());
            };

            if first == TAG_EVENT {
                match event_frame_len(buf, self.width) {
                    Ok(FrameLength::Complete(len)) => {
                        self.deliver_event(&buf[..len]);
                        stats.events += 1;
                        offset += len;
                        continue;
                    }
                    Ok(FrameLength::NeedMore) => break Ok(()),
                    Err(err) => break Err(err),
                }
            }

            let Some(kind) = self.pending.head_kind() else {
                trace!(bytes = buf.len(), "holding unclaimed bytes");
                break Ok(());
            };

            match response_frame_len(kind, buf, self.width) {
                Ok(FrameLength::Complete(len)) => {
                    let decoded =
                        Response::decode(kind, &buf[..len], self.width).map_err(ClientError::Malformed);
                    if let Err(err) = &decoded {
                        warn!(%kind, len, error = %err, "failed to decode response frame");
                    }
                    offset += len;
                    if let Some(op) = self.pending.pop_front() {
                        op.complete(decoded);
                    }
                    stats.responses += 1;
                }
                Ok(FrameLength::NeedMore) => break Ok(()),
                Err(err) => break Err(err),
            }
        };

        self.residual.advance(offset);
        result.map(|()| stats)
    }

    fn deliver_event(&self, frame: &[u8]) {
        let event = match PushEvent::decode(frame, self.width) {
            Ok(event) => event,
            Err(err) => {
                warn!(error = %err, "dropping malformed push frame");
                return;
            }
        };
        match self.subscriptions.get(&event.channel) {
            Some(subscriber) => subscriber.notify(&event),
            None => debug!(channel = %event.channel, "push event for unknown channel"),
        }
    }
}
