//! Pending command queue for the disconnected gateway.
//!
//! Commands accepted while the studio is offline wait here until the
//! connection comes back, then replay in arrival order. Each entry
//! carries a one-shot completion sink and an expiry timer; whichever
//! path removes the entry from the queue (drain, expiry, shutdown)
//! owns the sink, so every command completes exactly once.

// ============================================================================
// Imports
// ============================================================================

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::error::{Error, Result};

// ============================================================================
// CallTicket
// ============================================================================

/// Receipt for a queued command.
///
/// Resolves with the peer's result once the command is replayed, or
/// with [`Error::QueueTimeout`] / [`Error::ConnectionClosed`] if the
/// connection never came back for it. Dropping the ticket is allowed;
/// the command still replays, its result is discarded.
#[derive(Debug)]
pub struct CallTicket {
    rx: oneshot::Receiver<Result<Value>>,
}

impl CallTicket {
    /// Waits for the queued command to complete.
    ///
    /// # Errors
    ///
    /// - [`Error::QueueTimeout`] if the command expired in the queue
    /// - [`Error::ConnectionClosed`] if the gateway shut down first
    /// - Any error the peer answered with on replay
    pub async fn wait(self) -> Result<Value> {
        match self.rx.await {
            Ok(result) => result,
            Err(_) => Err(Error::ConnectionClosed),
        }
    }
}

// ============================================================================
// QueuedCall
// ============================================================================

/// A command held for replay, with its completion sink.
#[derive(Debug)]
pub(crate) struct QueuedCall {
    /// Call type understood by the peer.
    pub(crate) request_type: String,
    /// Opaque call parameters.
    pub(crate) request_data: Value,
    /// When the command entered the queue.
    pub(crate) enqueued_at: Instant,
    /// Queue-local identity for expiry bookkeeping.
    serial: u64,
    /// Completion sink; consumed by [`QueuedCall::complete`].
    sink: oneshot::Sender<Result<Value>>,
}

impl QueuedCall {
    /// Completes the command, consuming it.
    ///
    /// A dropped ticket makes this a no-op.
    pub(crate) fn complete(self, result: Result<Value>) {
        if self.sink.send(result).is_err() {
            debug!(serial = self.serial, "Ticket dropped before completion");
        }
    }
}

// ============================================================================
// PendingQueue
// ============================================================================

/// FIFO holding area for commands awaiting a reconnect.
///
/// Entries expire individually after the configured timeout. All
/// mutation happens under one mutex; entry ownership moves out with
/// the removal, never shared.
#[derive(Debug)]
pub(crate) struct PendingQueue {
    inner: Mutex<VecDeque<QueuedCall>>,
    next_serial: AtomicU64,
    timeout: Duration,
}

impl PendingQueue {
    /// Creates an empty queue with the given per-entry timeout.
    pub(crate) fn new(timeout: Duration) -> Self {
        Self {
            inner: Mutex::new(VecDeque::new()),
            next_serial: AtomicU64::new(0),
            timeout,
        }
    }

    /// Appends a command and returns its ticket.
    ///
    /// Spawns the expiry timer for the entry. If the entry is still
    /// queued when the timer fires it completes with
    /// [`Error::QueueTimeout`]; if it was drained first the timer
    /// finds nothing.
    pub(crate) fn enqueue(
        self: &Arc<Self>,
        request_type: impl Into<String>,
        request_data: Value,
    ) -> CallTicket {
        let (sink, rx) = oneshot::channel();
        let serial = self.next_serial.fetch_add(1, Ordering::Relaxed);
        let request_type = request_type.into();

        let len = {
            let mut inner = self.inner.lock();
            inner.push_back(QueuedCall {
                request_type,
                request_data,
                enqueued_at: Instant::now(),
                serial,
                sink,
            });
            inner.len()
        };
        debug!(serial, queued = len, "Command queued while studio offline");

        let queue = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(queue.timeout).await;
            queue.expire(serial);
        });

        CallTicket { rx }
    }

    /// Atomically removes every entry, oldest first.
    pub(crate) fn drain_all(&self) -> Vec<QueuedCall> {
        self.inner.lock().drain(..).collect()
    }

    /// Completes every remaining entry with [`Error::ConnectionClosed`].
    pub(crate) fn fail_all(&self) {
        let drained = self.drain_all();
        let count = drained.len();

        for call in drained {
            call.complete(Err(Error::ConnectionClosed));
        }

        if count > 0 {
            debug!(count, "Failed queued commands on shutdown");
        }
    }

    /// Returns the number of waiting commands.
    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Removes the entry by serial if still queued and fails it.
    fn expire(&self, serial: u64) {
        let expired = {
            let mut inner = self.inner.lock();
            inner
                .iter()
                .position(|call| call.serial == serial)
                .and_then(|index| inner.remove(index))
        };

        if let Some(call) = expired {
            let waited_ms = call.enqueued_at.elapsed().as_millis() as u64;
            warn!(serial, waited_ms, "Queued command expired before reconnect");
            call.complete(Err(Error::queue_timeout(waited_ms)));
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
