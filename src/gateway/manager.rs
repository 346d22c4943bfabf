//! Connection manager for the studio control peer.
//!
//! The [`Gateway`] owns the control-connection lifecycle: it dials the
//! peer, replays queued commands on reconnect, detects closure and
//! schedules the next attempt through the backoff policy. A periodic
//! heartbeat call keeps intermediaries from reaping the idle
//! connection.
//!
//! # States
//!
//! | Transition | Trigger | Effect |
//! |------------|---------|--------|
//! | Disconnected → Connecting | attempt scheduled | dial begins |
//! | Connecting → Connected | upgrade succeeded | counter reset, queue replayed |
//! | Connecting → Disconnected | dial failed | counter observed then incremented |
//! | Connected → Disconnected | socket closed | reconnect with current counter |
//!
//! Heartbeat failures never transition state; only socket closure
//! does. Connect errors outside the transient set end the run task,
//! which the process supervisor treats as fatal.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::watch;
use tokio::time::{MissedTickBehavior, interval, sleep};
use tracing::{debug, error, info, trace, warn};

use crate::backoff::ReconnectBackoff;
use crate::error::{Error, Result};
use crate::gateway::queue::{CallTicket, PendingQueue};
use crate::gateway::socket::{DEFAULT_CALL_TIMEOUT, PeerSocket};
use crate::protocol::CallRequest;

// ============================================================================
// Constants
// ============================================================================

/// No-op call type used as the heartbeat probe.
pub(crate) const HEARTBEAT_REQUEST_TYPE: &str = "GetVersion";

/// Default lifetime of a queued command.
const DEFAULT_QUEUE_TIMEOUT: Duration = Duration::from_secs(30);

/// Default interval between heartbeat probes.
const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

// ============================================================================
// ConnectionState
// ============================================================================

/// Externally visible connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No connection; the next attempt is scheduled or shutting down.
    Disconnected,
    /// A dial is in flight.
    Connecting,
    /// The peer is reachable and accepting calls.
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
        };
        f.write_str(name)
    }
}

// ============================================================================
// SubmitOutcome
// ============================================================================

/// Result of [`Gateway::submit_or_queue`].
#[derive(Debug)]
pub enum SubmitOutcome {
    /// Executed immediately against the connected peer.
    Completed(Value),
    /// Held for replay; the ticket resolves on reconnect or expiry.
    Queued(CallTicket),
}

impl SubmitOutcome {
    /// Returns `true` if the command executed immediately.
    #[inline]
    #[must_use]
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed(_))
    }

    /// Returns `true` if the command was queued for replay.
    #[inline]
    #[must_use]
    pub fn is_queued(&self) -> bool {
        matches!(self, Self::Queued(_))
    }
}

// ============================================================================
// GatewayOptions
// ============================================================================

/// Tunable gateway timings.
///
/// Defaults carry the production values; tests shrink them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayOptions {
    /// Backoff policy between connection attempts.
    pub reconnect: ReconnectBackoff,

    /// How long a queued command may wait for a reconnect.
    pub queue_timeout: Duration,

    /// Interval between heartbeat probes while connected.
    pub heartbeat_interval: Duration,

    /// Timeout for a single control call.
    pub call_timeout: Duration,
}

impl Default for GatewayOptions {
    fn default() -> Self {
        Self {
            reconnect: ReconnectBackoff::default(),
            queue_timeout: DEFAULT_QUEUE_TIMEOUT,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }
}

impl GatewayOptions {
    /// Creates options with default settings.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the reconnect backoff policy.
    #[inline]
    #[must_use]
    pub fn with_reconnect(mut self, reconnect: ReconnectBackoff) -> Self {
        self.reconnect = reconnect;
        self
    }

    /// Sets the queued command lifetime.
    #[inline]
    #[must_use]
    pub fn with_queue_timeout(mut self, queue_timeout: Duration) -> Self {
        self.queue_timeout = queue_timeout;
        self
    }

    /// Sets the heartbeat interval.
    #[inline]
    #[must_use]
    pub fn with_heartbeat_interval(mut self, heartbeat_interval: Duration) -> Self {
        self.heartbeat_interval = heartbeat_interval;
        self
    }

    /// Sets the control call timeout.
    #[inline]
    #[must_use]
    pub fn with_call_timeout(mut self, call_timeout: Duration) -> Self {
        self.call_timeout = call_timeout;
        self
    }
}

// ============================================================================
// LinkState
// ============================================================================

/// Internal state, holding the live socket while connected.
enum LinkState {
    Disconnected,
    Connecting,
    Connected(PeerSocket),
}

impl LinkState {
    fn kind(&self) -> ConnectionState {
        match self {
            Self::Disconnected => ConnectionState::Disconnected,
            Self::Connecting => ConnectionState::Connecting,
            Self::Connected(_) => ConnectionState::Connected,
        }
    }
}

// ============================================================================
// Gateway
// ============================================================================

/// Resilient command gateway to the studio peer.
///
/// Cheap to clone; all clones share one connection, one queue and one
/// attempt counter. Only the internal link loop mutates the state;
/// callers observe it through [`Gateway::state`] and submit through
/// [`Gateway::submit`] / [`Gateway::submit_or_queue`].
#[derive(Clone)]
pub struct Gateway {
    inner: Arc<GatewayInner>,
}

struct GatewayInner {
    /// WebSocket address of the peer.
    addr: String,
    /// Credential attached to the upgrade request.
    password: Option<String>,
    /// Timing configuration.
    options: GatewayOptions,
    /// Current link state; never held across an await.
    link: Mutex<LinkState>,
    /// Consecutive failed connection attempts.
    attempt: AtomicU32,
    /// Commands awaiting a reconnect.
    queue: Arc<PendingQueue>,
    /// Cooperative shutdown signal.
    shutdown_tx: watch::Sender<bool>,
}

// ============================================================================
// Gateway - Constructor
// ============================================================================

impl Gateway {
    /// Creates a gateway for the given peer address.
    ///
    /// The gateway is inert until [`Gateway::run`] is awaited.
    #[must_use]
    pub fn new(addr: impl Into<String>, password: Option<String>, options: GatewayOptions) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        let queue = Arc::new(PendingQueue::new(options.queue_timeout));

        Self {
            inner: Arc::new(GatewayInner {
                addr: addr.into(),
                password,
                options,
                link: Mutex::new(LinkState::Disconnected),
                attempt: AtomicU32::new(0),
                queue,
                shutdown_tx,
            }),
        }
    }
}

// ============================================================================
// Gateway - Public API
// ============================================================================

impl Gateway {
    /// Submits a command, failing fast when disconnected.
    ///
    /// # Errors
    ///
    /// - [`Error::NotConnected`] if no connection is up; never blocks
    ///   waiting for one
    /// - [`Error::CallFailed`] / [`Error::CallTimeout`] from the call
    pub async fn submit(
        &self,
        request_type: impl Into<String>,
        request_data: Value,
    ) -> Result<Value> {
        let socket = self.inner.connected_socket().ok_or(Error::NotConnected)?;
        socket
            .call(request_type, request_data, self.inner.options.call_timeout)
            .await
    }

    /// Submits a command, queuing it if the peer is offline.
    ///
    /// While connected this behaves like [`Gateway::submit`] and yields
    /// [`SubmitOutcome::Completed`]. Otherwise the command joins the
    /// pending queue and the returned ticket resolves when the
    /// connection comes back or the entry expires.
    ///
    /// # Errors
    ///
    /// - [`Error::ConnectionClosed`] if the gateway has been closed
    /// - Call errors from the immediate path
    pub async fn submit_or_queue(
        &self,
        request_type: impl Into<String>,
        request_data: Value,
    ) -> Result<SubmitOutcome> {
        if *self.inner.shutdown_tx.borrow() {
            return Err(Error::ConnectionClosed);
        }

        match self.inner.connected_socket() {
            Some(socket) => {
                let result = socket
                    .call(request_type, request_data, self.inner.options.call_timeout)
                    .await?;
                Ok(SubmitOutcome::Completed(result))
            }
            None => Ok(SubmitOutcome::Queued(
                self.inner.queue.enqueue(request_type, request_data),
            )),
        }
    }

    /// Returns `true` if the peer is connected and accepting calls.
    #[inline]
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Returns the current connection state.
    #[inline]
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.inner.link.lock().kind()
    }

    /// Returns the consecutive failed attempt count.
    ///
    /// Resets to zero on every successful connect.
    #[inline]
    #[must_use]
    pub fn current_attempt(&self) -> u32 {
        self.inner.attempt.load(Ordering::SeqCst)
    }

    /// Returns the number of commands waiting for a reconnect.
    #[inline]
    #[must_use]
    pub fn queued_count(&self) -> usize {
        self.inner.queue.len()
    }

    /// Stops the gateway: closes the socket, fails queued commands.
    ///
    /// Idempotent. [`Gateway::run`] returns shortly after.
    pub fn close(&self) {
        self.inner.close();
    }
}

// ============================================================================
// Gateway - Run Loop
// ============================================================================

impl Gateway {
    /// Drives the connection until [`Gateway::close`] or a fatal error.
    ///
    /// Runs the link loop and the heartbeat side by side. Transient
    /// connection failures are retried forever with backoff and never
    /// surface here.
    ///
    /// # Errors
    ///
    /// Returns the first connect error outside the transient set. The
    /// caller decides process policy; the bridge supervisor treats it
    /// as fatal.
    pub async fn run(&self) -> Result<()> {
        let heartbeat = tokio::spawn(Self::run_heartbeat(Arc::clone(&self.inner)));
        let result = Self::run_link(Arc::clone(&self.inner)).await;

        // Tear down whatever the exit path left behind
        self.inner.close();
        let _ = heartbeat.await;

        result
    }

    /// Connect, replay, watch for closure, back off, repeat.
    async fn run_link(inner: Arc<GatewayInner>) -> Result<()> {
        let mut shutdown_rx = inner.shutdown_tx.subscribe();

        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            inner.set_link(LinkState::Connecting);
            match PeerSocket::connect(&inner.addr, inner.password.as_deref()).await {
                Ok(socket) => {
                    // Reset before replay so a drop right after this
                    // connect starts backing off from the bottom.
                    inner.attempt.store(0, Ordering::SeqCst);
                    info!(addr = %inner.addr, "Studio connected");
                    inner.set_link(LinkState::Connected(socket.clone()));

                    inner.replay_queue(&socket);

                    let closing = tokio::select! {
                        () = socket.wait_closed() => false,
                        _ = shutdown_rx.changed() => true,
                    };
                    inner.set_link(LinkState::Disconnected);

                    if closing {
                        socket.shutdown();
                        break;
                    }

                    warn!("Studio connection lost");
                    let attempt = inner.attempt.load(Ordering::SeqCst);
                    let delay = inner.options.reconnect.delay(attempt);
                    debug!(delay_ms = delay.as_millis() as u64, "Reconnect scheduled");
                    if wait_or_shutdown(&mut shutdown_rx, delay).await {
                        break;
                    }
                }

                Err(e) if e.is_transient_connection() => {
                    inner.set_link(LinkState::Disconnected);
                    let attempt = inner.attempt.load(Ordering::SeqCst);
                    let delay = inner.options.reconnect.delay(attempt);
                    inner.attempt.store(attempt.saturating_add(1), Ordering::SeqCst);
                    warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Studio connect failed; retrying"
                    );
                    if wait_or_shutdown(&mut shutdown_rx, delay).await {
                        break;
                    }
                }

                Err(e) => {
                    inner.set_link(LinkState::Disconnected);
                    error!(error = %e, "Studio connect failed with a non-recoverable error");
                    return Err(e);
                }
            }
        }

        Ok(())
    }

    /// Periodic no-op call keeping the idle connection alive.
    async fn run_heartbeat(inner: Arc<GatewayInner>) {
        let mut shutdown_rx = inner.shutdown_tx.subscribe();
        let mut ticker = interval(inner.options.heartbeat_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown_rx.changed() => break,
            }
            if *shutdown_rx.borrow() {
                break;
            }

            let Some(socket) = inner.connected_socket() else {
                continue;
            };

            // Failures are logged only. Disconnects are detected by
            // the link loop through socket closure, never inferred
            // from a failed probe.
            match socket
                .call(
                    HEARTBEAT_REQUEST_TYPE,
                    Value::Null,
                    inner.options.call_timeout,
                )
                .await
            {
                Ok(_) => trace!("Heartbeat acknowledged"),
                Err(e) => warn!(error = %e, "Heartbeat failed"),
            }
        }
    }
}

// ============================================================================
// GatewayInner
// ============================================================================

impl GatewayInner {
    fn set_link(&self, state: LinkState) {
        *self.link.lock() = state;
    }

    fn connected_socket(&self) -> Option<PeerSocket> {
        match &*self.link.lock() {
            LinkState::Connected(socket) => Some(socket.clone()),
            _ => None,
        }
    }

    fn close(&self) {
        let _ = self.shutdown_tx.send_replace(true);
        self.queue.fail_all();
        self.set_link(LinkState::Disconnected);
    }

    /// Replays every queued command on a fresh connection.
    ///
    /// Calls are issued in queue order; completions run concurrently
    /// so one slow or failing command never blocks the rest.
    fn replay_queue(&self, socket: &PeerSocket) {
        let drained = self.queue.drain_all();
        if drained.is_empty() {
            return;
        }
        info!(count = drained.len(), "Replaying queued commands");

        let wait = self.options.call_timeout;
        for queued in drained {
            let request = CallRequest::new(queued.request_type.clone(), queued.request_data.clone());
            match socket.begin_call(request) {
                Ok(pending) => {
                    tokio::spawn(async move {
                        queued.complete(pending.wait(wait).await);
                    });
                }
                Err(e) => queued.complete(Err(e)),
            }
        }
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Sleeps for `delay`, returning `true` if shutdown fired first.
async fn wait_or_shutdown(shutdown_rx: &mut watch::Receiver<bool>, delay: Duration) -> bool {
    tokio::select! {
        () = sleep(delay) => false,
        _ = shutdown_rx.changed() => true,
    }
}

// ============================================================================
// Tests
// ============================================================================
