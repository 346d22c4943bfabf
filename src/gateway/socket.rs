//! One live WebSocket session with the studio peer.
//!
//! The socket owns the upgrade, the reader/writer halves and the
//! request/response correlation. A spawned event loop multiplexes
//! incoming peer messages with outgoing calls; callers only see
//! [`PeerSocket::call`] and the close notification.
//!
//! # Event Loop
//!
//! The loop handles:
//!
//! - Incoming responses from the peer, routed by correlation id
//! - Outgoing calls from the gateway
//! - Close detection (peer close frame, transport error, stream end)

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde_json::{Value, from_str, to_string};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::{AUTHORIZATION, HeaderValue};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, error, trace, warn};

use crate::error::{Error, Result};
use crate::protocol::{CallId, CallRequest, CallResponse};

// ============================================================================
// Constants
// ============================================================================

/// Default timeout for a single control call.
pub(crate) const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Maximum in-flight calls before rejecting new ones.
const MAX_PENDING_CALLS: usize = 100;

// ============================================================================
// Types
// ============================================================================

/// Client-side WebSocket stream, TLS or plain.
type StudioStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Writer half of the split stream.
type WriteHalf = futures_util::stream::SplitSink<StudioStream, Message>;

/// Map of call ids to response channels.
type CorrelationMap = FxHashMap<CallId, oneshot::Sender<Result<CallResponse>>>;

// ============================================================================
// SocketCommand
// ============================================================================

/// Internal commands for the event loop.
enum SocketCommand {
    /// Send a call and route its response.
    Send {
        request: CallRequest,
        response_tx: oneshot::Sender<Result<CallResponse>>,
    },
    /// Remove a timed-out correlation entry.
    RemoveCorrelation(CallId),
    /// Close the socket.
    Shutdown,
}

// ============================================================================
// PeerSocket
// ============================================================================

/// A connected session with the studio peer.
///
/// Cheap to clone; all clones share the same event loop. When the
/// underlying connection drops, every clone observes it through
/// [`PeerSocket::wait_closed`] and in-flight calls fail with
/// [`Error::ConnectionClosed`].
#[derive(Debug)]
pub(crate) struct PeerSocket {
    /// Channel into the event loop.
    command_tx: mpsc::UnboundedSender<SocketCommand>,
    /// Correlation map (shared with the event loop).
    correlation: Arc<Mutex<CorrelationMap>>,
    /// Flipped to `true` when the event loop terminates.
    closed_rx: watch::Receiver<bool>,
}

impl Clone for PeerSocket {
    fn clone(&self) -> Self {
        Self {
            command_tx: self.command_tx.clone(),
            correlation: Arc::clone(&self.correlation),
            closed_rx: self.closed_rx.clone(),
        }
    }
}

impl PeerSocket {
    /// Dials the peer and performs the WebSocket upgrade.
    ///
    /// When a password is configured it rides on the upgrade request
    /// as a bearer `Authorization` header.
    ///
    /// # Errors
    ///
    /// - [`Error::Handshake`] if the peer answered with a plain HTTP status
    /// - [`Error::Connection`] for any other dial or upgrade failure
    /// - [`Error::Config`] if the password cannot form a valid header
    pub(crate) async fn connect(addr: &str, password: Option<&str>) -> Result<Self> {
        let mut request = addr.into_client_request().map_err(Error::from_ws)?;

        if let Some(password) = password {
            let value = HeaderValue::from_str(&format!("Bearer {password}"))
                .map_err(|_| Error::config("studio password is not a valid header value"))?;
            request.headers_mut().insert(AUTHORIZATION, value);
        }

        let (ws_stream, response) = connect_async(request).await.map_err(Error::from_ws)?;
        debug!(addr, status = %response.status(), "Studio WebSocket established");

        Ok(Self::from_stream(ws_stream))
    }

    /// Wraps an upgraded stream and spawns the event loop.
    fn from_stream(ws_stream: StudioStream) -> Self {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let correlation = Arc::new(Mutex::new(CorrelationMap::default()));
        let (closed_tx, closed_rx) = watch::channel(false);

        tokio::spawn(Self::run_event_loop(
            ws_stream,
            command_rx,
            Arc::clone(&correlation),
            closed_tx,
        ));

        Self {
            command_tx,
            correlation,
            closed_rx,
        }
    }

    /// Sends a call and waits for the peer's answer.
    ///
    /// # Errors
    ///
    /// - [`Error::ConnectionClosed`] if the socket dropped mid-call
    /// - [`Error::CallTimeout`] if no response arrived within `wait`
    /// - [`Error::CallFailed`] if the peer answered with an error
    /// - [`Error::Connection`] if the in-flight cap is exceeded
    pub(crate) async fn call(
        &self,
        request_type: impl Into<String>,
        request_data: Value,
        wait: Duration,
    ) -> Result<Value> {
        let request = CallRequest::new(request_type, request_data);
        self.begin_call(request)?.wait(wait).await
    }

    /// Hands a call to the event loop and returns its pending reply.
    ///
    /// The hand-off is synchronous, so calls begun in sequence reach
    /// the wire in that sequence. Used directly by the queue replay,
    /// which must preserve arrival order while completions overlap.
    pub(crate) fn begin_call(&self, request: CallRequest) -> Result<PendingCall> {
        {
            let correlation = self.correlation.lock();
            if correlation.len() >= MAX_PENDING_CALLS {
                warn!(
                    pending = correlation.len(),
                    max = MAX_PENDING_CALLS,
                    "Too many in-flight calls"
                );
                return Err(Error::connection(format!(
                    "too many in-flight calls: {}/{}",
                    correlation.len(),
                    MAX_PENDING_CALLS
                )));
            }
        }

        let id = request.id;
        let (response_tx, response_rx) = oneshot::channel();

        self.command_tx
            .send(SocketCommand::Send {
                request,
                response_tx,
            })
            .map_err(|_| Error::ConnectionClosed)?;

        Ok(PendingCall {
            id,
            command_tx: self.command_tx.clone(),
            response_rx,
        })
    }

    /// Returns the number of in-flight calls.
    #[inline]
    #[must_use]
    pub(crate) fn pending_count(&self) -> usize {
        self.correlation.lock().len()
    }

    /// Resolves once the event loop has terminated.
    pub(crate) async fn wait_closed(&self) {
        let mut closed_rx = self.closed_rx.clone();
        while !*closed_rx.borrow() {
            if closed_rx.changed().await.is_err() {
                break;
            }
        }
    }

    /// Closes the socket gracefully.
    pub(crate) fn shutdown(&self) {
        let _ = self.command_tx.send(SocketCommand::Shutdown);
    }

    /// Event loop that owns the WebSocket I/O.
    async fn run_event_loop(
        ws_stream: StudioStream,
        mut command_rx: mpsc::UnboundedReceiver<SocketCommand>,
        correlation: Arc<Mutex<CorrelationMap>>,
        closed_tx: watch::Sender<bool>,
    ) {
        let (mut ws_write, mut ws_read) = ws_stream.split();

        loop {
            tokio::select! {
                // Incoming messages from the peer
                message = ws_read.next() => {
                    match message {
                        Some(Ok(Message::Text(text))) => {
                            Self::handle_incoming_message(&text, &correlation);
                        }

                        Some(Ok(Message::Close(_))) => {
                            debug!("WebSocket closed by peer");
                            break;
                        }

                        Some(Err(e)) => {
                            error!(error = %e, "WebSocket error");
                            break;
                        }

                        None => {
                            debug!("WebSocket stream ended");
                            break;
                        }

                        // Ignore Binary, Ping, Pong
                        _ => {}
                    }
                }

                // Outgoing calls from the gateway
                command = command_rx.recv() => {
                    match command {
                        Some(SocketCommand::Send { request, response_tx }) => {
                            Self::handle_send_command(
                                request,
                                response_tx,
                                &mut ws_write,
                                &correlation,
                            ).await;
                        }

                        Some(SocketCommand::RemoveCorrelation(id)) => {
                            correlation.lock().remove(&id);
                            debug!(%id, "Removed timed-out correlation");
                        }

                        Some(SocketCommand::Shutdown) => {
                            debug!("Shutdown command received");
                            let _ = ws_write.close().await;
                            break;
                        }

                        None => {
                            debug!("Command channel closed");
                            break;
                        }
                    }
                }
            }
        }

        // Fail all in-flight calls, then surface the close
        Self::fail_pending_calls(&correlation);
        let _ = closed_tx.send(true);

        debug!("Socket event loop terminated");
    }

    /// Routes an incoming text message to its waiting call.
    fn handle_incoming_message(text: &str, correlation: &Arc<Mutex<CorrelationMap>>) {
        match from_str::<CallResponse>(text) {
            Ok(response) => {
                let tx = correlation.lock().remove(&response.id);

                if let Some(tx) = tx {
                    let _ = tx.send(Ok(response));
                } else {
                    warn!(id = %response.id, "Response for unknown call");
                }
            }
            // Peer-initiated notifications are not consumed here
            Err(_) => trace!(text = %text, "Ignoring non-response peer message"),
        }
    }

    /// Serializes and writes one outgoing call.
    async fn handle_send_command(
        request: CallRequest,
        response_tx: oneshot::Sender<Result<CallResponse>>,
        ws_write: &mut WriteHalf,
        correlation: &Arc<Mutex<CorrelationMap>>,
    ) {
        let id = request.id;

        let json = match to_string(&request) {
            Ok(j) => j,
            Err(e) => {
                let _ = response_tx.send(Err(Error::Json(e)));
                return;
            }
        };

        // Store correlation before sending
        correlation.lock().insert(id, response_tx);

        if let Err(e) = ws_write.send(Message::Text(json.into())).await {
            // Remove correlation and notify caller
            if let Some(tx) = correlation.lock().remove(&id) {
                let _ = tx.send(Err(Error::from_ws(e)));
            }
            return;
        }

        trace!(%id, "Call sent");
    }

    /// Fails all in-flight calls with [`Error::ConnectionClosed`].
    fn fail_pending_calls(correlation: &Arc<Mutex<CorrelationMap>>) {
        let pending: Vec<_> = correlation.lock().drain().collect();
        let count = pending.len();

        for (_, tx) in pending {
            let _ = tx.send(Err(Error::ConnectionClosed));
        }

        if count > 0 {
            debug!(count, "Failed in-flight calls on close");
        }
    }
}

// ============================================================================
// PendingCall
// ============================================================================

/// An issued call whose response has not arrived yet.
pub(crate) struct PendingCall {
    id: CallId,
    command_tx: mpsc::UnboundedSender<SocketCommand>,
    response_rx: oneshot::Receiver<Result<CallResponse>>,
}

impl PendingCall {
    /// Waits for the response, cleaning up on timeout.
    ///
    /// # Errors
    ///
    /// - [`Error::CallTimeout`] if no response arrived within `wait`
    /// - [`Error::ConnectionClosed`] if the socket dropped mid-call
    /// - [`Error::CallFailed`] if the peer answered with an error
    pub(crate) async fn wait(self, wait: Duration) -> Result<Value> {
        match timeout(wait, self.response_rx).await {
            Ok(Ok(result)) => result.and_then(CallResponse::into_result),
            Ok(Err(_)) => Err(Error::ConnectionClosed),
            Err(_) => {
                // Timeout; drop the correlation entry
                let _ = self
                    .command_tx
                    .send(SocketCommand::RemoveCorrelation(self.id));

                Err(Error::call_timeout(wait.as_millis() as u64))
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
