//! In-process studio peers for gateway tests.
//!
//! [`FakePeer`] is a real WebSocket server speaking the call envelope:
//! it records every call, answers through a pluggable handler and can
//! sever its connections on demand. [`RejectingProxy`] answers the
//! upgrade with a plain HTTP status, for handshake classification
//! tests.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{
    ErrorResponse, Request as UpgradeRequest, Response as UpgradeResponse,
};

use crate::protocol::{CallRequest, CallResponse};

// ============================================================================
// Types
// ============================================================================

/// Decides the response for one recorded call. `None` stays silent.
pub(crate) type FakeHandler = Arc<dyn Fn(&CallRequest) -> Option<CallResponse> + Send + Sync>;

// ============================================================================
// FakePeer
// ============================================================================

/// In-process control peer accepting WebSocket upgrades.
pub(crate) struct FakePeer {
    port: u16,
    calls: Arc<Mutex<Vec<CallRequest>>>,
    connections: Arc<AtomicUsize>,
    last_authorization: Arc<Mutex<Option<String>>>,
    killers: Arc<Mutex<Vec<mpsc::UnboundedSender<()>>>>,
    accept_task: JoinHandle<()>,
}

impl FakePeer {
    /// Starts a peer on an ephemeral port that acknowledges every call.
    pub(crate) async fn start() -> Self {
        Self::spawn_on(0, Self::ack_handler()).await
    }

    /// Starts an acknowledging peer on a specific port.
    pub(crate) async fn start_on(port: u16) -> Self {
        Self::spawn_on(port, Self::ack_handler()).await
    }

    /// Starts a peer with a custom call handler.
    pub(crate) async fn start_with(handler: FakeHandler) -> Self {
        Self::spawn_on(0, handler).await
    }

    /// Starts a peer with a custom call handler on a specific port.
    pub(crate) async fn start_on_with(port: u16, handler: FakeHandler) -> Self {
        Self::spawn_on(port, handler).await
    }

    /// Default handler: `ok` result echoing the call type.
    fn ack_handler() -> FakeHandler {
        Arc::new(|request| {
            Some(CallResponse::ok(
                request.id,
                json!({"requestType": request.request_type}),
            ))
        })
    }

    async fn spawn_on(port: u16, handler: FakeHandler) -> Self {
        let listener = TcpListener::bind(("127.0.0.1", port))
            .await
            .expect("bind fake peer");
        let port = listener.local_addr().expect("local addr").port();

        let calls: Arc<Mutex<Vec<CallRequest>>> = Arc::new(Mutex::new(Vec::new()));
        let connections = Arc::new(AtomicUsize::new(0));
        let last_authorization: Arc<Mutex<Option<String>>> = Arc::new(Mutex::new(None));
        let killers: Arc<Mutex<Vec<mpsc::UnboundedSender<()>>>> = Arc::new(Mutex::new(Vec::new()));

        let accept_calls = Arc::clone(&calls);
        let accept_connections = Arc::clone(&connections);
        let accept_authorization = Arc::clone(&last_authorization);
        let accept_killers = Arc::clone(&killers);

        let accept_task = tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                accept_connections.fetch_add(1, Ordering::SeqCst);

                let (kill_tx, kill_rx) = mpsc::unbounded_channel();
                accept_killers.lock().push(kill_tx);

                tokio::spawn(Self::serve_connection(
                    stream,
                    Arc::clone(&handler),
                    Arc::clone(&accept_calls),
                    Arc::clone(&accept_authorization),
                    kill_rx,
                ));
            }
        });

        Self {
            port,
            calls,
            connections,
            last_authorization,
            killers,
            accept_task,
        }
    }

    async fn serve_connection(
        stream: TcpStream,
        handler: FakeHandler,
        calls: Arc<Mutex<Vec<CallRequest>>>,
        last_authorization: Arc<Mutex<Option<String>>>,
        mut kill_rx: mpsc::UnboundedReceiver<()>,
    ) {
        let auth_slot = Arc::clone(&last_authorization);
        let callback = move |request: &UpgradeRequest,
                             response: UpgradeResponse|
              -> Result<UpgradeResponse, ErrorResponse> {
            *auth_slot.lock() = request
                .headers()
                .get("authorization")
                .and_then(|value| value.to_str().ok())
                .map(str::to_string);
            Ok(response)
        };

        let Ok(ws) = accept_hdr_async(stream, callback).await else {
            return;
        };
        let (mut write, mut read) = ws.split();

        loop {
            tokio::select! {
                message = read.next() => {
                    match message {
                        Some(Ok(Message::Text(text))) => {
                            if let Ok(request) = serde_json::from_str::<CallRequest>(&text) {
                                calls.lock().push(request.clone());

                                if let Some(response) = handler(&request)
                                    && let Ok(body) = serde_json::to_string(&response)
                                    && write.send(Message::Text(body.into())).await.is_err()
                                {
                                    break;
                                }
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => break,
                        Some(Err(_)) => break,
                        _ => {}
                    }
                }
                _ = kill_rx.recv() => {
                    let _ = write.close().await;
                    break;
                }
            }
        }
    }

    /// WebSocket URL of this peer.
    pub(crate) fn url(&self) -> String {
        format!("ws://127.0.0.1:{}", self.port)
    }

    /// Every call received, in arrival order.
    pub(crate) fn calls(&self) -> Vec<CallRequest> {
        self.calls.lock().clone()
    }

    /// Call types received, in arrival order.
    pub(crate) fn call_types(&self) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .map(|request| request.request_type.clone())
            .collect()
    }

    /// Number of connections accepted so far.
    pub(crate) fn connection_count(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// `Authorization` header seen on the most recent upgrade.
    pub(crate) fn last_authorization(&self) -> Option<String> {
        self.last_authorization.lock().clone()
    }

    /// Severs every live connection.
    pub(crate) fn disconnect_all(&self) {
        for killer in self.killers.lock().drain(..) {
            let _ = killer.send(());
        }
    }
}

impl Drop for FakePeer {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

// ============================================================================
// RejectingProxy
// ============================================================================

/// TCP server answering every upgrade attempt with HTTP 504.
pub(crate) struct RejectingProxy {
    port: u16,
    hits: Arc<AtomicUsize>,
    accept_task: JoinHandle<()>,
}

impl RejectingProxy {
    /// Starts the responder on an ephemeral port.
    pub(crate) async fn start() -> Self {
        let listener = TcpListener::bind(("127.0.0.1", 0))
            .await
            .expect("bind rejecting proxy");
        let port = listener.local_addr().expect("local addr").port();

        let hits = Arc::new(AtomicUsize::new(0));
        let accept_hits = Arc::clone(&hits);

        let accept_task = tokio::spawn(async move {
            loop {
                let Ok((mut stream, _)) = listener.accept().await else {
                    break;
                };
                accept_hits.fetch_add(1, Ordering::SeqCst);

                tokio::spawn(async move {
                    let mut buf = [0_u8; 1024];
                    let _ = stream.read(&mut buf).await;
                    let _ = stream
                        .write_all(b"HTTP/1.1 504 Gateway Timeout\r\ncontent-length: 0\r\n\r\n")
                        .await;
                    let _ = stream.shutdown().await;
                });
            }
        });

        Self {
            port,
            hits,
            accept_task,
        }
    }

    /// WebSocket URL of this responder.
    pub(crate) fn url(&self) -> String {
        format!("ws://127.0.0.1:{}", self.port)
    }

    /// Number of upgrade attempts received.
    pub(crate) fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

impl Drop for RejectingProxy {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Reserves an ephemeral port and releases it immediately.
///
/// Lets a test dial a port with nothing listening yet, then start a
/// [`FakePeer`] there to observe a reconnect succeeding.
pub(crate) async fn free_port() -> u16 {
    let listener = TcpListener::bind(("127.0.0.1", 0))
        .await
        .expect("bind probe");
    let port = listener.local_addr().expect("local addr").port();
    drop(listener);
    port
}

/// Polls `check` every 10ms for up to 3s, panicking on timeout.
pub(crate) async fn wait_until(what: &str, mut check: impl FnMut() -> bool) {
    for _ in 0..300 {
        if check() {
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}
