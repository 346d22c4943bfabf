//! Bridge bootstrap and lifecycle.
//!
//! [`Bridge`] assembles the long-lived pieces out of a
//! [`BridgeConfig`] and owns their run tasks:
//!
//! | Piece | Present |
//! |-------|---------|
//! | [`Gateway`] | always |
//! | [`StudioControls`] | always |
//! | [`EventPoller`] | when an events URL is configured |
//! | [`WebhookForwarder`] | when a webhook target is configured |
//!
//! Without a webhook target, polled events are logged and discarded.
//! [`Bridge::run`] supervises the gateway task and surfaces its first
//! fatal error; [`Bridge::shutdown`] stops intake and waits out a
//! bounded grace period.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::BridgeConfig;
use crate::error::{Error, Result};
use crate::gateway::{Gateway, GatewayOptions};
use crate::portal::{EventPoller, EventSink, PollerOptions, PollerStatus, WebhookForwarder};
use crate::protocol::PortalEvent;
use crate::studio::StudioControls;

// ============================================================================
// Types
// ============================================================================

/// Point-in-time bridge observation for health reporting.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct BridgeHealth {
    /// Whether the control peer is connected and calls flow live.
    pub connected: bool,

    /// Reconnect attempts since the last successful connection.
    pub reconnect_attempt: u32,

    /// Commands waiting for the connection to come back.
    pub queued_calls: usize,

    /// Poller observation, absent when polling is not configured.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub poller: Option<PollerStatus>,
}

/// Sink used when no webhook target is configured.
struct DiscardSink;

#[async_trait::async_trait]
impl EventSink for DiscardSink {
    async fn deliver(&self, event: PortalEvent) {
        debug!(event_id = event.id, "No webhook configured; event discarded");
    }
}

// ============================================================================
// Bridge - Types
// ============================================================================

/// The assembled service: gateway, studio controls and event intake.
///
/// Construction validates configuration and builds every component;
/// nothing touches the network until [`Bridge::start`] or
/// [`Bridge::run`].
pub struct Bridge {
    /// Connection manager for the control peer.
    gateway: Gateway,

    /// Studio operations over the gateway.
    controls: StudioControls,

    /// Event intake loop, absent when no events URL is configured.
    poller: Option<Arc<EventPoller>>,

    /// Guards against double-spawning the run tasks.
    started: AtomicBool,

    /// Gateway run task, taken by whoever supervises or drains it.
    gateway_task: Mutex<Option<JoinHandle<Result<()>>>>,

    /// Poller run task.
    poller_task: Mutex<Option<JoinHandle<()>>>,
}

// ============================================================================
// Bridge - Public API
// ============================================================================

impl Bridge {
    /// Builds every component from the given configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when an HTTP client cannot be
    /// constructed for the poller or forwarder.
    pub fn new(config: BridgeConfig) -> Result<Self> {
        let gateway = Gateway::new(
            config.studio_addr,
            config.studio_password,
            GatewayOptions::new(),
        );
        let controls = StudioControls::new(gateway.clone());

        let sink: Arc<dyn EventSink> = match &config.webhook {
            Some(webhook) => {
                let forwarder = WebhookForwarder::new(
                    &webhook.instance,
                    &webhook.path,
                    webhook.token.clone(),
                    webhook.test_mode,
                )?;
                info!(url = forwarder.url(), "Webhook forwarding enabled");
                Arc::new(forwarder)
            }
            None => {
                info!("No webhook configured; polled events will be discarded");
                Arc::new(DiscardSink)
            }
        };

        let poller = match config.events_url {
            Some(events_url) => {
                info!(url = events_url, "Event polling enabled");
                Some(Arc::new(EventPoller::new(
                    events_url,
                    sink,
                    PollerOptions::new(),
                )?))
            }
            None => {
                info!("No events URL configured; event polling disabled");
                None
            }
        };

        Ok(Self {
            gateway,
            controls,
            poller,
            started: AtomicBool::new(false),
            gateway_task: Mutex::new(None),
            poller_task: Mutex::new(None),
        })
    }

    /// Spawns the gateway and poller run tasks. Idempotent.
    pub fn start(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            debug!("Bridge already started");
            return;
        }

        let gateway = self.gateway.clone();
        *self.gateway_task.lock() = Some(tokio::spawn(async move { gateway.run().await }));

        if let Some(poller) = &self.poller {
            let poller = Arc::clone(poller);
            *self.poller_task.lock() = Some(tokio::spawn(async move { poller.run().await }));
        }

        info!("Bridge started");
    }

    /// Runs the bridge until shutdown or a fatal gateway error.
    ///
    /// Starts the run tasks if [`Bridge::start`] has not been called
    /// yet. Returns when the gateway task finishes: `Ok` after
    /// [`Bridge::shutdown`]-initiated close, `Err` on a fatal error,
    /// in which case the poller is stopped too.
    ///
    /// # Errors
    ///
    /// Propagates the gateway's fatal error.
    pub async fn run(&self) -> Result<()> {
        self.start();

        let Some(task) = self.gateway_task.lock().take() else {
            return Ok(());
        };

        let outcome = match task.await {
            Ok(outcome) => outcome,
            Err(e) => Err(Error::connection(format!(
                "gateway task stopped abnormally: {e}"
            ))),
        };

        if let Err(e) = &outcome {
            error!(error = %e, "Gateway failed; stopping event intake");
            if let Some(poller) = &self.poller {
                poller.stop();
            }
        }
        outcome
    }

    /// Reports the current health of every component.
    #[must_use]
    pub fn health(&self) -> BridgeHealth {
        BridgeHealth {
            connected: self.gateway.is_ready(),
            reconnect_attempt: self.gateway.current_attempt(),
            queued_calls: self.gateway.queued_count(),
            poller: self.poller.as_ref().map(|poller| poller.status()),
        }
    }

    /// Stops intake and waits out the run tasks.
    ///
    /// Signals the gateway to close and the poller to stop, then waits
    /// up to `grace` for both tasks; whatever is still running after
    /// that is aborted.
    pub async fn shutdown(&self, grace: Duration) {
        info!("Bridge shutting down");

        self.gateway.close();
        if let Some(poller) = &self.poller {
            poller.stop();
        }

        let gateway_task = self.gateway_task.lock().take();
        let poller_task = self.poller_task.lock().take();
        let gateway_abort = gateway_task.as_ref().map(JoinHandle::abort_handle);
        let poller_abort = poller_task.as_ref().map(JoinHandle::abort_handle);

        let drain = async move {
            if let Some(task) = gateway_task {
                let _ = task.await;
            }
            if let Some(task) = poller_task {
                let _ = task.await;
            }
        };

        if tokio::time::timeout(grace, drain).await.is_err() {
            warn!(
                grace_ms = grace.as_millis() as u64,
                "Shutdown grace period expired; aborting remaining tasks"
            );
            if let Some(abort) = gateway_abort {
                abort.abort();
            }
            if let Some(abort) = poller_abort {
                abort.abort();
            }
        } else {
            info!("Bridge shutdown complete");
        }
    }

    /// The connection manager, for live and queued calls.
    #[inline]
    #[must_use]
    pub fn gateway(&self) -> &Gateway {
        &self.gateway
    }

    /// The studio control surface.
    #[inline]
    #[must_use]
    pub fn controls(&self) -> &StudioControls {
        &self.controls
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use serde_json::json;
    use wiremock::matchers;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::config::WebhookConfig;
    use crate::gateway::testing::{FakePeer, wait_until};

    fn offline_config() -> BridgeConfig {
        BridgeConfig {
            studio_addr: "ws://127.0.0.1:1".to_string(),
            studio_password: None,
            events_url: None,
            webhook: None,
        }
    }

    #[tokio::test]
    async fn test_new_without_optional_pieces() {
        let bridge = Bridge::new(offline_config()).expect("bridge builds");

        let health = bridge.health();
        assert!(!health.connected);
        assert_eq!(health.reconnect_attempt, 0);
        assert_eq!(health.queued_calls, 0);
        assert!(health.poller.is_none());
    }

    #[tokio::test]
    async fn test_health_serializes_without_poller_key() {
        let bridge = Bridge::new(offline_config()).expect("bridge builds");

        let health = serde_json::to_value(bridge.health()).expect("serialize");
        assert_eq!(health["connected"], false);
        assert_eq!(health["queued_calls"], 0);
        assert!(health.get("poller").is_none());
    }

    #[tokio::test]
    async fn test_run_returns_clean_after_shutdown() {
        let peer = FakePeer::start().await;
        let config = BridgeConfig {
            studio_addr: peer.url(),
            studio_password: None,
            events_url: None,
            webhook: None,
        };

        let bridge = Arc::new(Bridge::new(config).expect("bridge builds"));
        let runner = Arc::clone(&bridge);
        let run_task = tokio::spawn(async move { runner.run().await });

        wait_until("bridge connect", || bridge.health().connected).await;

        bridge.shutdown(Duration::from_secs(1)).await;
        let outcome = run_task.await.expect("join");
        assert!(outcome.is_ok());
    }

    #[tokio::test]
    async fn test_events_reach_the_webhook() {
        let peer = FakePeer::start().await;
        let events = MockServer::start().await;
        let consumer = MockServer::start().await;

        Mock::given(matchers::method("GET"))
            .and(matchers::path("/events"))
            .and(matchers::query_param("since", "0"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "events": [{"id": 7, "method": "tip", "amount": 25}],
            })))
            .up_to_n_times(1)
            .mount(&events)
            .await;
        Mock::given(matchers::method("GET"))
            .and(matchers::path("/events"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"events": []})),
            )
            .mount(&events)
            .await;
        Mock::given(matchers::method("POST"))
            .and(matchers::path("/webhook/portal-events"))
            .and(matchers::body_partial_json(json!({"id": 7})))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&consumer)
            .await;

        let config = BridgeConfig {
            studio_addr: peer.url(),
            studio_password: None,
            events_url: Some(format!("{}/events", events.uri())),
            webhook: Some(WebhookConfig {
                instance: format!("{}/", consumer.uri()),
                path: "portal-events".to_string(),
                token: None,
                test_mode: false,
            }),
        };

        let bridge = Arc::new(Bridge::new(config).expect("bridge builds"));
        bridge.start();

        wait_until("webhook delivery", || {
            bridge.health().poller.is_some_and(|status| status.cursor == 7)
        })
        .await;
        tokio::time::sleep(Duration::from_millis(100)).await;

        bridge.shutdown(Duration::from_millis(100)).await;
        consumer.verify().await;
    }

    #[tokio::test]
    async fn test_polling_without_webhook_discards_events() {
        let peer = FakePeer::start().await;
        let events = MockServer::start().await;

        Mock::given(matchers::method("GET"))
            .and(matchers::path("/events"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "events": [{"id": 3, "method": "follow"}],
            })))
            .mount(&events)
            .await;

        let config = BridgeConfig {
            studio_addr: peer.url(),
            studio_password: None,
            events_url: Some(format!("{}/events", events.uri())),
            webhook: None,
        };

        let bridge = Arc::new(Bridge::new(config).expect("bridge builds"));
        bridge.start();

        wait_until("event accepted", || {
            bridge.health().poller.is_some_and(|status| status.cursor == 3)
        })
        .await;

        bridge.shutdown(Duration::from_millis(100)).await;
    }

    #[tokio::test]
    async fn test_start_is_idempotent() {
        let bridge = Bridge::new(offline_config()).expect("bridge builds");

        bridge.start();
        bridge.start();

        bridge.shutdown(Duration::from_millis(100)).await;
    }
}
