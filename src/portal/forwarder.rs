//! Webhook event forwarding.
//!
//! Each polled event is posted to the webhook consumer as one JSON
//! request. Delivery is best-effort: a failed forward is logged and
//! dropped, never retried and never allowed to stall the poll loop.
//!
//! # URL Layout
//!
//! The consumer exposes one endpoint per configured path:
//!
//! | Mode | URL |
//! |------|-----|
//! | Production | `<instance>webhook/<path>` |
//! | Test | `<instance>webhook-test/<path>` |

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::protocol::PortalEvent;

// ============================================================================
// Constants
// ============================================================================

/// Timeout for one webhook delivery request.
pub(crate) const DEFAULT_FORWARD_TIMEOUT: Duration = Duration::from_secs(30);

// ============================================================================
// EventSink Trait
// ============================================================================

/// Receiver side of the poll loop.
///
/// The poller hands every accepted event to a sink. Implementations
/// must not propagate delivery failures back to the poller; log and
/// drop instead.
#[async_trait::async_trait]
pub trait EventSink: Send + Sync {
    /// Delivers one event. Infallible by contract.
    async fn deliver(&self, event: PortalEvent);
}

// ============================================================================
// WebhookForwarder - Types
// ============================================================================

/// Forwards events to a webhook consumer over HTTP.
///
/// One `POST` per event, body is the event exactly as polled. An
/// optional bearer token is attached to every request.
#[derive(Debug, Clone)]
pub struct WebhookForwarder {
    /// Shared HTTP client with connection pooling.
    client: reqwest::Client,

    /// Fully composed webhook URL.
    url: String,

    /// Optional bearer token for the consumer.
    token: Option<String>,
}

// ============================================================================
// WebhookForwarder - Public API
// ============================================================================

impl WebhookForwarder {
    /// Creates a forwarder for the given consumer instance and path.
    ///
    /// `instance` must end with a trailing slash. When `test_mode` is
    /// set, deliveries target the consumer's `webhook-test/` endpoint
    /// instead of `webhook/`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the HTTP client cannot be built.
    pub fn new(
        instance: &str,
        path: &str,
        token: Option<String>,
        test_mode: bool,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(DEFAULT_FORWARD_TIMEOUT)
            .build()
            .map_err(|e| Error::config(format!("failed to build webhook client: {e}")))?;

        let segment = if test_mode { "webhook-test" } else { "webhook" };
        let url = format!("{instance}{segment}/{path}");

        Ok(Self { client, url, token })
    }

    /// Returns the composed webhook URL.
    #[inline]
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Posts one event to the consumer.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Forward`] when the request cannot be sent and
    /// [`Error::ForwardStatus`] when the consumer answers with a
    /// non-success status.
    pub async fn try_forward(&self, event: &PortalEvent) -> Result<()> {
        let mut request = self.client.post(&self.url).json(event);

        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::forward(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::ForwardStatus {
                status: status.as_u16(),
            });
        }

        Ok(())
    }
}

// ============================================================================
// EventSink Implementation
// ============================================================================

#[async_trait::async_trait]
impl EventSink for WebhookForwarder {
    async fn deliver(&self, event: PortalEvent) {
        match self.try_forward(&event).await {
            Ok(()) => {
                debug!(
                    event_id = event.id,
                    kind = event.kind().unwrap_or("unknown"),
                    "Event forwarded"
                );
            }
            Err(e) => {
                warn!(event_id = event.id, error = %e, "Event delivery failed");
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use serde_json::json;
    use wiremock::{Mock, MockServer, ResponseTemplate, matchers};

    use super::*;
    use crate::gateway::testing::free_port;

    fn tip_event(id: u64) -> PortalEvent {
        serde_json::from_value(json!({
            "id": id,
            "method": "tip",
            "object": { "tokens": 25 }
        }))
        .expect("event")
    }

    fn forwarder_for(server: &MockServer, test_mode: bool) -> WebhookForwarder {
        WebhookForwarder::new(&format!("{}/", server.uri()), "studio", None, test_mode)
            .expect("forwarder")
    }

    #[tokio::test]
    async fn test_forward_posts_event_body() {
        let server = MockServer::start().await;

        Mock::given(matchers::method("POST"))
            .and(matchers::path("/webhook/studio"))
            .and(matchers::body_partial_json(json!({
                "id": 5,
                "method": "tip",
                "object": { "tokens": 25 }
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let forwarder = forwarder_for(&server, false);
        forwarder.try_forward(&tip_event(5)).await.expect("forward");
    }

    #[tokio::test]
    async fn test_forward_sends_bearer_token() {
        let server = MockServer::start().await;

        Mock::given(matchers::method("POST"))
            .and(matchers::path("/webhook/studio"))
            .and(matchers::header("authorization", "Bearer secret-token"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let forwarder = WebhookForwarder::new(
            &format!("{}/", server.uri()),
            "studio",
            Some("secret-token".to_string()),
            false,
        )
        .expect("forwarder");

        forwarder.try_forward(&tip_event(1)).await.expect("forward");
    }

    #[tokio::test]
    async fn test_forward_uses_test_path_in_test_mode() {
        let server = MockServer::start().await;

        Mock::given(matchers::method("POST"))
            .and(matchers::path("/webhook-test/studio"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let forwarder = forwarder_for(&server, true);
        assert!(forwarder.url().ends_with("/webhook-test/studio"));

        forwarder.try_forward(&tip_event(1)).await.expect("forward");
    }

    #[tokio::test]
    async fn test_forward_error_status() {
        let server = MockServer::start().await;

        Mock::given(matchers::method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let forwarder = forwarder_for(&server, false);
        let err = forwarder
            .try_forward(&tip_event(1))
            .await
            .expect_err("should fail");

        assert!(matches!(err, Error::ForwardStatus { status: 500 }));
    }

    #[tokio::test]
    async fn test_forward_unreachable_consumer() {
        let port = free_port().await;
        let forwarder =
            WebhookForwarder::new(&format!("http://127.0.0.1:{port}/"), "studio", None, false)
                .expect("forwarder");

        let err = forwarder
            .try_forward(&tip_event(1))
            .await
            .expect_err("should fail");

        assert!(matches!(err, Error::Forward { .. }));
    }

    #[tokio::test]
    async fn test_deliver_swallows_failures() {
        let server = MockServer::start().await;

        Mock::given(matchers::method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .expect(1)
            .mount(&server)
            .await;

        let forwarder = forwarder_for(&server, false);
        forwarder.deliver(tip_event(9)).await;
    }
}
