//! Long-poll event intake.
//!
//! The [`EventPoller`] runs one sequential loop against the events API
//! and pushes every accepted event into an [`EventSink`]. The cursor
//! only ever moves forward, so a retried poll re-reads events instead
//! of skipping them: delivery is at-least-once.
//!
//! # Loop Shape
//!
//! | Outcome | Next step |
//! |---------|-----------|
//! | Page with `nextUrl` | poll that URL immediately |
//! | Page without `nextUrl` | idle wait, then back to the base URL |
//! | Any failure | backoff, retry the same URL with the same cursor |

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;
use tokio::time::sleep;
use tracing::{info, trace, warn};

use crate::backoff::PollBackoff;
use crate::error::{Error, Result};
use crate::portal::forwarder::EventSink;
use crate::protocol::{EventPage, PortalEvent};

// ============================================================================
// Constants
// ============================================================================

/// Wait between polls when the server has no more pages to offer.
const DEFAULT_IDLE_WAIT: Duration = Duration::from_secs(10);

/// Request timeout sized for a long-poll endpoint that holds the
/// connection open until events arrive.
const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_secs(120);

// ============================================================================
// PollerStatus
// ============================================================================

/// Point-in-time poller observation for health reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PollerStatus {
    /// Whether the poll loop is enabled.
    pub polling: bool,

    /// Highest event id accepted so far.
    pub cursor: u64,
}

// ============================================================================
// PollerOptions
// ============================================================================

/// Tunable poller timings.
///
/// Defaults carry the production values; tests shrink them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollerOptions {
    /// Wait after a page without a pagination URL.
    pub idle_wait: Duration,

    /// Timeout for one long-poll request.
    pub request_timeout: Duration,

    /// Delay policy after a failed poll.
    pub backoff: PollBackoff,
}

impl Default for PollerOptions {
    fn default() -> Self {
        Self {
            idle_wait: DEFAULT_IDLE_WAIT,
            request_timeout: DEFAULT_POLL_TIMEOUT,
            backoff: PollBackoff::default(),
        }
    }
}

impl PollerOptions {
    /// Creates options with default settings.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the idle wait between empty-handed polls.
    #[inline]
    #[must_use]
    pub fn with_idle_wait(mut self, idle_wait: Duration) -> Self {
        self.idle_wait = idle_wait;
        self
    }

    /// Sets the long-poll request timeout.
    #[inline]
    #[must_use]
    pub fn with_request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }

    /// Sets the failure backoff policy.
    #[inline]
    #[must_use]
    pub fn with_backoff(mut self, backoff: PollBackoff) -> Self {
        self.backoff = backoff;
        self
    }
}

// ============================================================================
// EventPoller - Types
// ============================================================================

/// Sequential long-poll loop feeding an [`EventSink`].
///
/// The loop itself never runs more than one request at a time; only
/// deliveries to the sink are spawned off, so a slow consumer cannot
/// stall intake.
pub struct EventPoller {
    /// Events API base URL.
    base_url: String,

    /// Shared HTTP client for poll requests.
    client: reqwest::Client,

    /// Destination for accepted events.
    sink: Arc<dyn EventSink>,

    /// Timing configuration.
    options: PollerOptions,

    /// Poll loop enable flag; cleared by [`EventPoller::stop`].
    enabled: AtomicBool,

    /// Highest accepted event id.
    cursor: AtomicU64,
}

// ============================================================================
// EventPoller - Public API
// ============================================================================

impl EventPoller {
    /// Creates a poller against the given events URL.
    ///
    /// The poller is inert until [`EventPoller::run`] is awaited.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the HTTP client cannot be built.
    pub fn new(
        base_url: impl Into<String>,
        sink: Arc<dyn EventSink>,
        options: PollerOptions,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(options.request_timeout)
            .build()
            .map_err(|e| Error::config(format!("failed to build poll client: {e}")))?;

        Ok(Self {
            base_url: base_url.into(),
            client,
            sink,
            options,
            enabled: AtomicBool::new(true),
            cursor: AtomicU64::new(0),
        })
    }

    /// Returns the current loop flag and cursor.
    #[inline]
    #[must_use]
    pub fn status(&self) -> PollerStatus {
        PollerStatus {
            polling: self.enabled.load(Ordering::SeqCst),
            cursor: self.cursor.load(Ordering::SeqCst),
        }
    }

    /// Disables the loop; [`EventPoller::run`] returns after the
    /// iteration in flight finishes.
    pub fn stop(&self) {
        self.enabled.store(false, Ordering::SeqCst);
        info!("Event polling disabled");
    }

    /// Drives the poll loop until [`EventPoller::stop`].
    ///
    /// Failures never end the loop; each one is logged, waited out
    /// through the backoff policy and retried against the same target
    /// with an unchanged cursor.
    pub async fn run(&self) {
        info!(url = %self.base_url, "Event polling started");
        let mut target = self.base_url.clone();

        while self.enabled.load(Ordering::SeqCst) {
            match self.poll_once(&target).await {
                Ok(page) => {
                    self.accept_events(page.events);

                    match page.next_url {
                        Some(next) => {
                            trace!(url = %next, "Following pagination URL");
                            target = next;
                        }
                        None => {
                            sleep(self.options.idle_wait).await;
                            target.clone_from(&self.base_url);
                        }
                    }
                }
                Err(e) => {
                    let delay = self.options.backoff.delay();
                    warn!(
                        error = %e,
                        delay_ms = delay.as_millis() as u64,
                        "Event poll failed; retrying"
                    );
                    sleep(delay).await;
                }
            }
        }

        info!("Event polling stopped");
    }
}

// ============================================================================
// EventPoller - Poll Internals
// ============================================================================

impl EventPoller {
    /// Issues one poll against `target` with the current cursor.
    async fn poll_once(&self, target: &str) -> Result<EventPage> {
        let since = self.cursor.load(Ordering::SeqCst);

        let response = self
            .client
            .get(target)
            .query(&[("since", since)])
            .send()
            .await
            .map_err(|e| Error::poll(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::PollStatus {
                status: status.as_u16(),
            });
        }

        response
            .json::<EventPage>()
            .await
            .map_err(|e| Error::poll(format!("malformed event page: {e}")))
    }

    /// Advances the cursor and hands events to the sink in page order.
    ///
    /// The cursor moves before the hand-off, so a crash between the
    /// two re-reads the event on the next poll rather than losing it.
    /// Deliveries are spawned; the loop does not wait for them.
    fn accept_events(&self, events: Vec<PortalEvent>) {
        for event in events {
            self.cursor.fetch_max(event.id, Ordering::SeqCst);
            trace!(event_id = event.id, "Event accepted");

            let sink = Arc::clone(&self.sink);
            tokio::spawn(async move {
                sink.deliver(event).await;
            });
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;
    use serde_json::json;
    use wiremock::{Mock, MockServer, ResponseTemplate, matchers};

    use super::*;
    use crate::gateway::testing::wait_until;

    /// Sink collecting delivered events in arrival order.
    #[derive(Default)]
    struct RecordingSink {
        events: Mutex<Vec<PortalEvent>>,
    }

    impl RecordingSink {
        fn ids(&self) -> Vec<u64> {
            self.events.lock().iter().map(|event| event.id).collect()
        }
    }

    #[async_trait::async_trait]
    impl EventSink for RecordingSink {
        async fn deliver(&self, event: PortalEvent) {
            self.events.lock().push(event);
        }
    }

    fn fast_options() -> PollerOptions {
        PollerOptions::new()
            .with_idle_wait(Duration::from_millis(10))
            .with_request_timeout(Duration::from_secs(2))
            .with_backoff(PollBackoff::new(Duration::from_millis(10), Duration::ZERO))
    }

    fn poller_for(
        server: &MockServer,
        sink: Arc<RecordingSink>,
        options: PollerOptions,
    ) -> Arc<EventPoller> {
        Arc::new(
            EventPoller::new(format!("{}/events", server.uri()), sink, options).expect("poller"),
        )
    }

    #[tokio::test]
    async fn test_events_forwarded_in_order_and_cursor_advances() {
        let server = MockServer::start().await;

        Mock::given(matchers::method("GET"))
            .and(matchers::path("/events"))
            .and(matchers::query_param("since", "0"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "events": [
                    {"id": 5, "method": "tip"},
                    {"id": 3, "method": "follow"},
                    {"id": 8, "method": "mediaPurchase"}
                ]
            })))
            .mount(&server)
            .await;

        Mock::given(matchers::method("GET"))
            .and(matchers::path("/events"))
            .and(matchers::query_param("since", "8"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"events": []})))
            .mount(&server)
            .await;

        let sink = Arc::new(RecordingSink::default());
        let poller = poller_for(&server, Arc::clone(&sink), fast_options());
        let runner = Arc::clone(&poller);
        let run_task = tokio::spawn(async move { runner.run().await });

        // Out-of-order ids advance the cursor to the max, not the last
        wait_until("delivery", || sink.ids().len() == 3).await;
        assert_eq!(sink.ids(), [5, 3, 8]);
        assert_eq!(poller.status().cursor, 8);

        // Give the loop time to repoll with the advanced cursor
        sleep(Duration::from_millis(100)).await;
        poller.stop();
        run_task.await.expect("join");

        let requests = server.received_requests().await.expect("recording");
        let first = requests.first().expect("at least one poll");
        assert_eq!(first.url.query(), Some("since=0"));
        let last = requests.last().expect("at least two polls");
        assert_eq!(last.url.query(), Some("since=8"));
    }

    #[tokio::test]
    async fn test_stuck_delivery_does_not_stall_intake() {
        let server = MockServer::start().await;

        Mock::given(matchers::method("GET"))
            .and(matchers::path("/events"))
            .and(matchers::query_param("since", "0"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "events": [
                    {"id": 1, "method": "tip"},
                    {"id": 2, "method": "follow"}
                ]
            })))
            .mount(&server)
            .await;

        Mock::given(matchers::method("GET"))
            .and(matchers::path("/events"))
            .and(matchers::query_param("since", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"events": []})))
            .mount(&server)
            .await;

        /// Sink that never finishes delivering the first event.
        #[derive(Default)]
        struct StallingSink {
            delivered: Mutex<Vec<u64>>,
        }

        #[async_trait::async_trait]
        impl EventSink for StallingSink {
            async fn deliver(&self, event: PortalEvent) {
                if event.id == 1 {
                    std::future::pending::<()>().await;
                }
                self.delivered.lock().push(event.id);
            }
        }

        let sink = Arc::new(StallingSink::default());
        let poller = Arc::new(
            EventPoller::new(
                format!("{}/events", server.uri()),
                Arc::clone(&sink) as Arc<dyn EventSink>,
                fast_options(),
            )
            .expect("poller"),
        );
        let runner = Arc::clone(&poller);
        let run_task = tokio::spawn(async move { runner.run().await });

        // The second event lands even though the first never completes
        wait_until("second delivery", || *sink.delivered.lock() == [2]).await;
        assert_eq!(poller.status().cursor, 2);

        poller.stop();
        run_task.abort();
    }

    #[tokio::test]
    async fn test_next_url_polled_immediately() {
        let server = MockServer::start().await;

        Mock::given(matchers::method("GET"))
            .and(matchers::path("/events"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "events": [{"id": 1, "method": "tip"}],
                "nextUrl": format!("{}/events/page2", server.uri())
            })))
            .mount(&server)
            .await;

        Mock::given(matchers::method("GET"))
            .and(matchers::path("/events/page2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"events": []})))
            .mount(&server)
            .await;

        // A long idle wait proves the pagination hop skips the wait
        let options = fast_options().with_idle_wait(Duration::from_secs(60));
        let sink = Arc::new(RecordingSink::default());
        let poller = poller_for(&server, Arc::clone(&sink), options);
        let runner = Arc::clone(&poller);
        let run_task = tokio::spawn(async move { runner.run().await });

        wait_until("delivery", || sink.ids() == [1]).await;
        sleep(Duration::from_millis(100)).await;

        poller.stop();
        run_task.abort();

        let requests = server.received_requests().await.expect("recording");
        let hit_page2 = requests
            .iter()
            .any(|request| request.url.path() == "/events/page2");
        assert!(hit_page2, "pagination URL was never polled");
    }

    #[tokio::test]
    async fn test_failed_poll_retries_with_same_cursor() {
        let server = MockServer::start().await;

        Mock::given(matchers::method("GET"))
            .and(matchers::path("/events"))
            .respond_with(ResponseTemplate::new(500))
            .up_to_n_times(1)
            .mount(&server)
            .await;

        Mock::given(matchers::method("GET"))
            .and(matchers::path("/events"))
            .and(matchers::query_param("since", "0"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "events": [{"id": 4, "method": "tip"}]
            })))
            .mount(&server)
            .await;

        let sink = Arc::new(RecordingSink::default());
        let poller = poller_for(&server, Arc::clone(&sink), fast_options());
        let runner = Arc::clone(&poller);
        let run_task = tokio::spawn(async move { runner.run().await });

        // The retry after the 500 must carry since=0 again
        wait_until("recovery", || poller.status().cursor == 4).await;
        assert_eq!(sink.ids(), [4]);

        poller.stop();
        run_task.abort();

        let requests = server.received_requests().await.expect("recording");
        assert!(requests.len() >= 2);
        for request in requests.iter().take(2) {
            assert_eq!(request.url.query(), Some("since=0"));
        }
    }

    #[tokio::test]
    async fn test_malformed_body_retried() {
        let server = MockServer::start().await;

        Mock::given(matchers::method("GET"))
            .and(matchers::path("/events"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .up_to_n_times(1)
            .mount(&server)
            .await;

        Mock::given(matchers::method("GET"))
            .and(matchers::path("/events"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "events": [{"id": 2, "method": "follow"}]
            })))
            .mount(&server)
            .await;

        let sink = Arc::new(RecordingSink::default());
        let poller = poller_for(&server, Arc::clone(&sink), fast_options());
        let runner = Arc::clone(&poller);
        let run_task = tokio::spawn(async move { runner.run().await });

        wait_until("recovery", || poller.status().cursor == 2).await;

        poller.stop();
        run_task.abort();
    }

    #[tokio::test]
    async fn test_stop_ends_loop() {
        let server = MockServer::start().await;

        Mock::given(matchers::method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"events": []})))
            .mount(&server)
            .await;

        let sink = Arc::new(RecordingSink::default());
        let poller = poller_for(&server, Arc::clone(&sink), fast_options());
        assert!(poller.status().polling);

        let runner = Arc::clone(&poller);
        let run_task = tokio::spawn(async move { runner.run().await });

        sleep(Duration::from_millis(50)).await;
        poller.stop();
        assert!(!poller.status().polling);

        tokio::time::timeout(Duration::from_secs(2), run_task)
            .await
            .expect("loop exits after stop")
            .expect("join");
    }
}
