//! Polled event types.
//!
//! One long-poll response from the events API carries a batch of
//! events and an optional pagination URL. Events are forwarded to the
//! webhook consumer exactly as received; only the numeric `id` (the
//! cursor source) and the optional `method` (for logging) are typed,
//! every other field rides along untouched.

// ============================================================================
// Imports
// ============================================================================

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ============================================================================
// PortalEvent
// ============================================================================

/// A single event from the events API.
///
/// # Format
///
/// ```json
/// {
///   "id": 42,
///   "method": "tip",
///   "object": { "user": { "username": "viewer" }, "tip": { "tokens": 25 } }
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortalEvent {
    /// Monotonically assigned event id, the poll cursor source.
    pub id: u64,

    /// Remaining event fields, preserved for forwarding.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl PortalEvent {
    /// Returns the event method name if present.
    #[inline]
    #[must_use]
    pub fn kind(&self) -> Option<&str> {
        self.extra.get("method").and_then(Value::as_str)
    }
}

// ============================================================================
// EventPage
// ============================================================================

/// One response from the long-poll endpoint.
///
/// # Format
///
/// ```json
/// {
///   "events": [ ... ],
///   "nextUrl": "https://events.example/page2"
/// }
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct EventPage {
    /// Events in server order. Absent means an empty batch.
    #[serde(default)]
    pub events: Vec<PortalEvent>,

    /// Server-supplied URL for the immediate next poll.
    #[serde(rename = "nextUrl", default)]
    pub next_url: Option<String>,
}

// ============================================================================
// Tests
// ============================================================================
