//! Event intake from the portal and delivery to the webhook consumer.
//!
//! One sequential long-poll loop pulls event pages, advances a
//! monotonic cursor and pushes each event into a sink. The production
//! sink posts to a webhook consumer; delivery is best-effort and never
//! feeds back into intake.

// ============================================================================
// Submodules
// ============================================================================

/// Best-effort webhook delivery.
pub mod forwarder;

/// Long-poll loop and cursor tracking.
pub mod poller;

// ============================================================================
// Re-exports
// ============================================================================

pub use forwarder::{EventSink, WebhookForwarder};
pub use poller::{EventPoller, PollerOptions, PollerStatus};
