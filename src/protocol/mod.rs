//! Wire message types for the two external endpoints.
//!
//! The bridge treats both endpoints as opaque envelopes: control calls
//! are forwarded verbatim and event payloads are re-serialized exactly
//! as polled. Only the fields the bridge itself needs (correlation id,
//! call status, event id, pagination URL) are typed.
//!
//! | Message Type | Direction | Purpose |
//! |--------------|-----------|---------|
//! | [`CallRequest`] | Bridge → Studio | Control call |
//! | [`CallResponse`] | Studio → Bridge | Call result or failure |
//! | [`EventPage`] | Portal → Bridge | One long-poll response |
//! | [`PortalEvent`] | Portal → Webhook | Single forwarded event |

// ============================================================================
// Submodules
// ============================================================================

/// Control call envelope types.
pub mod call;

/// Polled event types.
pub mod event;

// ============================================================================
// Re-exports
// ============================================================================

pub use call::{CallId, CallRequest, CallResponse, CallStatus};
pub use event::{EventPage, PortalEvent};
