//! Control-connection gateway.
//!
//! This module owns the persistent WebSocket link to the studio peer:
//! dialing, reconnecting with backoff, heartbeating, and queuing
//! commands while offline.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐  submit / submit_or_queue  ┌──────────────┐
//! │   Callers    │───────────────────────────►│   Gateway    │
//! └──────────────┘                            │  link loop   │
//!                       offline?              │  heartbeat   │
//!                 ┌──────────────┐            └──────┬───────┘
//!                 │ PendingQueue │◄──────────────────┤ replay on
//!                 └──────────────┘                   │ reconnect
//!                                             ┌──────▼───────┐
//!                                             │  PeerSocket  │──► studio
//!                                             └──────────────┘
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `manager` | Reconnect loop, heartbeat, public gateway API |
//! | `queue` | FIFO pending command queue with per-entry expiry |
//! | `socket` | One WebSocket session with call correlation |

// ============================================================================
// Submodules
// ============================================================================

/// Reconnect loop, heartbeat and the public gateway API.
pub mod manager;

/// Pending command queue for offline periods.
pub mod queue;

/// WebSocket session and call correlation.
mod socket;

/// In-process peers for gateway tests.
#[cfg(test)]
pub(crate) mod testing;

// ============================================================================
// Re-exports
// ============================================================================

pub use manager::{ConnectionState, Gateway, GatewayOptions, SubmitOutcome};
pub use queue::CallTicket;
