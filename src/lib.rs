//! Studio bridge - resilient link between a studio control peer and
//! portal webhooks.
//!
//! This library keeps a flaky studio control connection usable: it
//! reconnects with backoff, queues commands while the peer is offline
//! and replays them on reconnect, long-polls a portal events API and
//! forwards every event to a webhook consumer.
//!
//! # Architecture
//!
//! Three loops run side by side, decoupled by channels and shared
//! state:
//!
//! - **Gateway**: owns the control socket; dials, replays the pending
//!   queue, watches for closure, backs off, redials
//! - **Poller**: long-polls the events API, follows pagination and
//!   hands each event to a sink
//! - **Forwarder**: delivers events to the webhook consumer, logging
//!   failures instead of propagating them
//!
//! The gateway is the sole owner of the control socket; live calls,
//! studio operations and queue replays all funnel through it.
//!
//! # Quick Start
//!
//! ```no_run
//! use studio_bridge::{Bridge, BridgeConfig, Result};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let config = BridgeConfig::from_env()?;
//!     let bridge = Bridge::new(config)?;
//!     bridge.start();
//!
//!     // Calls flow live once the peer connects
//!     let health = bridge.health();
//!     println!("connected: {}", health.connected);
//!
//!     bridge.run().await
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`backoff`] | Delay policies for reconnects and poll retries |
//! | [`bridge`] | Service assembly and lifecycle |
//! | [`config`] | Environment-backed configuration |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`gateway`] | Connection manager for the control peer |
//! | [`portal`] | Event polling and webhook forwarding |
//! | [`protocol`] | Wire types for calls and events |
//! | [`studio`] | High-level studio operations |
//!
//! # Guarantees
//!
//! - **Fail fast**: live calls never wait for a connection
//! - **Ordered replay**: queued commands replay in submission order
//! - **At-least-once events**: the poll cursor advances before
//!   hand-off, so a crash re-reads rather than loses

// ============================================================================
// Modules
// ============================================================================

/// Delay policies for reconnect attempts and poll retries.
pub mod backoff;

/// Service assembly and lifecycle.
///
/// [`Bridge::new`] builds every component from a [`BridgeConfig`];
/// [`Bridge::run`] supervises them.
pub mod bridge;

/// Environment-backed runtime configuration.
pub mod config;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Connection manager for the studio control peer.
///
/// The [`Gateway`] dials, fails live calls fast while offline, queues
/// on request and replays the queue on reconnect.
pub mod gateway;

/// Portal event intake and webhook forwarding.
pub mod portal;

/// Wire types for control calls and portal events.
pub mod protocol;

/// High-level studio operations.
///
/// [`StudioControls`] wraps the gateway with zoom, capture and cached
/// lookups.
pub mod studio;

// ============================================================================
// Re-exports
// ============================================================================

// Backoff policies
pub use backoff::{PollBackoff, ReconnectBackoff};

// Bridge types
pub use bridge::{Bridge, BridgeHealth};

// Configuration types
pub use config::{BridgeConfig, WebhookConfig};

// Error types
pub use error::{Error, Result};

// Gateway types
pub use gateway::{CallTicket, ConnectionState, Gateway, GatewayOptions, SubmitOutcome};

// Portal types
pub use portal::{EventPoller, EventSink, PollerOptions, PollerStatus, WebhookForwarder};

// Protocol types
pub use protocol::{CallId, CallRequest, CallResponse, CallStatus, EventPage, PortalEvent};

// Studio types
pub use studio::{CropMargins, SourceResolution, StudioControls, ZoomSummary, crops_for_focus};
