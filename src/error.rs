//! Error types for the studio bridge.
//!
//! This module defines all error types used throughout the crate.
//!
//! # Usage
//!
//! All fallible operations return [`Result<T>`] which uses [`Error`]:
//!
//! ```ignore
//! use studio_bridge::{Gateway, Result};
//!
//! async fn example(gateway: &Gateway) -> Result<()> {
//!     gateway.submit("SetCurrentProgramScene", json!({"sceneName": "Main"})).await?;
//!     Ok(())
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Configuration | [`Error::Config`], [`Error::InvalidArgument`] |
//! | Connection | [`Error::NotConnected`], [`Error::Connection`], [`Error::Handshake`], [`Error::ConnectionClosed`] |
//! | Calls | [`Error::CallFailed`], [`Error::CallTimeout`], [`Error::QueueTimeout`] |
//! | Polling | [`Error::Poll`], [`Error::PollStatus`] |
//! | Forwarding | [`Error::Forward`], [`Error::ForwardStatus`] |
//! | External | [`Error::Json`] |

// ============================================================================
// Imports
// ============================================================================

use std::result::Result as StdResult;

use thiserror::Error;
use tokio_tungstenite::tungstenite::Error as WsError;

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
///
/// All fallible operations in this crate return this type.
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
///
/// Each variant includes relevant context for debugging.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration error.
    ///
    /// Returned when bridge configuration is invalid.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    /// Invalid argument in a command or control call.
    ///
    /// Returned when caller-supplied parameters are invalid.
    #[error("Invalid argument: {message}")]
    InvalidArgument {
        /// Description of the invalid argument.
        message: String,
    },

    // ========================================================================
    // Connection Errors
    // ========================================================================
    /// The control peer is not connected.
    ///
    /// Returned by fail-fast submission paths while the gateway is
    /// disconnected or still connecting.
    #[error("Studio not connected")]
    NotConnected,

    /// WebSocket connection failed.
    ///
    /// Returned when the connection to the control peer cannot be
    /// established. Recovered by the reconnect loop.
    #[error("Connection failed: {message}")]
    Connection {
        /// Description of the connection error.
        message: String,
    },

    /// WebSocket upgrade rejected by the peer or an intermediary.
    ///
    /// Covers non-101 upgrade responses such as a gateway timeout from
    /// a proxy in front of the peer. Recovered by the reconnect loop.
    #[error("Handshake failed: {message}")]
    Handshake {
        /// Description of the handshake failure.
        message: String,
    },

    /// WebSocket connection closed.
    ///
    /// Returned when the connection is lost during an operation.
    #[error("Connection closed")]
    ConnectionClosed,

    // ========================================================================
    // Call Errors
    // ========================================================================
    /// The peer answered a call with an error status.
    ///
    /// The call reached the peer; the peer declined it. Never retried.
    #[error("Call failed: {message}")]
    CallFailed {
        /// Error message reported by the peer.
        message: String,
    },

    /// A live call received no response in time.
    #[error("Call timed out after {timeout_ms}ms")]
    CallTimeout {
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    /// A queued command expired before the connection came back.
    #[error("Queued command expired after {waited_ms}ms")]
    QueueTimeout {
        /// Milliseconds the command spent in the queue.
        waited_ms: u64,
    },

    // ========================================================================
    // Polling Errors
    // ========================================================================
    /// Event poll request failed.
    ///
    /// Covers transport failures, timeouts and malformed pages. Retried
    /// with backoff; the cursor is not advanced.
    #[error("Poll failed: {message}")]
    Poll {
        /// Description of the poll failure.
        message: String,
    },

    /// Event poll returned a non-success HTTP status.
    #[error("Poll returned HTTP {status}")]
    PollStatus {
        /// HTTP status code of the response.
        status: u16,
    },

    // ========================================================================
    // Forwarding Errors
    // ========================================================================
    /// Webhook delivery failed.
    ///
    /// Logged and dropped by the delivery boundary; never propagated.
    #[error("Forward failed: {message}")]
    Forward {
        /// Description of the delivery failure.
        message: String,
    },

    /// Webhook consumer returned a non-success HTTP status.
    #[error("Forward returned HTTP {status}")]
    ForwardStatus {
        /// HTTP status code of the response.
        status: u16,
    },

    // ========================================================================
    // External Errors
    // ========================================================================
    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a configuration error.
    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates an invalid argument error.
    #[inline]
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Creates a connection error.
    #[inline]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Creates a handshake error.
    #[inline]
    pub fn handshake(message: impl Into<String>) -> Self {
        Self::Handshake {
            message: message.into(),
        }
    }

    /// Creates a peer call failure.
    #[inline]
    pub fn call_failed(message: impl Into<String>) -> Self {
        Self::CallFailed {
            message: message.into(),
        }
    }

    /// Creates a call timeout error.
    #[inline]
    pub fn call_timeout(timeout_ms: u64) -> Self {
        Self::CallTimeout { timeout_ms }
    }

    /// Creates a queue timeout error.
    #[inline]
    pub fn queue_timeout(waited_ms: u64) -> Self {
        Self::QueueTimeout { waited_ms }
    }

    /// Creates a poll error.
    #[inline]
    pub fn poll(message: impl Into<String>) -> Self {
        Self::Poll {
            message: message.into(),
        }
    }

    /// Creates a forward error.
    #[inline]
    pub fn forward(message: impl Into<String>) -> Self {
        Self::Forward {
            message: message.into(),
        }
    }

    /// Classifies a WebSocket library error at the socket boundary.
    ///
    /// A rejected upgrade (the peer or a proxy answered the handshake
    /// with a plain HTTP status) becomes [`Error::Handshake`]; close
    /// conditions map to [`Error::ConnectionClosed`]; everything else
    /// is a generic [`Error::Connection`]. All three are transient.
    pub(crate) fn from_ws(err: WsError) -> Self {
        match err {
            WsError::Http(response) => Self::Handshake {
                message: format!("unexpected server response: HTTP {}", response.status()),
            },
            WsError::ConnectionClosed | WsError::AlreadyClosed => Self::ConnectionClosed,
            other => Self::Connection {
                message: other.to_string(),
            },
        }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if this is a timeout error.
    #[inline]
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::CallTimeout { .. } | Self::QueueTimeout { .. })
    }

    /// Returns `true` if this is a transient connection failure.
    ///
    /// Transient failures are absorbed by the reconnect loop and never
    /// escalate past the gateway. Anything else returned by the gateway
    /// run task is treated as fatal by the supervisor.
    #[inline]
    #[must_use]
    pub fn is_transient_connection(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. } | Self::Handshake { .. } | Self::ConnectionClosed
        )
    }
}

// ============================================================================
// Tests
// ============================================================================
