//! Control call envelope types.
//!
//! Defines the request/response message format exchanged with the
//! studio peer over the WebSocket connection. The payload of a call is
//! an arbitrary JSON value; the bridge only interprets the correlation
//! id and the response status.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{Error, Result};

// ============================================================================
// CallId
// ============================================================================

/// Unique identifier correlating a call request to its response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallId(Uuid);

impl CallId {
    /// Generates a fresh random id.
    #[inline]
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

// ============================================================================
// CallRequest
// ============================================================================

/// A control call from the bridge to the studio peer.
///
/// # Format
///
/// ```json
/// {
///   "requestId": "uuid",
///   "requestType": "SetCurrentProgramScene",
///   "requestData": { "sceneName": "Main" }
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallRequest {
    /// Unique identifier for request/response correlation.
    #[serde(rename = "requestId")]
    pub id: CallId,

    /// Call type understood by the peer.
    #[serde(rename = "requestType")]
    pub request_type: String,

    /// Opaque call parameters. Omitted on the wire when null.
    #[serde(rename = "requestData", default, skip_serializing_if = "Value::is_null")]
    pub request_data: Value,
}

impl CallRequest {
    /// Creates a new request with an auto-generated id.
    #[inline]
    #[must_use]
    pub fn new(request_type: impl Into<String>, request_data: Value) -> Self {
        Self {
            id: CallId::generate(),
            request_type: request_type.into(),
            request_data,
        }
    }

    /// Creates a new request with a specific id.
    #[inline]
    #[must_use]
    pub fn with_id(id: CallId, request_type: impl Into<String>, request_data: Value) -> Self {
        Self {
            id,
            request_type: request_type.into(),
            request_data,
        }
    }
}

// ============================================================================
// CallResponse
// ============================================================================

/// A response from the studio peer.
///
/// # Format
///
/// Success:
/// ```json
/// {
///   "requestId": "uuid",
///   "status": "ok",
///   "result": { ... }
/// }
/// ```
///
/// Error:
/// ```json
/// {
///   "requestId": "uuid",
///   "status": "error",
///   "error": "error message"
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallResponse {
    /// Matches the request `requestId`.
    #[serde(rename = "requestId")]
    pub id: CallId,

    /// Response status discriminator.
    pub status: CallStatus,

    /// Result data (if ok).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,

    /// Error message (if error).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CallResponse {
    /// Creates a success response.
    #[inline]
    #[must_use]
    pub fn ok(id: CallId, result: Value) -> Self {
        Self {
            id,
            status: CallStatus::Ok,
            result: Some(result),
            error: None,
        }
    }

    /// Creates an error response.
    #[inline]
    #[must_use]
    pub fn error(id: CallId, message: impl Into<String>) -> Self {
        Self {
            id,
            status: CallStatus::Error,
            result: None,
            error: Some(message.into()),
        }
    }

    /// Returns `true` if the peer accepted the call.
    #[inline]
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.status == CallStatus::Ok
    }

    /// Extracts the result value, or the peer's failure as an error.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CallFailed`] if the response status is `error`.
    pub fn into_result(self) -> Result<Value> {
        match self.status {
            CallStatus::Ok => Ok(self.result.unwrap_or(Value::Null)),
            CallStatus::Error => {
                let message = self
                    .error
                    .unwrap_or_else(|| "unknown peer error".to_string());
                Err(Error::call_failed(message))
            }
        }
    }
}

// ============================================================================
// CallStatus
// ============================================================================

/// Response status discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallStatus {
    /// The peer executed the call.
    Ok,
    /// The peer rejected or failed the call.
    Error,
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    #[test]
    fn test_request_serialization() {
        let request = CallRequest::new("SetCurrentProgramScene", json!({"sceneName": "Main"}));
        let text = serde_json::to_string(&request).expect("serialize");

        assert!(text.contains("requestId"));
        assert!(text.contains("\"requestType\":\"SetCurrentProgramScene\""));
        assert!(text.contains("\"sceneName\":\"Main\""));
    }

    #[test]
    fn test_request_with_id_round_trip() {
        let id = CallId::generate();
        let request = CallRequest::with_id(id, "GetVersion", Value::Null);
        let text = serde_json::to_string(&request).expect("serialize");
        let parsed: CallRequest = serde_json::from_str(&text).expect("parse");

        assert_eq!(parsed.id, id);
        assert_eq!(parsed.request_type, "GetVersion");
        assert!(parsed.request_data.is_null());
    }

    #[test]
    fn test_ok_response() {
        let id = CallId::generate();
        let response = CallResponse::ok(id, json!({"obsVersion": "30.0"}));

        assert!(response.is_ok());
        let result = response.into_result().expect("should succeed");
        assert_eq!(
            result.get("obsVersion").and_then(|v| v.as_str()),
            Some("30.0")
        );
    }

    #[test]
    fn test_error_response_into_result() {
        let id = CallId::generate();
        let response = CallResponse::error(id, "no such scene");

        assert!(!response.is_ok());
        let err = response.into_result().expect_err("should fail");
        assert!(matches!(err, Error::CallFailed { .. }));
        assert_eq!(err.to_string(), "Call failed: no such scene");
    }

    #[test]
    fn test_response_parse_missing_optional_fields() {
        let text = format!(
            r#"{{"requestId": "{}", "status": "ok"}}"#,
            CallId::generate()
        );
        let response: CallResponse = serde_json::from_str(&text).expect("parse");

        assert!(response.is_ok());
        assert!(response.result.is_none());
        assert_eq!(response.into_result().expect("ok"), Value::Null);
    }

    #[test]
    fn test_error_response_without_message() {
        let text = format!(
            r#"{{"requestId": "{}", "status": "error"}}"#,
            CallId::generate()
        );
        let response: CallResponse = serde_json::from_str(&text).expect("parse");
        let err = response.into_result().expect_err("should fail");

        assert_eq!(err.to_string(), "Call failed: unknown peer error");
    }
}
