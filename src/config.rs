//! Environment-backed runtime configuration.
//!
//! [`BridgeConfig::from_env`] reads every `BRIDGE_*` variable the
//! process honors and validates it up front, so a misconfigured
//! deployment fails at startup instead of at first use.
//!
//! # Variables
//!
//! | Variable | Meaning |
//! |----------|---------|
//! | `BRIDGE_STUDIO_ADDR` | WebSocket address of the control peer |
//! | `BRIDGE_STUDIO_PASSWORD` | Credential attached to the upgrade request |
//! | `BRIDGE_EVENTS_URL` | Base long-poll URL; polling disabled when absent |
//! | `BRIDGE_WEBHOOK_INSTANCE` | Webhook consumer base URL |
//! | `BRIDGE_WEBHOOK_PATH` | Path segment after `webhook/` |
//! | `BRIDGE_WEBHOOK_TOKEN` | Bearer token for deliveries |
//! | `BRIDGE_WEBHOOK_TEST` | Routes deliveries through `webhook-test/` |
//!
//! Blank and whitespace-only values count as unset.

// ============================================================================
// Imports
// ============================================================================

use std::env;

use url::Url;

use crate::error::{Error, Result};

// ============================================================================
// Constants
// ============================================================================

/// Control peer address used when `BRIDGE_STUDIO_ADDR` is unset.
pub(crate) const DEFAULT_STUDIO_ADDR: &str = "ws://localhost:4455";

// ============================================================================
// Types
// ============================================================================

/// Everything the bridge reads from its environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeConfig {
    /// WebSocket address of the studio control peer.
    pub studio_addr: String,

    /// Credential attached to the upgrade request, if any.
    pub studio_password: Option<String>,

    /// Base long-poll URL. Event polling is disabled when absent.
    pub events_url: Option<String>,

    /// Webhook delivery target. Forwarding is disabled when absent.
    pub webhook: Option<WebhookConfig>,
}

/// Coordinates of the webhook consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookConfig {
    /// Consumer base URL, always ending in a slash.
    pub instance: String,

    /// Path segment appended after `webhook/` or `webhook-test/`.
    pub path: String,

    /// Bearer token attached to deliveries, if any.
    pub token: Option<String>,

    /// Routes deliveries through the `webhook-test/` prefix.
    pub test_mode: bool,
}

// ============================================================================
// BridgeConfig - Public API
// ============================================================================

impl BridgeConfig {
    /// Parses configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] naming the offending variable when a
    /// URL does not parse, uses the wrong scheme, a flag is not a
    /// boolean, or `BRIDGE_WEBHOOK_PATH` is set without
    /// `BRIDGE_WEBHOOK_INSTANCE`.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(mut lookup: F) -> Result<Self>
    where
        F: FnMut(&str) -> Option<String>,
    {
        let studio_addr = optional_trimmed("BRIDGE_STUDIO_ADDR", &mut lookup)
            .unwrap_or_else(|| DEFAULT_STUDIO_ADDR.to_string());
        require_scheme("BRIDGE_STUDIO_ADDR", &studio_addr, &["ws", "wss"])?;

        let studio_password = optional_trimmed("BRIDGE_STUDIO_PASSWORD", &mut lookup);

        let events_url = optional_trimmed("BRIDGE_EVENTS_URL", &mut lookup);
        if let Some(url) = &events_url {
            require_scheme("BRIDGE_EVENTS_URL", url, &["http", "https"])?;
        }

        let instance = optional_trimmed("BRIDGE_WEBHOOK_INSTANCE", &mut lookup);
        let path = optional_trimmed("BRIDGE_WEBHOOK_PATH", &mut lookup);
        let token = optional_trimmed("BRIDGE_WEBHOOK_TOKEN", &mut lookup);
        let test_mode = parse_flag("BRIDGE_WEBHOOK_TEST", &mut lookup)?;

        let webhook = match (instance, path) {
            (Some(instance), Some(path)) => {
                require_scheme("BRIDGE_WEBHOOK_INSTANCE", &instance, &["http", "https"])?;
                let instance = if instance.ends_with('/') {
                    instance
                } else {
                    format!("{instance}/")
                };
                Some(WebhookConfig {
                    instance,
                    path,
                    token,
                    test_mode,
                })
            }
            (None, Some(_)) => {
                return Err(Error::config(
                    "BRIDGE_WEBHOOK_PATH is set but BRIDGE_WEBHOOK_INSTANCE is not",
                ));
            }
            // An instance without a path has nothing to deliver to.
            (_, None) => None,
        };

        Ok(Self {
            studio_addr,
            studio_password,
            events_url,
            webhook,
        })
    }
}

// ============================================================================
// Internal Functions
// ============================================================================

/// Looks up a variable, treating blank values as unset.
fn optional_trimmed<F>(key: &str, lookup: &mut F) -> Option<String>
where
    F: FnMut(&str) -> Option<String>,
{
    lookup(key)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Validates that a variable parses as a URL with an allowed scheme.
fn require_scheme(key: &str, value: &str, schemes: &[&str]) -> Result<()> {
    let url =
        Url::parse(value).map_err(|e| Error::config(format!("{key} is not a valid URL: {e}")))?;
    if !schemes.contains(&url.scheme()) {
        return Err(Error::config(format!(
            "{key} must be a {} URL, not {}",
            schemes.join(" or "),
            url.scheme()
        )));
    }
    Ok(())
}

/// Parses a boolean flag, defaulting to `false` when unset.
fn parse_flag<F>(key: &str, lookup: &mut F) -> Result<bool>
where
    F: FnMut(&str) -> Option<String>,
{
    let Some(value) = optional_trimmed(key, lookup) else {
        return Ok(false);
    };
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(Error::config(format!("{key} is not a boolean: {value}"))),
    }
}

// ============================================================================
// Tests
// ============================================================================
