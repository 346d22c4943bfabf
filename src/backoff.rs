//! Retry delay policies for the gateway and the event poller.
//!
//! Two shapes of backoff live here:
//!
//! - [`ReconnectBackoff`]: exponential growth with a hard cap and
//!   multiplicative jitter, used between control-connection attempts.
//! - [`PollBackoff`]: a fixed floor plus a uniform random spread, used
//!   after a failed event poll.
//!
//! Both are pure apart from the jitter draw and never produce a zero
//! delay, so retry loops cannot spin.

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use rand::Rng;

// ============================================================================
// Constants
// ============================================================================

/// Default base delay for the first reconnect attempt.
const DEFAULT_RECONNECT_BASE: Duration = Duration::from_millis(2000);

/// Default cap applied before jitter.
const DEFAULT_RECONNECT_MAX: Duration = Duration::from_millis(60_000);

/// Jitter ratio for reconnect delays (factor drawn from [0.9, 1.1)).
const RECONNECT_JITTER: f64 = 0.1;

/// Exponent clamp so large attempt counters cannot overflow the shift.
const MAX_EXPONENT: u32 = 20;

/// Default floor for the poll retry delay.
const DEFAULT_POLL_FLOOR: Duration = Duration::from_millis(2000);

/// Default uniform spread added on top of the poll floor.
const DEFAULT_POLL_SPREAD: Duration = Duration::from_millis(3000);

// ============================================================================
// ReconnectBackoff
// ============================================================================

/// Exponential backoff policy for control-connection attempts.
///
/// Attempt `n` yields `base * 2^n` capped at `max`, then scaled by a
/// jitter factor so simultaneous reconnecting clients spread out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectBackoff {
    /// Delay for attempt 0, before jitter.
    pub base: Duration,

    /// Upper bound on the delay, before jitter.
    pub max: Duration,
}

impl Default for ReconnectBackoff {
    fn default() -> Self {
        Self {
            base: DEFAULT_RECONNECT_BASE,
            max: DEFAULT_RECONNECT_MAX,
        }
    }
}

impl ReconnectBackoff {
    /// Creates a policy with explicit base and cap.
    #[inline]
    #[must_use]
    pub const fn new(base: Duration, max: Duration) -> Self {
        Self { base, max }
    }

    /// Computes the jittered delay for the given attempt counter.
    ///
    /// The exponent saturates, so arbitrarily large counters stay at
    /// the cap instead of overflowing.
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        let shift = attempt.min(MAX_EXPONENT);
        let multiplier = 1_u32 << shift;
        let capped = self.base.saturating_mul(multiplier).min(self.max);
        apply_jitter(capped, RECONNECT_JITTER)
    }
}

// ============================================================================
// PollBackoff
// ============================================================================

/// Flat-with-spread delay policy for failed event polls.
///
/// Every failure waits `floor` plus a uniform draw from `[0, spread)`.
/// There is no growth across consecutive failures; the long-poll
/// request timeout already bounds how fast the loop can spin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollBackoff {
    /// Minimum delay after a failed poll.
    pub floor: Duration,

    /// Width of the uniform random addition.
    pub spread: Duration,
}

impl Default for PollBackoff {
    fn default() -> Self {
        Self {
            floor: DEFAULT_POLL_FLOOR,
            spread: DEFAULT_POLL_SPREAD,
        }
    }
}

impl PollBackoff {
    /// Creates a policy with explicit floor and spread.
    #[inline]
    #[must_use]
    pub const fn new(floor: Duration, spread: Duration) -> Self {
        Self { floor, spread }
    }

    /// Draws the delay for the next poll retry.
    #[must_use]
    pub fn delay(&self) -> Duration {
        let spread_ms = self.spread.as_millis() as u64;
        if spread_ms == 0 {
            return self.floor;
        }
        let extra = rand::rng().random_range(0..spread_ms);
        self.floor + Duration::from_millis(extra)
    }
}

// ============================================================================
// Jitter
// ============================================================================

/// Scales a delay by a factor drawn from `[1 - ratio, 1 + ratio)`.
fn apply_jitter(delay: Duration, ratio: f64) -> Duration {
    if ratio <= 0.0 {
        return delay;
    }
    let factor = rand::rng().random_range((1.0 - ratio)..(1.0 + ratio));
    delay.mul_f64(factor)
}

// ============================================================================
// Tests
// ============================================================================
