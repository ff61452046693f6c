//! Failure-budget guard over the status-model client.
//!
//! The breaker itself holds no clock and spawns nothing; the engine passes
//! `tokio::time::Instant` readings in, which keeps transitions unit-testable
//! under a paused test clock.

use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

/// Consecutive-failure circuit breaker.
///
/// Closed → open at `threshold` consecutive failures. While open, callers
/// must skip the model entirely — except that once `reset` has elapsed
/// since `opened_at`, one probe call may go through (half-open). A probe
/// success closes the breaker; a probe failure leaves `opened_at`
/// untouched, so every subsequent flush stays probe-eligible until a
/// success lands. That anchor-to-original-open behavior is deliberate and
/// matches the deployed system.
#[derive(Debug, Clone, Default)]
pub struct CircuitBreaker {
    consecutive_failures: u32,
    opened_at: Option<Instant>,
}

/// Read-only view for diagnostics snapshots.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct BreakerSnapshot {
    pub consecutive_failures: u32,
    pub is_open: bool,
}

impl CircuitBreaker {
    pub fn is_open(&self) -> bool {
        self.opened_at.is_some()
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Any success resets the failure count and closes an open breaker.
    pub fn record_success(&mut self) {
        self.consecutive_failures = 0;
        self.opened_at = None;
    }

    /// Records one failure; opens the breaker (stamping `now`) when the
    /// count reaches `threshold` and it is not already open. Returns `true`
    /// when this call is the one that opened it.
    pub fn record_failure(&mut self, threshold: u32, now: Instant) -> bool {
        self.consecutive_failures += 1;
        if self.consecutive_failures >= threshold && self.opened_at.is_none() {
            self.opened_at = Some(now);
            return true;
        }
        false
    }

    /// Whether an open breaker has cooled down enough to allow one
    /// half-open probe. Always `false` while closed.
    pub fn should_probe(&self, reset: Duration, now: Instant) -> bool {
        match self.opened_at {
            Some(opened_at) => now.duration_since(opened_at) >= reset,
            None => false,
        }
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        BreakerSnapshot {
            consecutive_failures: self.consecutive_failures,
            is_open: self.is_open(),
        }
    }
}
