//! Circuit breaker
//!
//! Halts new decisions after a manual trip or repeated internal failures. The
//! timeout-based close is evaluated on every gate check, never by a timer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::default_true;

/// Circuit breaker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Seconds after a trip before the breaker closes on its own
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    /// Consecutive phase failures that trip the breaker
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
}

fn default_timeout() -> u64 {
    300
}

fn default_failure_threshold() -> u32 {
    5
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout: default_timeout(),
            failure_threshold: default_failure_threshold(),
        }
    }
}

/// Why the gate refused a decision
#[derive(Debug, Clone, PartialEq)]
pub struct BreakerOpen {
    pub reason: String,
    pub remaining_secs: i64,
}

impl BreakerOpen {
    pub fn description(&self) -> String {
        format!(
            "Circuit breaker active: {} (closes in {}s)",
            self.reason, self.remaining_secs
        )
    }
}

/// Open/closed state plus the failure counter
#[derive(Debug, Clone, Default)]
pub struct CircuitBreaker {
    open: bool,
    tripped_at: Option<DateTime<Utc>>,
    reason: Option<String>,
    consecutive_failures: u32,
}

impl CircuitBreaker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn tripped_at(&self) -> Option<DateTime<Utc>> {
        self.tripped_at
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Check whether a decision may proceed, closing the breaker if its
    /// timeout has elapsed
    pub fn gate(&mut self, now: DateTime<Utc>, config: &CircuitBreakerConfig) -> Result<(), BreakerOpen> {
        if !config.enabled || !self.open {
            return Ok(());
        }

        let elapsed = self
            .tripped_at
            .map(|at| (now - at).num_seconds())
            .unwrap_or(i64::MAX);
        // Timeouts past i64 range saturate instead of wrapping negative
        let timeout = i64::try_from(config.timeout).unwrap_or(i64::MAX);

        if elapsed >= timeout {
            info!(elapsed_secs = elapsed, "Circuit breaker timeout elapsed, closing");
            self.close();
            return Ok(());
        }

        Err(BreakerOpen {
            reason: self.reason.clone().unwrap_or_else(|| "unknown".to_string()),
            remaining_secs: timeout - elapsed.max(0),
        })
    }

    pub fn trip(&mut self, reason: impl Into<String>, now: DateTime<Utc>) {
        let reason = reason.into();
        warn!(reason = %reason, "Circuit breaker tripped");
        self.open = true;
        self.tripped_at = Some(now);
        self.reason = Some(reason);
    }

    pub fn reset(&mut self) {
        info!(was_open = self.open, "Circuit breaker reset");
        self.close();
    }

    fn close(&mut self) {
        self.open = false;
        self.reason = None;
        self.consecutive_failures = 0;
    }

    /// Count a phase failure; trips once the threshold is reached
    ///
    /// Returns true if this failure tripped the breaker.
    pub fn record_failure(&mut self, now: DateTime<Utc>, config: &CircuitBreakerConfig) -> bool {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        if config.enabled
            && !self.open
            && config.failure_threshold > 0
            && self.consecutive_failures >= config.failure_threshold
        {
            let reason = format!("{} consecutive internal failures", self.consecutive_failures);
            self.trip(reason, now);
            return true;
        }
        false
    }

    pub fn record_success(&mut self) {
        self.consecutive_failures = 0;
    }
}
