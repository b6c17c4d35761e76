//! Circuit Breaker
//!
//! Per-endpoint failure tracking. An endpoint's circuit opens after
//! `failure_threshold` consecutive failures and excludes it from selection
//! until `recovery_timeout` has passed since the last failure. After that
//! the circuit is half-open: [`CircuitBreaker::is_open`] reports `false` so a
//! probe can go through, but the open mark is only cleared by a success. A
//! failed probe refreshes the failure timestamp and keeps the circuit open.
//!
//! The breaker itself only holds policy. The per-endpoint [`CircuitState`]
//! is owned by the router next to the endpoint's statistics so both are
//! updated under one lock.

use serde::Serialize;
use tokio::time::Instant;

use crate::config::CircuitBreakerConfig;

/// Observable circuit status
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitStatus {
    /// Accepting traffic
    Closed,
    /// Rejecting traffic until the cooldown elapses
    Open,
    /// Cooldown elapsed; a probe may go through
    HalfOpen,
}

/// Failure bookkeeping for one endpoint
#[derive(Clone, Debug, Default)]
pub struct CircuitState {
    consecutive_failures: u32,
    last_failure: Option<Instant>,
    open: bool,
}

impl CircuitState {
    /// Failures since the last success
    #[must_use]
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// When the last failure was recorded
    #[must_use]
    pub fn last_failure(&self) -> Option<Instant> {
        self.last_failure
    }

    /// Whether the circuit is marked open (ignores cooldown)
    #[must_use]
    pub fn is_marked_open(&self) -> bool {
        self.open
    }
}

/// Circuit breaker policy
#[derive(Clone, Debug, Default)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
}

impl CircuitBreaker {
    /// Create a breaker with the given thresholds
    #[must_use]
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self { config }
    }

    /// Active configuration
    #[must_use]
    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Record a failed request or probe against `endpoint_id`
    pub fn record_failure(&self, endpoint_id: &str, state: &mut CircuitState, now: Instant) {
        state.consecutive_failures = state.consecutive_failures.saturating_add(1);
        state.last_failure = Some(now);

        if !state.open && state.consecutive_failures >= self.config.failure_threshold {
            state.open = true;
            tracing::warn!(
                endpoint = %endpoint_id,
                failures = state.consecutive_failures,
                "Circuit opened"
            );
        }
    }

    /// Record a successful request or probe against `endpoint_id`
    pub fn record_success(&self, endpoint_id: &str, state: &mut CircuitState) {
        state.consecutive_failures = 0;
        if state.open {
            state.open = false;
            tracing::info!(endpoint = %endpoint_id, "Circuit closed");
        }
    }

    /// Whether traffic to this endpoint should be blocked at `now`
    ///
    /// Does not clear the open mark once the cooldown has passed.
    #[must_use]
    pub fn is_open(&self, state: &CircuitState, now: Instant) -> bool {
        self.status(state, now) == CircuitStatus::Open
    }

    /// Derived status at `now`
    #[must_use]
    pub fn status(&self, state: &CircuitState, now: Instant) -> CircuitStatus {
        if !state.open {
            return CircuitStatus::Closed;
        }

        match state.last_failure {
            Some(at) if now.saturating_duration_since(at) < self.config.recovery_timeout() => {
                CircuitStatus::Open
            }
            _ => CircuitStatus::HalfOpen,
        }
    }
}
