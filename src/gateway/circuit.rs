// =============================================================================
// Circuit Breaker — CLOSED / OPEN / HALF_OPEN
// =============================================================================
//
// Trips OPEN after N consecutive failures. While OPEN every call fails fast
// without touching the external resource; after the cooldown the next check
// transitions to HALF_OPEN and admits exactly one probe. A successful probe
// closes the circuit and resets the counter; a failed probe re-opens it and
// restarts the cooldown clock.
// =============================================================================

use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::CircuitOpenError;

/// Breaker state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "CLOSED"),
            Self::Open => write!(f, "OPEN"),
            Self::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

struct Inner {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
}

/// Consecutive-failure circuit breaker with timed recovery probing.
pub struct CircuitBreaker {
    inner: Mutex<Inner>,
    failure_threshold: u32,
    reset_timeout: Duration,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, reset_timeout: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                opened_at: None,
            }),
            failure_threshold: failure_threshold.max(1),
            reset_timeout,
        }
    }

    /// Gate a call attempt at `now`.
    ///
    /// OPEN → fails fast with the remaining cooldown; once the cooldown has
    /// elapsed the breaker moves to HALF_OPEN and the call is admitted as the
    /// probe.
    pub fn check_at(&self, now: Instant) -> Result<(), CircuitOpenError> {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed | CircuitState::HalfOpen => Ok(()),
            CircuitState::Open => {
                let opened_at = inner.opened_at.unwrap_or(now);
                let elapsed = now.duration_since(opened_at);
                if elapsed >= self.reset_timeout {
                    inner.state = CircuitState::HalfOpen;
                    info!("circuit HALF_OPEN — admitting probe call");
                    Ok(())
                } else {
                    let remaining = self.reset_timeout - elapsed;
                    Err(CircuitOpenError {
                        retry_after_secs: remaining.as_secs_f64(),
                    })
                }
            }
        }
    }

    /// Convenience wrapper over [`check_at`] with the current instant.
    pub fn check(&self) -> Result<(), CircuitOpenError> {
        self.check_at(Instant::now())
    }

    /// Record a successful call: HALF_OPEN probes close the circuit, and any
    /// success clears the failure counter.
    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        if inner.state != CircuitState::Closed {
            info!(state = %inner.state, "circuit CLOSED after successful call");
        }
        inner.state = CircuitState::Closed;
        inner.consecutive_failures = 0;
        inner.opened_at = None;
    }

    /// Record a failed call at `now`.
    pub fn record_failure_at(&self, now: Instant) {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::HalfOpen => {
                // Failed probe: straight back to OPEN with a fresh cooldown.
                inner.state = CircuitState::Open;
                inner.opened_at = Some(now);
                warn!("circuit probe failed — re-OPEN");
            }
            CircuitState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.failure_threshold {
                    inner.state = CircuitState::Open;
                    inner.opened_at = Some(now);
                    warn!(
                        failures = inner.consecutive_failures,
                        threshold = self.failure_threshold,
                        "circuit OPEN"
                    );
                }
            }
            CircuitState::Open => {
                // Already open; nothing to count.
            }
        }
    }

    /// Convenience wrapper over [`record_failure_at`].
    pub fn record_failure(&self) {
        self.record_failure_at(Instant::now());
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("CircuitBreaker")
            .field("state", &inner.state)
            .field("consecutive_failures", &inner.consecutive_failures)
            .field("failure_threshold", &self.failure_threshold)
            .field("reset_timeout", &self.reset_timeout)
            .finish()
    }
}
