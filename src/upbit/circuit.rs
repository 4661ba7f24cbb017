// =============================================================================
// Circuit Breaker — per-endpoint failure tracking with timed recovery
// =============================================================================
//
// Two observable states per endpoint: Closed (calls allowed) and Open (calls
// fast-failed until `open_until`). There is no half-open probe; recovery is
// purely elapsed-time based. Only transport-level and 429/5xx failures are
// recorded — a malformed request of ours must not poison the breaker.
// =============================================================================

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{info, warn};

#[derive(Default)]
struct CircuitState {
    consecutive_failures: u32,
    open_until: Option<Instant>,
}

/// Per-endpoint circuit breaker table.
pub struct CircuitBreaker {
    states: Mutex<HashMap<String, CircuitState>>,
    /// Consecutive failures at which the circuit opens.
    threshold: u32,
    /// How long an open circuit rejects traffic.
    cooldown: Duration,
}

impl CircuitBreaker {
    pub fn new(threshold: u32, cooldown: Duration) -> Self {
        Self {
            states: Mutex::new(HashMap::new()),
            threshold,
            cooldown,
        }
    }

    /// Whether a call to `endpoint` may proceed right now.
    pub fn allow(&self, endpoint: &str) -> bool {
        let states = self.states.lock();
        match states.get(endpoint).and_then(|s| s.open_until) {
            Some(open_until) => Instant::now() >= open_until,
            None => true,
        }
    }

    /// Record a successful call: the failure streak is over and any open
    /// window is cleared.
    pub fn record_success(&self, endpoint: &str) {
        let mut states = self.states.lock();
        if let Some(state) = states.get_mut(endpoint) {
            if state.consecutive_failures > 0 {
                info!(endpoint, "circuit breaker reset after success");
            }
            state.consecutive_failures = 0;
            state.open_until = None;
        }
    }

    /// Record a breaker-relevant failure. At `threshold` consecutive failures
    /// the circuit opens for the configured cooldown.
    pub fn record_failure(&self, endpoint: &str) {
        let mut states = self.states.lock();
        let state = states.entry(endpoint.to_string()).or_default();
        state.consecutive_failures += 1;

        if state.consecutive_failures >= self.threshold {
            state.open_until = Some(Instant::now() + self.cooldown);
            warn!(
                endpoint,
                failures = state.consecutive_failures,
                cooldown_secs = self.cooldown.as_secs(),
                "circuit breaker opened"
            );
        }
    }

    /// Current consecutive-failure count for `endpoint`.
    pub fn failures(&self, endpoint: &str) -> u32 {
        self.states
            .lock()
            .get(endpoint)
            .map_or(0, |s| s.consecutive_failures)
    }
}
