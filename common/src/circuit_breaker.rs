// Per-platform circuit breaker
// Consecutive transport failures open the circuit; due pairs of that platform are
// deferred until the cool-down passes and a single probe succeeds.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Requests are allowed
    Closed,
    /// Requests are rejected until the timeout elapses
    Open,
    /// One probe request is allowed through
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before opening the circuit
    pub failure_threshold: u32,
    /// Cool-down before a probe is allowed
    pub timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Debug)]
struct CircuitBreakerState {
    state: CircuitState,
    failure_count: u32,
    opened_at: Option<Instant>,
    probe_in_flight: bool,
}

impl CircuitBreakerState {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            opened_at: None,
            probe_in_flight: false,
        }
    }
}

/// Circuit breaker shared by every pair of one platform
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    state: Arc<Mutex<CircuitBreakerState>>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            state: Arc::new(Mutex::new(CircuitBreakerState::new())),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn lock(&self) -> MutexGuard<'_, CircuitBreakerState> {
        // The state stays consistent even if a holder panicked
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn failure_count(&self) -> u32 {
        self.lock().failure_count
    }

    /// Ask to send one request
    ///
    /// The returned permit must be settled with `success` or `failure` once the
    /// request has been made. Dropping it unsettled gives back a half-open probe
    /// slot without changing the circuit.
    pub fn try_acquire(&self) -> Result<CircuitPermit, CircuitBreakerError> {
        let mut state = self.lock();

        match state.state {
            CircuitState::Closed => Ok(CircuitPermit::new(self.clone(), false)),
            CircuitState::Open => {
                let elapsed = state.opened_at.map(|at| at.elapsed()).unwrap_or_default();
                if elapsed < self.config.timeout {
                    return Err(CircuitBreakerError::CircuitOpen {
                        name: self.name.clone(),
                        retry_in: self.config.timeout - elapsed,
                    });
                }
                info!(
                    circuit_breaker = %self.name,
                    "Circuit breaker transitioning from Open to HalfOpen"
                );
                state.state = CircuitState::HalfOpen;
                state.probe_in_flight = true;
                Ok(CircuitPermit::new(self.clone(), true))
            }
            CircuitState::HalfOpen if state.probe_in_flight => {
                Err(CircuitBreakerError::CircuitOpen {
                    name: self.name.clone(),
                    retry_in: Duration::ZERO,
                })
            }
            CircuitState::HalfOpen => {
                state.probe_in_flight = true;
                Ok(CircuitPermit::new(self.clone(), true))
            }
        }
    }

    fn on_success(&self, probe: bool) {
        let mut state = self.lock();
        if probe {
            state.probe_in_flight = false;
        }
        if state.state == CircuitState::HalfOpen && probe {
            info!(
                circuit_breaker = %self.name,
                "Circuit breaker transitioning from HalfOpen to Closed"
            );
            state.state = CircuitState::Closed;
            state.opened_at = None;
        }
        if state.state == CircuitState::Closed {
            state.failure_count = 0;
        }
    }

    fn on_failure(&self, probe: bool) {
        let mut state = self.lock();
        if probe {
            state.probe_in_flight = false;
        }

        match state.state {
            CircuitState::Closed => {
                state.failure_count += 1;
                if state.failure_count >= self.config.failure_threshold {
                    warn!(
                        circuit_breaker = %self.name,
                        failure_count = state.failure_count,
                        threshold = self.config.failure_threshold,
                        "Circuit breaker transitioning from Closed to Open"
                    );
                    state.state = CircuitState::Open;
                    state.opened_at = Some(Instant::now());
                }
            }
            CircuitState::HalfOpen if probe => {
                warn!(
                    circuit_breaker = %self.name,
                    "Circuit breaker transitioning from HalfOpen to Open due to failure"
                );
                state.state = CircuitState::Open;
                state.opened_at = Some(Instant::now());
            }
            // Late results from requests admitted before the circuit opened
            CircuitState::HalfOpen | CircuitState::Open => {}
        }
    }

    fn release_probe(&self) {
        self.lock().probe_in_flight = false;
    }

    /// Manually reset the circuit breaker to Closed state
    pub fn reset(&self) {
        let mut state = self.lock();
        info!(circuit_breaker = %self.name, "Circuit breaker manually reset to Closed");
        *state = CircuitBreakerState::new();
    }
}

/// Admission to send one request through a circuit
#[derive(Debug)]
#[must_use = "settle the permit with success() or failure()"]
pub struct CircuitPermit {
    breaker: CircuitBreaker,
    probe: bool,
    settled: bool,
}

impl CircuitPermit {
    fn new(breaker: CircuitBreaker, probe: bool) -> Self {
        Self {
            breaker,
            probe,
            settled: false,
        }
    }

    pub fn is_probe(&self) -> bool {
        self.probe
    }

    pub fn success(mut self) {
        self.settled = true;
        self.breaker.on_success(self.probe);
    }

    pub fn failure(mut self) {
        self.settled = true;
        self.breaker.on_failure(self.probe);
    }
}

impl Drop for CircuitPermit {
    fn drop(&mut self) {
        if !self.settled && self.probe {
            self.breaker.release_probe();
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CircuitBreakerError {
    #[error("Circuit breaker '{name}' is open (retry in {} ms)", .retry_in.as_millis())]
    CircuitOpen { name: String, retry_in: Duration },
}
