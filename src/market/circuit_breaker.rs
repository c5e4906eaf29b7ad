use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Current state of the marketplace API circuit breaker.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Copy, Clone)]
pub struct CircuitBreakerSnapshot {
    pub state: CircuitState,
    pub consecutive_failures: usize,
    pub opened_at: Option<Instant>,
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    consecutive_failures: usize,
    opened_at: Option<Instant>,
    probes_in_flight: usize,
}

impl BreakerState {
    fn closed() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            opened_at: None,
            probes_in_flight: 0,
        }
    }
}

/// Returned when the breaker refuses a request.
#[derive(Debug)]
pub struct CircuitOpen;

impl std::fmt::Display for CircuitOpen {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "marketplace circuit breaker is open")
    }
}

impl std::error::Error for CircuitOpen {}

/// Trips after consecutive listing request failures and lets a limited number
/// of probe requests through once the cooldown has elapsed.
#[derive(Debug, Clone)]
pub struct ApiCircuitBreaker {
    state: Arc<Mutex<BreakerState>>,
    failure_threshold: usize,
    cooldown: Duration,
    probe_limit: usize,
}

impl Default for ApiCircuitBreaker {
    fn default() -> Self {
        Self::new(5, Duration::from_secs(30), 1)
    }
}

impl ApiCircuitBreaker {
    pub fn new(failure_threshold: usize, cooldown: Duration, probe_limit: usize) -> Self {
        let cooldown = if cooldown.is_zero() {
            Duration::from_secs(1)
        } else {
            cooldown
        };

        Self {
            state: Arc::new(Mutex::new(BreakerState::closed())),
            failure_threshold: failure_threshold.max(1),
            cooldown,
            probe_limit: probe_limit.max(1),
        }
    }

    pub fn snapshot(&self) -> CircuitBreakerSnapshot {
        let guard = self.state.lock();
        CircuitBreakerSnapshot {
            state: guard.state,
            consecutive_failures: guard.consecutive_failures,
            opened_at: guard.opened_at,
        }
    }

    /// Admits a request, moving Open to HalfOpen once the cooldown is over.
    pub fn before_request(&self) -> Result<CircuitState, CircuitOpen> {
        let mut state = self.state.lock();

        if state.state == CircuitState::Open {
            let cooled_down = state
                .opened_at
                .map(|opened_at| opened_at.elapsed() >= self.cooldown)
                .unwrap_or(false);
            if !cooled_down {
                return Err(CircuitOpen);
            }
            state.probes_in_flight = 0;
            Self::transition(&mut state, CircuitState::HalfOpen);
        }

        if state.state == CircuitState::HalfOpen {
            if state.probes_in_flight >= self.probe_limit {
                return Err(CircuitOpen);
            }
            state.probes_in_flight += 1;
        }

        Ok(state.state)
    }

    pub fn record_success(&self) {
        let mut state = self.state.lock();
        Self::release_probe(&mut state);
        state.consecutive_failures = 0;

        if state.state == CircuitState::HalfOpen {
            state.opened_at = None;
            Self::transition(&mut state, CircuitState::Closed);
        }
    }

    pub fn record_failure(&self) {
        let mut state = self.state.lock();
        Self::release_probe(&mut state);
        state.consecutive_failures = state.consecutive_failures.saturating_add(1);

        let trip = match state.state {
            CircuitState::HalfOpen => true,
            CircuitState::Closed => state.consecutive_failures >= self.failure_threshold,
            CircuitState::Open => false,
        };

        if trip {
            state.opened_at = Some(Instant::now());
            state.probes_in_flight = 0;
            Self::transition(&mut state, CircuitState::Open);
        }
    }

    fn release_probe(state: &mut BreakerState) {
        if state.state == CircuitState::HalfOpen {
            state.probes_in_flight = state.probes_in_flight.saturating_sub(1);
        }
    }

    fn transition(state: &mut BreakerState, next: CircuitState) {
        if state.state != next {
            tracing::warn!(
                previous = ?state.state,
                next = ?next,
                consecutive_failures = state.consecutive_failures,
                "marketplace circuit breaker state changed"
            );
            state.state = next;
        }
    }
}
