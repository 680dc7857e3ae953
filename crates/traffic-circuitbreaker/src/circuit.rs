//! Per-route-key circuit state machine.

use std::time::{Duration, Instant};

#[cfg(feature = "metrics")]
use metrics::{counter, gauge};

use crate::config::CircuitBreakerConfig;
use crate::events::{CallOutcome, CircuitBreakerEvent};

/// The state of a single route key's circuit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Calls are allowed through.
    Closed,
    /// Calls are rejected until the open duration elapses.
    Open,
    /// A limited number of probe calls are allowed through to test recovery.
    HalfOpen,
}

/// Point-in-time view of a circuit, for introspection.
#[derive(Debug, Clone, PartialEq)]
pub struct CircuitMetrics {
    pub state: CircuitState,
    pub eligible_failure_count: usize,
    pub half_open_in_flight: usize,
    pub time_since_state_change: Duration,
}

/// HTTP statuses that count toward a route key's eligible-failure total.
/// Anything else (4xx other than 429) clears the accumulated count instead.
const ELIGIBLE_STATUSES: [u16; 5] = [429, 500, 502, 503, 504];

/// Whether a settled call counts as an eligible failure for circuit-breaking
/// purposes. A timeout is always eligible; otherwise only the specific
/// status codes the upstream treats as transient overload or unavailability.
pub fn is_eligible_failure(status: Option<u16>, is_timeout: bool) -> bool {
    if is_timeout {
        return true;
    }
    matches!(status, Some(code) if ELIGIBLE_STATUSES.contains(&code))
}

/// The maximum number of times the open duration doubles on repeated
/// half-open failures before it stops growing.
const MAX_OPEN_DURATION_DOUBLINGS: u32 = 3;

/// The circuit breaker state for one route key.
///
/// Owned directly by the scheduler task's route table; every method takes
/// `&mut self` plus an explicit `now: Instant` rather than reading the
/// system clock itself, so behavior stays deterministic under
/// `tokio::time::advance` in tests.
pub struct Circuit {
    route_key: String,
    state: CircuitState,
    last_state_change: Instant,
    eligible_failure_count: usize,
    half_open_in_flight: usize,
    reopen_count: u32,
    current_open_duration: Duration,
}

impl Circuit {
    /// Creates a new closed circuit for `route_key`.
    pub fn new(route_key: impl Into<String>, now: Instant) -> Self {
        Self {
            route_key: route_key.into(),
            state: CircuitState::Closed,
            last_state_change: now,
            eligible_failure_count: 0,
            half_open_in_flight: 0,
            reopen_count: 0,
            current_open_duration: Duration::ZERO,
        }
    }

    pub fn state(&self) -> CircuitState {
        self.state
    }

    pub fn route_key(&self) -> &str {
        &self.route_key
    }

    /// A consistent snapshot of the circuit's current counters.
    pub fn metrics(&self, now: Instant) -> CircuitMetrics {
        CircuitMetrics {
            state: self.state,
            eligible_failure_count: self.eligible_failure_count,
            half_open_in_flight: self.half_open_in_flight,
            time_since_state_change: now.saturating_duration_since(self.last_state_change),
        }
    }

    /// Decides whether a call may proceed right now, transitioning
    /// Open -> HalfOpen once the open duration has elapsed.
    pub fn try_acquire(&mut self, config: &CircuitBreakerConfig, now: Instant) -> bool {
        match self.state {
            CircuitState::Closed => {
                self.emit(config, CircuitBreakerEvent::CallPermitted {
                    route_key: self.route_key.clone(),
                    timestamp: now,
                    state: self.state,
                });
                true
            }
            CircuitState::Open => {
                if now.saturating_duration_since(self.last_state_change) >= self.current_open_duration {
                    self.transition_to(CircuitState::HalfOpen, config, now);
                    self.half_open_in_flight += 1;
                    self.emit(config, CircuitBreakerEvent::CallPermitted {
                        route_key: self.route_key.clone(),
                        timestamp: now,
                        state: self.state,
                    });
                    true
                } else {
                    self.emit(config, CircuitBreakerEvent::CallRejected {
                        route_key: self.route_key.clone(),
                        timestamp: now,
                    });
                    false
                }
            }
            CircuitState::HalfOpen => {
                let permitted = self.half_open_in_flight < config.half_open_max_concurrent;
                if permitted {
                    self.half_open_in_flight += 1;
                    self.emit(config, CircuitBreakerEvent::CallPermitted {
                        route_key: self.route_key.clone(),
                        timestamp: now,
                        state: self.state,
                    });
                } else {
                    self.emit(config, CircuitBreakerEvent::CallRejected {
                        route_key: self.route_key.clone(),
                        timestamp: now,
                    });
                }
                permitted
            }
        }
    }

    /// Returns the instant at which an open circuit next allows a probe.
    pub fn retry_after(&self, now: Instant) -> Option<Duration> {
        match self.state {
            CircuitState::Open => {
                let elapsed = now.saturating_duration_since(self.last_state_change);
                Some(self.current_open_duration.saturating_sub(elapsed))
            }
            _ => None,
        }
    }

    /// Records a successful call. Closes a half-open circuit and resets the
    /// eligible-failure count; otherwise has no effect on the count.
    pub fn record_success(&mut self, config: &CircuitBreakerConfig, now: Instant) {
        self.emit(config, CircuitBreakerEvent::OutcomeRecorded {
            route_key: self.route_key.clone(),
            timestamp: now,
            state: self.state,
            outcome: CallOutcome::Success,
        });

        #[cfg(feature = "metrics")]
        counter!("traffic_circuit_calls_total", "route" => self.route_key.clone(), "outcome" => "success")
            .increment(1);

        match self.state {
            CircuitState::HalfOpen => self.close(config, now),
            _ => {}
        }
    }

    /// Records an eligible failure (5xx/429/timeout). Increments the
    /// accumulated count, opening the circuit once `failure_threshold` is
    /// reached. A failure observed while half-open reopens immediately with
    /// a doubled (capped) open duration.
    pub fn record_eligible_failure(&mut self, config: &CircuitBreakerConfig, now: Instant) {
        self.eligible_failure_count += 1;

        self.emit(config, CircuitBreakerEvent::OutcomeRecorded {
            route_key: self.route_key.clone(),
            timestamp: now,
            state: self.state,
            outcome: CallOutcome::EligibleFailure,
        });

        #[cfg(feature = "metrics")]
        counter!("traffic_circuit_calls_total", "route" => self.route_key.clone(), "outcome" => "eligible_failure")
            .increment(1);

        match self.state {
            CircuitState::HalfOpen => self.reopen(config, now),
            CircuitState::Closed if self.eligible_failure_count >= config.failure_threshold => {
                self.reopen_count = 0;
                self.current_open_duration = config.open_duration;
                self.transition_to(CircuitState::Open, config, now);
            }
            _ => {}
        }
    }

    /// Records a non-eligible failure (e.g. 400/401/403). Clears the
    /// accumulated eligible-failure count; a circuit half-opened to probe
    /// recovery treats this the same as a success, since the upstream
    /// responded rather than erroring out.
    pub fn record_non_eligible_failure(&mut self, config: &CircuitBreakerConfig, now: Instant) {
        self.eligible_failure_count = 0;

        self.emit(config, CircuitBreakerEvent::OutcomeRecorded {
            route_key: self.route_key.clone(),
            timestamp: now,
            state: self.state,
            outcome: CallOutcome::NonEligibleFailure,
        });

        #[cfg(feature = "metrics")]
        counter!("traffic_circuit_calls_total", "route" => self.route_key.clone(), "outcome" => "non_eligible_failure")
            .increment(1);

        if self.state == CircuitState::HalfOpen {
            self.close(config, now);
        }
    }

    fn close(&mut self, config: &CircuitBreakerConfig, now: Instant) {
        self.reopen_count = 0;
        self.current_open_duration = Duration::ZERO;
        self.transition_to(CircuitState::Closed, config, now);
    }

    fn reopen(&mut self, config: &CircuitBreakerConfig, now: Instant) {
        self.reopen_count = (self.reopen_count + 1).min(MAX_OPEN_DURATION_DOUBLINGS);
        self.current_open_duration = config.open_duration * 2u32.pow(self.reopen_count);
        self.transition_to(CircuitState::Open, config, now);
    }

    pub fn force_open(&mut self, config: &CircuitBreakerConfig, now: Instant) {
        self.reopen_count = 0;
        self.current_open_duration = config.open_duration;
        self.transition_to(CircuitState::Open, config, now);
    }

    pub fn force_closed(&mut self, config: &CircuitBreakerConfig, now: Instant) {
        self.close(config, now);
    }

    pub fn reset(&mut self, config: &CircuitBreakerConfig, now: Instant) {
        self.close(config, now);
    }

    fn transition_to(&mut self, state: CircuitState, config: &CircuitBreakerConfig, now: Instant) {
        if self.state == state {
            return;
        }
        let from_state = self.state;

        self.emit(config, CircuitBreakerEvent::StateTransition {
            route_key: self.route_key.clone(),
            timestamp: now,
            from_state,
            to_state: state,
        });

        #[cfg(feature = "tracing")]
        tracing::info!(route_key = %self.route_key, from = ?from_state, to = ?state, "circuit state transition");

        #[cfg(feature = "metrics")]
        gauge!("traffic_circuit_state", "route" => self.route_key.clone()).set(match state {
            CircuitState::Closed => 0.0,
            CircuitState::Open => 1.0,
            CircuitState::HalfOpen => 2.0,
        });

        self.state = state;
        self.last_state_change = now;
        self.half_open_in_flight = 0;
        if state == CircuitState::Closed {
            self.eligible_failure_count = 0;
        }
    }

    fn emit(&self, config: &CircuitBreakerConfig, event: CircuitBreakerEvent) {
        config.event_listeners.emit(&event);
    }
}
