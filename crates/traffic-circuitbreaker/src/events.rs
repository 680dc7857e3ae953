//! Events emitted by a route's circuit breaker.

use std::time::Instant;

use traffic_core::ResilienceEvent;

use crate::circuit::CircuitState;

/// The outcome of a single settled call, as seen by the circuit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallOutcome {
    Success,
    /// A 5xx/429/timeout failure: counts toward `failure_threshold`.
    EligibleFailure,
    /// A 4xx failure other than 429: clears the accumulated count.
    NonEligibleFailure,
}

/// An event emitted by a circuit breaker for a single route key.
#[derive(Debug, Clone)]
pub enum CircuitBreakerEvent {
    /// A call was allowed through.
    CallPermitted {
        route_key: String,
        timestamp: Instant,
        state: CircuitState,
    },
    /// A call was rejected because the circuit is open.
    CallRejected {
        route_key: String,
        timestamp: Instant,
    },
    /// An outcome was recorded against the route key's eligible-failure
    /// count.
    OutcomeRecorded {
        route_key: String,
        timestamp: Instant,
        state: CircuitState,
        outcome: CallOutcome,
    },
    /// The circuit transitioned from one state to another.
    StateTransition {
        route_key: String,
        timestamp: Instant,
        from_state: CircuitState,
        to_state: CircuitState,
    },
}

impl ResilienceEvent for CircuitBreakerEvent {
    fn event_type(&self) -> &'static str {
        match self {
            CircuitBreakerEvent::CallPermitted { .. } => "call_permitted",
            CircuitBreakerEvent::CallRejected { .. } => "call_rejected",
            CircuitBreakerEvent::OutcomeRecorded { .. } => "outcome_recorded",
            CircuitBreakerEvent::StateTransition { .. } => "state_transition",
        }
    }

    fn timestamp(&self) -> Instant {
        match self {
            CircuitBreakerEvent::CallPermitted { timestamp, .. }
            | CircuitBreakerEvent::CallRejected { timestamp, .. }
            | CircuitBreakerEvent::OutcomeRecorded { timestamp, .. }
            | CircuitBreakerEvent::StateTransition { timestamp, .. } => *timestamp,
        }
    }

    fn pattern_name(&self) -> &str {
        match self {
            CircuitBreakerEvent::CallPermitted { route_key, .. }
            | CircuitBreakerEvent::CallRejected { route_key, .. }
            | CircuitBreakerEvent::OutcomeRecorded { route_key, .. }
            | CircuitBreakerEvent::StateTransition { route_key, .. } => route_key,
        }
    }
}
