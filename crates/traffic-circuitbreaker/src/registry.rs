//! Process-lifetime registry of per-route-key circuits.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::circuit::{Circuit, CircuitMetrics, CircuitState};
use crate::config::CircuitBreakerConfig;
use crate::error::CircuitBreakerError;

/// Owns one [`Circuit`] per route key, created lazily on first use and kept
/// for the lifetime of the process so a route's failure history survives
/// across individual calls.
///
/// Like the other gating components, this is owned exclusively by the
/// scheduler task: every method is synchronous and takes `&mut self`.
pub struct CircuitBreakerRegistry {
    config: CircuitBreakerConfig,
    circuits: HashMap<String, Circuit>,
}

impl CircuitBreakerRegistry {
    /// Creates a registry sharing one configuration across all route keys.
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            circuits: HashMap::new(),
        }
    }

    fn circuit_mut(&mut self, route_key: &str, now: Instant) -> &mut Circuit {
        self.circuits
            .entry(route_key.to_string())
            .or_insert_with(|| Circuit::new(route_key, now))
    }

    /// Attempts to admit a call for `route_key`.
    pub fn try_acquire(&mut self, route_key: &str, now: Instant) -> Result<(), CircuitBreakerError> {
        let circuit = self.circuit_mut(route_key, now);
        if circuit.try_acquire(&self.config, now) {
            Ok(())
        } else {
            let retry_after = circuit.retry_after(now).unwrap_or_default();
            Err(CircuitBreakerError::Open {
                route_key: route_key.to_string(),
                retry_after,
            })
        }
    }

    /// Records a successful call that was previously admitted.
    pub fn record_success(&mut self, route_key: &str, now: Instant) {
        self.circuit_mut(route_key, now)
            .record_success(&self.config, now);
    }

    /// Records an eligible failure (5xx/429/timeout) for a call that was
    /// previously admitted.
    pub fn record_eligible_failure(&mut self, route_key: &str, now: Instant) {
        self.circuit_mut(route_key, now)
            .record_eligible_failure(&self.config, now);
    }

    /// Records a non-eligible failure (e.g. 400/401/403), clearing the
    /// route key's accumulated eligible-failure count.
    pub fn record_non_eligible_failure(&mut self, route_key: &str, now: Instant) {
        self.circuit_mut(route_key, now)
            .record_non_eligible_failure(&self.config, now);
    }

    /// How long until `route_key`'s circuit next allows a call, without
    /// mutating any state. `None` if the circuit is not currently open (or
    /// has never been used).
    pub fn retry_after(&self, route_key: &str, now: Instant) -> Option<Duration> {
        self.circuits.get(route_key)?.retry_after(now)
    }

    /// Current state of `route_key`'s circuit, or `Closed` if no calls have
    /// been made yet (a circuit that has never seen a call is closed).
    pub fn state(&self, route_key: &str) -> CircuitState {
        self.circuits
            .get(route_key)
            .map(|c| c.state())
            .unwrap_or(CircuitState::Closed)
    }

    /// Point-in-time metrics for `route_key`, if it has ever been used.
    pub fn metrics(&self, route_key: &str, now: Instant) -> Option<CircuitMetrics> {
        self.circuits.get(route_key).map(|c| c.metrics(now))
    }

    /// Forces `route_key`'s circuit open, e.g. from an operator command.
    pub fn force_open(&mut self, route_key: &str, now: Instant) {
        self.circuit_mut(route_key, now).force_open(&self.config, now);
    }

    /// Forces `route_key`'s circuit closed.
    pub fn force_closed(&mut self, route_key: &str, now: Instant) {
        self.circuit_mut(route_key, now).force_closed(&self.config, now);
    }

    /// Resets `route_key`'s circuit to closed and clears its count.
    pub fn reset(&mut self, route_key: &str, now: Instant) {
        self.circuit_mut(route_key, now).reset(&self.config, now);
    }
}
