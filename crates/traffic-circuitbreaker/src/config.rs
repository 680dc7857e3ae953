//! Configuration for a route's circuit breaker.

use std::time::Duration;

use traffic_core::events::{EventListeners, FnListener};

use crate::events::CircuitBreakerEvent;

/// Configuration for one route key's circuit breaker. All route keys
/// managed by a single [`crate::CircuitBreakerRegistry`] share one
/// configuration; only the eligible-failure count and phase differ per key.
pub struct CircuitBreakerConfig {
    pub(crate) failure_threshold: usize,
    pub(crate) open_duration: Duration,
    pub(crate) half_open_max_concurrent: usize,
    pub(crate) event_listeners: EventListeners<CircuitBreakerEvent>,
}

impl CircuitBreakerConfig {
    /// Creates a new configuration builder.
    pub fn builder() -> CircuitBreakerConfigBuilder {
        CircuitBreakerConfigBuilder::new()
    }
}

/// Builder for [`CircuitBreakerConfig`].
pub struct CircuitBreakerConfigBuilder {
    failure_threshold: usize,
    open_duration: Duration,
    half_open_max_concurrent: usize,
    event_listeners: EventListeners<CircuitBreakerEvent>,
}

impl CircuitBreakerConfigBuilder {
    /// Creates a new builder with default values.
    pub fn new() -> Self {
        Self {
            failure_threshold: 5,
            open_duration: Duration::from_secs(5),
            half_open_max_concurrent: 1,
            event_listeners: EventListeners::new(),
        }
    }

    /// Sets the number of eligible failures (5xx/429/timeout) a route key
    /// accumulates before its circuit opens. A non-eligible failure clears
    /// the accumulated count back to zero.
    ///
    /// Default: 5
    pub fn failure_threshold(mut self, n: usize) -> Self {
        self.failure_threshold = n;
        self
    }

    /// Sets how long the circuit stays open before allowing a half-open
    /// probe. Doubles (capped) each time a half-open probe itself fails
    /// eligibly, so a route that keeps failing backs off further each round.
    ///
    /// Default: 5s
    pub fn open_duration(mut self, duration: Duration) -> Self {
        self.open_duration = duration;
        self
    }

    /// Sets how many probe calls may be in flight at once while half-open.
    ///
    /// Default: 1
    pub fn half_open_max_concurrent(mut self, n: usize) -> Self {
        self.half_open_max_concurrent = n;
        self
    }

    /// Registers a callback invoked on every state transition.
    pub fn on_state_transition<F>(mut self, f: F) -> Self
    where
        F: Fn(crate::circuit::CircuitState, crate::circuit::CircuitState) + Send + Sync + 'static,
    {
        self.event_listeners.add(FnListener::new(move |event| {
            if let CircuitBreakerEvent::StateTransition {
                from_state,
                to_state,
                ..
            } = event
            {
                f(*from_state, *to_state);
            }
        }));
        self
    }

    /// Builds the configuration.
    pub fn build(self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: self.failure_threshold,
            open_duration: self.open_duration,
            half_open_max_concurrent: self.half_open_max_concurrent,
            event_listeners: self.event_listeners,
        }
    }
}

impl Default for CircuitBreakerConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
