//! Full-jitter exponential backoff.

use std::time::Duration;

use rand::Rng;

use traffic_core::events::{EventListeners, FnListener};

use crate::events::RetryEvent;

/// Configuration for the backoff curve the dispatcher uses to space out
/// retries of the same request.
#[derive(Clone)]
pub struct BackoffConfig {
    initial: Duration,
    multiplier: f64,
    max: Duration,
    event_listeners: EventListeners<RetryEvent>,
}

impl std::fmt::Debug for BackoffConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackoffConfig")
            .field("initial", &self.initial)
            .field("multiplier", &self.multiplier)
            .field("max", &self.max)
            .finish_non_exhaustive()
    }
}

impl BackoffConfig {
    /// Creates a new configuration builder.
    pub fn builder() -> BackoffConfigBuilder {
        BackoffConfigBuilder::new()
    }

    /// The uncapped, unjittered delay for a given retry attempt (1-indexed:
    /// the first retry is attempt 1).
    fn uncapped_delay(&self, attempt: usize) -> Duration {
        let factor = self.multiplier.powi(attempt.saturating_sub(1) as i32);
        self.initial.mul_f64(factor)
    }

    /// The capped, unjittered delay for a given retry attempt — the upper
    /// bound full jitter samples from.
    pub fn capped_delay(&self, attempt: usize) -> Duration {
        self.uncapped_delay(attempt).min(self.max)
    }

    /// Samples a full-jitter delay for a given retry attempt: uniform random
    /// in `[0, capped_delay(attempt)]`.
    ///
    /// Full jitter (rather than a symmetric randomization around the
    /// computed delay) is used deliberately: when many tenants' requests
    /// hit the same route key's failure at once, a full-jitter spread
    /// avoids them retrying in a synchronized wave.
    pub fn sample(&self, attempt: usize, rng: &mut impl Rng) -> Duration {
        let cap = self.capped_delay(attempt);
        if cap.is_zero() {
            return cap;
        }
        let nanos = cap.as_nanos().min(u64::MAX as u128) as u64;
        Duration::from_nanos(rng.random_range(0..=nanos))
    }

    /// Emits an event through this configuration's listeners.
    pub fn emit(&self, event: &RetryEvent) {
        self.event_listeners.emit(event);
    }
}

/// Builder for [`BackoffConfig`].
pub struct BackoffConfigBuilder {
    initial: Duration,
    multiplier: f64,
    max: Duration,
    event_listeners: EventListeners<RetryEvent>,
}

impl BackoffConfigBuilder {
    pub fn new() -> Self {
        Self {
            initial: Duration::from_millis(100),
            multiplier: 2.0,
            max: Duration::from_secs(10),
            event_listeners: EventListeners::new(),
        }
    }

    /// Registers a callback invoked on every retry-scheduling/outcome event.
    pub fn on_event<F>(mut self, f: F) -> Self
    where
        F: Fn(&RetryEvent) + Send + Sync + 'static,
    {
        self.event_listeners.add(FnListener::new(f));
        self
    }

    /// Delay before the first retry.
    ///
    /// Default: 100ms
    pub fn initial(mut self, initial: Duration) -> Self {
        self.initial = initial;
        self
    }

    /// Growth factor applied per additional attempt.
    ///
    /// Default: 2.0
    pub fn multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    /// Upper bound on the unjittered delay.
    ///
    /// Default: 10s
    pub fn max(mut self, max: Duration) -> Self {
        self.max = max;
        self
    }

    pub fn build(self) -> BackoffConfig {
        BackoffConfig {
            initial: self.initial,
            multiplier: self.multiplier,
            max: self.max,
            event_listeners: self.event_listeners,
        }
    }
}

impl Default for BackoffConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
