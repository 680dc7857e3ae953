//! Configuration for the adaptive cooldown limiter.

use std::time::Duration;

/// Configuration shared by every `(tenant_id, route_key)` cooldown tracked
/// by an [`crate::AdaptiveLimiter`].
#[derive(Debug, Clone)]
pub struct AdaptiveLimiterConfig {
    pub(crate) threshold: usize,
    pub(crate) window: Duration,
    pub(crate) base_penalty: Duration,
    pub(crate) min_penalty: Duration,
    pub(crate) penalty_multiplier: f64,
    pub(crate) max_penalty: Duration,
    pub(crate) decay: Duration,
}

impl AdaptiveLimiterConfig {
    /// Creates a new configuration builder.
    pub fn builder() -> AdaptiveLimiterConfigBuilder {
        AdaptiveLimiterConfigBuilder::new()
    }
}

/// Builder for [`AdaptiveLimiterConfig`].
pub struct AdaptiveLimiterConfigBuilder {
    threshold: usize,
    window: Duration,
    base_penalty: Duration,
    min_penalty: Duration,
    penalty_multiplier: f64,
    max_penalty: Duration,
    decay: Duration,
}

impl AdaptiveLimiterConfigBuilder {
    pub fn new() -> Self {
        Self {
            threshold: 3,
            window: Duration::from_secs(10),
            base_penalty: Duration::from_secs(5),
            min_penalty: Duration::from_millis(500),
            penalty_multiplier: 2.0,
            max_penalty: Duration::from_secs(60),
            decay: Duration::from_secs(30),
        }
    }

    /// Number of 429s within `window` that trigger a cooldown.
    ///
    /// Default: 3
    pub fn threshold(mut self, threshold: usize) -> Self {
        self.threshold = threshold;
        self
    }

    /// Rolling window over which 429s are counted.
    ///
    /// Default: 10s
    pub fn window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    /// Cooldown duration applied the first time a key crosses the
    /// threshold, or after its penalty has fully decayed back to zero.
    ///
    /// Default: 5s
    pub fn base_penalty(mut self, penalty: Duration) -> Self {
        self.base_penalty = penalty;
        self
    }

    /// Once the decayed penalty falls below this, the key's state is
    /// cleared entirely rather than kept at a vanishing value.
    ///
    /// Default: 500ms
    pub fn min_penalty(mut self, penalty: Duration) -> Self {
        self.min_penalty = penalty;
        self
    }

    /// Factor the penalty grows by on each qualifying failure above
    /// `threshold`, up to `max_penalty`.
    ///
    /// Default: 2.0
    pub fn penalty_multiplier(mut self, multiplier: f64) -> Self {
        self.penalty_multiplier = multiplier;
        self
    }

    /// Ceiling the penalty is clamped to regardless of how many qualifying
    /// failures accumulate.
    ///
    /// Default: 60s
    pub fn max_penalty(mut self, penalty: Duration) -> Self {
        self.max_penalty = penalty;
        self
    }

    /// How long a key must go without a qualifying failure before its
    /// penalty has fully decayed back to zero; decay is linear over this
    /// span and runs independent of further calls, purely as a function of
    /// elapsed time since the last qualifying failure.
    ///
    /// Default: 30s
    pub fn decay(mut self, decay: Duration) -> Self {
        self.decay = decay;
        self
    }

    pub fn build(self) -> AdaptiveLimiterConfig {
        AdaptiveLimiterConfig {
            threshold: self.threshold,
            window: self.window,
            base_penalty: self.base_penalty,
            min_penalty: self.min_penalty,
            penalty_multiplier: self.penalty_multiplier,
            max_penalty: self.max_penalty,
            decay: self.decay,
        }
    }
}

impl Default for AdaptiveLimiterConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
