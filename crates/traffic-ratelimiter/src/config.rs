//! Configuration for per-route rate limit state.

use std::time::Duration;

/// Which rate-limit strategy a route key uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimiterStrategy {
    /// A reservation-based fixed window: `limit` requests per `window`,
    /// reconciled against upstream `X-RateLimit-*` headers as they arrive.
    Window,
    /// A token bucket refilling at a steady rate, used for upstreams that
    /// only ever report `Retry-After` rather than a window/remaining pair.
    TokenBucket,
}

/// Configuration for a single route key's rate-limit state.
#[derive(Debug, Clone)]
pub struct RateLimiterConfig {
    pub(crate) strategy: RateLimiterStrategy,
    pub(crate) default_limit: u32,
    pub(crate) window: Duration,
    pub(crate) token_refill_per_sec: f64,
    pub(crate) token_capacity: u32,
}

impl RateLimiterConfig {
    /// Creates a new configuration builder.
    pub fn builder() -> RateLimiterConfigBuilder {
        RateLimiterConfigBuilder::new()
    }
}

/// Builder for [`RateLimiterConfig`].
pub struct RateLimiterConfigBuilder {
    strategy: RateLimiterStrategy,
    default_limit: u32,
    window: Duration,
    token_refill_per_sec: f64,
    token_capacity: u32,
}

impl RateLimiterConfigBuilder {
    /// Creates a new builder with default values: a 60-request,
    /// 60-second window.
    pub fn new() -> Self {
        Self {
            strategy: RateLimiterStrategy::Window,
            default_limit: 60,
            window: Duration::from_secs(60),
            token_refill_per_sec: 1.0,
            token_capacity: 60,
        }
    }

    /// Selects the strategy used until (or unless) upstream headers say
    /// otherwise.
    ///
    /// Default: [`RateLimiterStrategy::Window`]
    pub fn strategy(mut self, strategy: RateLimiterStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Sets the assumed request limit before any upstream header has been
    /// observed for a route key.
    ///
    /// Default: 60
    pub fn default_limit(mut self, limit: u32) -> Self {
        self.default_limit = limit;
        self
    }

    /// Sets the assumed window length before any upstream header has been
    /// observed.
    ///
    /// Default: 60s
    pub fn window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    /// Sets the token bucket refill rate, in tokens per second.
    ///
    /// Default: 1.0
    pub fn token_refill_per_sec(mut self, rate: f64) -> Self {
        self.token_refill_per_sec = rate;
        self
    }

    /// Sets the token bucket capacity.
    ///
    /// Default: 60
    pub fn token_capacity(mut self, capacity: u32) -> Self {
        self.token_capacity = capacity;
        self
    }

    /// Builds the configuration.
    pub fn build(self) -> RateLimiterConfig {
        RateLimiterConfig {
            strategy: self.strategy,
            default_limit: self.default_limit,
            window: self.window,
            token_refill_per_sec: self.token_refill_per_sec,
            token_capacity: self.token_capacity,
        }
    }
}

impl Default for RateLimiterConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
