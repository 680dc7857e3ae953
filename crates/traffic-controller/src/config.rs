//! Top-level configuration assembling every gating component.

use std::collections::HashMap;

use traffic_adaptive::AdaptiveLimiterConfig;
use traffic_circuitbreaker::CircuitBreakerConfig;
use traffic_concurrency::ConcurrencyLimiterConfig;
use traffic_core::events::{EventListeners, FnListener};
use traffic_fallback::{FallbackChains, FallbackPolicyTable};
use traffic_ratelimiter::RateLimiterConfig;
use traffic_retry::BackoffConfig;

use crate::events::DispatcherEvent;

/// Configuration for a [`crate::TrafficController`].
///
/// Every route key shares the concurrency, circuit breaker, adaptive, and
/// backoff configuration; only rate limiting may be tuned per route key,
/// since upstream quotas vary by provider/model pair in a way the others
/// don't.
pub struct TrafficControllerConfig {
    pub(crate) concurrency: ConcurrencyLimiterConfig,
    pub(crate) circuit_breaker: CircuitBreakerConfig,
    pub(crate) adaptive: AdaptiveLimiterConfig,
    pub(crate) backoff: BackoffConfig,
    pub(crate) default_rate_limiter: RateLimiterConfig,
    pub(crate) rate_limiters_by_route: HashMap<String, RateLimiterConfig>,
    pub(crate) fallback_chains: FallbackChains,
    pub(crate) fallback_policies: FallbackPolicyTable,
    pub(crate) event_listeners: EventListeners<DispatcherEvent>,
}

impl TrafficControllerConfig {
    /// Creates a new configuration builder.
    pub fn builder() -> TrafficControllerConfigBuilder {
        TrafficControllerConfigBuilder::new()
    }
}

/// Builder for [`TrafficControllerConfig`].
pub struct TrafficControllerConfigBuilder {
    concurrency: ConcurrencyLimiterConfig,
    circuit_breaker: CircuitBreakerConfig,
    adaptive: AdaptiveLimiterConfig,
    backoff: BackoffConfig,
    default_rate_limiter: RateLimiterConfig,
    rate_limiters_by_route: HashMap<String, RateLimiterConfig>,
    fallback_chains: FallbackChains,
    fallback_policies: FallbackPolicyTable,
    event_listeners: EventListeners<DispatcherEvent>,
}

impl TrafficControllerConfigBuilder {
    /// Creates a new builder with every component at its own default
    /// configuration.
    pub fn new() -> Self {
        Self {
            concurrency: ConcurrencyLimiterConfig::builder().build(),
            circuit_breaker: CircuitBreakerConfig::builder().build(),
            adaptive: AdaptiveLimiterConfig::builder().build(),
            backoff: BackoffConfig::builder().build(),
            default_rate_limiter: RateLimiterConfig::builder().build(),
            rate_limiters_by_route: HashMap::new(),
            fallback_chains: FallbackChains::builder().build(),
            fallback_policies: FallbackPolicyTable::builder().build(),
            event_listeners: EventListeners::new(),
        }
    }

    /// Sets the three-tier concurrency limiter configuration.
    pub fn concurrency(mut self, config: ConcurrencyLimiterConfig) -> Self {
        self.concurrency = config;
        self
    }

    /// Sets the circuit breaker configuration, shared by every route key.
    pub fn circuit_breaker(mut self, config: CircuitBreakerConfig) -> Self {
        self.circuit_breaker = config;
        self
    }

    /// Sets the adaptive 429-cooldown configuration.
    pub fn adaptive(mut self, config: AdaptiveLimiterConfig) -> Self {
        self.adaptive = config;
        self
    }

    /// Sets the retry backoff curve.
    pub fn backoff(mut self, config: BackoffConfig) -> Self {
        self.backoff = config;
        self
    }

    /// Sets the rate limiter configuration used for any route key without
    /// its own entry via [`TrafficControllerConfigBuilder::rate_limiter_for_route`].
    pub fn default_rate_limiter(mut self, config: RateLimiterConfig) -> Self {
        self.default_rate_limiter = config;
        self
    }

    /// Overrides the rate limiter configuration for one `provider::model`
    /// route key.
    pub fn rate_limiter_for_route(mut self, route_key: impl Into<String>, config: RateLimiterConfig) -> Self {
        self.rate_limiters_by_route.insert(route_key.into(), config);
        self
    }

    /// Sets the fallback chain table.
    pub fn fallback_chains(mut self, chains: FallbackChains) -> Self {
        self.fallback_chains = chains;
        self
    }

    /// Sets the fallback policy table.
    pub fn fallback_policies(mut self, policies: FallbackPolicyTable) -> Self {
        self.fallback_policies = policies;
        self
    }

    /// Registers a callback invoked on every dispatcher-level event
    /// (enqueue, dispatch, fallback switch, settle).
    pub fn on_event<F>(mut self, f: F) -> Self
    where
        F: Fn(&DispatcherEvent) + Send + Sync + 'static,
    {
        self.event_listeners.add(FnListener::new(f));
        self
    }

    /// Builds the configuration.
    pub fn build(self) -> TrafficControllerConfig {
        TrafficControllerConfig {
            concurrency: self.concurrency,
            circuit_breaker: self.circuit_breaker,
            adaptive: self.adaptive,
            backoff: self.backoff,
            default_rate_limiter: self.default_rate_limiter,
            rate_limiters_by_route: self.rate_limiters_by_route,
            fallback_chains: self.fallback_chains,
            fallback_policies: self.fallback_policies,
            event_listeners: self.event_listeners,
        }
    }
}

impl Default for TrafficControllerConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
