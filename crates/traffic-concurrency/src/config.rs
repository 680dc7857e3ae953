//! Configuration for the three-tier concurrency limiter.

/// Configuration for a [`crate::ConcurrencyLimiter`].
///
/// Each cap is optional: `None` means unlimited for that tier, so a given
/// route or process can opt out of a tier entirely rather than being forced
/// to pick an arbitrarily large finite number.
#[derive(Debug, Clone, Default)]
pub struct ConcurrencyLimiterConfig {
    pub(crate) global_max: Option<usize>,
    pub(crate) tenant_max: Option<usize>,
    pub(crate) route_max: Option<usize>,
}

impl ConcurrencyLimiterConfig {
    /// Creates a new configuration builder.
    pub fn builder() -> ConcurrencyLimiterConfigBuilder {
        ConcurrencyLimiterConfigBuilder::new()
    }
}

/// Builder for [`ConcurrencyLimiterConfig`].
pub struct ConcurrencyLimiterConfigBuilder {
    global_max: Option<usize>,
    tenant_max: Option<usize>,
    route_max: Option<usize>,
}

impl ConcurrencyLimiterConfigBuilder {
    /// Creates a new builder. All three tiers are unlimited until set.
    pub fn new() -> Self {
        Self {
            global_max: None,
            tenant_max: None,
            route_max: None,
        }
    }

    /// Sets the process-wide concurrent-call cap.
    ///
    /// Default: unset (unlimited)
    pub fn global_max(mut self, max: usize) -> Self {
        self.global_max = Some(max);
        self
    }

    /// Sets the per-tenant concurrent-call cap.
    ///
    /// Default: unset (unlimited)
    pub fn tenant_max(mut self, max: usize) -> Self {
        self.tenant_max = Some(max);
        self
    }

    /// Sets the per-route concurrent-call cap.
    ///
    /// Default: unset (unlimited)
    pub fn route_max(mut self, max: usize) -> Self {
        self.route_max = Some(max);
        self
    }

    /// Builds the configuration.
    pub fn build(self) -> ConcurrencyLimiterConfig {
        ConcurrencyLimiterConfig {
            global_max: self.global_max,
            tenant_max: self.tenant_max,
            route_max: self.route_max,
        }
    }
}

impl Default for ConcurrencyLimiterConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
