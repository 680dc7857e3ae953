//! Three-tier concurrency counters.

use std::collections::HashMap;

use crate::config::ConcurrencyLimiterConfig;
use crate::error::ConcurrencyError;

#[cfg(feature = "metrics")]
use metrics::gauge;

/// A point-in-time view of concurrency usage, for diagnostics and
/// `getTenantUsage`-style introspection. A `None` cap means that tier is
/// unlimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ConcurrencySnapshot {
    /// Calls currently in flight, globally.
    pub global_in_flight: usize,
    /// The configured global cap, if any.
    pub global_max: Option<usize>,
    /// Calls currently in flight for the queried tenant.
    pub tenant_in_flight: usize,
    /// The configured per-tenant cap, if any.
    pub tenant_max: Option<usize>,
    /// Calls currently in flight for the queried route.
    pub route_in_flight: usize,
    /// The configured per-route cap, if any.
    pub route_max: Option<usize>,
}

/// Tracks in-flight call counts at three granularities and gates admission
/// so none of them is ever exceeded. A tier whose cap is unset is skipped
/// entirely rather than compared against some sentinel value.
///
/// This is owned exclusively by the dispatcher's scheduler task (see
/// `traffic-controller`), so every method here takes `&mut self` and is
/// synchronous: there is no internal locking to do.
#[derive(Debug)]
pub struct ConcurrencyLimiter {
    config: ConcurrencyLimiterConfig,
    global: usize,
    tenants: HashMap<String, usize>,
    routes: HashMap<String, usize>,
}

impl ConcurrencyLimiter {
    /// Creates a limiter from its configuration.
    pub fn new(config: ConcurrencyLimiterConfig) -> Self {
        Self {
            config,
            global: 0,
            tenants: HashMap::new(),
            routes: HashMap::new(),
        }
    }

    /// Attempts to admit one more in-flight call for `tenant_id`/`route_key`.
    ///
    /// All three tiers are checked before any counter is incremented: a
    /// rejection at the tenant or route tier never leaves the global
    /// counter incremented. On success, call [`ConcurrencyLimiter::release`]
    /// exactly once when the call completes.
    pub fn try_acquire(&mut self, tenant_id: &str, route_key: &str) -> Result<(), ConcurrencyError> {
        if let Some(limit) = self.config.global_max {
            if self.global >= limit {
                return Err(ConcurrencyError::GlobalFull { limit });
            }
        }
        if let Some(limit) = self.config.tenant_max {
            let tenant_count = self.tenants.get(tenant_id).copied().unwrap_or(0);
            if tenant_count >= limit {
                return Err(ConcurrencyError::TenantFull { limit });
            }
        }
        if let Some(limit) = self.config.route_max {
            let route_count = self.routes.get(route_key).copied().unwrap_or(0);
            if route_count >= limit {
                return Err(ConcurrencyError::RouteFull { limit });
            }
        }

        self.global += 1;
        *self.tenants.entry(tenant_id.to_string()).or_insert(0) += 1;
        *self.routes.entry(route_key.to_string()).or_insert(0) += 1;

        #[cfg(feature = "metrics")]
        {
            gauge!("traffic_concurrency_global").set(self.global as f64);
            gauge!("traffic_concurrency_tenant", "tenant" => tenant_id.to_string())
                .set(self.tenants[tenant_id] as f64);
            gauge!("traffic_concurrency_route", "route" => route_key.to_string())
                .set(self.routes[route_key] as f64);
        }

        Ok(())
    }

    /// Releases a previously-acquired slot for `tenant_id`/`route_key`.
    ///
    /// # Panics
    ///
    /// In debug builds, panics if called more times than
    /// [`ConcurrencyLimiter::try_acquire`] succeeded for the same key —
    /// that would mean the dispatcher double-released a call.
    pub fn release(&mut self, tenant_id: &str, route_key: &str) {
        debug_assert!(self.global > 0, "released more calls than were acquired");
        self.global = self.global.saturating_sub(1);

        if let Some(count) = self.tenants.get_mut(tenant_id) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                self.tenants.remove(tenant_id);
            }
        }
        if let Some(count) = self.routes.get_mut(route_key) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                self.routes.remove(route_key);
            }
        }

        #[cfg(feature = "metrics")]
        gauge!("traffic_concurrency_global").set(self.global as f64);
    }

    /// A snapshot of current usage for the given tenant/route pair.
    pub fn snapshot(&self, tenant_id: &str, route_key: &str) -> ConcurrencySnapshot {
        ConcurrencySnapshot {
            global_in_flight: self.global,
            global_max: self.config.global_max,
            tenant_in_flight: self.tenants.get(tenant_id).copied().unwrap_or(0),
            tenant_max: self.config.tenant_max,
            route_in_flight: self.routes.get(route_key).copied().unwrap_or(0),
            route_max: self.config.route_max,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(global: usize, tenant: usize, route: usize) -> ConcurrencyLimiter {
        ConcurrencyLimiter::new(
            ConcurrencyLimiterConfig::builder()
                .global_max(global)
                .tenant_max(tenant)
                .route_max(route)
                .build(),
        )
    }

    #[test]
    fn admits_up_to_each_cap() {
        let mut l = limiter(10, 1, 10);
        assert!(l.try_acquire("a", "r").is_ok());
        assert_eq!(
            l.try_acquire("a", "r"),
            Err(ConcurrencyError::TenantFull { limit: 1 })
        );
    }

    #[test]
    fn release_frees_all_three_tiers() {
        let mut l = limiter(1, 1, 1);
        l.try_acquire("a", "r").unwrap();
        assert!(l.try_acquire("a", "r").is_err());
        l.release("a", "r");
        assert!(l.try_acquire("a", "r").is_ok());
    }

    #[test]
    fn rejection_at_tenant_tier_does_not_touch_global_counter() {
        let mut l = limiter(10, 1, 10);
        l.try_acquire("a", "r1").unwrap();
        let before = l.global;
        assert!(l.try_acquire("a", "r2").is_err());
        assert_eq!(l.global, before);
    }

    #[test]
    fn independent_tenants_do_not_share_the_tenant_cap() {
        let mut l = limiter(10, 1, 10);
        assert!(l.try_acquire("a", "r").is_ok());
        assert!(l.try_acquire("b", "r").is_ok());
    }

    #[test]
    fn unset_tier_admits_without_bound() {
        let mut l = ConcurrencyLimiter::new(ConcurrencyLimiterConfig::builder().tenant_max(1).build());
        for _ in 0..10_000 {
            assert!(l.try_acquire("a", "r").is_ok());
        }
    }
}
