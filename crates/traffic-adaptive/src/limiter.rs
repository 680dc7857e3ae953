//! Per-`(tenant_id, route_key)` 429 cooldown tracking.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use crate::config::AdaptiveLimiterConfig;
use crate::error::AdaptiveCooldownError;

#[cfg(feature = "metrics")]
use metrics::gauge;

#[derive(Debug, Clone, Eq, PartialEq, Hash)]
struct Key {
    tenant_id: String,
    route_key: String,
}

struct KeyState {
    rejections: VecDeque<Instant>,
    cooldown_until: Option<Instant>,
    current_penalty: Duration,
    last_penalty_update: Instant,
}

impl KeyState {
    fn new(now: Instant) -> Self {
        Self {
            rejections: VecDeque::new(),
            cooldown_until: None,
            current_penalty: Duration::ZERO,
            last_penalty_update: now,
        }
    }
}

/// Tracks 429 bursts per `(tenant_id, route_key)` pair and imposes a
/// temporary cooldown once a tenant's own rejection count crosses a
/// threshold, without affecting any other tenant sharing the same route.
///
/// The penalty grows geometrically on repeated qualifying failures (capped
/// at `max_penalty`) and decays linearly back toward zero over `decay` once
/// a key goes quiet, independent of whether any further calls are observed.
///
/// Owned by the scheduler task; every method is synchronous and takes
/// `&mut self` plus an explicit `now`.
pub struct AdaptiveLimiter {
    config: AdaptiveLimiterConfig,
    keys: HashMap<Key, KeyState>,
}

impl AdaptiveLimiter {
    /// Creates a limiter from its configuration.
    pub fn new(config: AdaptiveLimiterConfig) -> Self {
        Self {
            config,
            keys: HashMap::new(),
        }
    }

    /// Checks whether `tenant_id`/`route_key` is currently in cooldown.
    pub fn check(&self, tenant_id: &str, route_key: &str, now: Instant) -> Result<(), AdaptiveCooldownError> {
        let key = Key {
            tenant_id: tenant_id.to_string(),
            route_key: route_key.to_string(),
        };
        match self.keys.get(&key).and_then(|s| s.cooldown_until) {
            Some(until) if now < until => Err(AdaptiveCooldownError {
                retry_after: until - now,
            }),
            _ => Ok(()),
        }
    }

    /// The penalty a key's state would carry right now, after applying
    /// linear decay for however long it has gone quiet.
    fn decayed_penalty(&self, state: &KeyState, now: Instant) -> Duration {
        if self.config.decay.is_zero() {
            return Duration::ZERO;
        }
        let elapsed = now.saturating_duration_since(state.last_penalty_update);
        if elapsed >= self.config.decay {
            return Duration::ZERO;
        }
        let remaining_fraction = 1.0 - elapsed.as_secs_f64() / self.config.decay.as_secs_f64();
        state.current_penalty.mul_f64(remaining_fraction.clamp(0.0, 1.0))
    }

    /// Records an observed 429 for `tenant_id`/`route_key`. Once the
    /// rolling count within the configured window exceeds the threshold, a
    /// cooldown is applied: the next qualifying failure above threshold
    /// grows the (decayed) penalty geometrically, capped at `max_penalty`.
    pub fn report_429(&mut self, tenant_id: &str, route_key: &str, now: Instant) {
        let key = Key {
            tenant_id: tenant_id.to_string(),
            route_key: route_key.to_string(),
        };
        let state = self.keys.entry(key).or_insert_with(|| KeyState::new(now));

        state.rejections.push_back(now);
        while let Some(&front) = state.rejections.front() {
            if now.saturating_duration_since(front) > self.config.window {
                state.rejections.pop_front();
            } else {
                break;
            }
        }

        if state.rejections.len() > self.config.threshold {
            let decayed = self.decayed_penalty(state, now);
            state.current_penalty = if decayed.is_zero() {
                self.config.base_penalty
            } else {
                decayed
                    .mul_f64(self.config.penalty_multiplier)
                    .min(self.config.max_penalty)
            };
            state.last_penalty_update = now;
            state.cooldown_until = Some(now + state.current_penalty);
            state.rejections.clear();

            #[cfg(feature = "metrics")]
            gauge!("traffic_adaptive_penalty_seconds", "tenant" => tenant_id.to_string(), "route" => route_key.to_string())
                .set(state.current_penalty.as_secs_f64());
        }
    }

    /// Records an observed success for `tenant_id`/`route_key`. Applies
    /// whatever decay has accumulated since the last qualifying failure and
    /// drops the key's state entirely once its penalty has decayed below
    /// `min_penalty`, so a quiet key doesn't linger forever.
    pub fn report_success(&mut self, tenant_id: &str, route_key: &str, now: Instant) {
        let key = Key {
            tenant_id: tenant_id.to_string(),
            route_key: route_key.to_string(),
        };
        let Some(state) = self.keys.get_mut(&key) else {
            return;
        };
        if let Some(until) = state.cooldown_until {
            if now < until {
                return;
            }
        }

        let decayed = self.decayed_penalty(state, now);
        if decayed < self.config.min_penalty {
            self.keys.remove(&key);
        } else {
            state.current_penalty = decayed;
            state.last_penalty_update = now;
            state.cooldown_until = None;
        }
    }
}
