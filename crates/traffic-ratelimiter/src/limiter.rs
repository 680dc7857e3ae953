//! Per-route rate limit state: window reservations and token bucket.

use std::time::{Duration, Instant, SystemTime};

use crate::config::{RateLimiterConfig, RateLimiterStrategy};
use crate::error::RateLimiterError;
use crate::headers::ParsedRateLimitHeaders;

#[cfg(feature = "metrics")]
use metrics::gauge;

/// Proof that a slot was reserved. Must be resolved with exactly one of
/// [`RateLimitState::confirm`] or [`RateLimitState::cancel`].
#[derive(Debug)]
#[must_use = "a reservation must be confirmed or cancelled"]
pub struct Reservation {
    _private: (),
}

struct WindowState {
    limit: u32,
    remaining: u32,
    reserved: u32,
    reset_at: Instant,
    window: Duration,
    next_allowed_at: Option<Instant>,
    next_allowed_at_before_reserve: Option<Instant>,
}

struct TokenBucketState {
    capacity: u32,
    tokens: f64,
    refill_per_sec: f64,
    last_refill: Instant,
    next_allowed_at: Option<Instant>,
}

enum Inner {
    Window(WindowState),
    TokenBucket(TokenBucketState),
}

/// A read-only view of a route key's rate-limit state, returned to callers
/// of `updateRateLimitFromHeaders` for logging/testing.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RateLimitSnapshot {
    /// Window capacity, if this key uses the window strategy.
    pub limit: Option<u32>,
    /// Remaining (unreserved) slots in the current window.
    pub remaining: Option<u32>,
    /// Slots granted but not yet confirmed or cancelled.
    pub reserved: Option<u32>,
    /// When the current window rolls over.
    pub reset_at: Option<Instant>,
}

/// Rate-limit bookkeeping for one route key.
pub struct RateLimitState {
    inner: Inner,
}

impl RateLimitState {
    /// Creates fresh state for a route key from its configuration.
    pub fn new(config: &RateLimiterConfig, now: Instant) -> Self {
        let inner = match config.strategy {
            RateLimiterStrategy::Window => Inner::Window(WindowState {
                limit: config.default_limit,
                remaining: config.default_limit,
                reserved: 0,
                reset_at: now + config.window,
                window: config.window,
                next_allowed_at: None,
                next_allowed_at_before_reserve: None,
            }),
            RateLimiterStrategy::TokenBucket => Inner::TokenBucket(TokenBucketState {
                capacity: config.token_capacity,
                tokens: config.token_capacity as f64,
                refill_per_sec: config.token_refill_per_sec,
                last_refill: now,
                next_allowed_at: None,
            }),
        };
        Self { inner }
    }

    /// Attempts to reserve one slot. On success the caller must eventually
    /// call [`RateLimitState::confirm`] (the call was made) or
    /// [`RateLimitState::cancel`] (it was not, e.g. a higher-priority gate
    /// rejected the request first).
    pub fn try_reserve(&mut self, now: Instant) -> Result<Reservation, RateLimiterError> {
        match &mut self.inner {
            Inner::Window(w) => {
                if now >= w.reset_at {
                    w.remaining = w.limit;
                    w.reserved = 0;
                    w.reset_at = now + w.window;
                }
                if let Some(na) = w.next_allowed_at {
                    if now < na {
                        return Err(RateLimiterError::Exhausted {
                            retry_after: na - now,
                        });
                    }
                }
                if w.remaining == 0 {
                    return Err(RateLimiterError::Exhausted {
                        retry_after: w.reset_at.saturating_duration_since(now),
                    });
                }
                let effective_remaining = w.remaining;
                w.remaining -= 1;
                w.reserved += 1;
                w.next_allowed_at_before_reserve = w.next_allowed_at;
                let pacing_gap = (w.reset_at.saturating_duration_since(now) / effective_remaining.max(1)).max(Duration::from_millis(1));
                w.next_allowed_at = Some(now + pacing_gap);
                #[cfg(feature = "metrics")]
                gauge!("traffic_ratelimit_remaining").set(w.remaining as f64);
                Ok(Reservation { _private: () })
            }
            Inner::TokenBucket(b) => {
                refill(b, now);
                if let Some(na) = b.next_allowed_at {
                    if now < na {
                        return Err(RateLimiterError::Exhausted {
                            retry_after: na - now,
                        });
                    }
                }
                if b.tokens < 1.0 {
                    let deficit = 1.0 - b.tokens;
                    let wait = Duration::from_secs_f64(deficit / b.refill_per_sec.max(f64::EPSILON));
                    return Err(RateLimiterError::Exhausted { retry_after: wait });
                }
                b.tokens -= 1.0;
                Ok(Reservation { _private: () })
            }
        }
    }

    /// Confirms a reservation: the call was made and consumed its slot.
    pub fn confirm(&mut self, reservation: Reservation) {
        let Reservation { .. } = reservation;
        if let Inner::Window(w) = &mut self.inner {
            w.reserved = w.reserved.saturating_sub(1);
        }
    }

    /// Cancels a reservation: the call was never made, so the slot (for the
    /// window strategy) goes back to `remaining`.
    pub fn cancel(&mut self, reservation: Reservation) {
        let Reservation { .. } = reservation;
        if let Inner::Window(w) = &mut self.inner {
            w.reserved = w.reserved.saturating_sub(1);
            w.remaining = (w.remaining + 1).min(w.limit.saturating_sub(w.reserved));
            w.next_allowed_at = w.next_allowed_at_before_reserve.take();
        }
    }

    /// Reconciles this state against upstream response headers.
    ///
    /// Upstream-reported `limit`/`remaining` are treated as authoritative:
    /// the upstream sees every client sharing this quota, not just this
    /// process, so its count always wins over our own bookkeeping. A
    /// reported `reset_at` replaces our window boundary; a reported
    /// `retry_after` sets a pacing floor (`next_allowed_at`) below which no
    /// reservation is granted even if `remaining` is nonzero.
    pub fn apply_headers(
        &mut self,
        parsed: &ParsedRateLimitHeaders,
        now: Instant,
        wall_now: SystemTime,
    ) {
        if let Inner::Window(w) = &mut self.inner {
            if let Some(limit) = parsed.limit {
                w.limit = limit;
            }
            if let Some(remaining) = parsed.remaining {
                w.remaining = remaining.min(w.limit.saturating_sub(w.reserved));
            }
            if let Some(reset_at) = parsed.reset_at {
                w.reset_at = match reset_at.duration_since(wall_now) {
                    Ok(delta) => now + delta,
                    Err(_) => now,
                };
            }
        }
        if let Some(retry_after) = parsed.retry_after {
            let until = now + retry_after;
            match &mut self.inner {
                Inner::Window(w) => w.next_allowed_at = Some(until),
                Inner::TokenBucket(b) => b.next_allowed_at = Some(until),
            }
        }
    }

    /// A read-only snapshot of this key's state, for logging and tests.
    pub fn snapshot(&self) -> RateLimitSnapshot {
        match &self.inner {
            Inner::Window(w) => RateLimitSnapshot {
                limit: Some(w.limit),
                remaining: Some(w.remaining),
                reserved: Some(w.reserved),
                reset_at: Some(w.reset_at),
            },
            Inner::TokenBucket(_) => RateLimitSnapshot {
                limit: None,
                remaining: None,
                reserved: None,
                reset_at: None,
            },
        }
    }

    /// The earliest instant a reservation might succeed, used by the
    /// dispatcher's wakeup-coalescing timer.
    pub fn next_wakeup(&self, now: Instant) -> Instant {
        match &self.inner {
            Inner::Window(w) => {
                let mut candidates = vec![w.reset_at];
                if w.remaining > 0 {
                    candidates.push(now);
                }
                if let Some(na) = w.next_allowed_at {
                    candidates.push(na);
                }
                candidates.into_iter().min().unwrap_or(now)
            }
            Inner::TokenBucket(b) => {
                if b.tokens >= 1.0 {
                    now
                } else {
                    let deficit = 1.0 - b.tokens;
                    now + Duration::from_secs_f64(deficit / b.refill_per_sec.max(f64::EPSILON))
                }
            }
        }
    }
}

fn refill(bucket: &mut TokenBucketState, now: Instant) {
    let elapsed = now.saturating_duration_since(bucket.last_refill).as_secs_f64();
    bucket.tokens = (bucket.tokens + elapsed * bucket.refill_per_sec).min(bucket.capacity as f64);
    bucket.last_refill = now;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window_state(limit: u32, window: Duration, now: Instant) -> RateLimitState {
        RateLimitState::new(
            &RateLimiterConfig::builder()
                .strategy(RateLimiterStrategy::Window)
                .default_limit(limit)
                .window(window)
                .build(),
            now,
        )
    }

    #[test]
    fn reserve_confirm_decrements_remaining_permanently() {
        let now = Instant::now();
        let mut s = window_state(2, Duration::from_secs(60), now);
        let r = s.try_reserve(now).unwrap();
        s.confirm(r);
        // The pacing gap spreads the two slots evenly across the window, so
        // the second reservation has to wait for it rather than firing
        // back-to-back with the first.
        let later = now + Duration::from_secs(30);
        let r2 = s.try_reserve(later).unwrap();
        s.confirm(r2);
        assert!(s.try_reserve(later).is_err());
    }

    #[test]
    fn pacing_gap_blocks_a_burst_within_the_window() {
        let now = Instant::now();
        let mut s = window_state(2, Duration::from_secs(60), now);
        let r = s.try_reserve(now).unwrap();
        s.confirm(r);
        assert!(s.try_reserve(now).is_err());
    }

    #[test]
    fn cancel_returns_the_slot() {
        let now = Instant::now();
        let mut s = window_state(1, Duration::from_secs(60), now);
        let r = s.try_reserve(now).unwrap();
        s.cancel(r);
        assert!(s.try_reserve(now).is_ok());
    }

    #[test]
    fn window_rolls_over_after_reset() {
        let now = Instant::now();
        let mut s = window_state(1, Duration::from_millis(10), now);
        let r = s.try_reserve(now).unwrap();
        s.confirm(r);
        assert!(s.try_reserve(now).is_err());
        let later = now + Duration::from_millis(11);
        assert!(s.try_reserve(later).is_ok());
    }

    #[test]
    fn header_remaining_overrides_local_bookkeeping() {
        let now = Instant::now();
        let mut s = window_state(10, Duration::from_secs(60), now);
        let parsed = ParsedRateLimitHeaders {
            limit: Some(10),
            remaining: Some(0),
            reset_at: None,
            retry_after: None,
        };
        s.apply_headers(&parsed, now, SystemTime::now());
        assert!(s.try_reserve(now).is_err());
    }

    #[test]
    fn retry_after_sets_a_pacing_floor_even_with_remaining_capacity() {
        let now = Instant::now();
        let mut s = window_state(10, Duration::from_secs(60), now);
        let parsed = ParsedRateLimitHeaders {
            limit: None,
            remaining: None,
            reset_at: None,
            retry_after: Some(Duration::from_secs(5)),
        };
        s.apply_headers(&parsed, now, SystemTime::now());
        assert!(s.try_reserve(now).is_err());
        assert!(s.try_reserve(now + Duration::from_secs(5)).is_ok());
    }

    #[test]
    fn token_bucket_refills_over_time() {
        let now = Instant::now();
        let mut s = RateLimitState::new(
            &RateLimiterConfig::builder()
                .strategy(RateLimiterStrategy::TokenBucket)
                .token_capacity(1)
                .token_refill_per_sec(10.0)
                .build(),
            now,
        );
        let r = s.try_reserve(now).unwrap();
        s.confirm(r);
        assert!(s.try_reserve(now).is_err());
        assert!(s.try_reserve(now + Duration::from_millis(150)).is_ok());
    }
}
