//! Adaptive back-pressure driven by externally observed 429s.
//!
//! Unlike the other gating components, this limiter is never consulted by
//! `execute` outcomes directly: the dispatcher reports a 429 via
//! [`AdaptiveLimiter::report_429`] only when the upstream explicitly says so
//! (a 429 status, or a caller-reported `RateLimitedUpstreamError`), and a
//! cooldown applies per `(tenant_id, route_key)` pair so one tenant's burst
//! of 429s never throttles a different tenant sharing the same route.

mod config;
mod error;
mod limiter;

pub use config::{AdaptiveLimiterConfig, AdaptiveLimiterConfigBuilder};
pub use error::AdaptiveCooldownError;
pub use limiter::AdaptiveLimiter;
