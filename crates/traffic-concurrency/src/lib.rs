//! Three-tier concurrency limiter.
//!
//! Every dispatch is gated by three simultaneous caps: a process-wide
//! global cap, a per-tenant cap, and a per-route cap. All three slots must
//! be free for a request to be admitted; releasing gives all three back
//! together.
//!
//! Unlike a semaphore-based bulkhead, this limiter does not block the
//! caller waiting for a permit — it lives inside the single scheduler task
//! described by the dispatcher, so `try_acquire` is synchronous and
//! non-blocking, and a denial just means "not yet" to the scheduler, which
//! re-tries the request on a later tick.

mod config;
mod error;
mod limiter;

pub use config::{ConcurrencyLimiterConfig, ConcurrencyLimiterConfigBuilder};
pub use error::ConcurrencyError;
pub use limiter::{ConcurrencyLimiter, ConcurrencySnapshot};
