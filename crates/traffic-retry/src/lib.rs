//! Retry classification and full-jitter backoff for the dispatcher.
//!
//! This crate holds no mutable state of its own: [`classify`] decides
//! whether a failed call is worth another attempt (and how many total
//! attempts that failure class gets), and [`BackoffConfig`] computes the
//! jittered delay before the next one. The dispatcher owns each request's
//! attempt counter and calls both as needed when deciding whether to
//! requeue.

mod backoff;
mod classify;
mod events;

pub use backoff::{BackoffConfig, BackoffConfigBuilder};
pub use classify::{classify, FailureInfo, RetryClassification, RetryReason};
pub use events::RetryEvent;
