//! Per-route circuit breaking for the traffic controller.
//!
//! Each route key gets its own [`circuit::Circuit`], tracked in a
//! [`registry::CircuitBreakerRegistry`] for the lifetime of the process so a
//! burst of upstream errors on one model/provider pair keeps affecting
//! scheduling decisions even after the burst ends. The dispatcher calls
//! [`registry::CircuitBreakerRegistry::try_acquire`] before dispatching a
//! call and reports the outcome back with one of `record_success`,
//! `record_eligible_failure`, or `record_non_eligible_failure`.
//!
//! A call is an eligible failure if it timed out or returned 429 or one of
//! 500/502/503/504; any other failure (e.g. 400/401/403) is non-eligible and
//! clears the route key's accumulated eligible-failure count rather than
//! counting toward it. [`circuit::is_eligible_failure`] makes this
//! classification.
//!
//! ## States
//! - **Closed**: calls pass through normally; `failure_threshold` eligible
//!   failures in a row open the circuit.
//! - **Open**: calls are rejected immediately until the open duration
//!   elapses, then one probe is let through.
//! - **Half-Open**: up to `half_open_max_concurrent` probe calls are allowed
//!   through to test recovery.
//!
//! ## Feature Flags
//! - `metrics`: records call and transition counters via the `metrics` crate.
//! - `tracing`: logs state transitions via the `tracing` crate.

mod circuit;
mod config;
mod error;
mod events;
mod registry;

pub use circuit::{is_eligible_failure, CircuitMetrics, CircuitState};
pub use config::{CircuitBreakerConfig, CircuitBreakerConfigBuilder};
pub use error::CircuitBreakerError;
pub use events::{CallOutcome, CircuitBreakerEvent};
pub use registry::CircuitBreakerRegistry;
