//! Core infrastructure shared by every traffic-controller crate.
//!
//! - Event system for observability (`events`)
//! - Unified error taxonomy for caller-facing results (`error`)
//! - Monotonic clock abstraction used for every wait/deadline/window
//!   comparison in the controller (`clock`)
//! - Traits an application implements on its own response/error types so
//!   the dispatcher can classify failures and read rate-limit headers
//!   without depending on a specific HTTP client (`outcome`)

pub mod clock;
pub mod error;
pub mod events;
pub mod outcome;

pub use clock::{Clock, SystemClock};
pub use error::TrafficError;
pub use events::{EventListener, ResilienceEvent};
pub use outcome::{UpstreamFailure, UpstreamResponse};
