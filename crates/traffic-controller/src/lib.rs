//! Process-wide scheduler mediating calls to upstream LLM endpoints.
//!
//! A [`TrafficController`] accepts [`Request`]s for a `provider::model`
//! route and owns everything needed to schedule them fairly and safely: a
//! priority/tenant-fair queue, a three-tier concurrency limiter, a
//! reservation-based rate limiter driven by response headers, a circuit
//! breaker with fallback chains, and an adaptive cooldown for upstream 429s.
//!
//! All of that state lives inside one task (see [`dispatcher`]); every
//! public method on [`TrafficController`] is a message sent across a
//! channel and is safe to call concurrently from any number of callers.

mod config;
mod controller;
mod dispatcher;
mod events;
mod request;

pub use config::{TrafficControllerConfig, TrafficControllerConfigBuilder};
pub use controller::TrafficController;
pub use dispatcher::TenantUsage;
pub use events::DispatcherEvent;
pub use request::{CancellationToken, CreateFallbackFn, ExecuteFn, Request, RequestBuilder, RouteMetadata};

pub use traffic_core::{Clock, SystemClock, TrafficError, UpstreamFailure, UpstreamResponse};
