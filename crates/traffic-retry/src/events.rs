use std::time::{Duration, Instant};

use traffic_core::events::ResilienceEvent;

/// Events emitted while the dispatcher retries a request.
#[derive(Debug, Clone)]
pub enum RetryEvent {
    /// A retry attempt is about to be scheduled.
    Scheduled {
        route_key: String,
        timestamp: Instant,
        attempt: usize,
        delay: Duration,
    },
    /// The request eventually succeeded, possibly after retries.
    Success {
        route_key: String,
        timestamp: Instant,
        attempts: usize,
    },
    /// All retry attempts were exhausted without success.
    Exhausted {
        route_key: String,
        timestamp: Instant,
        attempts: usize,
    },
}

impl ResilienceEvent for RetryEvent {
    fn event_type(&self) -> &'static str {
        match self {
            RetryEvent::Scheduled { .. } => "scheduled",
            RetryEvent::Success { .. } => "success",
            RetryEvent::Exhausted { .. } => "exhausted",
        }
    }

    fn timestamp(&self) -> Instant {
        match self {
            RetryEvent::Scheduled { timestamp, .. }
            | RetryEvent::Success { timestamp, .. }
            | RetryEvent::Exhausted { timestamp, .. } => *timestamp,
        }
    }

    fn pattern_name(&self) -> &str {
        match self {
            RetryEvent::Scheduled { route_key, .. }
            | RetryEvent::Success { route_key, .. }
            | RetryEvent::Exhausted { route_key, .. } => route_key,
        }
    }
}
