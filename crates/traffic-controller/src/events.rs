//! Events emitted by the dispatcher's scheduler task itself, distinct from
//! the per-component events each gating crate emits on its own.

use std::time::Instant;

use traffic_core::events::ResilienceEvent;

/// Events describing the dispatcher's own lifecycle decisions: what it did
/// with a request, independent of which gate produced that outcome.
#[derive(Debug, Clone)]
pub enum DispatcherEvent {
    /// A request was accepted into the queue.
    Enqueued {
        route_key: String,
        tenant_id: String,
        timestamp: Instant,
    },
    /// A request was admitted and its upstream call started.
    Dispatched {
        route_key: String,
        tenant_id: String,
        timestamp: Instant,
        attempt: usize,
    },
    /// A request's fallback policy switched it to a different route.
    FallbackSwitched {
        from_route_key: String,
        to_route_key: String,
        tenant_id: String,
        timestamp: Instant,
    },
    /// A request was settled (successfully or not) and its result sent to
    /// the caller.
    Settled {
        route_key: String,
        tenant_id: String,
        timestamp: Instant,
        succeeded: bool,
    },
}

impl ResilienceEvent for DispatcherEvent {
    fn event_type(&self) -> &'static str {
        match self {
            DispatcherEvent::Enqueued { .. } => "enqueued",
            DispatcherEvent::Dispatched { .. } => "dispatched",
            DispatcherEvent::FallbackSwitched { .. } => "fallback_switched",
            DispatcherEvent::Settled { .. } => "settled",
        }
    }

    fn timestamp(&self) -> Instant {
        match self {
            DispatcherEvent::Enqueued { timestamp, .. }
            | DispatcherEvent::Dispatched { timestamp, .. }
            | DispatcherEvent::FallbackSwitched { timestamp, .. }
            | DispatcherEvent::Settled { timestamp, .. } => *timestamp,
        }
    }

    fn pattern_name(&self) -> &str {
        match self {
            DispatcherEvent::Enqueued { route_key, .. }
            | DispatcherEvent::Dispatched { route_key, .. }
            | DispatcherEvent::Settled { route_key, .. } => route_key,
            DispatcherEvent::FallbackSwitched { to_route_key, .. } => to_route_key,
        }
    }
}
