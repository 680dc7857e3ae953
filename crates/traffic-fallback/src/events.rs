//! Events emitted while resolving a fallback chain or policy.

use std::time::Instant;

use traffic_core::ResilienceEvent;

/// Events emitted by [`crate::FallbackChains`] and [`crate::FallbackPolicyTable`].
#[derive(Debug, Clone)]
pub enum FallbackEvent {
    /// A target was selected from a route key's fallback chain.
    TargetSelected {
        route_key: String,
        timestamp: Instant,
        target: String,
    },
    /// Every target in the chain was either exhausted or had an open
    /// circuit; no fallback is available.
    ChainExhausted {
        route_key: String,
        timestamp: Instant,
    },
    /// A policy mode was resolved for a request on this route key.
    PolicyResolved {
        route_key: String,
        timestamp: Instant,
        policy_id: Option<String>,
        mode: crate::PolicyMode,
    },
}

impl ResilienceEvent for FallbackEvent {
    fn event_type(&self) -> &'static str {
        match self {
            FallbackEvent::TargetSelected { .. } => "target_selected",
            FallbackEvent::ChainExhausted { .. } => "chain_exhausted",
            FallbackEvent::PolicyResolved { .. } => "policy_resolved",
        }
    }

    fn timestamp(&self) -> Instant {
        match self {
            FallbackEvent::TargetSelected { timestamp, .. }
            | FallbackEvent::ChainExhausted { timestamp, .. }
            | FallbackEvent::PolicyResolved { timestamp, .. } => *timestamp,
        }
    }

    fn pattern_name(&self) -> &str {
        match self {
            FallbackEvent::TargetSelected { route_key, .. }
            | FallbackEvent::ChainExhausted { route_key, .. }
            | FallbackEvent::PolicyResolved { route_key, .. } => route_key,
        }
    }
}
