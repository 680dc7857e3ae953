//! Fallback chain and fallback policy resolution for circuit-open routes.
//!
//! When a route key's circuit is open, the dispatcher consults a
//! [`FallbackPolicyTable`] to decide whether to switch targets, wait for the
//! circuit to probe again, or reject outright, and a [`FallbackChains`]
//! table to find the next eligible target. Neither table executes a call or
//! owns any mutable state beyond its listeners; walking the chain against
//! live circuit state is the dispatcher's job, done through
//! [`select_fallback_target`].

mod config;
mod events;

pub use config::{FallbackChains, FallbackChainsBuilder, FallbackPolicyTable, FallbackPolicyTableBuilder, PolicyMode};
pub use events::FallbackEvent;

/// Walks `chain` in order and returns the first target for which
/// `is_open` returns `false`.
///
/// `is_open(target)` should consult the same circuit breaker registry the
/// dispatcher uses to gate calls, so a target whose own circuit is open is
/// skipped rather than dispatched into and immediately rejected.
pub fn select_fallback_target<'a>(
    chain: &'a [String],
    mut is_open: impl FnMut(&str) -> bool,
) -> Option<&'a str> {
    chain.iter().map(String::as_str).find(|target| !is_open(target))
}
