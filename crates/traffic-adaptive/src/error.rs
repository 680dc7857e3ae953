use std::time::Duration;

use thiserror::Error;

/// Returned when a `(tenant_id, route_key)` pair is in cooldown after
/// repeated upstream 429s.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("tenant/route in 429 cooldown, retry after {retry_after:?}")]
pub struct AdaptiveCooldownError {
    pub retry_after: Duration,
}
