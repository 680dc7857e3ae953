use std::time::Duration;

use thiserror::Error;

/// Errors returned when attempting to pass a call through a route's circuit.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CircuitBreakerError {
    /// The circuit for `route_key` is open; the call was not attempted.
    #[error("circuit open for route {route_key}, retry after {retry_after:?}")]
    Open {
        route_key: String,
        retry_after: Duration,
    },
}

impl CircuitBreakerError {
    /// The route key whose circuit rejected the call.
    pub fn route_key(&self) -> &str {
        match self {
            CircuitBreakerError::Open { route_key, .. } => route_key,
        }
    }

    /// How long the caller should wait before retrying.
    pub fn retry_after(&self) -> Duration {
        match self {
            CircuitBreakerError::Open { retry_after, .. } => *retry_after,
        }
    }
}
