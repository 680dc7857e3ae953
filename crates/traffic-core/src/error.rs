//! The terminal error kinds a caller of the traffic controller can observe.
//!
//! Internally, the dispatcher distinguishes "recovered locally" conditions
//! (a request just waits for its turn) from conditions that must be
//! surfaced to the caller. [`TrafficError`] is only ever constructed for
//! the latter; it is the single error type returned through a request's
//! result channel, analogous to how `ResilienceError<E>` gives composed
//! resilience layers one error type instead of one `From` impl per layer.

use std::fmt;
use std::time::Duration;

/// Errors the traffic controller can return to a caller.
///
/// `E` is the application's upstream-call error type (whatever the
/// framework's HTTP/gRPC client returns), preserved unchanged in the
/// [`TrafficError::Upstream`] variant.
#[derive(Debug, Clone)]
pub enum TrafficError<E> {
    /// The request waited in the queue past its deadline without being
    /// dispatched.
    QueueWaitTimeout {
        /// How long the request actually waited before timing out.
        waited: Duration,
    },

    /// The route's circuit breaker was open and no fallback chain entry
    /// could be dispatched either.
    CircuitOpen {
        /// The route key whose circuit rejected the call.
        route_key: String,
        /// When the circuit is expected to allow a half-open probe.
        retry_after_ms: u64,
    },

    /// The upstream's own rate limit rejected or would have rejected the
    /// call, and no reservation could be made before the deadline.
    RateLimited {
        /// Suggested wait before the caller should try again.
        retry_after: Option<Duration>,
    },

    /// The caller cancelled the request (via its cancellation token) before
    /// it was dispatched or while it was in flight.
    Cancelled,

    /// The upstream call was made and returned an application-level error.
    Upstream(E),

    /// An internal invariant was violated. This should never happen in
    /// correct operation; it exists so a bookkeeping bug fails loudly
    /// instead of corrupting scheduler state silently.
    Bug(String),
}

impl<E> fmt::Display for TrafficError<E>
where
    E: fmt::Display,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrafficError::QueueWaitTimeout { waited } => {
                write!(f, "queue wait timed out after {:?}", waited)
            }
            TrafficError::CircuitOpen {
                route_key,
                retry_after_ms,
            } => write!(
                f,
                "circuit open for route '{route_key}', retry after {retry_after_ms}ms"
            ),
            TrafficError::RateLimited { retry_after } => match retry_after {
                Some(d) => write!(f, "rate limited, retry after {:?}", d),
                None => write!(f, "rate limited"),
            },
            TrafficError::Cancelled => write!(f, "request cancelled"),
            TrafficError::Upstream(e) => write!(f, "upstream error: {e}"),
            TrafficError::Bug(msg) => write!(f, "internal invariant violated: {msg}"),
        }
    }
}

impl<E> std::error::Error for TrafficError<E> where E: std::error::Error {}

impl<E> TrafficError<E> {
    /// Returns `true` if the request never reached the upstream.
    pub fn is_locally_rejected(&self) -> bool {
        !matches!(self, TrafficError::Upstream(_))
    }

    /// Returns `true` if this is a circuit-open rejection.
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, TrafficError::CircuitOpen { .. })
    }

    /// Returns `true` if this is a rate-limit rejection.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, TrafficError::RateLimited { .. })
    }

    /// Returns `true` if the caller cancelled the request.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, TrafficError::Cancelled)
    }

    /// Extracts the upstream error, if this is an [`TrafficError::Upstream`].
    pub fn into_upstream(self) -> Option<E> {
        match self {
            TrafficError::Upstream(e) => Some(e),
            _ => None,
        }
    }

    /// Maps the upstream error using a function, leaving every other
    /// variant untouched.
    pub fn map_upstream<F, T>(self, f: F) -> TrafficError<T>
    where
        F: FnOnce(E) -> T,
    {
        match self {
            TrafficError::QueueWaitTimeout { waited } => TrafficError::QueueWaitTimeout { waited },
            TrafficError::CircuitOpen {
                route_key,
                retry_after_ms,
            } => TrafficError::CircuitOpen {
                route_key,
                retry_after_ms,
            },
            TrafficError::RateLimited { retry_after } => TrafficError::RateLimited { retry_after },
            TrafficError::Cancelled => TrafficError::Cancelled,
            TrafficError::Upstream(e) => TrafficError::Upstream(f(e)),
            TrafficError::Bug(msg) => TrafficError::Bug(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone)]
    struct TestError;

    impl fmt::Display for TestError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "test error")
        }
    }

    impl std::error::Error for TestError {}

    const _: () = {
        const fn assert_send_sync_static<T: Send + Sync + 'static>() {}
        assert_send_sync_static::<TrafficError<TestError>>();
    };

    #[test]
    fn display_includes_variant_context() {
        let err: TrafficError<TestError> = TrafficError::CircuitOpen {
            route_key: "openai/gpt-4".into(),
            retry_after_ms: 5_000,
        };
        let msg = err.to_string();
        assert!(msg.contains("openai/gpt-4"));
        assert!(msg.contains("5000"));
    }

    #[test]
    fn map_upstream_only_touches_upstream_variant() {
        let err: TrafficError<String> = TrafficError::Upstream("boom".to_string());
        let mapped = err.map_upstream(|s| s.len());
        assert_eq!(mapped.into_upstream(), Some(4));

        let cancelled: TrafficError<String> = TrafficError::Cancelled;
        let mapped = cancelled.map_upstream(|s| s.len());
        assert!(mapped.is_cancelled());
    }
}
