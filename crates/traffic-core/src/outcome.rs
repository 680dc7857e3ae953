//! Traits the dispatcher uses to read retry- and rate-limit-relevant facts
//! off an application's own response/error types without depending on any
//! particular HTTP client.
//!
//! Implement these for whatever `T`/`E` a caller's `execute` continuation
//! returns so the dispatcher can classify failures and reconcile rate-limit
//! state without needing to know the wire format.

/// Facts the dispatcher needs from a successful upstream call.
pub trait UpstreamResponse {
    /// Rate-limit-relevant response headers, case-insensitive names. Most
    /// responses carry none; the default returns an empty slice.
    fn rate_limit_headers(&self) -> &[(String, String)] {
        &[]
    }
}

/// Facts the dispatcher needs from a failed upstream call, to classify it
/// for retry and to update circuit/adaptive-limiter state.
pub trait UpstreamFailure {
    /// The HTTP-style status code, if this failure carries one.
    fn status(&self) -> Option<u16> {
        None
    }

    /// Whether this failure represents the call not completing within its
    /// deadline.
    fn is_timeout(&self) -> bool {
        false
    }

    /// Rate-limit-relevant response headers observed alongside the failure
    /// (e.g. a 429's `Retry-After`).
    fn rate_limit_headers(&self) -> &[(String, String)] {
        &[]
    }
}
