//! Error types for the concurrency limiter.

/// Which tier rejected a `try_acquire` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ConcurrencyError {
    /// The process-wide cap is saturated.
    #[error("global concurrency limit ({limit}) reached")]
    GlobalFull {
        /// The configured global cap.
        limit: usize,
    },
    /// The tenant's cap is saturated.
    #[error("tenant concurrency limit ({limit}) reached")]
    TenantFull {
        /// The configured per-tenant cap.
        limit: usize,
    },
    /// The route's cap is saturated.
    #[error("route concurrency limit ({limit}) reached")]
    RouteFull {
        /// The configured per-route cap.
        limit: usize,
    },
}

/// Result type for concurrency-limiter operations.
pub type Result<T> = std::result::Result<T, ConcurrencyError>;
