use std::fmt;
use std::time::Duration;

/// Errors that can occur when reserving a rate-limit slot.
#[derive(Debug, Clone, PartialEq)]
pub enum RateLimiterError {
    /// No slot is currently available. Carries when the caller should try
    /// again.
    Exhausted {
        /// Suggested wait before retrying.
        retry_after: Duration,
    },
}

impl fmt::Display for RateLimiterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RateLimiterError::Exhausted { retry_after } => {
                write!(f, "rate limit exhausted, retry after {:?}", retry_after)
            }
        }
    }
}

impl std::error::Error for RateLimiterError {}
