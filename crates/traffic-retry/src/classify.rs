//! Retry classification: which upstream failures are worth another attempt.

/// Why a failed call is eligible for a retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryReason {
    /// A 5xx response.
    ServerError,
    /// A 429 response.
    TooManyRequests,
    /// The call did not complete within its deadline.
    Timeout,
}

/// The outcome of classifying a failed call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryClassification {
    pub reason: RetryReason,
    /// Total attempts allowed for this failure class, including the
    /// initial attempt.
    pub max_attempts: usize,
}

/// Information extracted from a failed call, used to decide whether it is
/// retriable. Status is read from whichever of the upstream error's status
/// fields is populated; timeout detection matches any of the conventional
/// timeout signals (an `ETIMEDOUT`/`timeout` code, a `TimeoutError` name, or
/// a message containing "timeout", case-insensitively).
#[derive(Debug, Clone, Default)]
pub struct FailureInfo {
    pub status: Option<u16>,
    pub is_timeout: bool,
}

impl FailureInfo {
    /// Builds a `FailureInfo` from a raw status code.
    pub fn from_status(status: u16) -> Self {
        Self {
            status: Some(status),
            is_timeout: false,
        }
    }

    /// Builds a `FailureInfo` for a timeout, with no HTTP status.
    pub fn timeout() -> Self {
        Self {
            status: None,
            is_timeout: true,
        }
    }

    /// Reports whether `message` reads as a timeout, case-insensitively.
    pub fn message_indicates_timeout(message: &str) -> bool {
        message.to_ascii_lowercase().contains("timeout")
    }
}

/// Classifies a failure, returning `None` if it should propagate to the
/// caller immediately rather than be retried.
///
/// Timeouts get 2 total attempts; 5xx and 429 responses get 3.
pub fn classify(failure: &FailureInfo) -> Option<RetryClassification> {
    if failure.is_timeout {
        return Some(RetryClassification {
            reason: RetryReason::Timeout,
            max_attempts: 2,
        });
    }
    match failure.status {
        Some(429) => Some(RetryClassification {
            reason: RetryReason::TooManyRequests,
            max_attempts: 3,
        }),
        Some(status) if (500..600).contains(&status) => Some(RetryClassification {
            reason: RetryReason::ServerError,
            max_attempts: 3,
        }),
        _ => None,
    }
}
