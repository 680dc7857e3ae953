//! Centralized parsing of upstream rate-limit headers.
//!
//! Every header this module reads has more than one wire representation in
//! the wild (seconds, millisecond-suffixed durations, HTTP dates, absolute
//! epoch seconds). Parsing lives in one place with one explicit failure
//! mode — malformed values are reported, never silently coerced to a
//! default — so callers can decide whether to log and ignore, or escalate.

use std::time::{Duration, SystemTime};

use chrono::{DateTime, Utc};

/// The rate-limit facts extracted from a response's headers. Any field the
/// upstream didn't send, or sent in a form we couldn't parse, is `None`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedRateLimitHeaders {
    /// `X-RateLimit-Limit-Requests`.
    pub limit: Option<u32>,
    /// `X-RateLimit-Remaining-Requests`.
    pub remaining: Option<u32>,
    /// `X-RateLimit-Reset-Requests`, normalized to a wall-clock instant.
    pub reset_at: Option<SystemTime>,
    /// `Retry-After`, normalized to a duration from now.
    pub retry_after: Option<Duration>,
}

/// A single malformed header, reported rather than silently dropped.
#[derive(Debug, Clone, PartialEq)]
pub struct HeaderParseError {
    /// The header name that failed to parse.
    pub header: &'static str,
    /// The raw value that could not be interpreted.
    pub raw_value: String,
}

/// Parses the subset of headers this controller understands out of an
/// arbitrary case-insensitive header lookup.
///
/// `now` is injected so tests can drive reset/retry math deterministically;
/// production callers pass [`SystemTime::now`].
pub fn parse_rate_limit_headers<'a>(
    headers: impl Fn(&str) -> Option<&'a str>,
    now: SystemTime,
) -> (ParsedRateLimitHeaders, Vec<HeaderParseError>) {
    let mut parsed = ParsedRateLimitHeaders::default();
    let mut errors = Vec::new();

    if let Some(raw) = headers("x-ratelimit-limit-requests") {
        match raw.trim().parse::<u32>() {
            Ok(v) => parsed.limit = Some(v),
            Err(_) => errors.push(HeaderParseError {
                header: "x-ratelimit-limit-requests",
                raw_value: raw.to_string(),
            }),
        }
    }

    if let Some(raw) = headers("x-ratelimit-remaining-requests") {
        match raw.trim().parse::<u32>() {
            Ok(v) => parsed.remaining = Some(v),
            Err(_) => errors.push(HeaderParseError {
                header: "x-ratelimit-remaining-requests",
                raw_value: raw.to_string(),
            }),
        }
    }

    if let Some(raw) = headers("x-ratelimit-reset-requests") {
        match parse_reset(raw, now) {
            Some(v) => parsed.reset_at = Some(v),
            None => errors.push(HeaderParseError {
                header: "x-ratelimit-reset-requests",
                raw_value: raw.to_string(),
            }),
        }
    }

    if let Some(raw) = headers("retry-after") {
        match parse_retry_after(raw, now) {
            Some(v) => parsed.retry_after = Some(v),
            None => errors.push(HeaderParseError {
                header: "retry-after",
                raw_value: raw.to_string(),
            }),
        }
    }

    (parsed, errors)
}

/// `X-RateLimit-Reset-Requests` accepts a bare integer (seconds from now),
/// an explicit `"<n>ms"`/`"<n>s"` suffix, or — heuristically, for values
/// implausible as a short relative offset — an absolute Unix epoch in
/// seconds.
fn parse_reset(raw: &str, now: SystemTime) -> Option<SystemTime> {
    let raw = raw.trim();
    if let Some(ms) = raw.strip_suffix("ms") {
        let ms: u64 = ms.trim().parse().ok()?;
        return Some(now + Duration::from_millis(ms));
    }
    if let Some(s) = raw.strip_suffix('s') {
        let s: f64 = s.trim().parse().ok()?;
        return Some(now + Duration::from_secs_f64(s.max(0.0)));
    }
    let n: u64 = raw.parse().ok()?;
    // 10 years of seconds: anything bigger is almost certainly an absolute
    // epoch, not a relative offset.
    const TEN_YEARS_SECS: u64 = 10 * 365 * 24 * 3600;
    if n > TEN_YEARS_SECS {
        Some(SystemTime::UNIX_EPOCH + Duration::from_secs(n))
    } else {
        Some(now + Duration::from_secs(n))
    }
}

/// `Retry-After` per RFC 9110: either an integer number of seconds or an
/// HTTP-date (RFC 2822 format).
fn parse_retry_after(raw: &str, now: SystemTime) -> Option<Duration> {
    let raw = raw.trim();
    if let Ok(secs) = raw.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    let date = DateTime::parse_from_rfc2822(raw).ok()?;
    let date: DateTime<Utc> = date.with_timezone(&Utc);
    let target = SystemTime::UNIX_EPOCH + Duration::from_secs(date.timestamp().max(0) as u64);
    Some(target.duration_since(now).unwrap_or(Duration::ZERO))
}
