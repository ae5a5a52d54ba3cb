//! Failure classification: raw call failure → semantic [`ErrorKind`].
//!
//! The dispatcher never looks at HTTP codes or error strings directly. It only
//! sees the kinds produced here, so this module is the single place that
//! decides what a failure *means*.
//!
//! ## Precedence
//!
//! First match wins:
//!
//! 1. transport timeout → [`ErrorKind::Timeout`]
//! 2. connection failure → [`ErrorKind::NetworkError`]
//! 3. HTTP status: 401/403 → `AuthError`, 429 → `RateLimited`, ≥500 → `ServerError`
//! 4. message mentions concurrency/quota → `ConcurrencyPressure`
//! 5. anything else → `Unknown`
//!
//! A 429 whose body says "quota exceeded" is still `RateLimited`: rate limits
//! and concurrency pressure get different backoff in the describer even though
//! the dispatcher groups them for its degradation decision.

use crate::error::CallFailure;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Semantic outcome of one image description attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Success,
    /// Credential rejected (401/403). Never retried.
    AuthError,
    /// HTTP 429.
    RateLimited,
    /// Error text mentions concurrency, throttling or quota.
    ConcurrencyPressure,
    /// HTTP 5xx.
    ServerError,
    Timeout,
    NetworkError,
    Unknown,
}

impl ErrorKind {
    /// Stable lowercase name, matching the serde representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Success => "success",
            ErrorKind::AuthError => "auth_error",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::ConcurrencyPressure => "concurrency_pressure",
            ErrorKind::ServerError => "server_error",
            ErrorKind::Timeout => "timeout",
            ErrorKind::NetworkError => "network_error",
            ErrorKind::Unknown => "unknown",
        }
    }

    /// Rate limiting and concurrency pressure both mean "send less at once".
    pub fn is_pressure(&self) -> bool {
        matches!(self, ErrorKind::RateLimited | ErrorKind::ConcurrencyPressure)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lowercase substrings that mark a concurrency/quota complaint.
const PRESSURE_KEYWORDS: [&str; 5] = ["concurrent", "rate limit", "too many", "throttl", "quota"];

/// Map a failed call to its [`ErrorKind`]. Pure and deterministic.
pub fn classify(failure: &CallFailure) -> ErrorKind {
    match failure {
        CallFailure::Timeout(_) => return ErrorKind::Timeout,
        CallFailure::Connect(_) => return ErrorKind::NetworkError,
        _ => {}
    }

    if let Some(status) = failure.status() {
        match status {
            401 | 403 => return ErrorKind::AuthError,
            429 => return ErrorKind::RateLimited,
            s if s >= 500 => return ErrorKind::ServerError,
            _ => {}
        }
    }

    let message = failure.to_string().to_lowercase();
    if PRESSURE_KEYWORDS.iter().any(|kw| message.contains(kw)) {
        return ErrorKind::ConcurrencyPressure;
    }

    ErrorKind::Unknown
}
