//! Retry logic with exponential backoff
//!
//! Classifies errors as retryable and computes exponential backoff delays
//! for the payload workers. Optional jitter keeps parallel workers hitting
//! the same throttled upstream from retrying in lockstep.

use crate::config::RetryConfig;
use crate::error::{Error, FetchError};
use rand::Rng;
use std::time::Duration;

/// Trait for errors that can be classified as retryable or not
///
/// Transient failures (network timeouts, server busy, connection reset) should return `true`.
/// Permanent failures (session expired, access restricted, storage errors) should return `false`.
pub trait IsRetryable {
    /// Returns true if the error is transient and the operation should be retried
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for Error {
    fn is_retryable(&self) -> bool {
        match self {
            Error::Network(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            Error::Io(e) => is_transient_io(e.kind()),
            Error::Timeout(_) => true,
            Error::Fetch(FetchError::Parse(_)) => true,
            Error::Fetch(FetchError::Http { status }) => *status >= 500 || *status == 429,
            // Remote application errors are answered deterministically
            Error::Fetch(FetchError::Remote { .. }) => false,
            // Re-authentication is a human action
            Error::SessionExpired => false,
            // Retried through the privileged path on the next attempt, not in place
            Error::AccessRestricted { .. } => false,
            Error::Database(_) | Error::Sqlx(_) => false,
            Error::Config { .. } => false,
            Error::Serialization(_) => false,
            Error::NoDestination => false,
            Error::NotFound(_) => false,
            Error::Other(_) => false,
        }
    }
}

/// I/O error kinds that are worth retrying
pub(crate) fn is_transient_io(kind: std::io::ErrorKind) -> bool {
    matches!(
        kind,
        std::io::ErrorKind::TimedOut
            | std::io::ErrorKind::ConnectionRefused
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::NotConnected
            | std::io::ErrorKind::BrokenPipe
            | std::io::ErrorKind::Interrupted
    )
}

/// Delay to wait before retry number `attempt + 1`
///
/// `attempt` is zero-based: the delay before the first retry is
/// `initial_delay`, each following one is multiplied by `backoff_multiplier`
/// and capped at `max_delay`. Jitter, when enabled, is applied after capping.
pub fn backoff_delay(config: &RetryConfig, attempt: u32) -> Duration {
    let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
    let secs = config.initial_delay.as_secs_f64() * config.backoff_multiplier.powi(exponent);
    let capped = if secs.is_finite() {
        Duration::from_secs_f64(secs).min(config.max_delay)
    } else {
        config.max_delay
    };

    if config.jitter {
        add_jitter(capped)
    } else {
        capped
    }
}

/// Add random jitter to a delay to prevent thundering herd
///
/// Jitter is uniformly distributed between 0% and 100% of the delay.
/// This means the actual delay will be between `delay` and `2 * delay`.
fn add_jitter(delay: Duration) -> Duration {
    let mut rng = rand::thread_rng();
    let jitter_factor: f64 = rng.gen_range(0.0..=1.0);
    let jittered_secs = delay.as_secs_f64() * (1.0 + jitter_factor);
    Duration::from_secs_f64(jittered_secs)
}
