//! Error types for pubsync
//!
//! This module provides the error taxonomy used across the pipeline:
//! - Session failures that pause the whole pipeline
//! - Per-account failures (access restrictions, exhausted fetches) that skip one account
//! - Transient failures (timeouts, connection resets, parse errors) that are retried
//! - Round-level failures (account listing, storage unavailable) counted toward auto-pause

use crate::types::AccountId;
use thiserror::Error;

/// Result type alias for pubsync operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for pubsync
///
/// This is the primary error type used throughout the library. Each variant includes
/// contextual information to help diagnose issues.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "download.concurrency")
        key: Option<String>,
    },

    /// The remote platform rejected the session credentials
    ///
    /// Fatal for the whole round: the pipeline pauses until an operator
    /// re-authenticates and resumes.
    #[error("session expired")]
    SessionExpired,

    /// Public pagination is blocked for this account
    ///
    /// The account has been flagged as not searchable; the next attempt must
    /// go through the privileged fetch path.
    #[error("access restricted for account {account_id}")]
    AccessRestricted {
        /// The account whose public listing was refused
        account_id: AccountId,
    },

    /// Remote fetch failed
    #[error("fetch error: {0}")]
    Fetch(#[from] FetchError),

    /// An external call exceeded its deadline
    #[error("operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// Database operation failed
    #[error("database error: {0}")]
    Database(#[from] DatabaseError),

    /// SQLx database error
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Network error
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Export destination has not been attached
    #[error("no export destination attached")]
    NoDestination,

    /// Record not found
    #[error("not found: {0}")]
    NotFound(String),

    /// Other error
    #[error("{0}")]
    Other(String),
}

/// Database-related errors
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Failed to connect to database
    #[error("failed to connect to database: {0}")]
    ConnectionFailed(String),

    /// Failed to run migrations
    #[error("failed to run migrations: {0}")]
    MigrationFailed(String),

    /// Query failed
    #[error("query failed: {0}")]
    QueryFailed(String),
}

/// Errors reported while talking to the remote platform
#[derive(Debug, Error)]
pub enum FetchError {
    /// The remote answered with an application-level error code
    #[error("remote error {code}: {message}")]
    Remote {
        /// Platform error code
        code: i64,
        /// Platform error message
        message: String,
    },

    /// HTTP status outside the success range
    #[error("unexpected HTTP status {status}")]
    Http {
        /// The HTTP status code
        status: u16,
    },

    /// Response body could not be interpreted
    #[error("failed to parse response: {0}")]
    Parse(String),
}

/// How far up the pipeline an error has to travel
///
/// Mirrors the operator-facing escalation policy: session problems pause the
/// pipeline, account problems skip one account, transient problems are retried
/// where a retry loop exists (payload downloads) and otherwise skip the account,
/// and round problems abort the round and count toward the error threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Credentials are invalid; pause and wait for the operator
    Session,
    /// Skip the current account for this round
    Account,
    /// Retry with backoff where possible, otherwise skip the account
    Transient,
    /// Abort the round and count it against the error threshold
    Round,
}

impl Error {
    /// Classify this error according to the escalation policy
    pub fn severity(&self) -> Severity {
        match self {
            Error::SessionExpired => Severity::Session,
            Error::AccessRestricted { .. } | Error::NotFound(_) => Severity::Account,
            Error::Timeout(_) | Error::Network(_) => Severity::Transient,
            Error::Fetch(FetchError::Parse(_)) => Severity::Transient,
            Error::Fetch(FetchError::Http { status }) if *status >= 500 || *status == 429 => {
                Severity::Transient
            }
            Error::Fetch(_) => Severity::Account,
            Error::Io(e) if crate::retry::is_transient_io(e.kind()) => Severity::Transient,
            Error::Database(_)
            | Error::Sqlx(_)
            | Error::Io(_)
            | Error::Serialization(_)
            | Error::Config { .. }
            | Error::NoDestination
            | Error::Other(_) => Severity::Round,
        }
    }

    /// Shorthand for `severity() == Severity::Session`
    pub fn is_session_expired(&self) -> bool {
        self.severity() == Severity::Session
    }

    /// Create a configuration error for a specific key
    pub fn config(key: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
            key: Some(key.into()),
        }
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn session_expired_is_session_severity() {
        assert_eq!(Error::SessionExpired.severity(), Severity::Session);
        assert!(Error::SessionExpired.is_session_expired());
    }

    #[test]
    fn access_restricted_skips_account() {
        let err = Error::AccessRestricted {
            account_id: AccountId::from("acct"),
        };
        assert_eq!(err.severity(), Severity::Account);
        assert_eq!(err.to_string(), "access restricted for account acct");
    }

    #[test]
    fn timeouts_and_parse_failures_are_transient() {
        assert_eq!(
            Error::Timeout(Duration::from_secs(1)).severity(),
            Severity::Transient
        );
        assert_eq!(
            Error::Fetch(FetchError::Parse("bad json".into())).severity(),
            Severity::Transient
        );
    }

    #[test]
    fn http_status_classification() {
        let busy = Error::Fetch(FetchError::Http { status: 503 });
        let throttled = Error::Fetch(FetchError::Http { status: 429 });
        let forbidden = Error::Fetch(FetchError::Http { status: 403 });

        assert_eq!(busy.severity(), Severity::Transient);
        assert_eq!(throttled.severity(), Severity::Transient);
        assert_eq!(forbidden.severity(), Severity::Account);
    }

    #[test]
    fn storage_failures_are_round_level() {
        let err = Error::Database(DatabaseError::QueryFailed("locked".into()));
        assert_eq!(err.severity(), Severity::Round);
    }

    #[test]
    fn config_helper_records_key() {
        match Error::config("download.concurrency", "must be positive") {
            Error::Config { key, message } => {
                assert_eq!(key.as_deref(), Some("download.concurrency"));
                assert_eq!(message, "must be positive");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
