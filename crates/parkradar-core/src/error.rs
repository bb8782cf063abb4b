//! Error types for the ParkRadar sync engine
//!
//! This module defines all error types used throughout the crate.
//!
//! The taxonomy follows the sync pipeline: per-record problems become
//! [`Error::MalformedPayload`] and are counted rather than propagated,
//! per-city problems (auth, rate limits, upstream outages, store
//! transaction failures) are absorbed into the run's per-city detail,
//! and only trigger/query input validation surfaces synchronously.

use thiserror::Error;

use crate::model::City;

/// Result type alias for ParkRadar operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for the sync and query engine
#[derive(Error, Debug)]
pub enum Error {
    /// Authentication against the upstream feed failed
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Upstream feed rejected the request due to rate limiting
    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// Upstream feed is unreachable or kept failing after retries
    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    /// A raw feed payload could not be parsed or failed validation
    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    /// A per-city store transaction failed and was rolled back
    #[error("Reconciliation failed for {city}: {message}")]
    ReconciliationFailed {
        /// The city whose batch was rolled back
        city: City,
        /// Underlying store error
        message: String,
    },

    /// A sync for one of the requested cities is already running
    #[error("Sync already in progress for: {0}")]
    SyncAlreadyInProgress(String),

    /// A city task was cancelled by the overall run deadline
    #[error("Timed out: {0}")]
    Timeout(String),

    /// Store-related errors outside a reconciliation transaction
    #[error("Store error: {0}")]
    Store(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid caller input (unknown city code, out-of-range coordinates)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// HTTP transport errors from the feed client
    #[error("HTTP error: {0}")]
    Http(String),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O errors (file-backed store)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create an authentication error
    pub fn auth(msg: impl Into<String>) -> Self {
        Self::Auth(msg.into())
    }

    /// Create a rate limit error
    pub fn rate_limited(msg: impl Into<String>) -> Self {
        Self::RateLimited(msg.into())
    }

    /// Create an upstream-unavailable error
    pub fn upstream(msg: impl Into<String>) -> Self {
        Self::UpstreamUnavailable(msg.into())
    }

    /// Create a malformed-payload error
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedPayload(msg.into())
    }

    /// Create a reconciliation error for a city
    pub fn reconciliation(city: City, msg: impl Into<String>) -> Self {
        Self::ReconciliationFailed {
            city,
            message: msg.into(),
        }
    }

    /// Create a single-flight rejection listing the busy cities
    pub fn already_in_progress(cities: &[City]) -> Self {
        let list = cities
            .iter()
            .map(|c| c.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        Self::SyncAlreadyInProgress(list)
    }

    /// Create a timeout error
    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    /// Create a store error
    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an invalid input error
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Create an HTTP error
    pub fn http(msg: impl Into<String>) -> Self {
        Self::Http(msg.into())
    }

    /// Whether a retry with backoff is worthwhile for this error
    ///
    /// Rate limits and transport-level failures are transient; everything
    /// else (auth, malformed payloads, store failures) is not.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::RateLimited(_) | Self::UpstreamUnavailable(_) | Self::Http(_)
        )
    }
}

/// Helper for converting anyhow::Error to our Error type
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Other(err.to_string())
    }
}
