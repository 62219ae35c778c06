//! Error types for the enrichment engine
//!
//! Three layers:
//! - [`EnrichError`]: fatal errors at the engine boundary (configuration, cache storage)
//! - [`ProviderError`]: what an adapter reports for a single outbound call
//! - [`FailureReason`]: what a caller finds inside a `Failed` result

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type for the engine
#[derive(Error, Debug)]
pub enum EnrichError {
    /// Configuration-related errors (missing credentials, bad values)
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Provider unreachable or refusing our credentials; aborts the batch
    #[error("API error: {message}")]
    Api { message: String },

    /// Input validation errors
    #[error("Invalid input: {message}")]
    Validation { message: String },

    /// Cache storage errors
    #[error("Cache error: {message}")]
    Cache { message: String },

    /// I/O operation errors
    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },
}

impl EnrichError {
    /// Create a new configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a new API error
    pub fn api<S: Into<String>>(message: S) -> Self {
        Self::Api {
            message: message.into(),
        }
    }

    /// Create a new validation error
    pub fn validation<S: Into<String>>(message: S) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Create a new cache error
    pub fn cache<S: Into<String>>(message: S) -> Self {
        Self::Cache {
            message: message.into(),
        }
    }

    /// Get a user-friendly error message
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            EnrichError::Config { message } => {
                format!("Configuration error: {message}. Please check your config file and API keys.")
            }
            EnrichError::Api { message } => {
                format!(
                    "Unable to use an external service ({message}). Please check the provider URL, your internet connection and your API keys."
                )
            }
            EnrichError::Validation { message } => {
                format!("Invalid input: {message}")
            }
            EnrichError::Cache { .. } => {
                "Cache operation failed. You may need to clear your cache.".to_string()
            }
            EnrichError::Io { .. } => {
                "File operation failed. Please check file permissions.".to_string()
            }
        }
    }
}

/// Outcome of a single failed provider attempt.
///
/// `Throttled`, `Transient` and `EmptyResult` are retried by the rate-limited
/// client; `NoData` and `Rejected` end the item immediately.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// Provider asked us to slow down (HTTP 429)
    #[error("throttled by provider: {0}")]
    Throttled(String),

    /// Timeout, connection failure, 5xx, malformed body
    #[error("transient provider error: {0}")]
    Transient(String),

    /// Well-formed response with an empty result list
    #[error("provider returned an empty result")]
    EmptyResult,

    /// Provider explicitly has nothing for this point
    #[error("provider has no data for this point")]
    NoData,

    /// Request refused for a reason retrying will not fix (4xx)
    #[error("request rejected by provider: {0}")]
    Rejected(String),

    /// Provider cannot be reached or refuses our credentials; no later
    /// request in the batch can succeed either
    #[error("provider unavailable: {0}")]
    Unavailable(String),
}

impl ProviderError {
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ProviderError::Throttled(_) | ProviderError::Transient(_) | ProviderError::EmptyResult
        )
    }

    /// Classify a non-success HTTP status
    #[must_use]
    pub fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        let detail = format!("HTTP {status}: {}", truncate(body, 200));
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            ProviderError::Throttled(detail)
        } else if status == reqwest::StatusCode::UNAUTHORIZED
            || status == reqwest::StatusCode::FORBIDDEN
        {
            ProviderError::Unavailable(detail)
        } else if status.is_server_error() || status == reqwest::StatusCode::REQUEST_TIMEOUT {
            ProviderError::Transient(detail)
        } else {
            ProviderError::Rejected(detail)
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            return ProviderError::from_status(status, "");
        }
        if err.is_connect() {
            return ProviderError::Unavailable(format!("connection failed: {err}"));
        }
        if err.is_decode() {
            return ProviderError::Transient(format!("malformed response body: {err}"));
        }
        ProviderError::Transient(err.to_string())
    }
}

/// Why an item ended up as `Failed`
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum FailureReason {
    #[error("no data")]
    NoData,

    #[error("rejected: {0}")]
    Rejected(String),

    #[error("gave up after {attempts} attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },

    #[error("cancelled")]
    Cancelled,

    #[error("provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl FailureReason {
    /// Permanent failures are safe to remember in the negative cache
    #[must_use]
    pub fn is_negative_cacheable(&self) -> bool {
        matches!(self, FailureReason::NoData)
    }

    /// Fatal reasons abort the whole batch
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, FailureReason::ProviderUnavailable(_))
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}
