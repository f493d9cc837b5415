//! Error types for model clients.

use std::time::Duration;

use thiserror::Error;

/// Errors raised while talking to a model provider.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ClientError {
    /// Connection, DNS or socket failure.
    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    /// Failure inside the retry middleware stack.
    #[error("Middleware error: {0}")]
    MiddlewareError(#[from] reqwest_middleware::Error),

    /// Request or response JSON could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// HTTP 401.
    #[error("Authentication error: {0}")]
    AuthenticationError(String),

    /// HTTP 429.
    #[error("Rate limit exceeded: {retry_after:?}")]
    RateLimitError {
        /// Suggested wait, when the provider gave one.
        retry_after: Option<Duration>,
    },

    /// Provider-side failure to produce a reply.
    #[error("Model error: {0}")]
    ModelError(String),

    /// Missing key, bad base URL and similar.
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Provider overloaded or down.
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),
}

impl ClientError {
    /// Whether trying again later might succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::NetworkError(_)
                | Self::MiddlewareError(_)
                | Self::RateLimitError { .. }
                | Self::ServiceUnavailable(_)
        )
    }

    #[must_use]
    pub const fn is_authentication_error(&self) -> bool {
        matches!(self, Self::AuthenticationError(_))
    }

    /// Suggested wait for rate-limit errors.
    #[must_use]
    pub const fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimitError { retry_after } => *retry_after,
            _ => None,
        }
    }
}
