//! Error types for tool resolution and execution.

use thiserror::Error;

/// Errors raised by the registry, providers and the HTTP adapter.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ToolError {
    /// The provider key of a qualified name is not registered.
    #[error("Provider not found: '{0}'")]
    ProviderNotFound(String),

    /// The provider exists but does not expose the tool.
    #[error("Tool '{tool}' not found on provider '{provider}'")]
    ToolNotFound {
        /// Provider key.
        provider: String,
        /// Tool name within the provider.
        tool: String,
    },

    /// Arguments failed validation; one entry per violated field.
    #[error("Validation failed: {}", .0.join(" "))]
    ValidationFailed(Vec<String>),

    /// The HTTP call failed or returned a non-success status.
    #[error("{message}")]
    TransportFailure {
        /// HTTP status, when a response was received.
        status: Option<u16>,
        /// Description including the response body when there is one.
        message: String,
        /// Underlying client error.
        #[source]
        source: Option<reqwest::Error>,
    },

    /// The remote API answered with an embedded error flag.
    #[error("Remote error: {0}")]
    RemoteError(String),

    /// A tool definition or provider setting is unusable.
    #[error("Invalid tool configuration: {0}")]
    InvalidConfig(String),

    /// A provider key was registered twice.
    #[error("Provider '{0}' is already registered")]
    DuplicateProvider(String),

    /// A provider key contains a reserved sequence.
    #[error("Invalid provider key '{0}': keys must be non-empty and contain neither '.' nor '__'")]
    InvalidProviderKey(String),

    /// Filesystem error while loading definitions.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Error raised by a custom tool implementation.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ToolError {
    /// Builds a transport failure for a non-success HTTP status.
    #[must_use]
    pub fn http_status(status: u16, body: &str) -> Self {
        Self::TransportFailure {
            status: Some(status),
            message: format!("HTTP {status}: {body}"),
            source: None,
        }
    }

    /// Short name of the error variant.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::ProviderNotFound(_) => "ProviderNotFound",
            Self::ToolNotFound { .. } => "ToolNotFound",
            Self::ValidationFailed(_) => "ValidationFailed",
            Self::TransportFailure { .. } => "TransportFailure",
            Self::RemoteError(_) => "RemoteError",
            Self::InvalidConfig(_) => "InvalidConfig",
            Self::DuplicateProvider(_) => "DuplicateProvider",
            Self::InvalidProviderKey(_) => "InvalidProviderKey",
            Self::Io(_) => "Io",
            Self::Other(_) => "Other",
        }
    }

    /// HTTP status attached to the error, if any.
    #[must_use]
    pub const fn status_code(&self) -> Option<u16> {
        match self {
            Self::TransportFailure { status, .. } => *status,
            _ => None,
        }
    }

    /// This error followed by every source, outermost first.
    #[must_use]
    pub fn chain(&self) -> Vec<String> {
        std::iter::successors(Some(self as &dyn std::error::Error), |err| err.source())
            .map(ToString::to_string)
            .collect()
    }
}

impl From<reqwest::Error> for ToolError {
    fn from(err: reqwest::Error) -> Self {
        Self::TransportFailure {
            status: err.status().map(|status| status.as_u16()),
            message: format!("Request failed: {err}"),
            source: Some(err),
        }
    }
}
