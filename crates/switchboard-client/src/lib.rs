//! # switchboard-client
//!
//! The model provider boundary.
//!
//! The orchestrator talks to a language model through the [`ModelClient`]
//! trait: one [`ModelRequest`] in, one [`ModelReply`] out. Wire formats,
//! authentication and transient-failure retries stay behind the trait.
//! Currently ships:
//! - [`AnthropicClient`] for the Anthropic Messages API
//!
//! ## Example
//!
//! ```no_run
//! use switchboard_client::{AnthropicClient, ClientConfig, ModelClient};
//! use switchboard_common::{HistoryItem, ModelRequest, Role};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = ClientConfig::new("claude-3-sonnet-20240229").with_api_key("sk-ant-...");
//! let client = AnthropicClient::new(config)?;
//!
//! let request = ModelRequest::builder()
//!     .system("You are terse.")
//!     .messages(vec![HistoryItem::new(Role::User, "Hello!")])
//!     .build();
//! let reply = client.complete(&request).await?;
//! println!("{}", reply.first_text().unwrap_or_default());
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use secrecy::SecretString;

use switchboard_common::{ModelReply, ModelRequest};

pub mod anthropic;
pub mod error;

pub use anthropic::AnthropicClient;
pub use error::ClientError;

/// Model used when the configuration names none.
pub const DEFAULT_MODEL: &str = "claude-3-sonnet-20240229";

/// Generation limit used when neither request nor configuration sets one.
pub const DEFAULT_MAX_TOKENS: u32 = 1024;

/// Exponential backoff settings for transient failures.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Cap on any single delay.
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(1000),
            max_delay: Duration::from_secs(30),
        }
    }
}

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Default model identifier.
    pub model: String,
    /// API key.
    pub api_key: Option<SecretString>,
    /// Override for the provider's base URL.
    pub base_url: Option<String>,
    /// Default generation limit.
    pub max_tokens: u32,
    /// Total request timeout in seconds.
    pub timeout_seconds: Option<u64>,
    /// Retry behaviour.
    pub retry: RetryConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new(DEFAULT_MODEL)
    }
}

impl ClientConfig {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            api_key: None,
            base_url: None,
            max_tokens: DEFAULT_MAX_TOKENS,
            timeout_seconds: None,
            retry: RetryConfig::default(),
        }
    }

    #[must_use]
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(SecretString::from(api_key.into()));
        self
    }

    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    #[must_use]
    pub const fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    #[must_use]
    pub const fn with_timeout_seconds(mut self, timeout_seconds: u64) -> Self {
        self.timeout_seconds = Some(timeout_seconds);
        self
    }

    #[must_use]
    pub const fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }
}

/// A language model the orchestrator can consult.
#[must_use = "ModelClient must be used to make requests"]
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Configuration the client was built with.
    fn config(&self) -> &ClientConfig;

    /// Sends one request and waits for the whole reply.
    ///
    /// # Errors
    ///
    /// Returns an error if the request is invalid, the transport fails after
    /// retries, or the provider answers with an error. Errors downcast to
    /// [`ClientError`].
    async fn complete(&self, request: &ModelRequest) -> Result<ModelReply>;

    /// Rejects requests no provider would accept.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::InvalidRequest`] when there is no history.
    fn validate_request(&self, request: &ModelRequest) -> Result<()> {
        if request.messages.is_empty() {
            return Err(
                ClientError::InvalidRequest("Request must contain at least one message".to_string())
                    .into(),
            );
        }
        Ok(())
    }
}
