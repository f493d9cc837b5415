//! Anthropic client implementation.
//!
//! # Features
//!
//! - **Messages API**: non-streaming `POST /messages`
//! - **Tool calling**: qualified tool names are encoded for the wire and
//!   decoded on the way back
//! - **Automatic retries**: exponential backoff plus `Retry-After` support
//! - **Secure API keys**: the key lives in a `SecretString`

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use log::{debug, error, warn};
use reqwest_middleware::ClientWithMiddleware;
use reqwest_retry::{RetryTransientMiddleware, policies::ExponentialBackoff};
use reqwest_retry_after::RetryAfterMiddleware;
use secrecy::{ExposeSecret, SecretString};

use switchboard_common::{ModelReply, ModelRequest};

use crate::error::ClientError;
use crate::{ClientConfig, ModelClient};

use super::{ANTHROPIC_VERSION, CreateMessageRequest, DEFAULT_BASE_URL, ErrorResponse, MessageResponse};

/// Client for Anthropic's Messages API.
#[derive(Clone)]
pub struct AnthropicClient {
    client: ClientWithMiddleware,
    api_key: Arc<SecretString>,
    base_url: String,
    config: Arc<ClientConfig>,
}

impl std::fmt::Debug for AnthropicClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnthropicClient")
            .field("api_key", &"[REDACTED]")
            .field("base_url", &self.base_url)
            .field("model", &self.config.model)
            .finish_non_exhaustive()
    }
}

impl AnthropicClient {
    /// Create a new Anthropic client from a configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the API key is missing or HTTP client creation fails.
    pub fn new(config: ClientConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .ok_or_else(|| ClientError::ConfigurationError("API key is required".to_string()))?;
        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
            .trim_end_matches('/')
            .to_string();

        let retry_policy = ExponentialBackoff::builder()
            .retry_bounds(config.retry.initial_delay, config.retry.max_delay)
            .build_with_max_retries(config.retry.max_retries);

        let reqwest_client = match config.timeout_seconds {
            Some(timeout) => reqwest::Client::builder()
                .timeout(Duration::from_secs(timeout))
                .build()?,
            None => reqwest::Client::builder().build()?,
        };

        let client = reqwest_middleware::ClientBuilder::new(reqwest_client)
            .with(RetryAfterMiddleware::new())
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build();

        Ok(Self {
            client,
            api_key: Arc::new(api_key),
            base_url,
            config: Arc::new(config),
        })
    }

    async fn make_request(&self, body: &CreateMessageRequest) -> Result<MessageResponse, ClientError> {
        let url = format!("{}/messages", self.base_url);

        reqwest::Url::parse(&url)
            .map_err(|e| ClientError::ConfigurationError(format!("Invalid URL '{url}': {e}")))?;

        let response = self
            .client
            .post(&url)
            .header("x-api-key", self.api_key.expose_secret())
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("Content-Type", "application/json")
            .body(serde_json::to_string(body)?)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.parse::<u64>().ok())
                .map(Duration::from_secs);
            let error_text = response.text().await.map_err(|e| {
                warn!("Failed to read error response body: {e}");
                ClientError::NetworkError(e)
            })?;

            let error_message = match serde_json::from_str::<ErrorResponse>(&error_text) {
                Ok(parsed) => {
                    debug!("Parsed structured error response: {:?}", parsed.error);
                    parsed.error.message
                }
                Err(parse_err) => {
                    debug!("Failed to parse error response as JSON: {parse_err}. Using raw text instead.");
                    error_text
                }
            };

            error!("API request failed with status {}: {error_message}", status.as_u16());

            return Err(match status.as_u16() {
                401 => ClientError::AuthenticationError(error_message),
                429 => ClientError::RateLimitError { retry_after },
                // Anthropic-specific overload
                529 => ClientError::ServiceUnavailable(error_message),
                code if code >= 500 => ClientError::ServiceUnavailable(error_message),
                _ => ClientError::ModelError(error_message),
            });
        }

        let response_text = response.text().await?;
        debug!(
            "Raw API response: {}",
            &response_text.chars().take(500).collect::<String>()
        );

        serde_json::from_str(&response_text)
            .map_err(|e| ClientError::InvalidResponse(format!("Unexpected response body: {e}")))
    }
}

#[async_trait]
impl ModelClient for AnthropicClient {
    fn config(&self) -> &ClientConfig {
        &self.config
    }

    async fn complete(&self, request: &ModelRequest) -> Result<ModelReply> {
        self.validate_request(request)?;

        let body = CreateMessageRequest::from((request, self.config.as_ref()));
        debug!(
            "Sending {} messages with {} tools to {}",
            body.messages.len(),
            request.tools.len(),
            body.model
        );
        let response = self.make_request(&body).await?;
        Ok(ModelReply::from(response))
    }
}
