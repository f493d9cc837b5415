//! HTTP client shared by the tools of one provider.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Method, Request, Response};
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use url::Url;

use crate::ToolError;

/// Default connection timeout (30 seconds).
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default total request timeout (60 seconds).
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Settings for an [`ApiClient`].
#[derive(Clone, Default)]
pub struct ApiClientConfig {
    /// Base URL relative endpoints are resolved against.
    pub base_url: Option<String>,
    /// Headers sent with every request.
    pub headers: BTreeMap<String, String>,
    /// Optional bearer token.
    pub bearer_token: Option<SecretString>,
    /// Connection timeout (defaults to 30 seconds).
    pub connect_timeout: Option<Duration>,
    /// Total request timeout (defaults to 60 seconds).
    pub timeout: Option<Duration>,
}

impl fmt::Debug for ApiClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiClientConfig")
            .field("base_url", &self.base_url)
            .field("headers", &self.headers.keys().collect::<Vec<_>>())
            .field("bearer_token", &self.bearer_token.as_ref().map(|_| "[REDACTED]"))
            .field("connect_timeout", &self.connect_timeout)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Cheaply cloneable HTTP client with a base URL and default headers.
#[derive(Clone)]
pub struct ApiClient {
    inner: Client,
    base_url: Option<Url>,
    config: Arc<ApiClientConfig>,
}

impl fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiClient")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ApiClient {
    /// Creates a client.
    ///
    /// # Errors
    ///
    /// Returns an error if the base URL is malformed or the underlying
    /// client fails to build.
    pub fn new(config: ApiClientConfig) -> Result<Self, ToolError> {
        let base_url = config
            .base_url
            .as_deref()
            .map(|raw| {
                // Url::join drops the last segment unless the base ends in '/'
                let normalized = if raw.ends_with('/') {
                    raw.to_string()
                } else {
                    format!("{raw}/")
                };
                Url::parse(&normalized).map_err(|e| {
                    ToolError::InvalidConfig(format!("Invalid base URL '{raw}': {e}"))
                })
            })
            .transpose()?;

        let inner = Client::builder()
            .connect_timeout(config.connect_timeout.unwrap_or(DEFAULT_CONNECT_TIMEOUT))
            .timeout(config.timeout.unwrap_or(DEFAULT_TIMEOUT))
            .build()?;

        Ok(Self {
            inner,
            base_url,
            config: Arc::new(config),
        })
    }

    /// Resolves an endpoint against the base URL. Absolute URLs pass through.
    ///
    /// # Errors
    ///
    /// Returns [`ToolError::InvalidConfig`] if the endpoint is relative and
    /// no base URL is configured, or the result is not a valid URL.
    pub fn resolve(&self, endpoint: &str) -> Result<Url, ToolError> {
        if let Ok(url) = Url::parse(endpoint) {
            return Ok(url);
        }
        let base = self.base_url.as_ref().ok_or_else(|| {
            ToolError::InvalidConfig(format!(
                "Endpoint '{endpoint}' is relative but no base URL is configured"
            ))
        })?;
        base.join(endpoint.trim_start_matches('/')).map_err(|e| {
            ToolError::InvalidConfig(format!("Invalid endpoint '{endpoint}': {e}"))
        })
    }

    /// Builds a request.
    ///
    /// Default headers are applied first so per-tool `headers` override
    /// them. `Content-Type: application/json` is set only with a body.
    ///
    /// # Errors
    ///
    /// Returns an error if the body cannot be serialized or the request
    /// cannot be built.
    pub fn build_request(
        &self,
        method: Method,
        url: Url,
        headers: &BTreeMap<String, String>,
        query: &[(String, String)],
        body: Option<&Value>,
    ) -> Result<Request, ToolError> {
        let mut builder = self.inner.request(method, url);

        let mut merged = self.config.headers.clone();
        merged.extend(headers.iter().map(|(name, value)| (name.clone(), value.clone())));
        for (name, value) in &merged {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(token) = &self.config.bearer_token {
            builder = builder.bearer_auth(token.expose_secret());
        }
        if !query.is_empty() {
            builder = builder.query(query);
        }
        if let Some(body) = body {
            let json = serde_json::to_string(body)
                .map_err(|e| ToolError::InvalidConfig(format!("Unserializable body: {e}")))?;
            builder = builder.header(CONTENT_TYPE, "application/json").body(json);
        }

        Ok(builder.build()?)
    }

    /// Sends a request.
    ///
    /// # Errors
    ///
    /// Returns [`ToolError::TransportFailure`] if the request cannot be sent.
    pub async fn execute(&self, request: Request) -> Result<Response, ToolError> {
        Ok(self.inner.execute(request).await?)
    }
}
