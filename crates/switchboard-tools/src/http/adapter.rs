//! Executes one [`HttpToolConfig`] against its REST endpoint.

use std::collections::{BTreeMap, BTreeSet};

use anyhow::Result;
use async_trait::async_trait;
use log::warn;
use regex::Regex;
use reqwest::Method;
use serde_json::{Map, Value, json};

use switchboard_common::{ToolOutcome, ToolSpec};

use super::client::ApiClient;
use super::config::{FieldRule, HttpToolConfig};
use crate::{InvocationLogger, ToolError, ToolImplementation};

/// Summary placed in every failure payload.
pub const FAILURE_MESSAGE: &str = "API call failed.";

/// A tool whose behaviour is entirely described by an [`HttpToolConfig`].
#[derive(Debug)]
pub struct HttpTool {
    config: HttpToolConfig,
    method: Method,
    rules: BTreeMap<String, FieldRule>,
    placeholder: Regex,
    client: ApiClient,
}

impl HttpTool {
    /// Creates the tool.
    ///
    /// # Errors
    ///
    /// Returns [`ToolError::InvalidConfig`] if the definition is unusable.
    pub fn new(config: HttpToolConfig, client: ApiClient) -> Result<Self, ToolError> {
        config.validate()?;
        let method = config.method()?;
        let rules = config.validation_rules();
        let placeholder = Regex::new(r"\{([A-Za-z0-9_]+)\}")
            .map_err(|e| ToolError::InvalidConfig(format!("Placeholder pattern: {e}")))?;
        Ok(Self {
            config,
            method,
            rules,
            placeholder,
            client,
        })
    }

    #[must_use]
    pub const fn config(&self) -> &HttpToolConfig {
        &self.config
    }

    /// Checks arguments against the rule set.
    ///
    /// Arguments feeding path placeholders are always required.
    ///
    /// # Errors
    ///
    /// Returns [`ToolError::ValidationFailed`] listing every violation.
    pub fn validate(&self, arguments: &Value) -> Result<(), ToolError> {
        let Some(args) = arguments.as_object() else {
            return Err(ToolError::ValidationFailed(vec![
                "Arguments must be a JSON object.".to_string(),
            ]));
        };

        let path_sources: BTreeSet<&str> =
            self.config.mapping.path.values().map(String::as_str).collect();
        let mut violations = Vec::new();

        for (field, rule) in &self.rules {
            match present(args, field) {
                None if rule.required || path_sources.contains(field.as_str()) => {
                    violations.push(format!("The {field} field is required."));
                }
                Some(value) => {
                    if let Some(kind) = rule.kind
                        && !kind.matches(value)
                    {
                        violations.push(format!("The {field} field must be of type {}.", kind.as_str()));
                    }
                }
                None => {}
            }
        }
        for source in path_sources {
            if !self.rules.contains_key(source) && present(args, source).is_none() {
                violations.push(format!("The {source} field is required."));
            }
        }

        if violations.is_empty() {
            Ok(())
        } else {
            Err(ToolError::ValidationFailed(violations))
        }
    }

    fn render_endpoint(&self, args: &Map<String, Value>) -> Result<String, ToolError> {
        let mut endpoint = self.config.request.endpoint.clone();
        for (target, source) in &self.config.mapping.path {
            if let Some(value) = present(args, source) {
                endpoint = endpoint.replace(&format!("{{{target}}}"), &scalar(value));
            }
        }
        let unresolved: Vec<&str> = self
            .placeholder
            .captures_iter(&endpoint)
            .filter_map(|caps| caps.get(1))
            .map(|m| m.as_str())
            .collect();
        if !unresolved.is_empty() {
            return Err(ToolError::InvalidConfig(format!(
                "Endpoint '{}' has unmapped placeholders: {}",
                self.config.request.endpoint,
                unresolved.join(", ")
            )));
        }
        Ok(endpoint)
    }

    fn query(&self, args: &Map<String, Value>) -> Vec<(String, String)> {
        self.config
            .mapping
            .query
            .iter()
            .filter_map(|(target, source)| present(args, source).map(|v| (target.clone(), scalar(v))))
            .collect()
    }

    fn body(&self, args: &Map<String, Value>) -> Value {
        let body: Map<String, Value> = self
            .config
            .mapping
            .body
            .iter()
            .filter_map(|(target, source)| present(args, source).map(|v| (target.clone(), v.clone())))
            .collect();
        Value::Object(body)
    }

    async fn call(&self, arguments: &Value, logger: &dyn InvocationLogger) -> Result<Value, ToolError> {
        self.validate(arguments)?;
        let empty = Map::new();
        let args = arguments.as_object().unwrap_or(&empty);

        let url = self.client.resolve(&self.render_endpoint(args)?)?;
        let query = self.query(args);
        let body = (self.method != Method::GET).then(|| self.body(args));

        logger.info(
            &format!("{} API Request:", self.method),
            json!({
                "url": url.as_str(),
                "query": query.iter().cloned().collect::<BTreeMap<_, _>>(),
                "body": body,
            }),
        );

        let request = self.client.build_request(
            self.method.clone(),
            url,
            &self.config.request.headers,
            &query,
            body.as_ref(),
        )?;
        let response = self.client.execute(request).await?;
        let status = response.status();
        let text = response.text().await?;
        let data = if text.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).unwrap_or_else(|_| Value::String(text.clone()))
        };

        if let Some(message) = self.config.error.as_ref().and_then(|rule| rule.detect(&data)) {
            return Err(ToolError::RemoteError(message));
        }
        if !status.is_success() {
            return Err(ToolError::http_status(status.as_u16(), &text));
        }
        Ok(data)
    }
}

/// The argument under `name`, treating null as absent.
fn present<'a>(args: &'a Map<String, Value>, name: &str) -> Option<&'a Value> {
    args.get(name).filter(|value| !value.is_null())
}

/// Strings verbatim, everything else as JSON text.
fn scalar(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

#[async_trait]
impl ToolImplementation for HttpTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec::new(
            self.config.name.clone(),
            self.config.description.clone(),
            self.config.trimmed_schema(),
        )
    }

    fn should_defer(&self) -> bool {
        self.config.should_queue
    }

    async fn execute(&self, arguments: &Value, logger: &dyn InvocationLogger) -> Result<ToolOutcome> {
        let outcome = match self.call(arguments, logger).await {
            Ok(data) => {
                logger.success("API response successful", json!({"tool": self.config.name}));
                ToolOutcome::Success(data)
            }
            Err(err) => {
                warn!("Tool '{}' failed: {err}", self.config.name);
                logger.error(
                    "Tool execution failed",
                    json!({
                        "error_type": err.kind(),
                        "error_code": err.status_code(),
                        "error_message": err.to_string(),
                        "stack_trace": err.chain(),
                    }),
                );
                ToolOutcome::failure(FAILURE_MESSAGE, err.to_string())
            }
        };
        logger.complete(&outcome.payload());
        Ok(outcome)
    }
}
