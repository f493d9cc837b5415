//! Builds the tool registry from configuration.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use switchboard_tools::builtin::builtin_tool;
use switchboard_tools::http::{ApiClient, ApiClientConfig, load_tool_set};
use switchboard_tools::{ToolRegistry, ToolSet};

use crate::config::{AppConfig, ProviderConfig, ProviderKind, secret_from_env};
use crate::error::{CliError, Result};

/// Builds every configured provider, in order.
///
/// Fails on the first provider that cannot be built, so a broken
/// configuration is reported at startup rather than on first use.
///
/// # Errors
///
/// Returns an error if a secret is missing, a tool directory cannot be read,
/// a built-in tool is unknown, or a key is rejected by the registry.
pub fn build_registry(config: &AppConfig, env: impl Fn(&str) -> Option<String>) -> Result<ToolRegistry> {
    let mut registry = ToolRegistry::new();
    for provider in &config.providers {
        let set = build_provider(provider, &env)?;
        if set.is_empty() {
            warn!(provider = %provider.key, "Provider exposes no tools");
        }
        info!(provider = %provider.key, tools = set.len(), "Registered tool provider");
        registry.register(provider.key.clone(), Arc::new(set))?;
    }
    Ok(registry)
}

fn build_provider(provider: &ProviderConfig, env: &impl Fn(&str) -> Option<String>) -> Result<ToolSet> {
    match &provider.kind {
        ProviderKind::Http {
            tools_path,
            base_url,
            headers,
            bearer_token_env,
            timeout_secs,
        } => {
            let client = ApiClient::new(ApiClientConfig {
                base_url: base_url.clone(),
                headers: headers.clone(),
                bearer_token: secret_from_env(bearer_token_env.as_deref(), env)?,
                connect_timeout: None,
                timeout: timeout_secs.map(Duration::from_secs),
            })?;
            Ok(load_tool_set(&provider.key, tools_path, &client)?)
        }
        ProviderKind::Builtin { tools } => {
            let mut set = ToolSet::new(&provider.key);
            for name in tools {
                let tool = builtin_tool(name).ok_or_else(|| {
                    CliError::Config(format!("Unknown built-in tool '{name}' for provider '{}'", provider.key))
                })?;
                set.register(tool);
            }
            Ok(set)
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::expect_used)]

    use std::fs;

    use super::*;

    fn config(toml: &str) -> AppConfig {
        toml::from_str(toml).unwrap()
    }

    #[test]
    fn test_builds_providers_in_order() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("current.json"),
            r#"{
                "name": "current",
                "description": "Current weather",
                "inputSchema": {"type": "object", "properties": {"city": {"type": "string"}}, "required": ["city"]},
                "request": {"method": "GET", "endpoint": "/weather/{city}"},
                "mapping": {"path": {"city": "city"}}
            }"#,
        )
        .unwrap();

        let config = config(&format!(
            r#"
[model]

[[providers]]
key = "weather"
kind = "http"
tools_path = "{}"
base_url = "https://api.weather.example"

[[providers]]
key = "clock"
kind = "builtin"
tools = ["current_time"]
            "#,
            dir.path().display()
        ));

        let registry = build_registry(&config, |_| None).unwrap();
        let names: Vec<String> = registry.list_tools().into_iter().map(|t| t.name).collect();
        assert_eq!(names, vec!["weather.current", "clock.current_time"]);
    }

    #[test]
    fn test_missing_bearer_token_fails_fast() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(&format!(
            "[model]\n[[providers]]\nkey = \"api\"\nkind = \"http\"\ntools_path = \"{}\"\nbearer_token_env = \"API_TOKEN\"\n",
            dir.path().display()
        ));

        let err = build_registry(&config, |_| None).unwrap_err();
        assert!(err.to_string().contains("API_TOKEN"));

        let registry = build_registry(&config, |_| Some("token".to_string())).unwrap();
        assert_eq!(registry.provider_keys(), vec!["api"]);
    }

    #[test]
    fn test_unknown_builtin_fails() {
        let config = config("[model]\n[[providers]]\nkey = \"misc\"\nkind = \"builtin\"\ntools = [\"teleport\"]\n");
        assert!(matches!(build_registry(&config, |_| None), Err(CliError::Config(_))));
    }

    #[test]
    fn test_no_providers_gives_empty_registry() {
        let registry = build_registry(&config("[model]\n"), |_| None).unwrap();
        assert!(registry.is_empty());
    }
}
