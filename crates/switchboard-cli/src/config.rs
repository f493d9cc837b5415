//! Configuration for the switchboard binary.
//!
//! Loaded from `~/.config/switchboard/config.toml` unless `--config` points
//! elsewhere. Relative tool directories are resolved against the directory
//! holding the config file.
//!
//! ## Example Configuration
//!
//! ```toml
//! [model]
//! model = "claude-3-sonnet-20240229"
//! api_key_env = "ANTHROPIC_API_KEY"
//! max_tokens = 1024
//!
//! [settings]
//! tool_timeout_secs = 120
//! generate_titles = true
//!
//! [[providers]]
//! key = "weather"
//! kind = "http"
//! tools_path = "tools/weather"
//! base_url = "https://api.weather.example"
//! bearer_token_env = "WEATHER_TOKEN"
//!
//! [[providers]]
//! key = "clock"
//! kind = "builtin"
//! tools = ["current_time"]
//! ```

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use secrecy::SecretString;
use serde::Deserialize;

use switchboard::OrchestratorSettings;
use switchboard_client::{ClientConfig, DEFAULT_MAX_TOKENS, DEFAULT_MODEL, RetryConfig};
use switchboard_tools::builtin::{BUILTIN_TOOL_NAMES, builtin_tool};

use crate::error::{CliError, Result};

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub model: ModelConfig,

    #[serde(default)]
    pub settings: Settings,

    /// Tool providers, in registration order.
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
}

/// Model provider settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ModelConfig {
    #[serde(default = "default_model")]
    pub model: String,

    /// Environment variable holding the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    pub base_url: Option<String>,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    pub timeout_seconds: Option<u64>,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

/// Orchestrator and storage settings.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// Replaces the built-in system prompt.
    pub system_prompt: Option<String>,

    /// Upper bound on one tool execution (default: 120)
    #[serde(default = "default_tool_timeout")]
    pub tool_timeout_secs: u64,

    /// Ask the model to title new conversations (default: true)
    #[serde(default = "default_generate_titles")]
    pub generate_titles: bool,

    /// State file; defaults to `~/.local/share/switchboard/state.json`.
    pub state_path: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            system_prompt: None,
            tool_timeout_secs: default_tool_timeout(),
            generate_titles: default_generate_titles(),
            state_path: None,
        }
    }
}

/// One tool provider.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    /// Registry key; tools are offered as `key.tool`.
    pub key: String,

    #[serde(flatten)]
    pub kind: ProviderKind,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ProviderKind {
    /// REST tools described by data files in a directory.
    Http {
        tools_path: PathBuf,
        base_url: Option<String>,
        #[serde(default)]
        headers: BTreeMap<String, String>,
        /// Environment variable holding a bearer token.
        bearer_token_env: Option<String>,
        timeout_secs: Option<u64>,
    },
    /// Tools compiled into the binary.
    Builtin { tools: Vec<String> },
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_api_key_env() -> String {
    "ANTHROPIC_API_KEY".to_string()
}

const fn default_max_tokens() -> u32 {
    DEFAULT_MAX_TOKENS
}

const fn default_max_retries() -> u32 {
    3
}

const fn default_tool_timeout() -> u64 {
    120
}

const fn default_generate_titles() -> bool {
    true
}

impl AppConfig {
    /// Loads and validates the configuration at `path`, or at the default
    /// location.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The config directory cannot be determined
    /// - The file doesn't exist or cannot be parsed
    /// - Validation fails
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => Self::config_path()?,
        };

        if !path.exists() {
            return Err(CliError::Config(format!(
                "Configuration file not found: {}",
                path.display()
            )));
        }

        let contents = fs::read_to_string(&path)
            .map_err(|e| CliError::Config(format!("Failed to read config file: {e}")))?;
        let mut config: Self = toml::from_str(&contents)?;

        if let Some(base) = path.parent() {
            config.resolve_paths(base);
        }
        config.validate()?;

        Ok(config)
    }

    /// Returns the default configuration file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the config directory cannot be determined.
    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| CliError::Config("Failed to determine config directory".to_string()))?
            .join("switchboard");

        Ok(config_dir.join("config.toml"))
    }

    /// Returns the state file path.
    ///
    /// # Errors
    ///
    /// Returns an error if no path is configured and the data directory
    /// cannot be determined.
    pub fn state_path(&self) -> Result<PathBuf> {
        if let Some(path) = &self.settings.state_path {
            return Ok(path.clone());
        }
        let data_dir = dirs::data_local_dir()
            .ok_or_else(|| CliError::Config("Failed to determine data directory".to_string()))?
            .join("switchboard");

        Ok(data_dir.join("state.json"))
    }

    fn resolve_paths(&mut self, base: &Path) {
        for provider in &mut self.providers {
            if let ProviderKind::Http { tools_path, .. } = &mut provider.kind
                && tools_path.is_relative()
            {
                *tools_path = base.join(&*tools_path);
            }
        }
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - A provider key is empty or contains `.` or `__`
    /// - Two providers share a key
    /// - A built-in tool name is unknown
    /// - An HTTP tool directory does not exist
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for provider in &self.providers {
            let key = provider.key.as_str();
            if key.is_empty() || key.contains('.') || key.contains("__") {
                return Err(CliError::Config(format!(
                    "Invalid provider key '{key}': keys must be non-empty and contain neither '.' nor '__'"
                )));
            }
            if !seen.insert(key) {
                return Err(CliError::Config(format!("Duplicate provider key '{key}'")));
            }

            match &provider.kind {
                ProviderKind::Builtin { tools } => {
                    if let Some(unknown) = tools.iter().find(|name| builtin_tool(name).is_none()) {
                        return Err(CliError::Config(format!(
                            "Unknown built-in tool '{unknown}' for provider '{key}' (available: {})",
                            BUILTIN_TOOL_NAMES.join(", ")
                        )));
                    }
                }
                ProviderKind::Http { tools_path, .. } => {
                    if !tools_path.is_dir() {
                        return Err(CliError::Config(format!(
                            "Tool directory for provider '{key}' not found: {}",
                            tools_path.display()
                        )));
                    }
                }
            }
        }

        Ok(())
    }

    /// Model client configuration, with the API key read through `env`.
    ///
    /// # Errors
    ///
    /// Returns an error if the API key variable is unset.
    pub fn client_config(&self, env: impl Fn(&str) -> Option<String>) -> Result<ClientConfig> {
        let model = &self.model;
        let api_key = env(&model.api_key_env).ok_or_else(|| {
            CliError::Config(format!(
                "Environment variable {} is not set",
                model.api_key_env
            ))
        })?;

        let mut config = ClientConfig::new(&model.model)
            .with_api_key(api_key)
            .with_max_tokens(model.max_tokens)
            .with_retry(RetryConfig {
                max_retries: model.max_retries,
                ..RetryConfig::default()
            });
        if let Some(base_url) = &model.base_url {
            config = config.with_base_url(base_url);
        }
        if let Some(timeout) = model.timeout_seconds {
            config = config.with_timeout_seconds(timeout);
        }
        Ok(config)
    }

    #[must_use]
    pub fn orchestrator_settings(&self) -> OrchestratorSettings {
        let defaults = OrchestratorSettings::default();
        OrchestratorSettings {
            system_prompt: self
                .settings
                .system_prompt
                .clone()
                .unwrap_or(defaults.system_prompt),
            max_tokens: self.model.max_tokens,
            tool_timeout: Duration::from_secs(self.settings.tool_timeout_secs),
            generate_titles: self.settings.generate_titles,
        }
    }
}

/// Reads an optional secret from the environment.
pub fn secret_from_env(
    name: Option<&str>,
    env: impl Fn(&str) -> Option<String>,
) -> Result<Option<SecretString>> {
    let Some(name) = name else {
        return Ok(None);
    };
    env(name)
        .map(|value| Some(SecretString::from(value)))
        .ok_or_else(|| CliError::Config(format!("Environment variable {name} is not set")))
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::expect_used)]
    #![allow(clippy::panic)]

    use secrecy::ExposeSecret;
    use switchboard::DEFAULT_SYSTEM_PROMPT;

    use super::*;

    fn sample_config_toml() -> &'static str {
        r#"
[model]
model = "claude-3-haiku-20240307"
api_key_env = "TEST_ANTHROPIC_KEY"
max_tokens = 2048

[settings]
tool_timeout_secs = 30
generate_titles = false

[[providers]]
key = "weather"
kind = "http"
tools_path = "tools/weather"
base_url = "https://api.weather.example"
bearer_token_env = "WEATHER_TOKEN"

[providers.headers]
X-Client = "switchboard"

[[providers]]
key = "clock"
kind = "builtin"
tools = ["current_time"]
        "#
    }

    fn env(name: &str) -> Option<String> {
        match name {
            "TEST_ANTHROPIC_KEY" => Some("sk-test".to_string()),
            "WEATHER_TOKEN" => Some("weather-token".to_string()),
            _ => None,
        }
    }

    #[test]
    fn test_parse_config() {
        let config: AppConfig = toml::from_str(sample_config_toml()).unwrap();

        assert_eq!(config.model.model, "claude-3-haiku-20240307");
        assert_eq!(config.model.max_retries, 3);
        assert_eq!(config.settings.tool_timeout_secs, 30);
        assert_eq!(config.providers.len(), 2);

        let ProviderKind::Http { headers, bearer_token_env, .. } = &config.providers[0].kind else {
            panic!("expected http provider");
        };
        assert_eq!(headers.get("X-Client").map(String::as_str), Some("switchboard"));
        assert_eq!(bearer_token_env.as_deref(), Some("WEATHER_TOKEN"));
        assert!(matches!(&config.providers[1].kind, ProviderKind::Builtin { tools } if tools == &["current_time"]));
    }

    #[test]
    fn test_default_settings() {
        let config: AppConfig = toml::from_str("[model]\n").unwrap();

        assert_eq!(config.model.model, DEFAULT_MODEL);
        assert_eq!(config.model.api_key_env, "ANTHROPIC_API_KEY");
        assert_eq!(config.model.max_tokens, DEFAULT_MAX_TOKENS);
        assert_eq!(config.settings.tool_timeout_secs, 120);
        assert!(config.settings.generate_titles);
        assert!(config.providers.is_empty());

        let settings = config.orchestrator_settings();
        assert_eq!(settings.system_prompt, DEFAULT_SYSTEM_PROMPT);
        assert_eq!(settings.tool_timeout, Duration::from_secs(120));
    }

    #[test]
    fn test_missing_model_section_rejected() {
        assert!(toml::from_str::<AppConfig>("[settings]\n").is_err());
    }

    #[test]
    fn test_validate_provider_keys() {
        for key in ["", "we.ather", "we__ather"] {
            let toml = format!(
                "[model]\n[[providers]]\nkey = \"{key}\"\nkind = \"builtin\"\ntools = []\n"
            );
            let config: AppConfig = toml::from_str(&toml).unwrap();
            assert!(config.validate().is_err(), "key {key:?} should be rejected");
        }

        let toml = r#"
[model]
[[providers]]
key = "clock"
kind = "builtin"
tools = []
[[providers]]
key = "clock"
kind = "builtin"
tools = ["current_time"]
        "#;
        let config: AppConfig = toml::from_str(toml).unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("Duplicate provider key 'clock'"));
    }

    #[test]
    fn test_validate_unknown_builtin() {
        let toml = "[model]\n[[providers]]\nkey = \"misc\"\nkind = \"builtin\"\ntools = [\"teleport\"]\n";
        let config: AppConfig = toml::from_str(toml).unwrap();
        assert!(config.validate().unwrap_err().to_string().contains("teleport"));
    }

    #[test]
    fn test_load_resolves_tool_dirs_relative_to_file() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("tools/weather")).unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, sample_config_toml()).unwrap();

        let config = AppConfig::load(Some(&path)).unwrap();
        let ProviderKind::Http { tools_path, .. } = &config.providers[0].kind else {
            panic!("expected http provider");
        };
        assert_eq!(tools_path, &dir.path().join("tools/weather"));
    }

    #[test]
    fn test_load_missing_tool_dir_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, sample_config_toml()).unwrap();

        let err = AppConfig::load(Some(&path)).unwrap_err();
        assert!(err.to_string().contains("Tool directory for provider 'weather'"));
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = AppConfig::load(Some(&dir.path().join("absent.toml"))).unwrap_err();
        assert!(matches!(err, CliError::Config(_)));
    }

    #[test]
    fn test_client_config_reads_key_from_env() {
        let config: AppConfig = toml::from_str(sample_config_toml()).unwrap();

        let client = config.client_config(env).unwrap();
        assert_eq!(client.model, "claude-3-haiku-20240307");
        assert_eq!(client.max_tokens, 2048);
        assert_eq!(client.api_key.unwrap().expose_secret(), "sk-test");

        assert!(config.client_config(|_| None).is_err());
    }

    #[test]
    fn test_secret_from_env() {
        assert!(secret_from_env(None, env).unwrap().is_none());
        let token = secret_from_env(Some("WEATHER_TOKEN"), env).unwrap().unwrap();
        assert_eq!(token.expose_secret(), "weather-token");
        assert!(secret_from_env(Some("MISSING"), env).is_err());
    }
}
