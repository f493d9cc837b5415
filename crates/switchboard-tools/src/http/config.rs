//! Data description of a REST-backed tool.
//!
//! ## Example (JSON)
//!
//! ```json
//! {
//!   "name": "current",
//!   "description": "Current weather for a city",
//!   "shouldQueue": false,
//!   "inputSchema": {
//!     "type": "object",
//!     "properties": {
//!       "city": {"type": "string", "description": "City name", "examples": ["Paris"]},
//!       "units": {"type": "string", "description": "metric or imperial"}
//!     },
//!     "required": ["city"]
//!   },
//!   "request": {
//!     "method": "GET",
//!     "endpoint": "/weather/{city}",
//!     "headers": {"Accept": "application/json"}
//!   },
//!   "mapping": {
//!     "path": {"city": "city"},
//!     "query": {"units": "units"}
//!   },
//!   "error": {"field": "error", "value": true, "message": "message"}
//! }
//! ```
//!
//! Mapping tables go from the target name (placeholder, query key or body
//! key) to the argument that feeds it. Definitions may also be written in
//! YAML or TOML; the format is picked from the file extension.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, warn};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::ToolError;

/// One REST-backed tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpToolConfig {
    /// Tool name, unqualified.
    pub name: String,
    /// What the tool does.
    pub description: String,
    /// Run on the background task runner instead of inline.
    #[serde(default)]
    pub should_queue: bool,
    /// Full JSON schema of the arguments.
    pub input_schema: Value,
    /// Explicit validation rules; derived from the schema when absent.
    #[serde(default)]
    pub input_validation: Option<BTreeMap<String, FieldRule>>,
    /// Request template.
    pub request: RequestTemplate,
    /// Where each argument goes.
    #[serde(default)]
    pub mapping: ParameterMapping,
    /// Rule for APIs that report errors with a success status.
    #[serde(default)]
    pub error: Option<ErrorRule>,
}

/// Method, endpoint and static headers of the HTTP call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestTemplate {
    /// HTTP method name.
    #[serde(default = "default_method")]
    pub method: String,
    /// Absolute URL or path relative to the provider base URL, with
    /// `{placeholder}` segments.
    pub endpoint: String,
    /// Headers sent with every call of this tool.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

fn default_method() -> String {
    "GET".to_string()
}

/// Target name to argument name, per request slot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterMapping {
    /// Endpoint placeholders.
    #[serde(default)]
    pub path: BTreeMap<String, String>,
    /// Query string parameters.
    #[serde(default)]
    pub query: BTreeMap<String, String>,
    /// JSON body fields.
    #[serde(default)]
    pub body: BTreeMap<String, String>,
}

/// Embedded-error detection: `body[field] == value` means failure, with the
/// text found at `body[message]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorRule {
    /// Flag field.
    pub field: String,
    /// Sentinel value signalling an error.
    pub value: Value,
    /// Field holding the error text.
    pub message: String,
}

impl ErrorRule {
    /// Error text if the rule matches `body`.
    #[must_use]
    pub fn detect(&self, body: &Value) -> Option<String> {
        if body.get(&self.field) != Some(&self.value) {
            return None;
        }
        body.get(&self.message).map(|text| match text {
            Value::String(text) => text.clone(),
            other => other.to_string(),
        })
    }
}

/// Validation rule for one argument.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldRule {
    /// Argument must be present and not null.
    #[serde(default)]
    pub required: bool,
    /// Expected JSON type when present.
    #[serde(default, rename = "type")]
    pub kind: Option<JsonType>,
}

/// JSON schema primitive types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JsonType {
    String,
    Number,
    Integer,
    Boolean,
    Array,
    Object,
    Null,
}

impl JsonType {
    /// Maps a schema `type` keyword.
    #[must_use]
    pub fn from_schema(name: &str) -> Option<Self> {
        match name {
            "string" => Some(Self::String),
            "number" => Some(Self::Number),
            "integer" => Some(Self::Integer),
            "boolean" => Some(Self::Boolean),
            "array" => Some(Self::Array),
            "object" => Some(Self::Object),
            "null" => Some(Self::Null),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Integer => "integer",
            Self::Boolean => "boolean",
            Self::Array => "array",
            Self::Object => "object",
            Self::Null => "null",
        }
    }

    #[must_use]
    pub fn matches(self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Number => value.is_number(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Boolean => value.is_boolean(),
            Self::Array => value.is_array(),
            Self::Object => value.is_object(),
            Self::Null => value.is_null(),
        }
    }
}

impl HttpToolConfig {
    /// Loads a definition, picking the format from the extension.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: &Path) -> Result<Self, ToolError> {
        let contents = fs::read_to_string(path)?;
        let extension = path.extension().and_then(|ext| ext.to_str()).unwrap_or_default();
        let config: Self = match extension {
            "json" => serde_json::from_str(&contents).map_err(|e| parse_error(path, &e))?,
            "yaml" | "yml" => serde_yaml::from_str(&contents).map_err(|e| parse_error(path, &e))?,
            "toml" => toml::from_str(&contents).map_err(|e| parse_error(path, &e))?,
            other => {
                return Err(ToolError::InvalidConfig(format!(
                    "Unsupported tool definition format '{other}' for {}",
                    path.display()
                )));
            }
        };
        config.validate()?;
        Ok(config)
    }

    /// Checks fields serde cannot.
    ///
    /// # Errors
    ///
    /// Returns [`ToolError::InvalidConfig`] describing the first problem.
    pub fn validate(&self) -> Result<(), ToolError> {
        if self.name.trim().is_empty() {
            return Err(ToolError::InvalidConfig("Tool name is empty".to_string()));
        }
        if self.request.endpoint.trim().is_empty() {
            return Err(ToolError::InvalidConfig(format!(
                "Tool '{}' has an empty endpoint",
                self.name
            )));
        }
        self.method()?;
        Ok(())
    }

    /// Parsed HTTP method.
    ///
    /// # Errors
    ///
    /// Returns [`ToolError::InvalidConfig`] for unknown methods.
    pub fn method(&self) -> Result<Method, ToolError> {
        Method::from_bytes(self.request.method.to_ascii_uppercase().as_bytes()).map_err(|_| {
            ToolError::InvalidConfig(format!(
                "Tool '{}' has an invalid HTTP method '{}'",
                self.name, self.request.method
            ))
        })
    }

    /// Schema offered to the model: each property keeps only `type` and
    /// `description`.
    #[must_use]
    pub fn trimmed_schema(&self) -> Value {
        let mut trimmed = Map::new();
        trimmed.insert(
            "type".to_string(),
            self.input_schema
                .get("type")
                .cloned()
                .unwrap_or_else(|| Value::String("object".to_string())),
        );

        let properties: Map<String, Value> = self
            .input_schema
            .get("properties")
            .and_then(Value::as_object)
            .map(|props| {
                props
                    .iter()
                    .map(|(name, prop)| {
                        let mut kept = Map::new();
                        for key in ["type", "description"] {
                            if let Some(value) = prop.get(key) {
                                kept.insert(key.to_string(), value.clone());
                            }
                        }
                        (name.clone(), Value::Object(kept))
                    })
                    .collect()
            })
            .unwrap_or_default();
        trimmed.insert("properties".to_string(), Value::Object(properties));

        if let Some(required) = self.input_schema.get("required") {
            trimmed.insert("required".to_string(), required.clone());
        }
        Value::Object(trimmed)
    }

    /// Effective validation rules.
    ///
    /// Explicit `inputValidation` wins. Otherwise every schema property gets
    /// its declared type and the schema's `required` list marks presence.
    #[must_use]
    pub fn validation_rules(&self) -> BTreeMap<String, FieldRule> {
        if let Some(rules) = &self.input_validation {
            return rules.clone();
        }

        let mut rules: BTreeMap<String, FieldRule> = self
            .input_schema
            .get("properties")
            .and_then(Value::as_object)
            .map(|props| {
                props
                    .iter()
                    .map(|(name, prop)| {
                        let kind = prop.get("type").and_then(Value::as_str).and_then(JsonType::from_schema);
                        (name.clone(), FieldRule { required: false, kind })
                    })
                    .collect()
            })
            .unwrap_or_default();

        for name in self
            .input_schema
            .get("required")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter_map(Value::as_str)
        {
            rules.entry(name.to_string()).or_default().required = true;
        }
        rules
    }
}

fn parse_error(path: &Path, err: &dyn std::fmt::Display) -> ToolError {
    ToolError::InvalidConfig(format!("Failed to parse {}: {err}", path.display()))
}

/// Loads every definition in `dir`, sorted by file name.
///
/// Files that fail to parse or validate are skipped with a warning; files
/// with other extensions are ignored.
///
/// # Errors
///
/// Returns an error if the directory cannot be read.
pub fn load_dir(dir: &Path) -> Result<Vec<HttpToolConfig>, ToolError> {
    let mut paths: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| {
            matches!(
                path.extension().and_then(|ext| ext.to_str()),
                Some("json" | "yaml" | "yml" | "toml")
            )
        })
        .collect();
    paths.sort();

    let mut configs = Vec::with_capacity(paths.len());
    for path in paths {
        match HttpToolConfig::from_file(&path) {
            Ok(config) => {
                debug!("Loaded tool definition '{}' from {}", config.name, path.display());
                configs.push(config);
            }
            Err(e) => warn!("Skipping tool definition {}: {e}", path.display()),
        }
    }
    Ok(configs)
}
