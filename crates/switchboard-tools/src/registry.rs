use std::fmt;
use std::sync::Arc;

use log::debug;
use serde_json::Value;

use switchboard_common::{ToolOutcome, ToolSpec, split_qualified};

use crate::{InvocationLogger, ToolError, ToolProvider};

/// Providers under unique keys, in registration order.
///
/// Tools are addressed as `provider.tool`. Provider keys may contain
/// neither `.` nor `__`, and tool names only ASCII letters, digits, `_` and
/// `-`, so a model client can encode qualified names as `provider__tool`
/// and decode them again.
#[derive(Default)]
pub struct ToolRegistry {
    providers: Vec<(String, Arc<dyn ToolProvider>)>,
}

impl fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("providers", &self.provider_keys())
            .finish()
    }
}

impl ToolRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a provider under `key`.
    ///
    /// # Errors
    ///
    /// Returns [`ToolError::InvalidProviderKey`] for malformed keys,
    /// [`ToolError::DuplicateProvider`] if the key is taken, and
    /// [`ToolError::InvalidConfig`] if the provider exposes a tool name that
    /// cannot be sent to a model.
    pub fn register(
        &mut self,
        key: impl Into<String>,
        provider: Arc<dyn ToolProvider>,
    ) -> Result<(), ToolError> {
        let key = key.into();
        if key.is_empty() || key.contains('.') || key.contains("__") {
            return Err(ToolError::InvalidProviderKey(key));
        }
        if self.provider(&key).is_some() {
            return Err(ToolError::DuplicateProvider(key));
        }
        if let Some(spec) = provider.tools().into_iter().find(|spec| !is_valid_tool_name(&spec.name)) {
            return Err(ToolError::InvalidConfig(format!(
                "Tool name '{}' on provider '{key}' may only contain letters, digits, '_' and '-'",
                spec.name
            )));
        }
        debug!("Registered tool provider '{key}'");
        self.providers.push((key, provider));
        Ok(())
    }

    /// Builder-style [`ToolRegistry::register`].
    ///
    /// # Errors
    ///
    /// Same as [`ToolRegistry::register`].
    pub fn with_provider(
        mut self,
        key: impl Into<String>,
        provider: Arc<dyn ToolProvider>,
    ) -> Result<Self, ToolError> {
        self.register(key, provider)?;
        Ok(self)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.providers.len()
    }

    #[must_use]
    pub fn provider_keys(&self) -> Vec<&str> {
        self.providers.iter().map(|(key, _)| key.as_str()).collect()
    }

    #[must_use]
    pub fn provider(&self, key: &str) -> Option<&Arc<dyn ToolProvider>> {
        self.providers
            .iter()
            .find(|(registered, _)| registered == key)
            .map(|(_, provider)| provider)
    }

    /// Catalogue of every tool with qualified names.
    ///
    /// Ordered by provider registration, then by each provider's own order.
    #[must_use]
    pub fn list_tools(&self) -> Vec<ToolSpec> {
        self.providers
            .iter()
            .flat_map(|(key, provider)| {
                provider
                    .tools()
                    .into_iter()
                    .map(move |spec| spec.qualified(key))
            })
            .collect()
    }

    /// Resolves a qualified name to its provider and local tool name.
    ///
    /// # Errors
    ///
    /// Returns [`ToolError::ProviderNotFound`] or [`ToolError::ToolNotFound`].
    pub fn resolve<'a>(
        &'a self,
        qualified_name: &'a str,
    ) -> Result<(&'a Arc<dyn ToolProvider>, &'a str), ToolError> {
        let (key, tool) = split_qualified(qualified_name)
            .ok_or_else(|| ToolError::ProviderNotFound(qualified_name.to_string()))?;
        let provider = self
            .provider(key)
            .ok_or_else(|| ToolError::ProviderNotFound(key.to_string()))?;
        if !provider.has_tool(tool) {
            return Err(ToolError::ToolNotFound {
                provider: key.to_string(),
                tool: tool.to_string(),
            });
        }
        Ok((provider, tool))
    }

    /// Asks the owning provider whether the tool runs in the background.
    ///
    /// # Errors
    ///
    /// Resolution errors, or the provider's own error.
    pub fn should_defer(&self, qualified_name: &str) -> Result<bool, ToolError> {
        let (provider, tool) = self.resolve(qualified_name)?;
        provider.should_defer(tool)
    }

    /// Runs a tool by qualified name.
    ///
    /// # Errors
    ///
    /// Resolution errors, or the provider's own error.
    pub async fn dispatch(
        &self,
        qualified_name: &str,
        arguments: &Value,
        logger: &dyn InvocationLogger,
    ) -> Result<ToolOutcome, ToolError> {
        let (provider, tool) = self.resolve(qualified_name)?;
        debug!("Dispatching '{qualified_name}'");
        provider.execute(tool, arguments, logger).await
    }
}

fn is_valid_tool_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}
