use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use log::info;
use serde_json::Value;

use switchboard_common::{ToolOutcome, ToolSpec};

use crate::{InvocationLogger, ToolError, ToolImplementation, ToolProvider};

/// Provider backed by a list of [`ToolImplementation`]s.
///
/// Tools keep the order in which they were first registered; registering a
/// second tool with the same name replaces the first in place.
pub struct ToolSet {
    name: String,
    tools: Vec<Arc<dyn ToolImplementation>>,
}

impl fmt::Debug for ToolSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolSet")
            .field("name", &self.name)
            .field("tools", &self.tool_names())
            .finish()
    }
}

impl ToolSet {
    /// Creates an empty set. `name` only shows up in errors and logs.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tools: Vec::new(),
        }
    }

    pub fn register(&mut self, tool: Arc<dyn ToolImplementation>) {
        let name = tool.spec().name;
        match self.position(&name) {
            Some(index) => self.tools[index] = tool,
            None => self.tools.push(tool),
        }
    }

    #[must_use]
    pub fn with_tool(mut self, tool: Arc<dyn ToolImplementation>) -> Self {
        self.register(tool);
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    #[must_use]
    pub fn tool_names(&self) -> Vec<String> {
        self.tools.iter().map(|tool| tool.spec().name).collect()
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.tools.iter().position(|tool| tool.spec().name == name)
    }

    fn get(&self, name: &str) -> Result<&Arc<dyn ToolImplementation>, ToolError> {
        self.position(name)
            .map(|index| &self.tools[index])
            .ok_or_else(|| ToolError::ToolNotFound {
                provider: self.name.clone(),
                tool: name.to_string(),
            })
    }
}

#[async_trait]
impl ToolProvider for ToolSet {
    fn tools(&self) -> Vec<ToolSpec> {
        self.tools.iter().map(|tool| tool.spec()).collect()
    }

    fn has_tool(&self, tool: &str) -> bool {
        self.position(tool).is_some()
    }

    fn should_defer(&self, tool: &str) -> Result<bool, ToolError> {
        Ok(self.get(tool)?.should_defer())
    }

    async fn execute(
        &self,
        tool: &str,
        arguments: &Value,
        logger: &dyn InvocationLogger,
    ) -> Result<ToolOutcome, ToolError> {
        let implementation = self.get(tool)?;
        info!("Initializing {}: {} ...", self.name, tool.replace('_', " "));
        Ok(implementation.execute(arguments, logger).await?)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::expect_used)]

    use super::*;
    use crate::RecordingLogger;
    use serde_json::json;

    struct Named(&'static str, &'static str);

    #[async_trait]
    impl ToolImplementation for Named {
        fn spec(&self) -> ToolSpec {
            ToolSpec::new(self.0, self.1, json!({"type": "object"}))
        }

        async fn execute(
            &self,
            _arguments: &Value,
            _logger: &dyn InvocationLogger,
        ) -> anyhow::Result<ToolOutcome> {
            if self.1 == "broken" {
                anyhow::bail!("tool exploded");
            }
            Ok(ToolOutcome::Success(json!(self.1)))
        }
    }

    #[test]
    fn test_reregistration_replaces_in_place() {
        let set = ToolSet::new("demo")
            .with_tool(Arc::new(Named("a", "first")))
            .with_tool(Arc::new(Named("b", "second")))
            .with_tool(Arc::new(Named("a", "replaced")));

        assert_eq!(set.tool_names(), vec!["a", "b"]);
        assert_eq!(set.tools()[0].description, "replaced");
    }

    #[test]
    fn test_unknown_tool_message() {
        let set = ToolSet::new("demo");
        let err = set.should_defer("missing").unwrap_err();
        assert_eq!(err.to_string(), "Tool 'missing' not found on provider 'demo'");
    }

    #[tokio::test]
    async fn test_implementation_errors_become_tool_errors() {
        let set = ToolSet::new("demo").with_tool(Arc::new(Named("a", "broken")));
        let err = set
            .execute("a", &json!({}), &RecordingLogger::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Other(_)));
        assert_eq!(err.to_string(), "tool exploded");
    }
}
