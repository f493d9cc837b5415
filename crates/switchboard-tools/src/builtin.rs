//! Tools that ship with the crate and need no configuration.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Value, json};

use switchboard_common::{ToolOutcome, ToolSpec};

use crate::{InvocationLogger, ToolImplementation};

/// Names accepted by [`builtin_tool`].
pub const BUILTIN_TOOL_NAMES: &[&str] = &["current_time"];

/// Looks up a built-in tool by name.
#[must_use]
pub fn builtin_tool(name: &str) -> Option<Arc<dyn ToolImplementation>> {
    match name {
        "current_time" => Some(Arc::new(CurrentTimeTool)),
        _ => None,
    }
}

/// Reports the current UTC time.
pub struct CurrentTimeTool;

#[async_trait]
impl ToolImplementation for CurrentTimeTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec::new(
            "current_time",
            "Get the current date and time in UTC. Takes no parameters.",
            json!({
                "type": "object",
                "properties": {},
                "required": [],
            }),
        )
    }

    async fn execute(&self, _args: &Value, logger: &dyn InvocationLogger) -> Result<ToolOutcome> {
        let now: DateTime<Utc> = Utc::now();
        let payload = json!({
            "utc": now.to_rfc3339(),
            "formatted": now.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
        });
        logger.success("Read system clock", json!({}));
        logger.complete(&payload);
        Ok(ToolOutcome::Success(payload))
    }
}
