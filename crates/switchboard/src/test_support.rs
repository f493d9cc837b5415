#![allow(clippy::unwrap_used)]

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use serde_json::{Value, json};
use uuid::Uuid;

use switchboard_client::{ClientConfig, ModelClient};
use switchboard_common::{ContentBlock, ModelReply, ModelRequest, StopReason, ToolOutcome, ToolSpec};
use switchboard_tools::{InvocationLogger, ToolImplementation};

use crate::error::OrchestratorError;
use crate::runner::TaskRunner;

/// Model client replaying a fixed script of replies.
pub struct ScriptedModel {
    config: ClientConfig,
    script: Mutex<VecDeque<Result<ModelReply, String>>>,
    requests: Mutex<Vec<ModelRequest>>,
}

impl ScriptedModel {
    pub fn new(script: Vec<Result<ModelReply, String>>) -> Self {
        Self {
            config: ClientConfig::new("scripted"),
            script: Mutex::new(script.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<ModelRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl ModelClient for ScriptedModel {
    fn config(&self) -> &ClientConfig {
        &self.config
    }

    async fn complete(&self, request: &ModelRequest) -> Result<ModelReply> {
        self.requests.lock().unwrap().push(request.clone());
        match self.script.lock().unwrap().pop_front() {
            Some(Ok(reply)) => Ok(reply),
            Some(Err(message)) => Err(anyhow!(message)),
            None => Err(anyhow!("script exhausted")),
        }
    }
}

/// A reply asking for the given `(correlation id, qualified name)` calls.
pub fn tool_reply(id: &str, uses: &[(&str, &str)]) -> ModelReply {
    let mut reply = ModelReply::text(id, "scripted", "Let me check.");
    for (correlation, name) in uses {
        reply.content.push(ContentBlock::ToolUse {
            id: (*correlation).to_string(),
            name: (*name).to_string(),
            input: json!({"city": "Paris"}),
        });
    }
    reply.stop_reason = Some(StopReason::ToolUse);
    reply
}

/// Task runner that only records submissions.
#[derive(Default)]
pub struct RecordingRunner {
    submitted: Mutex<Vec<Uuid>>,
    closed: bool,
}

impl RecordingRunner {
    pub fn closed() -> Self {
        Self {
            submitted: Mutex::new(Vec::new()),
            closed: true,
        }
    }

    pub fn submitted(&self) -> Vec<Uuid> {
        self.submitted.lock().unwrap().clone()
    }
}

impl TaskRunner for RecordingRunner {
    fn submit(&self, invocation_id: Uuid) -> Result<(), OrchestratorError> {
        if self.closed {
            return Err(OrchestratorError::TaskRunner("runner closed".to_string()));
        }
        self.submitted.lock().unwrap().push(invocation_id);
        Ok(())
    }
}

/// Tool returning a fixed payload, optionally after a delay.
pub struct StubTool {
    pub name: &'static str,
    pub defer: bool,
    pub delay: Option<Duration>,
    pub payload: Value,
}

impl StubTool {
    pub fn inline(name: &'static str, payload: Value) -> Self {
        Self {
            name,
            defer: false,
            delay: None,
            payload,
        }
    }

    pub fn deferred(name: &'static str, payload: Value) -> Self {
        Self {
            defer: true,
            ..Self::inline(name, payload)
        }
    }

    pub fn slow(name: &'static str, delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::inline(name, json!({}))
        }
    }
}

#[async_trait]
impl ToolImplementation for StubTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec::new(self.name, format!("{} stub", self.name), json!({"type": "object"}))
    }

    fn should_defer(&self) -> bool {
        self.defer
    }

    async fn execute(&self, _arguments: &Value, logger: &dyn InvocationLogger) -> Result<ToolOutcome> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        logger.complete(&self.payload);
        Ok(ToolOutcome::Success(self.payload.clone()))
    }
}
