use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{debug, error, info, warn};
use serde_json::json;
use tokio::task::JoinHandle;
use uuid::Uuid;

use switchboard_client::ModelClient;
use switchboard_common::{
    ContentBlock, InvocationStatus, ModelRequest, ModelResponse, Settlement, ToolInvocation, Turn,
};
use switchboard_tools::{InvocationLogger, ToolRegistry};

use crate::error::OrchestratorError;
use crate::events::{EventCallback, OrchestratorEvent};
use crate::history;
use crate::logger::StoreLogger;
use crate::runner::TaskRunner;
use crate::store::ConversationStore;
use crate::title;

/// System prompt sent with every round trip unless overridden.
pub const DEFAULT_SYSTEM_PROMPT: &str = "Answer the user's request using relevant tools (if they are available). \
Before calling a tool, do some analysis within <thinking></thinking> tags. First, think about which of the \
provided tools is the relevant tool to answer the user's request. Second, go through each of the required \
parameters of the relevant tool and determine if the user has directly provided or given enough information to \
infer a value. When deciding if the parameter can be inferred, carefully consider all the context to see if it \
supports a specific value. If all of the required parameters are present or can be reasonably inferred, close the \
thinking tag and proceed with the tool call. BUT, if one of the values for a required parameter is missing, DO NOT \
invoke the function (not even with fillers for the missing params) and instead, ask the user to provide the \
missing parameters. DO NOT ask for more information on optional parameters if it is not provided.";

/// Error recorded on invocations found mid-flight by [`Orchestrator::recover`].
pub const INTERRUPTED_MESSAGE: &str = "Tool execution was interrupted before completion";

/// Tunables for the turn loop.
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub system_prompt: String,
    pub max_tokens: u32,
    /// Upper bound on a single tool execution, inline or deferred.
    pub tool_timeout: Duration,
    /// Ask the model to title new conversations.
    pub generate_titles: bool,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            max_tokens: 1024,
            tool_timeout: Duration::from_secs(120),
            generate_titles: false,
        }
    }
}

/// What [`Orchestrator::recover`] did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Recovery {
    /// Invocations failed because they were interrupted.
    pub failed: usize,
    /// Queued invocations handed to the runner again.
    pub resubmitted: usize,
    /// Turns advanced past a fully settled batch.
    pub advanced: usize,
}

/// Drives turns to completion.
///
/// One call to [`Orchestrator::advance_turn`] performs model round trips
/// until the model stops asking for tools or a deferred tool leaves the
/// batch unfinished. In the latter case the turn is resumed by whichever
/// [`Orchestrator::run_deferred`] call settles the last invocation.
pub struct Orchestrator {
    store: Arc<dyn ConversationStore>,
    model: Arc<dyn ModelClient>,
    registry: Arc<ToolRegistry>,
    runner: Arc<dyn TaskRunner>,
    settings: OrchestratorSettings,
    events: Option<EventCallback>,
    titles: Mutex<Vec<JoinHandle<()>>>,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn ConversationStore>,
        model: Arc<dyn ModelClient>,
        registry: Arc<ToolRegistry>,
        runner: Arc<dyn TaskRunner>,
    ) -> Self {
        Self {
            store,
            model,
            registry,
            runner,
            settings: OrchestratorSettings::default(),
            events: None,
            titles: Mutex::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn with_settings(mut self, settings: OrchestratorSettings) -> Self {
        self.settings = settings;
        self
    }

    #[must_use]
    pub fn with_event_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(OrchestratorEvent) + Send + Sync + 'static,
    {
        self.events = Some(Arc::new(callback));
        self
    }

    pub fn store(&self) -> &Arc<dyn ConversationStore> {
        &self.store
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub const fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    /// Hands over the title tasks started so far.
    ///
    /// Titles are generated in the background; a caller about to stop the
    /// runtime awaits these so the titles are stored.
    pub fn take_title_tasks(&self) -> Vec<JoinHandle<()>> {
        self.titles
            .lock()
            .map(|mut tasks| std::mem::take(&mut *tasks))
            .unwrap_or_default()
    }

    fn emit(&self, event: OrchestratorEvent) {
        if let Some(callback) = &self.events {
            callback(event);
        }
    }

    /// Adds a user turn to a conversation and drives it as far as it goes
    /// without waiting for deferred tools.
    ///
    /// Returns the turn as stored afterwards: processed, errored, or still
    /// awaiting deferred results.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::ProviderUnavailable`] when no provider is
    /// registered, [`OrchestratorError::Model`] when a model call fails, and
    /// store errors.
    pub async fn start_conversation(
        &self,
        text: &str,
        conversation_id: Option<Uuid>,
    ) -> Result<Turn, OrchestratorError> {
        if self.registry.is_empty() {
            return Err(OrchestratorError::ProviderUnavailable);
        }

        let (conversation, created) = self.store.find_or_create_conversation(conversation_id)?;
        let turn = self.store.create_turn(Turn::user(conversation.id, text))?;
        info!("Started turn {} in conversation {}", turn.id, conversation.id);

        let advanced = self.advance_turn(turn.id).await;

        if created && self.settings.generate_titles {
            let task = title::spawn_title(
                Arc::clone(&self.model),
                Arc::clone(&self.store),
                conversation.id,
                text.to_string(),
            );
            if let Ok(mut tasks) = self.titles.lock() {
                tasks.retain(|running| !running.is_finished());
                tasks.push(task);
            }
        }

        advanced?;
        Ok(self.store.turn(turn.id)?)
    }

    /// Runs model round trips for a turn until it is processed, errors, or
    /// waits on deferred tools. A turn that is no longer awaiting completion
    /// is left alone, and so is one whose latest batch of tool calls has not
    /// been continued by the join.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::Model`] after marking the turn errored if
    /// the model call fails, and store errors.
    pub async fn advance_turn(&self, turn_id: Uuid) -> Result<(), OrchestratorError> {
        let mut round = 0_u32;
        loop {
            let turn = self.store.turn(turn_id)?;
            if !turn.is_awaiting_completion() {
                debug!("Turn {turn_id} is already settled");
                return Ok(());
            }
            if self.awaits_batch(turn_id)? {
                debug!("Turn {turn_id} still waits on its latest tool batch");
                return Ok(());
            }

            round += 1;
            info!("Executing round trip {round} for turn {turn_id}");
            let response = self.request_reply(&turn).await?;

            // NOTE: this is the only exit that finishes a turn
            if !response.has_tool_uses() {
                let turn = self.store.mark_turn_processed(turn_id)?;
                info!("Turn {turn_id} processed after {round} round trip(s)");
                self.emit(OrchestratorEvent::TurnProcessed { turn });
                return Ok(());
            }

            if !self.dispatch_batch(&response).await? {
                debug!("Turn {turn_id} waits on deferred tools of response {}", response.id);
                return Ok(());
            }
        }
    }

    /// Executes one deferred invocation and, if it settled the last active
    /// invocation of its response, advances the turn.
    ///
    /// Only an invocation currently `queued` is run; any other delivery is a
    /// no-op, which makes repeated delivery safe.
    ///
    /// # Errors
    ///
    /// Store errors, and errors from the turn advance it triggers.
    pub async fn run_deferred(&self, invocation_id: Uuid) -> Result<(), OrchestratorError> {
        if !self
            .store
            .transition(invocation_id, InvocationStatus::Queued, InvocationStatus::Processing)?
        {
            debug!("Invocation {invocation_id} is not queued, ignoring delivery");
            return Ok(());
        }

        let invocation = self.store.invocation(invocation_id)?;
        let settlement = self.execute(&invocation).await;
        if self.finish(invocation_id, settlement)? {
            let response = self.store.response(invocation.response_id)?;
            self.advance_turn(response.turn_id).await?;
        }
        Ok(())
    }

    /// Repairs state left by a stopped process. Call once at startup, before
    /// new work is accepted.
    ///
    /// Invocations left `pending` or `processing` are failed, `queued` ones
    /// are resubmitted, and every fully settled response that was never
    /// continued gets its turn advanced.
    ///
    /// # Errors
    ///
    /// Store errors. Model failures while advancing are logged and skipped.
    pub async fn recover(&self) -> Result<Recovery, OrchestratorError> {
        let mut recovery = Recovery::default();
        let mut to_advance = BTreeSet::new();

        for status in [InvocationStatus::Pending, InvocationStatus::Processing] {
            for invocation in self.store.invocations_with_status(status)? {
                warn!("Invocation {} was interrupted while {}", invocation.id, status.as_str());
                recovery.failed += 1;
                if self.finish(invocation.id, Settlement::Failed(INTERRUPTED_MESSAGE.to_string()))? {
                    to_advance.insert(invocation.response_id);
                }
            }
        }

        for invocation in self.store.invocations_with_status(InvocationStatus::Queued)? {
            match self.runner.submit(invocation.id) {
                Ok(()) => recovery.resubmitted += 1,
                Err(e) => {
                    error!("Could not resubmit invocation {}: {e}", invocation.id);
                    if self.finish(invocation.id, Settlement::Failed(e.to_string()))? {
                        to_advance.insert(invocation.response_id);
                    }
                }
            }
        }

        for status in [InvocationStatus::Completed, InvocationStatus::Failed] {
            for invocation in self.store.invocations_with_status(status)? {
                if !to_advance.contains(&invocation.response_id)
                    && self.store.claim_continuation(invocation.response_id)?
                {
                    to_advance.insert(invocation.response_id);
                }
            }
        }

        for response_id in to_advance {
            let response = self.store.response(response_id)?;
            match self.advance_turn(response.turn_id).await {
                Ok(()) => recovery.advanced += 1,
                Err(e) => warn!("Could not resume turn {}: {e}", response.turn_id),
            }
        }

        info!(
            "Recovery finished: {} failed, {} resubmitted, {} advanced",
            recovery.failed, recovery.resubmitted, recovery.advanced
        );
        Ok(recovery)
    }

    /// True while the latest response of the turn has invocations and the
    /// join has not claimed its continuation.
    fn awaits_batch(&self, turn_id: Uuid) -> Result<bool, OrchestratorError> {
        let Some(latest) = self.store.responses_for_turn(turn_id)?.pop() else {
            return Ok(false);
        };
        if latest.continued {
            return Ok(false);
        }
        Ok(!self.store.invocations_for_response(latest.id)?.is_empty())
    }

    async fn request_reply(&self, turn: &Turn) -> Result<ModelResponse, OrchestratorError> {
        let request = ModelRequest::builder()
            .system(self.settings.system_prompt.clone())
            .messages(history::assemble(self.store.as_ref(), turn)?)
            .tools(self.registry.list_tools())
            .max_tokens(self.settings.max_tokens)
            .build();
        debug!(
            "Model request for turn {}: {} message(s), {} tool(s)",
            turn.id,
            request.messages.len(),
            request.tools.len()
        );

        match self.model.complete(&request).await {
            Ok(reply) => {
                debug!("Received reply {} ({:?})", reply.id, reply.stop_reason);
                Ok(self.store.create_response(ModelResponse::from_reply(turn.id, reply))?)
            }
            Err(e) => {
                let message = e.to_string();
                error!("Model call failed for turn {}: {message}", turn.id);
                let turn = self.store.mark_turn_errored(turn.id, Some(message.clone()))?;
                let turn_id = turn.id;
                self.emit(OrchestratorEvent::TurnErrored { turn });
                Err(OrchestratorError::Model { turn_id, message })
            }
        }
    }

    /// Persists the batch, then dispatches each invocation. Returns true if
    /// an inline settlement claimed the continuation.
    async fn dispatch_batch(&self, response: &ModelResponse) -> Result<bool, OrchestratorError> {
        let pending: Vec<ToolInvocation> = response
            .tool_uses()
            .filter_map(ContentBlock::as_tool_use)
            .map(|(correlation_id, name, input)| {
                ToolInvocation::pending(response.id, correlation_id, name, input.clone())
            })
            .collect();
        // All rows exist before any runs so the join cannot fire early.
        let invocations = self.store.create_invocations(pending)?;
        info!("Response {} requested {} tool call(s)", response.id, invocations.len());

        let mut advance = false;
        for invocation in &invocations {
            advance |= self.dispatch(invocation).await?;
        }
        Ok(advance)
    }

    async fn dispatch(&self, invocation: &ToolInvocation) -> Result<bool, OrchestratorError> {
        let defer = match self.registry.should_defer(&invocation.tool_name) {
            Ok(defer) => defer,
            Err(e) => {
                warn!("Cannot dispatch '{}': {e}", invocation.tool_name);
                self.logger(invocation.id).error(
                    "Tool execution failed",
                    json!({"error_type": e.kind(), "error_message": e.to_string()}),
                );
                return self.finish(invocation.id, Settlement::Failed(e.to_string()));
            }
        };

        if defer {
            if !self
                .store
                .transition(invocation.id, InvocationStatus::Pending, InvocationStatus::Queued)?
            {
                return Ok(false);
            }
            if let Err(e) = self.runner.submit(invocation.id) {
                error!("Could not queue invocation {}: {e}", invocation.id);
                return self.finish(invocation.id, Settlement::Failed(e.to_string()));
            }
            debug!("Queued '{}' as {}", invocation.tool_name, invocation.id);
            return Ok(false);
        }

        if !self
            .store
            .transition(invocation.id, InvocationStatus::Pending, InvocationStatus::Processing)?
        {
            return Ok(false);
        }
        let settlement = self.execute(invocation).await;
        self.finish(invocation.id, settlement)
    }

    async fn execute(&self, invocation: &ToolInvocation) -> Settlement {
        let logger = self.logger(invocation.id);
        logger.info(
            &format!(
                "Initializing {}: {} ...",
                invocation.provider_key(),
                invocation.local_tool_name().replace('_', " ")
            ),
            json!({}),
        );

        let execution = self
            .registry
            .dispatch(&invocation.tool_name, &invocation.arguments, &logger);
        match tokio::time::timeout(self.settings.tool_timeout, execution).await {
            Ok(Ok(outcome)) => outcome.into_settlement(),
            Ok(Err(e)) => {
                warn!("Tool '{}' failed: {e}", invocation.tool_name);
                Settlement::Failed(e.to_string())
            }
            Err(_) => {
                let message = format!(
                    "Tool execution timed out after {}s",
                    self.settings.tool_timeout.as_secs_f64()
                );
                warn!("Tool '{}' ({}): {message}", invocation.tool_name, invocation.id);
                logger.error(&message, json!({}));
                Settlement::Failed(message)
            }
        }
    }

    /// Settles an invocation through the store's join. Returns true for the
    /// one caller that must advance the turn.
    fn finish(&self, invocation_id: Uuid, settlement: Settlement) -> Result<bool, OrchestratorError> {
        let Some(join) = self.store.finish_invocation(invocation_id, settlement)? else {
            debug!("Invocation {invocation_id} was already settled");
            return Ok(false);
        };
        debug!(
            "Invocation {} is {}, {} still active",
            invocation_id,
            join.invocation.status.as_str(),
            join.remaining
        );
        self.emit(OrchestratorEvent::InvocationSettled {
            invocation: join.invocation,
        });
        Ok(join.advance)
    }

    fn logger(&self, invocation_id: Uuid) -> StoreLogger {
        StoreLogger::new(Arc::clone(&self.store), invocation_id, self.events.clone())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::expect_used)]
    #![allow(clippy::panic)]

    use std::sync::Mutex;

    use serde_json::Value;
    use switchboard_common::{LogLevel, MessageContent, ModelReply, Role};
    use switchboard_tools::http::{ApiClient, ApiClientConfig, HttpTool, HttpToolConfig};
    use switchboard_tools::{ToolError, ToolSet};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::runner::QueueRunner;
    use crate::store::{MemoryStore, NoPersistence, StoreSnapshot};
    use crate::test_support::{RecordingRunner, ScriptedModel, StubTool, tool_reply};

    struct Harness {
        store: Arc<MemoryStore>,
        model: Arc<ScriptedModel>,
        runner: Arc<RecordingRunner>,
        orchestrator: Arc<Orchestrator>,
    }

    fn stub_registry(tools: Vec<StubTool>) -> ToolRegistry {
        let mut set = ToolSet::new("stub");
        for tool in tools {
            set.register(Arc::new(tool));
        }
        ToolRegistry::new().with_provider("stub", Arc::new(set)).unwrap()
    }

    fn harness_with(
        store: MemoryStore,
        registry: ToolRegistry,
        script: Vec<Result<ModelReply, String>>,
        runner: RecordingRunner,
        settings: OrchestratorSettings,
    ) -> Harness {
        let store = Arc::new(store);
        let model = Arc::new(ScriptedModel::new(script));
        let runner = Arc::new(runner);
        let orchestrator = Orchestrator::new(
            store.clone(),
            model.clone(),
            Arc::new(registry),
            runner.clone(),
        )
        .with_settings(settings);
        Harness {
            store,
            model,
            runner,
            orchestrator: Arc::new(orchestrator),
        }
    }

    fn harness(registry: ToolRegistry, script: Vec<Result<ModelReply, String>>) -> Harness {
        harness_with(
            MemoryStore::new(),
            registry,
            script,
            RecordingRunner::default(),
            OrchestratorSettings::default(),
        )
    }

    fn text(reply: &str) -> Result<ModelReply, String> {
        Ok(ModelReply::text(format!("msg_{reply}"), "scripted", reply))
    }

    fn results(request: &ModelRequest) -> Vec<ContentBlock> {
        request
            .messages
            .iter()
            .filter_map(|item| match &item.content {
                MessageContent::Blocks(blocks) => Some(blocks.to_vec()),
                MessageContent::Text(_) => None,
            })
            .flatten()
            .filter(|block| matches!(block, ContentBlock::ToolResult { .. }))
            .collect()
    }

    #[tokio::test]
    async fn test_weather_round_trip() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/weather/Paris"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"temp": 18, "error": false})))
            .expect(1)
            .mount(&server)
            .await;

        let config: HttpToolConfig = serde_json::from_value(json!({
            "name": "current",
            "description": "Current weather for a city",
            "inputSchema": {
                "type": "object",
                "properties": {"city": {"type": "string", "description": "City name"}},
                "required": ["city"]
            },
            "request": {"method": "GET", "endpoint": "/weather/{city}"},
            "mapping": {"path": {"city": "city"}},
            "error": {"field": "error", "value": true, "message": "message"}
        }))
        .unwrap();
        let client = ApiClient::new(ApiClientConfig {
            base_url: Some(server.uri()),
            ..ApiClientConfig::default()
        })
        .unwrap();
        let set = ToolSet::new("weather").with_tool(Arc::new(HttpTool::new(config, client).unwrap()));
        let registry = ToolRegistry::new().with_provider("weather", Arc::new(set)).unwrap();

        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        let store = Arc::new(MemoryStore::new());
        let model = Arc::new(ScriptedModel::new(vec![
            Ok(tool_reply("msg_1", &[("toolu_1", "weather.current")])),
            text("It is 18C in Paris."),
        ]));
        let orchestrator = Orchestrator::new(
            store.clone(),
            model.clone(),
            Arc::new(registry),
            Arc::new(RecordingRunner::default()),
        )
        .with_event_callback(move |event| sink.lock().unwrap().push(event));

        let turn = orchestrator
            .start_conversation("what's the weather in Paris", None)
            .await
            .unwrap();
        assert!(turn.processed);
        assert!(!turn.error);

        let responses = store.responses_for_turn(turn.id).unwrap();
        assert_eq!(responses.len(), 2);
        assert!(responses[0].has_tool_uses());
        assert!(responses[0].continued);
        assert!(!responses[1].has_tool_uses());
        assert_eq!(responses[1].text(), "It is 18C in Paris.");

        let invocations = store.invocations_for_response(responses[0].id).unwrap();
        assert_eq!(invocations.len(), 1);
        assert_eq!(invocations[0].status, InvocationStatus::Completed);
        assert_eq!(invocations[0].result, Some(json!({"temp": 18, "error": false})));
        assert!(store.invocations_for_response(responses[1].id).unwrap().is_empty());

        let requests = model.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].tools[0].name, "weather.current");
        assert_eq!(requests[0].system.as_deref(), Some(DEFAULT_SYSTEM_PROMPT));
        assert_eq!(
            results(&requests[1]),
            vec![ContentBlock::ToolResult {
                tool_use_id: "toolu_1".into(),
                content: json!({"temp": 18, "error": false}),
                is_error: false,
            }]
        );
        let roles: Vec<Role> = requests[1].messages.iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::User, Role::Assistant, Role::User]);

        let logs = store.logs_for_invocation(invocations[0].id).unwrap();
        let messages: Vec<&str> = logs.iter().map(|l| l.message.as_str()).collect();
        assert_eq!(
            messages,
            vec!["Initializing weather: current ...", "GET API Request:", "API response successful"]
        );
        assert_eq!(logs[2].level, LogLevel::Success);

        let events = events.lock().unwrap();
        assert_eq!(
            events
                .iter()
                .filter(|e| matches!(e, OrchestratorEvent::LogAppended { .. }))
                .count(),
            3
        );
        assert!(events.iter().any(|e| matches!(
            e,
            OrchestratorEvent::ToolCompleted { payload, .. } if payload == &json!({"temp": 18, "error": false})
        )));
        assert!(events.iter().any(|e| matches!(
            e,
            OrchestratorEvent::InvocationSettled { invocation } if invocation.status == InvocationStatus::Completed
        )));
        assert!(matches!(events.last(), Some(OrchestratorEvent::TurnProcessed { turn: t }) if t.id == turn.id));
    }

    #[tokio::test]
    async fn test_text_reply_finishes_turn() {
        let h = harness(stub_registry(vec![]), vec![text("Hello!")]);
        let turn = h.orchestrator.start_conversation("hi", None).await.unwrap();

        assert!(turn.processed);
        assert_eq!(h.model.calls(), 1);
        let responses = h.store.responses_for_turn(turn.id).unwrap();
        assert_eq!(responses.len(), 1);
        assert!(h.store.invocations_for_response(responses[0].id).unwrap().is_empty());

        // Re-entry on a processed turn makes no model call.
        h.orchestrator.advance_turn(turn.id).await.unwrap();
        assert_eq!(h.model.calls(), 1);
    }

    #[tokio::test]
    async fn test_conversation_continues_with_history() {
        let h = harness(stub_registry(vec![]), vec![text("Hello!"), text("Bye!")]);
        let first = h.orchestrator.start_conversation("hi", None).await.unwrap();
        let second = h
            .orchestrator
            .start_conversation("bye", Some(first.conversation_id))
            .await
            .unwrap();

        assert_eq!(second.conversation_id, first.conversation_id);
        let request = &h.model.requests()[1];
        let texts: Vec<String> = request.messages.iter().map(|m| m.content.text()).collect();
        assert_eq!(texts, vec!["hi", "Hello!", "bye"]);
    }

    #[tokio::test]
    async fn test_no_providers_is_unavailable() {
        let h = harness(ToolRegistry::new(), vec![text("unused")]);
        let err = h.orchestrator.start_conversation("hi", None).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::ProviderUnavailable));
        assert_eq!(h.model.calls(), 0);
    }

    #[tokio::test]
    async fn test_model_failure_marks_turn_errored() {
        let h = harness(stub_registry(vec![]), vec![Err("model overloaded".to_string())]);
        let err = h.orchestrator.start_conversation("hi", None).await.unwrap_err();

        let OrchestratorError::Model { turn_id, message } = err else {
            panic!("expected a model error");
        };
        assert_eq!(message, "model overloaded");
        let turn = h.store.turn(turn_id).unwrap();
        assert!(turn.error);
        assert!(!turn.processed);
        assert_eq!(turn.error_message.as_deref(), Some("model overloaded"));
        assert!(h.store.responses_for_turn(turn_id).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_tools_fail_only_their_invocation() {
        let h = harness(
            stub_registry(vec![StubTool::inline("echo", json!({"echo": true}))]),
            vec![
                Ok(tool_reply(
                    "msg_1",
                    &[("toolu_a", "nowhere.tool"), ("toolu_b", "stub.missing"), ("toolu_c", "stub.echo")],
                )),
                text("Done."),
            ],
        );
        let turn = h.orchestrator.start_conversation("go", None).await.unwrap();
        assert!(turn.processed);

        let response = &h.store.responses_for_turn(turn.id).unwrap()[0];
        let invocations = h.store.invocations_for_response(response.id).unwrap();
        let statuses: Vec<InvocationStatus> = invocations.iter().map(|i| i.status).collect();
        assert_eq!(
            statuses,
            vec![InvocationStatus::Failed, InvocationStatus::Failed, InvocationStatus::Completed]
        );
        assert_eq!(
            invocations[0].error.as_deref(),
            Some(ToolError::ProviderNotFound("nowhere".into()).to_string().as_str())
        );
        assert!(invocations[1].error.as_deref().unwrap().contains("missing"));

        let results = results(&h.model.requests()[1]);
        assert_eq!(results.len(), 3);
        assert!(matches!(&results[0], ContentBlock::ToolResult { is_error: true, .. }));
        assert!(matches!(&results[2], ContentBlock::ToolResult { is_error: false, .. }));

        let logs = h.store.logs_for_invocation(invocations[0].id).unwrap();
        assert_eq!(logs[0].level, LogLevel::Error);
    }

    #[tokio::test]
    async fn test_deferred_tool_resumes_turn_once() {
        let h = harness(
            stub_registry(vec![StubTool::deferred("report", json!({"rows": 3}))]),
            vec![Ok(tool_reply("msg_1", &[("toolu_r", "stub.report")])), text("3 rows.")],
        );
        let turn = h.orchestrator.start_conversation("report", None).await.unwrap();
        assert!(turn.is_awaiting_completion());
        assert_eq!(h.model.calls(), 1);

        let submitted = h.runner.submitted();
        assert_eq!(submitted.len(), 1);
        assert_eq!(
            h.store.invocation(submitted[0]).unwrap().status,
            InvocationStatus::Queued
        );

        h.orchestrator.run_deferred(submitted[0]).await.unwrap();
        assert!(h.store.turn(turn.id).unwrap().processed);
        assert_eq!(h.model.calls(), 2);

        // Redelivery is a no-op.
        h.orchestrator.run_deferred(submitted[0]).await.unwrap();
        assert_eq!(h.model.calls(), 2);
        assert_eq!(
            h.store.invocation(submitted[0]).unwrap().result,
            Some(json!({"rows": 3}))
        );
    }

    #[tokio::test]
    async fn test_advance_waits_for_unsettled_batch() {
        let h = harness(
            stub_registry(vec![StubTool::deferred("report", json!({"rows": 3}))]),
            vec![
                Ok(tool_reply("msg_1", &[("toolu_r", "stub.report")])),
                text("3 rows."),
                text("unexpected"),
            ],
        );
        let turn = h.orchestrator.start_conversation("report", None).await.unwrap();
        assert_eq!(h.model.calls(), 1);

        // Re-entry while the deferred tool is queued makes no model call.
        h.orchestrator.advance_turn(turn.id).await.unwrap();
        assert_eq!(h.model.calls(), 1);
        assert!(h.store.turn(turn.id).unwrap().is_awaiting_completion());

        let invocation_id = h.runner.submitted()[0];
        h.orchestrator.run_deferred(invocation_id).await.unwrap();
        assert_eq!(h.model.calls(), 2);
        assert!(h.store.turn(turn.id).unwrap().processed);

        let results = results(&h.model.requests()[1]);
        assert_eq!(results.len(), 1);
        assert!(matches!(
            &results[0],
            ContentBlock::ToolResult { content, is_error: false, .. } if content == &json!({"rows": 3})
        ));
    }

    #[tokio::test]
    async fn test_inline_and_deferred_join() {
        let h = harness(
            stub_registry(vec![
                StubTool::inline("fast", json!({"fast": 1})),
                StubTool::deferred("slow", json!({"slow": 2})),
            ]),
            vec![
                Ok(tool_reply("msg_1", &[("toolu_s", "stub.slow"), ("toolu_f", "stub.fast")])),
                text("Both done."),
            ],
        );
        let turn = h.orchestrator.start_conversation("both", None).await.unwrap();
        assert!(turn.is_awaiting_completion());

        let response = &h.store.responses_for_turn(turn.id).unwrap()[0];
        let statuses: Vec<InvocationStatus> = h
            .store
            .invocations_for_response(response.id)
            .unwrap()
            .iter()
            .map(|i| i.status)
            .collect();
        assert_eq!(statuses, vec![InvocationStatus::Queued, InvocationStatus::Completed]);
        assert!(!h.store.response(response.id).unwrap().continued);

        h.orchestrator.run_deferred(h.runner.submitted()[0]).await.unwrap();
        assert!(h.store.turn(turn.id).unwrap().processed);
        assert_eq!(h.model.calls(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_deferred_completions_advance_once() {
        for _ in 0..10 {
            let h = harness(
                stub_registry(vec![
                    StubTool::deferred("a", json!({"a": 1})),
                    StubTool::deferred("b", json!({"b": 2})),
                    StubTool::deferred("c", json!({"c": 3})),
                ]),
                vec![
                    Ok(tool_reply(
                        "msg_1",
                        &[("toolu_a", "stub.a"), ("toolu_b", "stub.b"), ("toolu_c", "stub.c")],
                    )),
                    text("All three."),
                ],
            );
            let turn = h.orchestrator.start_conversation("fan out", None).await.unwrap();

            let runs = h.runner.submitted().into_iter().map(|id| {
                let orchestrator = Arc::clone(&h.orchestrator);
                tokio::spawn(async move { orchestrator.run_deferred(id).await })
            });
            for result in futures::future::join_all(runs).await {
                result.unwrap().unwrap();
            }

            assert_eq!(h.model.calls(), 2);
            assert!(h.store.turn(turn.id).unwrap().processed);
            assert_eq!(h.store.responses_for_turn(turn.id).unwrap().len(), 2);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_queue_runner_end_to_end() {
        let (runner, queue) = QueueRunner::channel();
        let store = Arc::new(MemoryStore::new());
        let model = Arc::new(ScriptedModel::new(vec![
            Ok(tool_reply("msg_1", &[("toolu_a", "stub.a"), ("toolu_b", "stub.b")])),
            text("Finished."),
        ]));
        let orchestrator = Arc::new(Orchestrator::new(
            store.clone(),
            model.clone(),
            Arc::new(stub_registry(vec![
                StubTool::deferred("a", json!({})),
                StubTool::deferred("b", json!({})),
            ])),
            Arc::new(runner),
        ));
        let _worker = Arc::clone(&orchestrator).serve_deferred(queue);

        let turn = orchestrator.start_conversation("queue it", None).await.unwrap();
        let processed = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if store.turn(turn.id).unwrap().processed {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await;
        assert!(processed.is_ok(), "turn never finished");
        assert_eq!(model.calls(), 2);
    }

    #[tokio::test]
    async fn test_tool_timeout_fails_invocation() {
        let h = harness_with(
            MemoryStore::new(),
            stub_registry(vec![StubTool::slow("hang", Duration::from_secs(30))]),
            vec![Ok(tool_reply("msg_1", &[("toolu_h", "stub.hang")])), text("It timed out.")],
            RecordingRunner::default(),
            OrchestratorSettings {
                tool_timeout: Duration::from_millis(20),
                ..OrchestratorSettings::default()
            },
        );
        let turn = h.orchestrator.start_conversation("hang", None).await.unwrap();
        assert!(turn.processed);

        let response = &h.store.responses_for_turn(turn.id).unwrap()[0];
        let invocation = &h.store.invocations_for_response(response.id).unwrap()[0];
        assert_eq!(invocation.status, InvocationStatus::Failed);
        assert!(invocation.error.as_deref().unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn test_runner_rejection_fails_invocation() {
        let h = harness_with(
            MemoryStore::new(),
            stub_registry(vec![StubTool::deferred("report", json!({}))]),
            vec![Ok(tool_reply("msg_1", &[("toolu_r", "stub.report")])), text("Could not run it.")],
            RecordingRunner::closed(),
            OrchestratorSettings::default(),
        );
        let turn = h.orchestrator.start_conversation("report", None).await.unwrap();
        assert!(turn.processed);

        let response = &h.store.responses_for_turn(turn.id).unwrap()[0];
        let invocation = &h.store.invocations_for_response(response.id).unwrap()[0];
        assert_eq!(invocation.status, InvocationStatus::Failed);
        assert_eq!(h.model.calls(), 2);
    }

    fn stranded(statuses: &[InvocationStatus], continued: bool) -> (MemoryStore, Uuid, Vec<Uuid>) {
        let store = MemoryStore::new();
        let (conversation, _) = store.find_or_create_conversation(None).unwrap();
        let turn = store.create_turn(Turn::user(conversation.id, "resume")).unwrap();
        let uses: Vec<(String, &str)> = (0..statuses.len())
            .map(|i| (format!("toolu_{i}"), "stub.echo"))
            .collect();
        let uses: Vec<(&str, &str)> = uses.iter().map(|(id, name)| (id.as_str(), *name)).collect();
        let response = store
            .create_response(ModelResponse::from_reply(turn.id, tool_reply("msg_1", &uses)))
            .unwrap();
        let invocations = store
            .create_invocations(
                uses.iter()
                    .map(|(id, name)| ToolInvocation::pending(response.id, *id, *name, Value::Null))
                    .collect(),
            )
            .unwrap();

        let mut snapshot: StoreSnapshot = store.snapshot().unwrap();
        for (row, status) in snapshot.invocations.iter_mut().zip(statuses) {
            row.status = *status;
        }
        snapshot.responses[0].continued = continued;
        (
            MemoryStore::with_sink(snapshot, NoPersistence),
            turn.id,
            invocations.iter().map(|i| i.id).collect(),
        )
    }

    #[tokio::test]
    async fn test_recover_fails_interrupted_and_resubmits_queued() {
        let (store, turn_id, ids) = stranded(
            &[InvocationStatus::Processing, InvocationStatus::Queued, InvocationStatus::Pending],
            false,
        );
        let h = harness_with(
            store,
            stub_registry(vec![StubTool::deferred("echo", json!({"echo": true}))]),
            vec![text("Recovered.")],
            RecordingRunner::default(),
            OrchestratorSettings::default(),
        );

        let recovery = h.orchestrator.recover().await.unwrap();
        assert_eq!(
            recovery,
            Recovery {
                failed: 2,
                resubmitted: 1,
                advanced: 0
            }
        );
        assert_eq!(h.runner.submitted(), vec![ids[1]]);
        assert_eq!(
            h.store.invocation(ids[0]).unwrap().error.as_deref(),
            Some(INTERRUPTED_MESSAGE)
        );
        assert_eq!(h.model.calls(), 0);

        h.orchestrator.run_deferred(ids[1]).await.unwrap();
        assert!(h.store.turn(turn_id).unwrap().processed);
        assert_eq!(h.model.calls(), 1);
    }

    #[tokio::test]
    async fn test_recover_advances_settled_batch() {
        let (store, turn_id, _) = stranded(
            &[InvocationStatus::Completed, InvocationStatus::Failed],
            false,
        );
        let h = harness_with(
            store,
            stub_registry(vec![StubTool::inline("echo", json!({}))]),
            vec![text("Picked up where we left off.")],
            RecordingRunner::default(),
            OrchestratorSettings::default(),
        );

        let recovery = h.orchestrator.recover().await.unwrap();
        assert_eq!(recovery.advanced, 1);
        assert!(h.store.turn(turn_id).unwrap().processed);
        assert_eq!(h.model.calls(), 1);

        // Nothing left to do the second time.
        assert_eq!(h.orchestrator.recover().await.unwrap(), Recovery::default());
        assert_eq!(h.model.calls(), 1);
    }

    #[tokio::test]
    async fn test_recover_leaves_continued_batch_alone() {
        let (store, turn_id, _) = stranded(&[InvocationStatus::Completed], true);
        let h = harness_with(
            store,
            stub_registry(vec![StubTool::inline("echo", json!({}))]),
            vec![],
            RecordingRunner::default(),
            OrchestratorSettings::default(),
        );

        assert_eq!(h.orchestrator.recover().await.unwrap(), Recovery::default());
        assert!(h.store.turn(turn_id).unwrap().is_awaiting_completion());
        assert_eq!(h.model.calls(), 0);
    }

    #[tokio::test]
    async fn test_new_conversation_gets_title() {
        let h = harness_with(
            MemoryStore::new(),
            stub_registry(vec![]),
            vec![text("Hello there!"), text("Friendly Greeting"), text("Hello again!")],
            RecordingRunner::default(),
            OrchestratorSettings {
                generate_titles: true,
                ..OrchestratorSettings::default()
            },
        );
        let turn = h.orchestrator.start_conversation("hello", None).await.unwrap();

        let tasks = h.orchestrator.take_title_tasks();
        assert_eq!(tasks.len(), 1);
        for task in tasks {
            tokio::time::timeout(Duration::from_secs(5), task).await.unwrap().unwrap();
        }
        assert_eq!(
            h.store.conversation(turn.conversation_id).unwrap().title.as_deref(),
            Some("Friendly Greeting")
        );
        assert_eq!(h.model.requests()[1].max_tokens, Some(100));
        assert!(h.orchestrator.take_title_tasks().is_empty());

        // A continued conversation is not titled again.
        h.orchestrator
            .start_conversation("again", Some(turn.conversation_id))
            .await
            .unwrap();
        assert!(h.orchestrator.take_title_tasks().is_empty());
        assert_eq!(h.model.calls(), 3);
    }
}
