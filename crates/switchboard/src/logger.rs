use std::sync::Arc;

use log::{debug, warn};
use serde_json::Value;
use uuid::Uuid;

use switchboard_common::{LogEntry, LogLevel};
use switchboard_tools::InvocationLogger;

use crate::events::{EventCallback, OrchestratorEvent};
use crate::store::ConversationStore;

/// Invocation logger backed by the store's log trail.
///
/// Scoped to one invocation. Failing to write a log line never fails the
/// tool; the problem is reported on the process log instead.
pub struct StoreLogger {
    store: Arc<dyn ConversationStore>,
    invocation_id: Uuid,
    events: Option<EventCallback>,
}

impl StoreLogger {
    pub fn new(store: Arc<dyn ConversationStore>, invocation_id: Uuid, events: Option<EventCallback>) -> Self {
        Self {
            store,
            invocation_id,
            events,
        }
    }

    fn emit(&self, event: OrchestratorEvent) {
        if let Some(callback) = &self.events {
            callback(event);
        }
    }
}

impl InvocationLogger for StoreLogger {
    fn log(&self, level: LogLevel, message: &str, context: Value) {
        match self
            .store
            .append_log(LogEntry::new(self.invocation_id, level, message, context))
        {
            Ok(entry) => self.emit(OrchestratorEvent::LogAppended { entry }),
            Err(e) => warn!("Dropped {level} log for invocation {}: {e}", self.invocation_id),
        }
    }

    fn complete(&self, payload: &Value) {
        debug!("Invocation {} reported completion", self.invocation_id);
        self.emit(OrchestratorEvent::ToolCompleted {
            invocation_id: self.invocation_id,
            payload: payload.clone(),
        });
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use std::sync::Mutex;

    use serde_json::json;
    use switchboard_common::{ModelReply, ModelResponse, ToolInvocation, Turn};

    use super::*;
    use crate::store::MemoryStore;

    #[test]
    fn test_logs_land_in_store_and_emit_events() {
        let store = Arc::new(MemoryStore::new());
        let (conversation, _) = store.find_or_create_conversation(None).unwrap();
        let turn = store.create_turn(Turn::user(conversation.id, "hi")).unwrap();
        let response = store
            .create_response(ModelResponse::from_reply(turn.id, ModelReply::text("r", "m", "")))
            .unwrap();
        let invocation = store
            .create_invocations(vec![ToolInvocation::pending(response.id, "c", "p.t", json!({}))])
            .unwrap()
            .remove(0);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let callback: EventCallback = Arc::new(move |event| sink.lock().unwrap().push(event));
        let logger = StoreLogger::new(store.clone(), invocation.id, Some(callback));

        logger.info("Initializing p: t ...", json!({}));
        logger.success("done", json!({"n": 1}));
        logger.complete(&json!({"ok": true}));

        let logs = store.logs_for_invocation(invocation.id).unwrap();
        assert_eq!(logs.len(), 2);
        assert_eq!(logs[1].level, LogLevel::Success);
        assert_eq!(logs[1].context, json!({"n": 1}));

        let events = seen.lock().unwrap();
        assert_eq!(events.len(), 3);
        assert!(matches!(
            &events[2],
            OrchestratorEvent::ToolCompleted { invocation_id, payload }
                if *invocation_id == invocation.id && payload == &json!({"ok": true})
        ));
    }

    #[test]
    fn test_unknown_invocation_is_swallowed() {
        let store: Arc<dyn ConversationStore> = Arc::new(MemoryStore::new());
        let logger = StoreLogger::new(store, Uuid::new_v4(), None);
        logger.error("nowhere to go", json!({}));
    }
}
