//! Conversation titles.

use std::sync::Arc;

use anyhow::Result;
use log::{debug, warn};
use tokio::task::JoinHandle;
use uuid::Uuid;

use switchboard_client::ModelClient;
use switchboard_common::{HistoryItem, ModelRequest, Role};

use crate::store::ConversationStore;

const TITLE_PROMPT: &str = "Generate a concise, descriptive title (maximum 5 words) for a conversation \
     that starts with this message. Respond with only the title, no quotes or explanations: ";

const TITLE_MAX_TOKENS: u32 = 100;

/// Asks the model for a title and stores it.
///
/// Returns the stored title, or `None` when the model answered with nothing
/// usable.
///
/// # Errors
///
/// Returns an error if the model call or the store write fails.
pub async fn generate_title(
    model: &dyn ModelClient,
    store: &dyn ConversationStore,
    conversation_id: Uuid,
    first_message: &str,
) -> Result<Option<String>> {
    let request = ModelRequest::builder()
        .messages(vec![HistoryItem::new(
            Role::User,
            format!("{TITLE_PROMPT}{first_message}"),
        )])
        .max_tokens(TITLE_MAX_TOKENS)
        .build();

    let reply = model.complete(&request).await?;
    let Some(title) = reply.first_text().map(clean_title).filter(|t| !t.is_empty()) else {
        debug!("Model returned no title for conversation {conversation_id}");
        return Ok(None);
    };

    store.set_title(conversation_id, &title)?;
    debug!("Titled conversation {conversation_id}: {title}");
    Ok(Some(title))
}

/// Runs [`generate_title`] in the background. Failures are logged only.
///
/// The task is cancelled if the runtime shuts down first; await the handle
/// to make sure the title lands.
pub fn spawn_title(
    model: Arc<dyn ModelClient>,
    store: Arc<dyn ConversationStore>,
    conversation_id: Uuid,
    first_message: String,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        if let Err(e) = generate_title(model.as_ref(), store.as_ref(), conversation_id, &first_message).await {
            warn!("Failed to generate title for conversation {conversation_id}: {e}");
        }
    })
}

fn clean_title(raw: &str) -> String {
    raw.trim().trim_matches(|c| c == '"' || c == '\'').trim().to_string()
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use switchboard_common::ModelReply;

    use super::*;
    use crate::store::MemoryStore;
    use crate::test_support::ScriptedModel;

    #[tokio::test]
    async fn test_title_is_cleaned_and_stored() {
        let store = MemoryStore::new();
        let (conversation, _) = store.find_or_create_conversation(None).unwrap();
        let model = ScriptedModel::new(vec![Ok(ModelReply::text("t", "m", "  \"Paris Weather Check\"\n"))]);

        let title = generate_title(&model, &store, conversation.id, "weather in Paris?")
            .await
            .unwrap();
        assert_eq!(title.as_deref(), Some("Paris Weather Check"));
        assert_eq!(
            store.conversation(conversation.id).unwrap().title.as_deref(),
            Some("Paris Weather Check")
        );

        let request = &model.requests()[0];
        assert_eq!(request.max_tokens, Some(TITLE_MAX_TOKENS));
        assert!(request.tools.is_empty());
        assert!(request.messages[0].content.text().ends_with("weather in Paris?"));
    }

    #[tokio::test]
    async fn test_blank_title_is_not_stored() {
        let store = MemoryStore::new();
        let (conversation, _) = store.find_or_create_conversation(None).unwrap();
        let model = ScriptedModel::new(vec![Ok(ModelReply::text("t", "m", " \"\" "))]);

        let title = generate_title(&model, &store, conversation.id, "hi").await.unwrap();
        assert!(title.is_none());
        assert!(store.conversation(conversation.id).unwrap().title.is_none());
    }

    #[tokio::test]
    async fn test_model_failure_is_an_error() {
        let store = MemoryStore::new();
        let (conversation, _) = store.find_or_create_conversation(None).unwrap();
        let model = ScriptedModel::new(vec![Err("overloaded".to_string())]);

        assert!(generate_title(&model, &store, conversation.id, "hi").await.is_err());
        assert!(store.conversation(conversation.id).unwrap().title.is_none());
    }
}
