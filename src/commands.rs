// Entry points the front-end calls for turns and history

use crate::auth::Identity;
use crate::error::ChatError;
use crate::models::{
    provisional_id, Conversation, ConversationSummary, Message, MessageMetadata, MessagePatch, MessagePayload,
    MessageResponse, Role,
};
use crate::state::AppState;
use crate::storage::LocalHistory;

pub const SEND_FAILED: &str = "Failed to send message. Please try again.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    EmptyInput,
    IdentityUnresolved,
    TurnInFlight,
    NotRetryable, // the message is missing or did not fail
}

/// How a submitted turn ended. The same outcome is always mirrored in state.
#[derive(Debug)]
pub enum TurnOutcome {
    Rejected(RejectReason),
    Completed,
    Failed(ChatError),
}

impl TurnOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, TurnOutcome::Completed)
    }
}

/// Runs one user turn: optimistic insert, a single backend call, then
/// reconcile on success or roll back the placeholder on failure.
pub async fn submit_turn(state: &AppState, input: &str) -> TurnOutcome {
    run_turn(state, input, None).await
}

// `replacing` names a failed user message that is removed in the same
// mutation that opens the new turn, so a rejected retry keeps it.
async fn run_turn(state: &AppState, input: &str, replacing: Option<&str>) -> TurnOutcome {
    let text = input.trim();
    if text.is_empty() {
        return TurnOutcome::Rejected(RejectReason::EmptyInput);
    }
    let identity = state.identity.identity();
    if !identity.is_resolved() {
        log::warn!("Turn submitted before identity resolved, ignoring");
        return TurnOutcome::Rejected(RejectReason::IdentityUnresolved);
    }

    let conversation_id = state.chat.read(|s| s.conversation_id().map(str::to_string));
    let user_id = provisional_id(Role::User);
    let assistant_id = provisional_id(Role::Assistant);
    let user_message = Message::optimistic_user(user_id.clone(), conversation_id.as_deref(), text);
    let placeholder = Message::assistant_placeholder(assistant_id.clone(), conversation_id.as_deref());

    // Clears follow-ups and inserts both messages, unless a turn is already pending
    let opened = state.chat.apply(|s| {
        if !s.begin_turn(user_message.clone(), placeholder) {
            return false;
        }
        if let Some(failed_id) = replacing {
            s.remove_optimistic(failed_id);
        }
        true
    });
    if !opened {
        log::warn!("Turn rejected: another turn is still in flight");
        return TurnOutcome::Rejected(RejectReason::TurnInFlight);
    }
    let _loading = state.chat.begin_loading();

    log::info!(
        "Submitting turn {} to conversation {}",
        user_id,
        conversation_id.as_deref().unwrap_or("<new>")
    );
    let payload = MessagePayload {
        message: text.to_string(),
        conversation_id: conversation_id.clone(),
    };
    let token = state.identity.access_token();
    match state.api_provider.send_message(token.as_deref(), &payload).await {
        Ok(response) => {
            confirm_turn(state, &identity, user_message, &assistant_id, conversation_id.is_none(), response).await;
            TurnOutcome::Completed
        }
        Err(e) => {
            log::error!("Error sending message: {:?}", e);
            let detail = e.detail().unwrap_or(SEND_FAILED).to_string();
            state.chat.apply(|s| {
                // Never leave a broken assistant bubble; keep what the user asked
                let removed = s.remove_optimistic(&assistant_id);
                let annotated = s.replace_optimistic(&user_id, MessagePatch::failed(detail.clone()));
                if removed || annotated {
                    s.set_error(Some(detail));
                }
                removed || annotated
            });
            TurnOutcome::Failed(e)
        }
    }
}

// Success half of submit_turn
async fn confirm_turn(
    state: &AppState,
    identity: &Identity,
    user_message: Message,
    assistant_id: &str,
    was_new: bool,
    response: MessageResponse,
) {
    let follow_ups = response.follow_up_questions.clone().unwrap_or_default();
    let confirmed_user_id = response
        .user_message_id
        .clone()
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| user_message.id.clone());

    let user_patch = MessagePatch {
        id: Some(confirmed_user_id.clone()),
        conversation_id: Some(response.conversation_id.clone()),
        ..MessagePatch::default()
    };
    let assistant_patch = MessagePatch {
        id: Some(response.assistant_message_id.clone()),
        conversation_id: Some(response.conversation_id.clone()),
        content: Some(response.answer.clone()),
        metadata: Some(MessageMetadata {
            token_usage: response.token_usage.clone(),
            follow_up_questions: response.follow_up_questions.clone(),
            llm_provider: None,
            error: None,
        }),
        created_at: response.created_at,
        error: None,
    };

    let applied = state.chat.apply(|s| {
        // The placeholder is gone if the view was reset while we waited
        if !s.contains(assistant_id) {
            return false;
        }
        if s.current_conversation.is_none() {
            s.set_conversation(Some(Conversation::started_with(
                response.conversation_id.clone(),
                identity.owner_id(),
                &user_message.content,
            )));
        }
        s.replace_optimistic(&user_message.id, user_patch.clone());
        s.replace_optimistic(assistant_id, assistant_patch.clone());
        if !follow_ups.is_empty() {
            s.set_follow_ups(follow_ups.clone());
        }
        s.disclaimer = Some(response.disclaimer.clone()).filter(|d| !d.is_empty());
        s.set_error(None);
        true
    });
    if !applied {
        log::info!("Turn for {} finished after the view changed; state left untouched", response.conversation_id);
    }

    // Guests keep their history on the device; only confirmed copies are written
    if identity.is_guest() {
        let mut user_confirmed = user_message;
        user_confirmed.apply(user_patch);
        let mut assistant_confirmed = Message::assistant_placeholder(assistant_id.to_string(), None);
        assistant_confirmed.apply(assistant_patch);

        let mut storage = state.storage.lock().await;
        if was_new {
            let conversation = Conversation::started_with(response.conversation_id.clone(), None, &user_confirmed.content);
            storage.upsert_conversation(conversation).await;
        }
        storage.append_message(&response.conversation_id, user_confirmed).await;
        storage.append_message(&response.conversation_id, assistant_confirmed).await;
    }
    log::info!("Turn confirmed in conversation {}", response.conversation_id);
}

/// Sends a suggested question as the next turn.
pub async fn select_suggestion(state: &AppState, question: &str) -> TurnOutcome {
    log::info!("Selected suggestion: {}", question);
    state.chat.apply(|s| s.clear_follow_ups());
    submit_turn(state, question).await
}

/// Resubmits a failed user message. The failed copy is only removed once the
/// fresh turn with the same text has been accepted.
pub async fn retry_turn(state: &AppState, failed_message_id: &str) -> TurnOutcome {
    let content = state.chat.read(|s| {
        s.messages
            .iter()
            .find(|m| m.id == failed_message_id && m.role == Role::User && m.error().is_some())
            .map(|m| m.content.clone())
    });
    let Some(content) = content else {
        return TurnOutcome::Rejected(RejectReason::NotRetryable);
    };
    log::info!("Retrying failed message {}", failed_message_id);
    run_turn(state, &content, Some(failed_message_id)).await
}

/// Conversation summaries for the history sidebar.
pub async fn list_conversations(state: &AppState) -> Result<Vec<ConversationSummary>, ChatError> {
    match state.identity.identity() {
        Identity::Unresolved => Ok(Vec::new()),
        Identity::Guest(_) => {
            let storage = state.storage.lock().await;
            Ok(storage.list_summaries())
        }
        Identity::Authenticated(user) => {
            log::info!("Fetching conversations for user: {}", user.id);
            let token = state.identity.access_token();
            state.api_provider.list_conversations(token.as_deref()).await
        }
    }
}

/// Deletes a conversation. Only guest history can be deleted so far.
pub async fn delete_conversation(state: &AppState, conversation_id: &str) -> Result<(), ChatError> {
    log::warn!("Requested to delete conversation ID: {}", conversation_id);
    match state.identity.identity() {
        Identity::Guest(_) => {
            let deleted = state.storage.lock().await.delete_conversation(conversation_id).await;
            if !deleted {
                return Err(ChatError::NotFound(conversation_id.to_string()));
            }
            // Leave nothing of a deleted conversation on screen
            state.chat.apply(|s| s.conversation_id() == Some(conversation_id) && s.reset());
            Ok(())
        }
        Identity::Authenticated(_) => Err(ChatError::NotImplemented("Deleting conversations")),
        Identity::Unresolved => Err(ChatError::Auth("Identity not resolved yet".into())),
    }
}

pub async fn clear_guest_history(state: &AppState) {
    state.storage.lock().await.clear_all().await;
}

/// The full guest history, e.g. to migrate it after linking an account.
pub async fn export_guest_history(state: &AppState) -> LocalHistory {
    state.storage.lock().await.export()
}
