//! Chooses which conversation is active and loads it into the chat state.
//!
//! The front-end calls `load_conversation` whenever the route (a conversation
//! id or nothing) or the identity changes. Every load starts from a clean
//! view so nothing of the previous conversation flashes through.

use crate::auth::Identity;
use crate::error::ChatError;
use crate::models::{Conversation, Message, Role};
use crate::state::AppState;

/// What a route means for the current identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadPlan {
    AwaitIdentity,
    NewConversation,
    Local(String),
    Remote(String),
}

/// Where a load ended up. Mirrors what the chat state now shows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionStatus {
    IdentityPending,
    NewConversation,
    Loaded(String),
    Error(String),
    /// Another load or a new conversation replaced the view first; nothing was applied.
    Superseded,
}

pub fn plan_load(route: Option<&str>, identity: &Identity) -> LoadPlan {
    let id = route.map(str::trim).filter(|id| !id.is_empty());
    match (identity, id) {
        (Identity::Unresolved, _) => LoadPlan::AwaitIdentity,
        (_, None) => LoadPlan::NewConversation,
        (Identity::Guest(_), Some(id)) => LoadPlan::Local(id.to_string()),
        (Identity::Authenticated(_), Some(id)) => LoadPlan::Remote(id.to_string()),
    }
}

pub async fn load_conversation(state: &AppState, route: Option<&str>) -> SessionStatus {
    let (id, local) = match plan_load(route, &state.identity.identity()) {
        LoadPlan::AwaitIdentity => {
            log::debug!("Identity not resolved yet, deferring load");
            return SessionStatus::IdentityPending;
        }
        LoadPlan::NewConversation => {
            log::info!("Starting new conversation");
            state.chat.apply(|s| s.reset());
            return SessionStatus::NewConversation;
        }
        LoadPlan::Local(id) => (id, true),
        LoadPlan::Remote(id) => (id, false),
    };

    state.chat.apply(|s| s.reset());
    let loading = state.chat.begin_loading();
    let epoch = loading.epoch();

    log::info!("Loading conversation: {}", id);
    let loaded = if local {
        state
            .storage
            .lock()
            .await
            .get_conversation(&id)
            .ok_or(ChatError::NotFound(id))
    } else {
        let token = state.identity.access_token();
        state.api_provider.fetch_conversation(token.as_deref(), &id).await
    };

    // Results for a view that has since been replaced are dropped
    match loaded {
        Ok((conversation, messages)) => {
            let id = conversation.id.clone();
            match state.chat.apply_if_current(epoch, |s| populate(s, conversation, messages)) {
                Some(_) => SessionStatus::Loaded(id),
                None => {
                    log::info!("Load of {} finished after the view changed, discarding", id);
                    SessionStatus::Superseded
                }
            }
        }
        Err(e) => {
            log::error!("Error loading conversation: {:?}", e);
            let message = e.detail().map(str::to_string).unwrap_or_else(|| e.to_string());
            match state.chat.apply_if_current(epoch, |s| s.set_error(Some(message.clone()))) {
                Some(_) => SessionStatus::Error(message),
                None => SessionStatus::Superseded,
            }
        }
    }
}

fn populate(state: &mut crate::chat::ChatState, conversation: Conversation, messages: Vec<Message>) -> bool {
    // Follow-ups belong to the latest answer only
    let follow_ups = messages
        .iter()
        .rev()
        .find(|m| m.role == Role::Assistant)
        .and_then(|m| m.metadata.as_ref())
        .and_then(|m| m.follow_up_questions.clone())
        .unwrap_or_default();

    state.set_conversation(Some(conversation));
    for message in messages {
        state.append_confirmed(message);
    }
    state.set_follow_ups(follow_ups);
    true
}
