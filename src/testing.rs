//! Mock collaborators for testing
//!
//! These let the commands and the session layer run without a network.

use crate::api::ChatBackend;
use crate::auth::{Identity, StaticIdentity, User};
use crate::error::ChatError;
use crate::models::{Conversation, ConversationSummary, Message, MessagePayload, MessageResponse, TokenUsage};
use crate::state::AppState;
use crate::storage::{LocalHistoryStore, MemoryKeyValueStore};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;
use uuid::Uuid;

/// Backend that answers from a queue and records every request.
#[derive(Default)]
pub struct MockChatBackend {
    responses: Mutex<VecDeque<Result<MessageResponse, ChatError>>>,
    /// (access token, payload) of every send
    pub requests: Mutex<Vec<(Option<String>, MessagePayload)>>,
    fetches: Mutex<Vec<String>>,
    summaries: Mutex<Vec<ConversationSummary>>,
    conversations: Mutex<HashMap<String, (Conversation, Vec<Message>)>>,
    gate: Mutex<Option<oneshot::Receiver<()>>>,
}

impl MockChatBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queue_response(&self, response: MessageResponse) {
        self.responses.lock().unwrap().push_back(Ok(response));
    }

    pub fn queue_error(&self, error: ChatError) {
        self.responses.lock().unwrap().push_back(Err(error));
    }

    pub fn with_summaries(self, summaries: Vec<ConversationSummary>) -> Self {
        *self.summaries.lock().unwrap() = summaries;
        self
    }

    pub fn with_conversation(self, conversation: Conversation, messages: Vec<Message>) -> Self {
        self.conversations
            .lock()
            .unwrap()
            .insert(conversation.id.clone(), (conversation, messages));
        self
    }

    /// Makes the next send or fetch wait until the returned sender fires (or is dropped).
    pub fn hold_next(&self) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        *self.gate.lock().unwrap() = Some(rx);
        tx
    }

    pub fn recorded_requests(&self) -> Vec<(Option<String>, MessagePayload)> {
        self.requests.lock().unwrap().clone()
    }

    /// Conversation ids passed to `fetch_conversation`, in call order.
    pub fn recorded_fetches(&self) -> Vec<String> {
        self.fetches.lock().unwrap().clone()
    }

    async fn pass_gate(&self) {
        let gate = self.gate.lock().unwrap().take();
        if let Some(gate) = gate {
            let _ = gate.await;
        }
    }
}

#[async_trait]
impl ChatBackend for MockChatBackend {
    async fn send_message(
        &self,
        access_token: Option<&str>,
        payload: &MessagePayload,
    ) -> Result<MessageResponse, ChatError> {
        self.requests
            .lock()
            .unwrap()
            .push((access_token.map(str::to_string), payload.clone()));
        self.pass_gate().await;
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(ChatError::Network("No mock response queued".into())))
    }

    async fn list_conversations(&self, _access_token: Option<&str>) -> Result<Vec<ConversationSummary>, ChatError> {
        Ok(self.summaries.lock().unwrap().clone())
    }

    async fn fetch_conversation(
        &self,
        _access_token: Option<&str>,
        conversation_id: &str,
    ) -> Result<(Conversation, Vec<Message>), ChatError> {
        self.fetches.lock().unwrap().push(conversation_id.to_string());
        self.pass_gate().await;
        self.conversations
            .lock()
            .unwrap()
            .get(conversation_id)
            .cloned()
            .ok_or(ChatError::NotImplemented("Loading existing chats"))
    }
}

/// A successful backend answer.
pub fn answer(conversation_id: &str, assistant_message_id: &str, text: &str, follow_ups: &[&str]) -> MessageResponse {
    MessageResponse {
        conversation_id: conversation_id.to_string(),
        user_message_id: None,
        assistant_message_id: assistant_message_id.to_string(),
        answer: text.to_string(),
        follow_up_questions: Some(follow_ups.iter().map(|s| s.to_string()).collect()),
        token_usage: Some(TokenUsage {
            prompt_tokens: Some(12),
            completion_tokens: Some(30),
            total_tokens: Some(42),
        }),
        disclaimer: "General guidance only.".to_string(),
        created_at: None,
    }
}

pub fn signed_in_user() -> User {
    User {
        id: Uuid::new_v4(),
        email: Some("freelancer@example.com".into()),
        is_anonymous: false,
    }
}

/// App state wired to mocks, with an in-memory local store.
pub struct TestApp {
    pub app: AppState,
    pub backend: Arc<MockChatBackend>,
    pub identity: Arc<StaticIdentity>,
    pub kv: Arc<MemoryKeyValueStore>,
}

impl TestApp {
    pub async fn with(identity: Identity, backend: MockChatBackend) -> Self {
        let kv = Arc::new(MemoryKeyValueStore::new());
        let storage = LocalHistoryStore::load(kv.clone()).await;
        let backend = Arc::new(backend);
        let identity = Arc::new(StaticIdentity::new(identity).with_token("test-token"));
        let app = AppState::new(storage, backend.clone(), identity.clone());
        Self {
            app,
            backend,
            identity,
            kv,
        }
    }

    pub async fn guest() -> Self {
        Self::with(Identity::Guest(None), MockChatBackend::new()).await
    }

    pub async fn authenticated() -> Self {
        Self::with(Identity::Authenticated(signed_in_user()), MockChatBackend::new()).await
    }
}
