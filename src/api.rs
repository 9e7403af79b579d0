use crate::error::ChatError;
use crate::models::{Conversation, ConversationSummary, Message, MessagePayload, MessageResponse};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;

// Trait defining the backend the core talks to for generation and history
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Sends one user message. A `None` conversation id asks for a new conversation.
    async fn send_message(
        &self,
        access_token: Option<&str>,
        payload: &MessagePayload,
    ) -> Result<MessageResponse, ChatError>;

    /// Conversation summaries for the signed-in user.
    async fn list_conversations(&self, access_token: Option<&str>) -> Result<Vec<ConversationSummary>, ChatError>;

    /// A conversation and its messages.
    async fn fetch_conversation(
        &self,
        access_token: Option<&str>,
        conversation_id: &str,
    ) -> Result<(Conversation, Vec<Message>), ChatError>;
}

// FastAPI-style error body
#[derive(Deserialize, Debug)]
struct ErrorBody {
    detail: serde_json::Value,
}

pub struct HttpChatBackend {
    client: Client,
    base_url: String,
}

impl HttpChatBackend {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn authorize(request: RequestBuilder, access_token: Option<&str>) -> RequestBuilder {
        match access_token {
            Some(token) => request.bearer_auth(token),
            None => {
                log::debug!("No access token available for backend request");
                request
            }
        }
    }

    // Maps non-success responses to ChatError::Backend, pulling out `detail`
    async fn check(response: Response) -> Result<Response, ChatError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        if status == StatusCode::UNAUTHORIZED {
            log::warn!("Received 401 Unauthorized from backend");
        }
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "<Failed to read error body>".to_string());
        log::error!("Backend request failed with status {}: {}", status, body);
        Err(ChatError::Backend {
            status: status.as_u16(),
            detail: error_detail(&body).unwrap_or_else(|| format!("Request failed with status {}", status)),
        })
    }
}

/// Human-readable `detail` from an error body, if it has one.
fn error_detail(body: &str) -> Option<String> {
    let parsed: ErrorBody = serde_json::from_str(body).ok()?;
    match parsed.detail {
        serde_json::Value::String(s) if !s.trim().is_empty() => Some(s),
        serde_json::Value::Null => None,
        // Validation errors come back as a list of objects
        other => Some(other.to_string()),
    }
}

#[async_trait]
impl ChatBackend for HttpChatBackend {
    async fn send_message(
        &self,
        access_token: Option<&str>,
        payload: &MessagePayload,
    ) -> Result<MessageResponse, ChatError> {
        log::info!(
            "Sending message to backend (conversation: {})",
            payload.conversation_id.as_deref().unwrap_or("<new>")
        );
        let request = self.client.post(self.url("message")).json(payload);
        let response = Self::authorize(request, access_token).send().await?;
        let response = Self::check(response).await?;
        let body: MessageResponse = response.json().await?;
        log::info!(
            "Backend answered in conversation {} (assistant message {})",
            body.conversation_id,
            body.assistant_message_id
        );
        Ok(body)
    }

    async fn list_conversations(&self, access_token: Option<&str>) -> Result<Vec<ConversationSummary>, ChatError> {
        log::debug!("Fetching conversation list from backend");
        let request = self.client.get(self.url("conversations"));
        let response = Self::authorize(request, access_token).send().await?;
        let response = Self::check(response).await?;
        let conversations: Vec<ConversationSummary> = response.json().await?;
        log::info!("Fetched {} conversations", conversations.len());
        Ok(conversations)
    }

    async fn fetch_conversation(
        &self,
        _access_token: Option<&str>,
        conversation_id: &str,
    ) -> Result<(Conversation, Vec<Message>), ChatError> {
        // The backend has no per-conversation endpoint yet
        log::warn!("Backend fetching for conversation {} not implemented", conversation_id);
        Err(ChatError::NotImplemented("Loading existing chats"))
    }
}
