use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

/// Conversation id used by optimistic messages before the backend assigns one.
pub const UNASSIGNED_CONVERSATION: &str = "new";
/// Content of the assistant bubble while the answer is being generated.
pub const PENDING_CONTENT: &str = "...";
/// `llm_provider` value marking the assistant placeholder as loading.
pub const PENDING_PROVIDER: &str = "loading";
/// Titles are the first N characters of the opening user message.
pub const TITLE_MAX_CHARS: usize = 60;
pub const DEFAULT_TITLE: &str = "New Chat";

// Who authored a message
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct TokenUsage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_tokens: Option<u32>,
}

// Structured metadata attached to a message (usage, follow-ups, provider, failure)
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct MessageMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_usage: Option<TokenUsage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub follow_up_questions: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub llm_provider: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl MessageMetadata {
    pub fn pending() -> Self {
        Self {
            llm_provider: Some(PENDING_PROVIDER.to_string()),
            ..Self::default()
        }
    }
}

// Represents a single message in a conversation
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Message {
    pub id: String,
    pub conversation_id: String,
    pub role: Role,
    pub content: String,
    #[serde(default)]
    pub metadata: Option<MessageMetadata>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    // Only ever true in memory; confirmed copies are what gets persisted
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_optimistic: bool,
}

impl Message {
    /// The user's half of a turn, before the backend has seen it.
    pub fn optimistic_user(id: String, conversation_id: Option<&str>, content: &str) -> Self {
        Self {
            id,
            conversation_id: conversation_id.unwrap_or(UNASSIGNED_CONVERSATION).to_string(),
            role: Role::User,
            content: content.to_string(),
            metadata: None,
            created_at: Utc::now(),
            is_optimistic: true,
        }
    }

    /// The "assistant is typing" bubble for an in-flight turn.
    pub fn assistant_placeholder(id: String, conversation_id: Option<&str>) -> Self {
        Self {
            id,
            conversation_id: conversation_id.unwrap_or(UNASSIGNED_CONVERSATION).to_string(),
            role: Role::Assistant,
            content: PENDING_CONTENT.to_string(),
            metadata: Some(MessageMetadata::pending()),
            created_at: Utc::now(),
            is_optimistic: true,
        }
    }

    pub fn error(&self) -> Option<&str> {
        self.metadata.as_ref().and_then(|m| m.error.as_deref())
    }

    pub fn is_pending_placeholder(&self) -> bool {
        self.is_optimistic && self.role == Role::Assistant
    }

    /// Applies a field-level patch. Fields left as `None` keep their value,
    /// and an empty id never replaces a real one.
    pub fn apply(&mut self, patch: MessagePatch) {
        if let Some(id) = patch.id.filter(|id| !id.is_empty()) {
            self.id = id;
        }
        if let Some(conversation_id) = patch.conversation_id {
            self.conversation_id = conversation_id;
        }
        if let Some(content) = patch.content {
            self.content = content;
        }
        if let Some(metadata) = patch.metadata {
            self.metadata = Some(metadata);
        }
        if let Some(created_at) = patch.created_at {
            self.created_at = created_at;
        }
        if let Some(error) = patch.error {
            self.metadata.get_or_insert_with(MessageMetadata::default).error = Some(error);
        }
        self.is_optimistic = false;
    }
}

/// Confirmed data merged over an optimistic message.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MessagePatch {
    pub id: Option<String>,
    pub conversation_id: Option<String>,
    pub content: Option<String>,
    pub metadata: Option<MessageMetadata>,
    pub created_at: Option<DateTime<Utc>>,
    // Sets metadata.error without discarding the rest of the metadata
    pub error: Option<String>,
}

impl MessagePatch {
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::default()
        }
    }
}

// Represents the metadata for a conversation thread
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Conversation {
    pub id: String,
    #[serde(default)]
    pub user_id: Option<Uuid>, // None for guest conversations
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl Conversation {
    /// A conversation opened by `first_message`, titled after it.
    pub fn started_with(id: impl Into<String>, user_id: Option<Uuid>, first_message: &str) -> Self {
        Self {
            id: id.into(),
            user_id,
            title: Some(derive_title(first_message)),
            created_at: Utc::now(),
        }
    }

    pub fn display_title(&self) -> &str {
        self.title.as_deref().unwrap_or(DEFAULT_TITLE)
    }

    /// Shallow merge: fields present on `other` win, absent optional fields keep ours.
    pub fn merge(&mut self, other: Conversation) {
        self.id = other.id;
        self.created_at = other.created_at;
        if other.title.is_some() {
            self.title = other.title;
        }
        if other.user_id.is_some() {
            self.user_id = other.user_id;
        }
    }
}

/// First `TITLE_MAX_CHARS` characters of the message, counted in chars so
/// multi-byte text is never split.
pub fn derive_title(content: &str) -> String {
    content.trim().chars().take(TITLE_MAX_CHARS).collect()
}

// Process-wide source of provisional ids
static NEXT_PROVISIONAL: AtomicU64 = AtomicU64::new(1);

/// Provisional id for an optimistic message: `optimistic-<role>-<n>`.
pub fn provisional_id(role: Role) -> String {
    let n = NEXT_PROVISIONAL.fetch_add(1, Ordering::Relaxed);
    format!("optimistic-{}-{}", role.as_str(), n)
}

pub fn is_provisional_id(id: &str) -> bool {
    id.starts_with("optimistic-")
}

// --- Wire types for the chat backend ---

// Body of POST /message
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct MessagePayload {
    pub message: String,
    pub conversation_id: Option<String>, // None asks the backend to start a new conversation
}

// Response of POST /message
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct MessageResponse {
    pub conversation_id: String,
    #[serde(default)]
    pub user_message_id: Option<String>,
    pub assistant_message_id: String,
    pub answer: String,
    #[serde(default)]
    pub follow_up_questions: Option<Vec<String>>,
    #[serde(default)]
    pub token_usage: Option<TokenUsage>,
    #[serde(default)]
    pub disclaimer: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>, // Authoritative timestamp, when the backend sends one
}

// Row of GET /conversations, also produced from the local store for guests
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct ConversationSummary {
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl From<&Conversation> for ConversationSummary {
    fn from(conversation: &Conversation) -> Self {
        Self {
            id: conversation.id.clone(),
            title: conversation.title.clone(),
            created_at: conversation.created_at,
            updated_at: None,
        }
    }
}
