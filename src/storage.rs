use crate::models::{Conversation, ConversationSummary, Message, Role};
use anyhow::Context;
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use sqlx::{migrate::MigrateDatabase, sqlite::SqlitePoolOptions, Row, Sqlite, SqlitePool};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

/// The single key all guest history is stored under.
pub const HISTORY_KEY: &str = "pawaits_guest_history";

// Key/value table backing the local store
const MIGRATIONS_SQL: &str = "
CREATE TABLE IF NOT EXISTS local_store (
    key TEXT PRIMARY KEY NOT NULL,
    value TEXT NOT NULL
);
";

/// Device-scoped string storage. Both backends write whole values, so a
/// reader never observes a partially written history.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> anyhow::Result<Option<String>>;
    async fn set(&self, key: &str, value: &str) -> anyhow::Result<()>;
    async fn remove(&self, key: &str) -> anyhow::Result<()>;
}

// --- SQLite backend ---

#[derive(Debug)]
pub struct SqliteKeyValueStore {
    pool: SqlitePool,
}

impl SqliteKeyValueStore {
    /// Opens (creating when missing) the database at `db_path` and runs migrations.
    pub async fn open(db_path: &Path) -> Result<Self, anyhow::Error> {
        // Ensure the parent directory exists
        if let Some(parent) = db_path.parent() {
            tokio::fs::create_dir_all(parent).await.context("Failed to create database directory")?;
        }

        let db_url = format!("sqlite://{}?mode=rwc", db_path.to_string_lossy());
        log::info!("Connecting to local store: {}", db_url);

        if !Sqlite::database_exists(&db_url).await.unwrap_or(false) {
            log::info!("Local store not found, creating...");
            Sqlite::create_database(&db_url).await.context("Failed to create database")?;
        }

        let pool = SqlitePoolOptions::new()
            .connect(&db_url)
            .await
            .context("Failed to connect to SQLite database")?;

        Self::run_migrations(&pool).await?;

        Ok(Self { pool })
    }

    async fn run_migrations(pool: &SqlitePool) -> Result<(), anyhow::Error> {
        log::debug!("Running local store migrations...");
        sqlx::query(MIGRATIONS_SQL)
            .execute(pool)
            .await
            .context("Failed to run local store migrations")?;
        Ok(())
    }
}

#[async_trait]
impl KeyValueStore for SqliteKeyValueStore {
    async fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        let row = sqlx::query("SELECT value FROM local_store WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to read from local store")?;
        row.map(|r| r.try_get::<String, _>("value").context("Failed to decode stored value"))
            .transpose()
    }

    async fn set(&self, key: &str, value: &str) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO local_store (key, value) VALUES (?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value
            "#,
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await
        .context("Failed to write to local store")?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> anyhow::Result<()> {
        sqlx::query("DELETE FROM local_store WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await
            .context("Failed to delete from local store")?;
        Ok(())
    }
}

// --- In-memory backend (session-only history) ---

#[derive(Debug, Default)]
pub struct MemoryKeyValueStore {
    entries: DashMap<String, String>,
}

impl MemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for MemoryKeyValueStore {
    async fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        Ok(self.entries.get(key).map(|v| v.value().clone()))
    }

    async fn set(&self, key: &str, value: &str) -> anyhow::Result<()> {
        self.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> anyhow::Result<()> {
        self.entries.remove(key);
        Ok(())
    }
}

// --- Guest history ---

/// Everything a guest has said on this device, stored as one unit.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct LocalHistory {
    pub conversations: HashMap<String, Conversation>,
    pub messages: HashMap<String, Vec<Message>>,
}

impl LocalHistory {
    /// Parses a stored unit. Anything that is not a well-formed history is `None`.
    pub fn decode(raw: &str) -> Option<Self> {
        match serde_json::from_str::<LocalHistory>(raw) {
            Ok(mut history) => {
                history.heal();
                Some(history)
            }
            Err(e) => {
                log::warn!("Invalid guest history format in local store: {}", e);
                None
            }
        }
    }

    pub fn encode(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    // Re-pairs the two maps: a message list without metadata gets synthesized
    // metadata, metadata without messages gets an empty list.
    fn heal(&mut self) {
        for (id, messages) in &self.messages {
            if !self.conversations.contains_key(id) {
                log::warn!("Guest history had messages without a conversation {}, restoring it", id);
                self.conversations.insert(id.clone(), synthesize_conversation(id, messages.first()));
            }
        }
        for id in self.conversations.keys() {
            self.messages.entry(id.clone()).or_default();
        }
    }
}

fn synthesize_conversation(id: &str, first: Option<&Message>) -> Conversation {
    match first {
        Some(message) if message.role == Role::User => Conversation::started_with(id, None, &message.content),
        _ => Conversation {
            id: id.to_string(),
            user_id: None,
            title: None,
            created_at: chrono::Utc::now(),
        },
    }
}

/// Guest history kept in memory and written through to a `KeyValueStore`.
///
/// Reads never fail; writes are best-effort and only ever logged.
pub struct LocalHistoryStore {
    backend: Arc<dyn KeyValueStore>,
    history: LocalHistory,
}

impl LocalHistoryStore {
    /// Loads the stored unit. Missing, unreadable or malformed data yields an
    /// empty history, and malformed data is discarded from the backend.
    pub async fn load(backend: Arc<dyn KeyValueStore>) -> Self {
        let history = match backend.get(HISTORY_KEY).await {
            Ok(Some(raw)) => match LocalHistory::decode(&raw) {
                Some(history) => {
                    log::info!("Loaded guest history with {} conversations", history.conversations.len());
                    history
                }
                None => {
                    if let Err(e) = backend.remove(HISTORY_KEY).await {
                        log::error!("Failed to discard invalid guest history: {:?}", e);
                    }
                    LocalHistory::default()
                }
            },
            Ok(None) => LocalHistory::default(),
            Err(e) => {
                log::error!("Error loading guest history: {:?}", e);
                LocalHistory::default()
            }
        };
        Self { backend, history }
    }

    /// Writes the whole unit. Failures (quota, I/O) are logged and swallowed.
    pub async fn save(&self) {
        let encoded = match self.history.encode() {
            Ok(encoded) => encoded,
            Err(e) => {
                log::error!("Error serializing guest history: {:?}", e);
                return;
            }
        };
        if let Err(e) = self.backend.set(HISTORY_KEY, &encoded).await {
            log::error!("Error saving guest history: {:?}", e);
        }
    }

    pub fn get_conversation(&self, conversation_id: &str) -> Option<(Conversation, Vec<Message>)> {
        let conversation = self.history.conversations.get(conversation_id)?.clone();
        let messages = self.history.messages.get(conversation_id).cloned().unwrap_or_default();
        Some((conversation, messages))
    }

    /// Conversation metadata, newest first.
    pub fn list_conversations(&self) -> Vec<Conversation> {
        let mut conversations: Vec<Conversation> = self.history.conversations.values().cloned().collect();
        conversations.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        conversations
    }

    pub fn list_summaries(&self) -> Vec<ConversationSummary> {
        self.list_conversations().iter().map(ConversationSummary::from).collect()
    }

    /// Shallow-merges `conversation` into the existing record, or creates it.
    pub async fn upsert_conversation(&mut self, conversation: Conversation) {
        let id = conversation.id.clone();
        match self.history.conversations.get_mut(&id) {
            Some(existing) => existing.merge(conversation),
            None => {
                self.history.conversations.insert(id.clone(), conversation);
            }
        }
        self.history.messages.entry(id).or_default();
        self.save().await;
    }

    /// Appends to the tail of the conversation, creating its metadata when missing.
    pub async fn append_message(&mut self, conversation_id: &str, message: Message) {
        if !self.history.conversations.contains_key(conversation_id) {
            log::debug!("Creating local conversation {} for first message", conversation_id);
            let conversation = synthesize_conversation(conversation_id, Some(&message));
            self.history.conversations.insert(conversation_id.to_string(), conversation);
        }
        self.history
            .messages
            .entry(conversation_id.to_string())
            .or_default()
            .push(message);
        self.save().await;
    }

    /// Removes the metadata and the messages together.
    pub async fn delete_conversation(&mut self, conversation_id: &str) -> bool {
        let had_conversation = self.history.conversations.remove(conversation_id).is_some();
        let had_messages = self.history.messages.remove(conversation_id).is_some();
        if !had_conversation && !had_messages {
            log::warn!("Attempted to delete non-existent local conversation: {}", conversation_id);
            return false;
        }
        self.save().await;
        log::info!("Deleted local conversation {}", conversation_id);
        true
    }

    pub async fn clear_all(&mut self) {
        self.history = LocalHistory::default();
        if let Err(e) = self.backend.remove(HISTORY_KEY).await {
            log::error!("Error clearing guest history: {:?}", e);
        }
        log::info!("Cleared guest history");
    }

    /// The whole unit, e.g. for migrating after a guest links an account.
    pub fn export(&self) -> LocalHistory {
        self.history.clone()
    }
}

#[cfg(test)]
mod proptests;
