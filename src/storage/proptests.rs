//! Property-based tests for the guest history format
//!
//! A valid unit survives encode/decode unchanged, and no stored value can make
//! loading fail.

use super::*;
use crate::models::{MessageMetadata, TokenUsage};
use chrono::{DateTime, TimeZone, Utc};
use proptest::prelude::*;

fn arb_timestamp() -> impl Strategy<Value = DateTime<Utc>> {
    (0i64..4_000_000_000, 0u32..1_000_000_000).prop_map(|(secs, nanos)| Utc.timestamp_opt(secs, nanos).unwrap())
}

fn arb_metadata() -> impl Strategy<Value = Option<MessageMetadata>> {
    prop::option::of(
        (
            prop::option::of((any::<Option<u32>>(), any::<Option<u32>>(), any::<Option<u32>>())),
            prop::option::of(prop::collection::vec("[A-Za-z ?]{1,30}", 0..4)),
            prop::option::of("[a-z]{3,10}"),
            prop::option::of("[A-Za-z .]{1,40}"),
        )
            .prop_map(|(usage, follow_ups, provider, error)| MessageMetadata {
                token_usage: usage.map(|(prompt_tokens, completion_tokens, total_tokens)| TokenUsage {
                    prompt_tokens,
                    completion_tokens,
                    total_tokens,
                }),
                follow_up_questions: follow_ups,
                llm_provider: provider,
                error,
            }),
    )
}

fn arb_message(conversation_id: String, index: usize) -> impl Strategy<Value = Message> {
    (any::<bool>(), "\\PC{0,80}", arb_metadata(), arb_timestamp()).prop_map(move |(is_user, content, metadata, created_at)| {
        Message {
            id: format!("{conversation_id}-m{index}"),
            conversation_id: conversation_id.clone(),
            role: if is_user { Role::User } else { Role::Assistant },
            content,
            metadata,
            created_at,
            is_optimistic: false,
        }
    })
}

fn arb_conversation_with_messages() -> impl Strategy<Value = (Conversation, Vec<Message>)> {
    ("[a-z0-9]{8}", prop::option::of("\\PC{1,60}"), arb_timestamp(), 0usize..6).prop_flat_map(
        |(id, title, created_at, count)| {
            let conversation = Conversation {
                id: id.clone(),
                user_id: None,
                title,
                created_at,
            };
            let messages: Vec<_> = (0..count).map(|i| arb_message(id.clone(), i)).collect();
            (Just(conversation), messages)
        },
    )
}

fn arb_history() -> impl Strategy<Value = LocalHistory> {
    prop::collection::vec(arb_conversation_with_messages(), 0..5).prop_map(|entries| {
        let mut history = LocalHistory::default();
        for (conversation, messages) in entries {
            history.messages.insert(conversation.id.clone(), messages);
            history.conversations.insert(conversation.id.clone(), conversation);
        }
        history
    })
}

fn block_on<F: std::future::Future>(future: F) -> F::Output {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
        .block_on(future)
}

proptest! {
    #[test]
    fn encode_decode_is_a_fixed_point(history in arb_history()) {
        let encoded = history.encode().unwrap();
        let decoded = LocalHistory::decode(&encoded).unwrap();
        prop_assert_eq!(&decoded, &history);
        prop_assert_eq!(decoded.encode().unwrap().len(), encoded.len());
    }

    #[test]
    fn stored_history_reloads_identically(history in arb_history()) {
        block_on(async {
            let backend = Arc::new(MemoryKeyValueStore::new());
            backend.set(HISTORY_KEY, &history.encode().unwrap()).await.unwrap();
            let store = LocalHistoryStore::load(backend.clone()).await;
            assert_eq!(store.export(), history);
            store.save().await;
            let reloaded = LocalHistoryStore::load(backend).await;
            assert_eq!(reloaded.export(), history);
        });
    }

    #[test]
    fn arbitrary_stored_text_loads_without_failing(raw in "\\PC{0,200}") {
        block_on(async {
            let backend = Arc::new(MemoryKeyValueStore::new());
            backend.set(HISTORY_KEY, &raw).await.unwrap();
            let store = LocalHistoryStore::load(backend.clone()).await;
            if LocalHistory::decode(&raw).is_none() {
                assert_eq!(store.export(), LocalHistory::default());
                assert!(backend.get(HISTORY_KEY).await.unwrap().is_none());
            }
        });
    }

    #[test]
    fn wrongly_shaped_json_loads_empty(value in prop_oneof![
        Just(serde_json::json!(null)),
        Just(serde_json::json!([])),
        Just(serde_json::json!({"conversations": {}})),
        Just(serde_json::json!({"messages": {}})),
        any::<i64>().prop_map(|n| serde_json::json!({"conversations": n, "messages": {}})),
        "[a-z]{1,10}".prop_map(|s| serde_json::json!({"conversations": {"c1": {"id": s}}, "messages": {"c1": [{"id": 1}]}})),
    ]) {
        let raw = value.to_string();
        prop_assert!(LocalHistory::decode(&raw).is_none());
        block_on(async {
            let backend = Arc::new(MemoryKeyValueStore::new());
            backend.set(HISTORY_KEY, &raw).await.unwrap();
            let store = LocalHistoryStore::load(backend).await;
            assert!(store.list_conversations().is_empty());
        });
    }
}
