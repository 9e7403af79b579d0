//! Property-based tests for the chat state engine
//!
//! Ordering, idempotence and in-place reconciliation must hold for any mix
//! of confirmed appends and successful or failed turns.

use super::*;
use crate::models::{provisional_id, MessageMetadata, Role};
use chrono::Utc;
use proptest::prelude::*;

#[derive(Clone, Debug)]
enum Op {
    Append,
    Turn { succeeds: bool, adopt_user_id: bool },
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        Just(Op::Append),
        (any::<bool>(), any::<bool>()).prop_map(|(succeeds, adopt_user_id)| Op::Turn { succeeds, adopt_user_id }),
    ]
}

fn confirmed(id: String) -> Message {
    Message {
        id,
        conversation_id: "c1".into(),
        role: Role::Assistant,
        content: "confirmed".into(),
        metadata: None,
        created_at: Utc::now(),
        is_optimistic: false,
    }
}

// Replays `ops` the way the turn controller drives the state, returning the
// ids expected to be visible, in order
fn replay(state: &mut ChatState, ops: &[Op]) -> Vec<String> {
    let mut expected = Vec::new();
    for (i, op) in ops.iter().enumerate() {
        match op {
            Op::Append => {
                let id = format!("srv-{i}");
                state.append_confirmed(confirmed(id.clone()));
                expected.push(id);
            }
            Op::Turn { succeeds, adopt_user_id } => {
                let user_id = provisional_id(Role::User);
                let assistant_id = provisional_id(Role::Assistant);
                let conversation_id = state.conversation_id().map(str::to_string);
                assert!(state.begin_turn(
                    Message::optimistic_user(user_id.clone(), conversation_id.as_deref(), "question"),
                    Message::assistant_placeholder(assistant_id.clone(), conversation_id.as_deref()),
                ));
                if *succeeds {
                    let confirmed_user = if *adopt_user_id { format!("srv-user-{i}") } else { user_id.clone() };
                    state.replace_optimistic(
                        &user_id,
                        MessagePatch {
                            id: Some(confirmed_user.clone()),
                            ..MessagePatch::default()
                        },
                    );
                    state.replace_optimistic(
                        &assistant_id,
                        MessagePatch {
                            id: Some(format!("srv-assistant-{i}")),
                            content: Some("answer".into()),
                            metadata: Some(MessageMetadata::default()),
                            ..MessagePatch::default()
                        },
                    );
                    expected.push(confirmed_user);
                    expected.push(format!("srv-assistant-{i}"));
                } else {
                    state.remove_optimistic(&assistant_id);
                    state.replace_optimistic(&user_id, MessagePatch::failed("network down"));
                    expected.push(user_id);
                }
            }
        }
    }
    expected
}

proptest! {
    #[test]
    fn order_matches_call_order(ops in prop::collection::vec(arb_op(), 0..30)) {
        let mut state = ChatState::default();
        let expected = replay(&mut state, &ops);
        let actual: Vec<String> = state.messages.iter().map(|m| m.id.clone()).collect();
        prop_assert_eq!(actual, expected);
        prop_assert!(state.messages.iter().all(|m| !m.is_optimistic));
        prop_assert!(!state.has_pending_turn());
    }

    #[test]
    fn failed_turns_keep_annotated_user_message(ops in prop::collection::vec(arb_op(), 1..20)) {
        let mut state = ChatState::default();
        replay(&mut state, &ops);
        let failures = ops.iter().filter(|op| matches!(op, Op::Turn { succeeds: false, .. })).count();
        let annotated = state.messages.iter().filter(|m| m.error().is_some()).count();
        prop_assert_eq!(annotated, failures);
        prop_assert!(state.messages.iter().all(|m| m.content != crate::models::PENDING_CONTENT));
    }

    #[test]
    fn duplicate_append_leaves_sequence_unchanged(ops in prop::collection::vec(arb_op(), 1..20), pick in any::<prop::sample::Index>()) {
        let mut state = ChatState::default();
        replay(&mut state, &ops);
        prop_assume!(!state.messages.is_empty());
        let before = state.clone();
        let existing = state.messages[pick.index(state.messages.len())].clone();
        prop_assert!(!state.append_confirmed(existing));
        prop_assert_eq!(state, before);
    }

    #[test]
    fn reconcile_preserves_position(prefix in 0usize..10, suffix in 0usize..10, new_id in "[a-f0-9]{12}") {
        let mut state = ChatState::default();
        for i in 0..prefix {
            state.append_confirmed(confirmed(format!("before-{i}")));
        }
        let optimistic = provisional_id(Role::Assistant);
        state.insert_optimistic(Message::assistant_placeholder(optimistic.clone(), Some("c1")));
        for i in 0..suffix {
            state.append_confirmed(confirmed(format!("after-{i}")));
        }

        state.replace_optimistic(&optimistic, MessagePatch {
            id: Some(new_id.clone()),
            content: Some("done".into()),
            ..MessagePatch::default()
        });

        prop_assert_eq!(state.messages.len(), prefix + suffix + 1);
        let reconciled = &state.messages[prefix];
        prop_assert_eq!(&reconciled.id, &new_id);
        prop_assert!(!reconciled.is_optimistic);
        prop_assert_eq!(state.position(&new_id), Some(prefix));
    }
}
