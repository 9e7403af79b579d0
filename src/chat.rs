//! In-memory state of the active conversation.
//!
//! `ChatState` is plain data with synchronous mutation primitives. Every
//! primitive reports whether it changed anything; operations that target a
//! message id that is no longer present are silent no-ops, since a late
//! response racing a reset is expected, not exceptional.
//!
//! `ChatStore` wraps the state in a watch channel so a front-end can observe
//! it, and hands out `LoadingGuard`s for scoped loading holds.
//!
//! Each `reset` starts a new view epoch. Loading holds belong to the epoch
//! they were taken in, so work left over from a torn-down view can neither
//! keep the new view loading nor release the new view's holds.

use crate::models::{Conversation, Message, MessagePatch};
use std::sync::Arc;
use tokio::sync::watch;

pub const DEFAULT_SUGGESTIONS: [&str; 3] = [
    "What taxes do I pay as a freelancer in Kenya?",
    "How do I file my income tax returns?",
    "What expenses can I deduct?",
];

#[derive(Clone, Debug, PartialEq)]
pub struct ChatState {
    pub messages: Vec<Message>,
    pub current_conversation: Option<Conversation>,
    pub error: Option<String>,
    pub suggested_questions: Vec<String>, // shown on an empty conversation
    pub follow_up_suggestions: Vec<String>, // tied to the latest assistant answer
    pub disclaimer: Option<String>,
    epoch: u64,
    loading_holds: usize, // holds taken in the current epoch
}

impl Default for ChatState {
    fn default() -> Self {
        Self {
            messages: Vec::new(),
            current_conversation: None,
            error: None,
            suggested_questions: DEFAULT_SUGGESTIONS.iter().map(|s| s.to_string()).collect(),
            follow_up_suggestions: Vec::new(),
            disclaimer: None,
            epoch: 0,
            loading_holds: 0,
        }
    }
}

impl ChatState {
    pub fn is_loading(&self) -> bool {
        self.loading_holds > 0
    }

    /// Bumped by every `reset`.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn conversation_id(&self) -> Option<&str> {
        self.current_conversation.as_ref().map(|c| c.id.as_str())
    }

    pub fn position(&self, message_id: &str) -> Option<usize> {
        self.messages.iter().position(|m| m.id == message_id)
    }

    pub fn contains(&self, message_id: &str) -> bool {
        self.position(message_id).is_some()
    }

    /// True while an assistant placeholder is waiting for its answer.
    pub fn has_pending_turn(&self) -> bool {
        self.messages.iter().any(Message::is_pending_placeholder)
    }

    /// Drops everything tied to the previous conversation, including the
    /// loading holds of work started for it.
    pub fn reset(&mut self) -> bool {
        self.epoch += 1;
        self.loading_holds = 0;
        self.messages.clear();
        self.current_conversation = None;
        self.follow_up_suggestions.clear();
        self.error = None;
        self.disclaimer = None;
        true
    }

    pub fn set_messages(&mut self, messages: Vec<Message>) -> bool {
        self.messages = messages;
        true
    }

    pub fn set_conversation(&mut self, conversation: Option<Conversation>) -> bool {
        self.current_conversation = conversation;
        true
    }

    pub fn set_error(&mut self, error: Option<String>) -> bool {
        if self.error == error {
            return false;
        }
        self.error = error;
        true
    }

    /// Appends a confirmed message; a message whose id is already present is ignored.
    pub fn append_confirmed(&mut self, message: Message) -> bool {
        if self.contains(&message.id) {
            log::debug!("Ignoring duplicate append of message {}", message.id);
            return false;
        }
        self.messages.push(Message {
            is_optimistic: false,
            ..message
        });
        true
    }

    pub fn insert_optimistic(&mut self, message: Message) -> bool {
        if self.contains(&message.id) {
            return false;
        }
        self.messages.push(Message {
            is_optimistic: true,
            ..message
        });
        true
    }

    /// Opens a turn: refuses while another turn is pending or a load is running,
    /// otherwise clears follow-ups and inserts the user message then the placeholder.
    pub fn begin_turn(&mut self, user: Message, placeholder: Message) -> bool {
        if self.has_pending_turn() || self.is_loading() {
            return false;
        }
        self.follow_up_suggestions.clear();
        self.insert_optimistic(user);
        self.insert_optimistic(placeholder);
        true
    }

    /// Merges `patch` over the message with `optimistic_id`, keeping its position.
    pub fn replace_optimistic(&mut self, optimistic_id: &str, patch: MessagePatch) -> bool {
        let Some(index) = self.position(optimistic_id) else {
            log::debug!("Optimistic message {} is gone, skipping reconcile", optimistic_id);
            return false;
        };
        // A confirmed id that already exists elsewhere would break uniqueness
        if let Some(new_id) = patch.id.as_deref().filter(|id| !id.is_empty()) {
            if new_id != optimistic_id && self.contains(new_id) {
                log::warn!("Confirmed id {} already present, dropping optimistic {}", new_id, optimistic_id);
                self.messages.remove(index);
                return true;
            }
        }
        self.messages[index].apply(patch);
        true
    }

    pub fn remove_optimistic(&mut self, optimistic_id: &str) -> bool {
        let before = self.messages.len();
        self.messages.retain(|m| m.id != optimistic_id);
        before != self.messages.len()
    }

    pub fn set_follow_ups(&mut self, follow_ups: Vec<String>) -> bool {
        self.follow_up_suggestions = follow_ups;
        true
    }

    pub fn clear_follow_ups(&mut self) -> bool {
        if self.follow_up_suggestions.is_empty() {
            return false;
        }
        self.follow_up_suggestions.clear();
        true
    }
}

/// Shared, observable handle to the chat state.
#[derive(Clone)]
pub struct ChatStore {
    tx: Arc<watch::Sender<ChatState>>,
}

impl Default for ChatStore {
    fn default() -> Self {
        Self::new(ChatState::default())
    }
}

impl ChatStore {
    pub fn new(state: ChatState) -> Self {
        let (tx, _rx) = watch::channel(state);
        Self { tx: Arc::new(tx) }
    }

    pub fn subscribe(&self) -> watch::Receiver<ChatState> {
        self.tx.subscribe()
    }

    pub fn snapshot(&self) -> ChatState {
        self.tx.borrow().clone()
    }

    pub fn read<R>(&self, f: impl FnOnce(&ChatState) -> R) -> R {
        f(&self.tx.borrow())
    }

    /// Runs one atomic mutation; subscribers are woken only if it reports a change.
    pub fn apply(&self, f: impl FnOnce(&mut ChatState) -> bool) -> bool {
        self.tx.send_if_modified(f)
    }

    /// Runs `f` only if the view is still in `epoch`. Returns `None` when a
    /// reset has moved on, otherwise whether `f` changed anything.
    pub fn apply_if_current(&self, epoch: u64, f: impl FnOnce(&mut ChatState) -> bool) -> Option<bool> {
        let mut outcome = None;
        self.apply(|state| {
            if state.epoch != epoch {
                return false;
            }
            let changed = f(state);
            outcome = Some(changed);
            changed
        });
        outcome
    }

    /// Takes a loading hold in the current epoch, released when the guard
    /// drops or the view is reset.
    pub fn begin_loading(&self) -> LoadingGuard {
        let mut epoch = 0;
        self.apply(|state| {
            state.loading_holds += 1;
            epoch = state.epoch;
            true
        });
        LoadingGuard {
            store: self.clone(),
            epoch,
        }
    }
}

/// Keeps `is_loading()` true while alive. Dropping it (including when the
/// owning future is cancelled) releases the hold.
#[must_use = "loading is released as soon as the guard is dropped"]
pub struct LoadingGuard {
    store: ChatStore,
    epoch: u64,
}

impl LoadingGuard {
    /// The view epoch this hold belongs to.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }
}

impl Drop for LoadingGuard {
    fn drop(&mut self) {
        let epoch = self.epoch;
        self.store.apply(|state| {
            // A reset already dropped this hold
            if state.epoch != epoch {
                return false;
            }
            state.loading_holds = state.loading_holds.saturating_sub(1);
            true
        });
    }
}

#[cfg(test)]
mod proptests;
