use crate::api::ChatBackend;
use crate::auth::IdentityProvider;
use crate::chat::ChatStore;
use crate::storage::LocalHistoryStore;
use std::sync::Arc;
use tokio::sync::Mutex;

// Core application state, passed explicitly to every command
#[derive(Clone)] // Cheap to clone; every field is a shared handle
pub struct AppState {
    pub chat: ChatStore, // Reactive state of the active conversation
    // Guest history; the mutex is held across the store's async writes
    pub storage: Arc<Mutex<LocalHistoryStore>>,
    pub api_provider: Arc<dyn ChatBackend>,
    pub identity: Arc<dyn IdentityProvider>,
}

impl AppState {
    pub fn new(
        storage: LocalHistoryStore,
        api_provider: Arc<dyn ChatBackend>,
        identity: Arc<dyn IdentityProvider>,
    ) -> Self {
        Self {
            chat: ChatStore::default(),
            storage: Arc::new(Mutex::new(storage)),
            api_provider,
            identity,
        }
    }
}
