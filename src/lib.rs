// Declare the modules
pub mod api;
pub mod auth;
pub mod chat;
pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod models;
pub mod session;
pub mod state;
pub mod storage;

#[cfg(test)]
mod testing;

use crate::api::{ChatBackend, HttpChatBackend};
use crate::auth::{GoTrueIdentity, IdentityProvider, StaticIdentity};
use crate::config::{ClientConfig, HistoryLocation};
use crate::storage::{KeyValueStore, LocalHistoryStore, MemoryKeyValueStore, SqliteKeyValueStore};
use anyhow::{Context, Result};
use state::AppState;
use std::sync::Arc;

// Keyring account holding the auth service key
const AUTH_KEY_ACCOUNT: &str = "auth_key";

pub async fn run() -> Result<()> {
    // Initialize logging
    env_logger::init();

    // `pawachat store-key <key>` saves the auth key for PAWA_AUTH_KEY_REF=keyring
    let args: Vec<String> = std::env::args().skip(1).collect();
    if let [command, key] = args.as_slice() {
        if command == "store-key" {
            return config::store_secret_in_keyring(AUTH_KEY_ACCOUNT, key);
        }
    }

    let config = ClientConfig::from_env()?;

    let backend: Arc<dyn KeyValueStore> = match &config.history {
        HistoryLocation::Sqlite(path) => {
            log::info!("Using guest history database: {:?}", path);
            Arc::new(SqliteKeyValueStore::open(path).await?)
        }
        HistoryLocation::Memory => {
            log::info!("Guest history kept in memory for this session only");
            Arc::new(MemoryKeyValueStore::new())
        }
    };
    let storage = LocalHistoryStore::load(backend).await;

    let api_provider: Arc<dyn ChatBackend> = Arc::new(HttpChatBackend::new(config.api_url.clone()));
    let identity = build_identity(&config)?;

    // Every visitor gets at least a guest session
    if let Err(e) = identity.sign_in_anonymously().await {
        log::warn!("Anonymous sign-in failed, continuing unresolved: {}", e);
    }

    let app_state = AppState::new(storage, api_provider, identity);
    cli::run_repl(app_state).await
}

fn build_identity(config: &ClientConfig) -> Result<Arc<dyn IdentityProvider>> {
    let Some(auth_url) = &config.auth_url else {
        log::info!("No auth service configured, running as guest");
        return Ok(Arc::new(StaticIdentity::guest()));
    };
    let key_ref = config
        .auth_key_ref
        .as_deref()
        .context("PAWA_AUTH_URL is set but PAWA_AUTH_KEY_REF is missing")?;
    let api_key = config::resolve_secret(key_ref, AUTH_KEY_ACCOUNT)?;
    log::info!("Using auth service at {}", auth_url);
    Ok(Arc::new(GoTrueIdentity::new(auth_url.clone(), api_key)))
}
