use anyhow::{Context, Result};
use keyring::Entry;
use std::path::PathBuf;

const KEYRING_SERVICE: &str = "pawachat";
const DEFAULT_API_URL: &str = "http://localhost:8000/api/v1";
const HISTORY_DB_FILE: &str = "guest_history.sqlite";

/// Where guest history lives.
#[derive(Debug, Clone, PartialEq)]
pub enum HistoryLocation {
    Sqlite(PathBuf),
    Memory, // session-only history
}

/// Client settings, read from the environment.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub api_url: String,
    // Base URL of the auth service; None runs as an offline guest
    pub auth_url: Option<String>,
    // 'env:VAR' or 'keyring' reference to the auth service's public key
    pub auth_key_ref: Option<String>,
    pub history: HistoryLocation,
}

impl ClientConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the config from any variable lookup (the process env in practice).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let api_url = lookup("PAWA_API_URL")
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_API_URL.to_string());
        let auth_url = lookup("PAWA_AUTH_URL").filter(|v| !v.trim().is_empty());
        let auth_key_ref = lookup("PAWA_AUTH_KEY_REF").filter(|v| !v.trim().is_empty());

        let history = match lookup("PAWA_HISTORY_DB") {
            Some(v) if v == "memory" => HistoryLocation::Memory,
            Some(v) if !v.trim().is_empty() => HistoryLocation::Sqlite(PathBuf::from(v)),
            _ => {
                let mut path = dirs::data_local_dir()
                    .context("Could not resolve a local data directory for guest history")?;
                path.push(KEYRING_SERVICE);
                path.push(HISTORY_DB_FILE);
                HistoryLocation::Sqlite(path)
            }
        };

        log::debug!("Loaded client config: api_url={}, auth_url={:?}, history={:?}", api_url, auth_url, history);
        Ok(Self {
            api_url,
            auth_url,
            auth_key_ref,
            history,
        })
    }
}

// --- Secret Retrieval ---

/// Resolves a secret reference: `env:NAME` reads the environment, `keyring`
/// reads the OS keyring entry stored under `account`.
pub fn resolve_secret(reference: &str, account: &str) -> Result<String> {
    match reference {
        r if r.starts_with("env:") => {
            let env_var_name = r.trim_start_matches("env:");
            log::debug!("Retrieving secret from environment variable: {}", env_var_name);
            std::env::var(env_var_name).context(format!(
                "Failed to get secret from environment variable '{}'",
                env_var_name
            ))
        }
        "keyring" => {
            let entry = Entry::new(KEYRING_SERVICE, account).context("Failed to create keyring entry")?;
            log::debug!("Retrieving secret from keyring for account: {}", account);
            entry.get_password().context(format!(
                "Failed to get secret from keyring for '{}'. Please store it first.",
                account
            ))
        }
        other => Err(anyhow::anyhow!("Unsupported secret reference format: {}", other)),
    }
}

/// Stores a secret in the OS keyring under `account`.
pub fn store_secret_in_keyring(account: &str, secret: &str) -> Result<()> {
    let entry = Entry::new(KEYRING_SERVICE, account)
        .context("Failed to create keyring entry for setting password")?;
    log::info!("Setting secret in keyring for account: {}", account);
    entry
        .set_password(secret)
        .context(format!("Failed to set secret in keyring for '{}'", account))
}
