use crate::error::ChatError;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::sync::{PoisonError, RwLock};
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq)]
pub struct User {
    pub id: Uuid,
    pub email: Option<String>,
    pub is_anonymous: bool,
}

/// Who is using the client right now.
#[derive(Clone, Debug, PartialEq)]
pub enum Identity {
    /// The provider has not settled yet; nothing should be loaded.
    Unresolved,
    /// No account: either no user at all or an anonymous one.
    Guest(Option<User>),
    Authenticated(User),
}

impl Identity {
    pub fn from_user(user: Option<User>) -> Self {
        match user {
            Some(user) if !user.is_anonymous => Identity::Authenticated(user),
            other => Identity::Guest(other),
        }
    }

    pub fn is_resolved(&self) -> bool {
        !matches!(self, Identity::Unresolved)
    }

    pub fn is_guest(&self) -> bool {
        matches!(self, Identity::Guest(_))
    }

    pub fn user(&self) -> Option<&User> {
        match self {
            Identity::Unresolved | Identity::Guest(None) => None,
            Identity::Guest(Some(user)) | Identity::Authenticated(user) => Some(user),
        }
    }

    /// Owner recorded on conversations; guests own nothing server-side.
    pub fn owner_id(&self) -> Option<Uuid> {
        match self {
            Identity::Authenticated(user) => Some(user.id),
            _ => None,
        }
    }
}

// Trait for the identity collaborator. Every operation reports an outcome instead of panicking.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    fn identity(&self) -> Identity;

    /// Bearer token for backend calls, when a session exists.
    fn access_token(&self) -> Option<String>;

    async fn sign_in_anonymously(&self) -> Result<(), ChatError>;
    async fn sign_in(&self, email: &str, password: &str) -> Result<(), ChatError>;
    async fn sign_up(&self, email: &str, password: &str) -> Result<(), ChatError>;
    async fn sign_out(&self) -> Result<(), ChatError>;

    /// Attaches credentials to the current anonymous user, keeping its id.
    async fn link_guest(&self, email: &str, password: &str) -> Result<(), ChatError>;
}

// --- Fixed identity (no auth service configured) ---

pub struct StaticIdentity {
    identity: RwLock<Identity>,
    access_token: Option<String>,
}

impl StaticIdentity {
    pub fn new(identity: Identity) -> Self {
        Self {
            identity: RwLock::new(identity),
            access_token: None,
        }
    }

    pub fn guest() -> Self {
        Self::new(Identity::Guest(None))
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }

    pub fn set(&self, identity: Identity) {
        *self.identity.write().unwrap_or_else(PoisonError::into_inner) = identity;
    }
}

#[async_trait]
impl IdentityProvider for StaticIdentity {
    fn identity(&self) -> Identity {
        self.identity.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn access_token(&self) -> Option<String> {
        self.access_token.clone()
    }

    async fn sign_in_anonymously(&self) -> Result<(), ChatError> {
        if !self.identity().is_resolved() {
            self.set(Identity::Guest(None));
        }
        Ok(())
    }

    async fn sign_in(&self, _email: &str, _password: &str) -> Result<(), ChatError> {
        Err(ChatError::Auth("No auth service configured".into()))
    }

    async fn sign_up(&self, _email: &str, _password: &str) -> Result<(), ChatError> {
        Err(ChatError::Auth("No auth service configured".into()))
    }

    async fn sign_out(&self) -> Result<(), ChatError> {
        self.set(Identity::Guest(None));
        Ok(())
    }

    async fn link_guest(&self, _email: &str, _password: &str) -> Result<(), ChatError> {
        Err(ChatError::Auth("No auth service configured".into()))
    }
}

// --- Hosted auth service (GoTrue-compatible REST API) ---

#[derive(Clone, Debug)]
struct AuthSession {
    access_token: String,
    user: User,
}

#[derive(Deserialize, Debug)]
struct WireUser {
    id: Uuid,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    is_anonymous: bool,
}

impl From<WireUser> for User {
    fn from(user: WireUser) -> Self {
        Self {
            id: user.id,
            email: user.email.filter(|e| !e.is_empty()),
            is_anonymous: user.is_anonymous,
        }
    }
}

// Session response; sign-up with email confirmation returns no token
#[derive(Deserialize, Debug)]
struct TokenResponse {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    user: Option<WireUser>,
}

pub struct GoTrueIdentity {
    client: Client,
    base_url: String,
    api_key: String,
    // None until the first sign-in attempt settles
    session: RwLock<Option<Option<AuthSession>>>,
}

impl GoTrueIdentity {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            session: RwLock::new(None),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/auth/v1/{}", self.base_url, path)
    }

    fn current(&self) -> Option<AuthSession> {
        self.session
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .flatten()
    }

    fn settle(&self, session: Option<AuthSession>) {
        *self.session.write().unwrap_or_else(PoisonError::into_inner) = Some(session);
    }

    async fn post_for_session(&self, path: &str, body: serde_json::Value) -> Result<TokenResponse, ChatError> {
        let response = self
            .client
            .post(self.url(path))
            .header("apikey", &self.api_key)
            .json(&body)
            .send()
            .await?;
        let response = check_auth_response(response).await?;
        Ok(response.json().await?)
    }

    fn adopt(&self, token: TokenResponse) -> bool {
        match (token.access_token, token.user) {
            (Some(access_token), Some(user)) => {
                let user = User::from(user);
                log::info!("Auth session established for user {} (anonymous: {})", user.id, user.is_anonymous);
                self.settle(Some(AuthSession { access_token, user }));
                true
            }
            _ => false,
        }
    }
}

async fn check_auth_response(response: reqwest::Response) -> Result<reqwest::Response, ChatError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    log::error!("Auth request failed with status {}: {}", status, body);
    Err(ChatError::Auth(auth_error_message(&body).unwrap_or_else(|| format!("status {}", status))))
}

// The auth service uses a few different keys for its message
fn auth_error_message(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    ["error_description", "msg", "message", "error"]
        .iter()
        .find_map(|key| value.get(*key).and_then(|v| v.as_str()).map(str::to_string))
}

fn require_credentials(email: &str, password: &str) -> Result<(), ChatError> {
    if email.trim().is_empty() || password.is_empty() {
        return Err(ChatError::Auth("Email and password required.".into()));
    }
    Ok(())
}

#[async_trait]
impl IdentityProvider for GoTrueIdentity {
    fn identity(&self) -> Identity {
        match &*self.session.read().unwrap_or_else(PoisonError::into_inner) {
            None => Identity::Unresolved,
            Some(session) => Identity::from_user(session.as_ref().map(|s| s.user.clone())),
        }
    }

    fn access_token(&self) -> Option<String> {
        self.current().map(|s| s.access_token)
    }

    async fn sign_in_anonymously(&self) -> Result<(), ChatError> {
        if self.current().is_some() {
            return Ok(());
        }
        log::info!("Starting anonymous guest session...");
        match self.post_for_session("signup", json!({})).await {
            Ok(token) => {
                if self.adopt(token) {
                    return Ok(());
                }
                self.settle(None);
                Err(ChatError::Auth("Anonymous sign-in returned no session".into()))
            }
            Err(e) => {
                // Still a guest, just without a backend session
                log::error!("Anonymous sign-in failed: {}", e);
                self.settle(None);
                Err(e)
            }
        }
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<(), ChatError> {
        require_credentials(email, password)?;
        log::info!("Attempting password sign-in...");
        let token = self
            .post_for_session("token?grant_type=password", json!({ "email": email, "password": password }))
            .await?;
        if self.adopt(token) {
            Ok(())
        } else {
            Err(ChatError::Auth("Sign-in returned no session".into()))
        }
    }

    async fn sign_up(&self, email: &str, password: &str) -> Result<(), ChatError> {
        require_credentials(email, password)?;
        log::info!("Attempting sign-up...");
        let token = self
            .post_for_session("signup", json!({ "email": email, "password": password }))
            .await?;
        if !self.adopt(token) {
            log::info!("Sign-up accepted; waiting for email confirmation");
        }
        Ok(())
    }

    async fn sign_out(&self) -> Result<(), ChatError> {
        let Some(session) = self.current() else {
            self.settle(None);
            return Ok(());
        };
        log::info!("Signing out...");
        let response = self
            .client
            .post(self.url("logout"))
            .header("apikey", &self.api_key)
            .bearer_auth(&session.access_token)
            .send()
            .await?;
        check_auth_response(response).await?;
        self.settle(None);
        log::info!("Sign out successful.");
        Ok(())
    }

    async fn link_guest(&self, email: &str, password: &str) -> Result<(), ChatError> {
        let session = match self.current() {
            Some(session) if session.user.is_anonymous => session,
            _ => return Err(ChatError::Auth("User must be anonymous to link account.".into())),
        };
        require_credentials(email, password)?;
        log::info!("Linking anonymous user {} to credentials...", session.user.id);
        let response = self
            .client
            .put(self.url("user"))
            .header("apikey", &self.api_key)
            .bearer_auth(&session.access_token)
            .json(&json!({ "email": email, "password": password }))
            .send()
            .await?;
        let response = check_auth_response(response).await?;
        let user: WireUser = response.json().await?;
        let mut user = User::from(user);
        // Linking converts the anonymous user in place
        user.is_anonymous = false;
        log::info!("Anonymous user linked successfully: {}", user.id);
        self.settle(Some(AuthSession {
            access_token: session.access_token,
            user,
        }));
        Ok(())
    }
}
