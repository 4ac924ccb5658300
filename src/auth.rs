use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Arc, RwLock};
use tracing::{debug, info, warn};

use crate::config::SupabaseConfig;
use crate::error::{check_status, Error, Result};

pub const MIN_PASSWORD_LEN: usize = 6;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub user_id: String,
    pub email: Option<String>,
    pub access_token: String,
    pub refresh_token: Option<String>,
    /// Seconds since epoch.
    pub expires_at: Option<i64>,
}

impl Session {
    pub fn is_expired(&self) -> bool {
        match self.expires_at {
            Some(at) => chrono::Utc::now().timestamp() >= at,
            None => false,
        }
    }
}

/// Shared holder of the signed-in session. Clones see the same session, so
/// signing out through one handle unscopes every store using another.
#[derive(Debug, Clone, Default)]
pub struct SessionHandle {
    inner: Arc<RwLock<Option<Session>>>,
}

impl SessionHandle {
    pub fn new(session: Option<Session>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(session)),
        }
    }

    pub fn current(&self) -> Option<Session> {
        self.inner.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// The current session, or `Unauthenticated` when signed out.
    pub fn require(&self) -> Result<Session> {
        self.current().ok_or(Error::Unauthenticated)
    }

    pub fn set(&self, session: Session) {
        *self.inner.write().unwrap_or_else(|e| e.into_inner()) = Some(session);
    }

    pub fn clear(&self) {
        *self.inner.write().unwrap_or_else(|e| e.into_inner()) = None;
    }
}

// --- Session file ---

pub fn load_session(path: &Path) -> anyhow::Result<Option<Session>> {
    if !path.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read session file: {}", path.display()))?;
    let session = serde_json::from_str(&content)
        .with_context(|| format!("Corrupt session file: {}. Run 'jobify logout' and sign in again.", path.display()))?;
    Ok(Some(session))
}

pub fn save_session(path: &Path, session: &Session) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let content = serde_json::to_string_pretty(session)?;
    std::fs::write(path, content)
        .with_context(|| format!("Failed to write session file: {}", path.display()))
}

pub fn remove_session(path: &Path) -> anyhow::Result<()> {
    if path.exists() {
        std::fs::remove_file(path)
            .with_context(|| format!("Failed to remove session file: {}", path.display()))?;
    }
    Ok(())
}

// --- Auth API client ---

#[derive(Debug, Clone)]
pub struct SignUp {
    pub email: String,
    pub password: String,
    pub full_name: String,
}

impl SignUp {
    pub fn validate(&self) -> Result<()> {
        if self.email.trim().is_empty() || self.password.is_empty() || self.full_name.trim().is_empty() {
            return Err(Error::Validation("Please fill in all fields".to_string()));
        }
        if self.password.chars().count() < MIN_PASSWORD_LEN {
            return Err(Error::Validation(format!(
                "Password must be at least {} characters",
                MIN_PASSWORD_LEN
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SignUpOutcome {
    SignedIn(Session),
    /// The account exists but the email address must be confirmed first.
    ConfirmationPending { user_id: String },
}

#[derive(Debug, Deserialize)]
struct AuthUser {
    id: String,
    email: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    expires_in: Option<i64>,
    user: AuthUser,
}

impl TokenResponse {
    fn into_session(self) -> Session {
        let expires_at = self
            .expires_in
            .map(|secs| chrono::Utc::now().timestamp() + secs);
        Session {
            user_id: self.user.id,
            email: self.user.email,
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            expires_at,
        }
    }
}

pub struct AuthClient {
    http: reqwest::Client,
    base_url: String,
    anon_key: String,
}

impl AuthClient {
    pub fn new(config: &SupabaseConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: format!("{}/auth/v1", config.url.trim_end_matches('/')),
            anon_key: config.anon_key.clone(),
        }
    }

    async fn token(&self, grant_type: &str, body: serde_json::Value) -> Result<Session> {
        let url = format!("{}/token", self.base_url);
        debug!(%url, grant_type, "POST");
        let resp = self
            .http
            .post(&url)
            .query(&[("grant_type", grant_type)])
            .header("apikey", &self.anon_key)
            .json(&body)
            .send()
            .await?;
        let resp = check_status(resp).await?;
        let token: TokenResponse = resp
            .json()
            .await
            .map_err(|e| Error::Decode(format!("token response: {}", e)))?;
        Ok(token.into_session())
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> Result<Session> {
        if email.trim().is_empty() || password.is_empty() {
            return Err(Error::Validation("Email and password are required".to_string()));
        }
        let session = self
            .token("password", serde_json::json!({ "email": email.trim(), "password": password }))
            .await?;
        info!(user_id = %session.user_id, "signed in");
        Ok(session)
    }

    pub async fn refresh(&self, session: &Session) -> Result<Session> {
        let refresh_token = session
            .refresh_token
            .as_deref()
            .ok_or(Error::Unauthenticated)?;
        self.token("refresh_token", serde_json::json!({ "refresh_token": refresh_token }))
            .await
    }

    pub async fn sign_up(&self, request: &SignUp) -> Result<SignUpOutcome> {
        request.validate()?;

        let url = format!("{}/signup", self.base_url);
        debug!(%url, "POST");
        let resp = self
            .http
            .post(&url)
            .header("apikey", &self.anon_key)
            .json(&serde_json::json!({
                "email": request.email.trim(),
                "password": request.password,
                "data": { "full_name": request.full_name.trim() },
            }))
            .send()
            .await?;
        let resp = check_status(resp).await?;
        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| Error::Decode(format!("signup response: {}", e)))?;

        // With auto-confirm the server hands back a session, otherwise just the user.
        if body.get("access_token").is_some() {
            let token: TokenResponse = serde_json::from_value(body)
                .map_err(|e| Error::Decode(format!("signup session: {}", e)))?;
            Ok(SignUpOutcome::SignedIn(token.into_session()))
        } else {
            let user: AuthUser = serde_json::from_value(body)
                .map_err(|e| Error::Decode(format!("signup user: {}", e)))?;
            Ok(SignUpOutcome::ConfirmationPending { user_id: user.id })
        }
    }

    pub async fn sign_out(&self, session: &Session) -> Result<()> {
        let url = format!("{}/logout", self.base_url);
        debug!(%url, "POST");
        let resp = self
            .http
            .post(&url)
            .header("apikey", &self.anon_key)
            .bearer_auth(&session.access_token)
            .send()
            .await?;
        check_status(resp).await?;
        Ok(())
    }
}

/// Forget the stored session. Remote sign-out is best effort: skipped without
/// a config, and its failure is only logged. The file is always removed.
pub async fn end_session(path: &Path, config: Option<&SupabaseConfig>) -> anyhow::Result<()> {
    // A corrupt file is removed all the same.
    let stored = load_session(path).unwrap_or(None);
    if let (Some(session), Some(config)) = (&stored, config) {
        if let Err(e) = AuthClient::new(config).sign_out(session).await {
            warn!("Remote sign out failed: {}", e);
        }
    }
    remove_session(path)
}
