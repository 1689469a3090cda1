// Authentication types

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use super::lifecycle::TokenLifecycle;
use crate::error::{Error, Result};

/// Loopback target used when the console file lists no redirect URI
pub const DEFAULT_REDIRECT_URI: &str = "http://localhost";

/// OAuth client registration issued by the developer console
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationIdentity {
    pub client_id: String,
    pub client_secret: String,
    #[serde(default = "default_redirect_uri")]
    pub redirect_uri: String,
}

fn default_redirect_uri() -> String {
    DEFAULT_REDIRECT_URI.to_string()
}

impl ApplicationIdentity {
    /// Parse an identity document in console (`installed`/`web`) or flat layout
    pub fn from_json(raw: &str) -> Result<Self> {
        let file: IdentityFile = serde_json::from_str(raw)
            .map_err(|e| Error::Configuration(format!("Malformed application identity: {}", e)))?;

        let identity = match file {
            IdentityFile::Installed { installed: c } | IdentityFile::Web { web: c } => {
                ApplicationIdentity {
                    client_id: c.client_id,
                    client_secret: c.client_secret,
                    redirect_uri: c
                        .redirect_uris
                        .into_iter()
                        .next()
                        .unwrap_or_else(default_redirect_uri),
                }
            }
            IdentityFile::Flat(identity) => identity,
        };

        if identity.client_id.trim().is_empty() || identity.client_secret.trim().is_empty() {
            return Err(Error::Configuration(
                "Application identity must contain client_id and client_secret".to_string(),
            ));
        }

        Ok(identity)
    }
}

/// Layouts accepted for the identity file
#[derive(Deserialize)]
#[serde(untagged)]
enum IdentityFile {
    Installed { installed: ConsoleClient },
    Web { web: ConsoleClient },
    Flat(ApplicationIdentity),
}

/// Client section of a developer console download
#[derive(Deserialize)]
struct ConsoleClient {
    client_id: String,
    client_secret: String,
    #[serde(default)]
    redirect_uris: Vec<String>,
}

/// Persisted per-user OAuth state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserCredential {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    pub expires_at: DateTime<Utc>,
    #[serde(default)]
    pub scopes: Vec<String>,
}

impl UserCredential {
    /// Expiry has passed
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }

    /// Expiry falls within `margin` from now
    pub fn expires_within(&self, margin: Duration) -> bool {
        self.expires_at <= Utc::now() + margin
    }

    /// Apply a token endpoint response in place
    pub fn apply(&mut self, token: &TokenResponse) {
        self.access_token = token.access_token.clone();
        self.expires_at = token.expires_at();

        // Refresh token is normally stable; only replace it when the platform rotates it
        if let Some(ref refresh_token) = token.refresh_token {
            self.refresh_token = Some(refresh_token.clone());
        }
        if let Some(scopes) = token.scopes() {
            self.scopes = scopes;
        }
    }

    /// Build a credential from an authorization-code exchange response
    pub fn from_token_response(token: &TokenResponse, requested_scopes: &[String]) -> Self {
        Self {
            access_token: token.access_token.clone(),
            refresh_token: token.refresh_token.clone(),
            expires_at: token.expires_at(),
            scopes: token
                .scopes()
                .unwrap_or_else(|| requested_scopes.to_vec()),
        }
    }
}

/// Trust tier granted for a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthTier {
    /// User consent granted; uploads and private reads allowed
    FullAccess,
    /// Static API key; public reads only
    ReadOnly,
    /// No identity; synthetic data only
    Demo,
}

impl fmt::Display for AuthTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthTier::FullAccess => write!(f, "full-access"),
            AuthTier::ReadOnly => write!(f, "read-only"),
            AuthTier::Demo => write!(f, "demo"),
        }
    }
}

impl std::str::FromStr for AuthTier {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "full" | "full-access" | "oauth" => Ok(AuthTier::FullAccess),
            "read-only" | "readonly" | "api-key" => Ok(AuthTier::ReadOnly),
            "demo" => Ok(AuthTier::Demo),
            other => Err(Error::Configuration(format!("Unknown tier: {}", other))),
        }
    }
}

/// Authenticated capability handed to upload and read operations
#[derive(Clone)]
pub struct Handle {
    inner: HandleInner,
}

#[derive(Clone)]
enum HandleInner {
    FullAccess(Arc<TokenLifecycle>),
    ReadOnly { api_key: String },
    Demo,
}

impl Handle {
    pub fn full_access(lifecycle: Arc<TokenLifecycle>) -> Self {
        Self {
            inner: HandleInner::FullAccess(lifecycle),
        }
    }

    pub fn read_only(api_key: impl Into<String>) -> Self {
        Self {
            inner: HandleInner::ReadOnly {
                api_key: api_key.into(),
            },
        }
    }

    pub fn demo() -> Self {
        Self {
            inner: HandleInner::Demo,
        }
    }

    pub fn tier(&self) -> AuthTier {
        match self.inner {
            HandleInner::FullAccess(_) => AuthTier::FullAccess,
            HandleInner::ReadOnly { .. } => AuthTier::ReadOnly,
            HandleInner::Demo => AuthTier::Demo,
        }
    }

    /// Token lifecycle, present only for FullAccess handles
    pub fn lifecycle(&self) -> Option<&Arc<TokenLifecycle>> {
        match self.inner {
            HandleInner::FullAccess(ref lifecycle) => Some(lifecycle),
            _ => None,
        }
    }

    /// Static key, present only for ReadOnly handles
    pub fn api_key(&self) -> Option<&str> {
        match self.inner {
            HandleInner::ReadOnly { ref api_key } => Some(api_key),
            _ => None,
        }
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Never print the key or tokens
        f.debug_struct("Handle").field("tier", &self.tier()).finish()
    }
}

/// Answer to the three-way tier prompt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InteractionChoice {
    /// Run OAuth consent
    Accept,
    /// Skip consent and use this static API key
    AlternateKey(String),
    /// Decline both; use synthetic data
    Decline,
}

/// Why the interface is being asked to choose
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromptReason {
    /// No usable cached credential
    NoCredential,
    /// Only the read-only or demo tiers are on offer
    KeyRequired,
    /// Interactive consent was attempted and failed
    ConsentFailed(String),
}

/// Interface-layer contract driving the tier choice and browser hand-off
///
/// Both methods may block on the user; they are called from a blocking worker.
pub trait InteractionCallback: Send + Sync {
    /// Render the three-way choice and return the user's answer
    fn choose(&self, reason: &PromptReason) -> InteractionChoice;

    /// Send the user to the consent page
    fn open_consent_page(&self, url: &str) -> anyhow::Result<()>;
}

/// Token endpoint success response
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub token_type: Option<String>,
}

impl TokenResponse {
    pub fn expires_at(&self) -> DateTime<Utc> {
        let expires_in = self.expires_in.unwrap_or(3600);
        Utc::now() + Duration::seconds(expires_in as i64)
    }

    /// Granted scopes as a list, when the platform reported them
    pub fn scopes(&self) -> Option<Vec<String>> {
        self.scope
            .as_ref()
            .map(|s| s.split_whitespace().map(str::to_string).collect())
    }
}

/// Token endpoint error body (RFC 6749 section 5.2)
#[derive(Debug, Clone, Deserialize)]
pub struct OAuthErrorResponse {
    pub error: String,
    #[serde(default)]
    pub error_description: Option<String>,
}
