use chrono::Duration;
use reqwest::Client;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::Mutex;

use super::refresh;
use super::store::CredentialStore;
use super::types::{ApplicationIdentity, UserCredential};
use crate::config::Config;
use crate::error::RefreshFailed;

/// Token lifecycle for one FullAccess credential
///
/// The credential sits behind an async mutex that doubles as the single-flight
/// gate: concurrent callers that find the token expiring queue on the lock, the
/// first one refreshes, the rest observe its outcome. A failed attempt is
/// handed to everyone who queued behind it, so one expiry costs one grant.
pub struct TokenLifecycle {
    /// Current credential plus the outcome of the last refresh attempt
    state: Mutex<RefreshState>,

    /// Bumped under the lock each time a refresh attempt finishes
    attempts: AtomicU64,

    /// Client registration used for the refresh grant
    identity: ApplicationIdentity,

    /// Where refreshed credentials are persisted
    store: CredentialStore,

    /// HTTP client for refresh requests
    client: Client,

    token_url: String,

    /// Tokens expiring within this window count as expired
    refresh_threshold: Duration,

    /// Set once the platform answered invalid_grant
    revoked: AtomicBool,
}

struct RefreshState {
    credential: UserCredential,
    last_failure: Option<RefreshFailed>,
}

impl TokenLifecycle {
    pub fn new(
        credential: UserCredential,
        identity: ApplicationIdentity,
        store: CredentialStore,
        client: Client,
        token_url: impl Into<String>,
        refresh_threshold: Duration,
    ) -> Self {
        Self {
            state: Mutex::new(RefreshState {
                credential,
                last_failure: None,
            }),
            attempts: AtomicU64::new(0),
            identity,
            store,
            client,
            token_url: token_url.into(),
            refresh_threshold,
            revoked: AtomicBool::new(false),
        }
    }

    pub fn from_config(
        credential: UserCredential,
        identity: ApplicationIdentity,
        store: CredentialStore,
        client: Client,
        config: &Config,
    ) -> Self {
        Self::new(
            credential,
            identity,
            store,
            client,
            config.token_url.clone(),
            config.refresh_margin(),
        )
    }

    /// Return a credential valid beyond the safety margin, refreshing if needed
    pub async fn ensure_fresh(&self) -> Result<UserCredential, RefreshFailed> {
        if self.is_revoked() {
            return Err(RefreshFailed::Revoked(
                "credential was revoked earlier in this session".to_string(),
            ));
        }

        let observed = self.attempts.load(Ordering::SeqCst);
        let mut state = self.state.lock().await;

        // Another caller may have hit invalid_grant while we waited for the lock
        if self.is_revoked() {
            return Err(RefreshFailed::Revoked(
                "credential was revoked earlier in this session".to_string(),
            ));
        }

        // An attempt finished while we queued: share its failure instead of retrying
        if self.attempts.load(Ordering::SeqCst) != observed {
            if let Some(ref failure) = state.last_failure {
                return Err(failure.clone());
            }
        }

        if !state.credential.expires_within(self.refresh_threshold) {
            return Ok(state.credential.clone());
        }

        let Some(refresh_token) = state.credential.refresh_token.clone() else {
            tracing::warn!("Access token expiring and no refresh token is available");
            return Err(RefreshFailed::NoRefreshToken);
        };

        let outcome =
            refresh::refresh_grant(&self.client, &self.token_url, &self.identity, &refresh_token)
                .await;
        self.attempts.fetch_add(1, Ordering::SeqCst);

        match outcome {
            Ok(token) => {
                state.last_failure = None;
                state.credential.apply(&token);
                if let Err(e) = self.store.save_user_credential(&state.credential) {
                    // In-memory credential is still good for this session
                    tracing::warn!("Failed to persist refreshed credential: {}", e);
                }
                Ok(state.credential.clone())
            }
            Err(RefreshFailed::Revoked(message)) => {
                self.revoked.store(true, Ordering::SeqCst);
                state.last_failure = Some(RefreshFailed::Revoked(message.clone()));
                if let Err(e) = self.store.clear() {
                    tracing::error!("Failed to clear revoked credential: {}", e);
                }
                Err(RefreshFailed::Revoked(message))
            }
            Err(e) => {
                // Inside the margin counts as expired, so the old token is not served
                tracing::error!("Token refresh failed: {}", e);
                state.last_failure = Some(e.clone());
                Err(e)
            }
        }
    }

    /// Bearer token for the next authenticated call
    pub async fn access_token(&self) -> Result<String, RefreshFailed> {
        self.ensure_fresh().await.map(|c| c.access_token)
    }

    /// Current credential without refreshing
    pub async fn snapshot(&self) -> UserCredential {
        self.state.lock().await.credential.clone()
    }

    pub fn is_revoked(&self) -> bool {
        self.revoked.load(Ordering::SeqCst)
    }

    /// Check if token is expiring soon (within threshold)
    pub async fn is_token_expiring_soon(&self) -> bool {
        self.state
            .lock()
            .await
            .credential
            .expires_within(self.refresh_threshold)
    }
}
