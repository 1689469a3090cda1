use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;

use super::consent::ConsentFlow;
use super::lifecycle::TokenLifecycle;
use super::store::CredentialStore;
use super::types::{
    ApplicationIdentity, AuthTier, Handle, InteractionCallback, InteractionChoice, PromptReason,
    UserCredential,
};
use crate::config::Config;
use crate::error::{Error, Result};

/// Alternate keys that select the demo tier instead of a real API key
const DEMO_KEYS: [&str; 3] = ["demo", "test", "example"];

/// Decides which tier is active and produces the matching handle
pub struct AuthNegotiator {
    config: Config,
    store: CredentialStore,
    client: Client,
}

impl AuthNegotiator {
    pub fn new(config: Config) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(config.http_connect_timeout))
            .timeout(Duration::from_secs(config.http_request_timeout))
            .build()
            .map_err(|e| Error::Configuration(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self::with_client(config, client))
    }

    pub fn with_client(config: Config, client: Client) -> Self {
        let store = CredentialStore::from_config(&config);
        Self {
            config,
            store,
            client,
        }
    }

    pub fn store(&self) -> &CredentialStore {
        &self.store
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Negotiate a tier, starting from `preferred` and degrading on the user's choice
    ///
    /// FullAccess: cached credential first, then the three-way prompt.
    /// ReadOnly: prompt for a key only. Demo: never fails.
    pub async fn negotiate(
        &self,
        preferred: AuthTier,
        callback: Arc<dyn InteractionCallback>,
    ) -> Result<(AuthTier, Handle)> {
        tracing::info!(preferred = %preferred, "Negotiating authentication tier");

        let granted = match preferred {
            AuthTier::Demo => Ok(demo()),
            AuthTier::ReadOnly => {
                match ask(callback, PromptReason::KeyRequired).await? {
                    InteractionChoice::AlternateKey(key) => self.read_only(&key),
                    // Consent isn't on offer below FullAccess
                    InteractionChoice::Accept | InteractionChoice::Decline => Ok(demo()),
                }
            }
            AuthTier::FullAccess => self.negotiate_full_access(callback).await,
        }?;

        tracing::info!(tier = %granted.0, "✅ Authentication tier granted");
        Ok(granted)
    }

    async fn negotiate_full_access(
        &self,
        callback: Arc<dyn InteractionCallback>,
    ) -> Result<(AuthTier, Handle)> {
        // FullAccess is impossible without a client registration
        let identity = self.store.load_identity()?.ok_or_else(|| {
            Error::Configuration(format!(
                "Application identity not found: {}",
                self.store.identity_path().display()
            ))
        })?;

        if let Some(handle) = self.try_cached(&identity).await {
            return Ok((AuthTier::FullAccess, handle));
        }

        let mut reason = PromptReason::NoCredential;
        loop {
            let choice = ask(callback.clone(), reason.clone()).await?;

            match choice {
                InteractionChoice::Accept => {
                    let flow = ConsentFlow::new(&self.client, &self.config, &identity);
                    match flow.run(callback.clone()).await {
                        Ok(credential) => {
                            if let Err(e) = self.store.save_user_credential(&credential) {
                                tracing::warn!("Failed to persist new credential: {}", e);
                            }
                            let handle = self.full_access(credential, identity);
                            return Ok((AuthTier::FullAccess, handle));
                        }
                        Err(e @ Error::Configuration(_)) => return Err(e),
                        Err(e) => {
                            if matches!(reason, PromptReason::ConsentFailed(_)) {
                                return Err(e);
                            }
                            tracing::warn!("Interactive consent failed: {}", e);
                            reason = PromptReason::ConsentFailed(e.to_string());
                        }
                    }
                }
                InteractionChoice::AlternateKey(key) => return self.read_only(&key),
                InteractionChoice::Decline => return Ok(demo()),
            }
        }
    }

    /// Reuse the persisted credential when it is valid or can be refreshed
    async fn try_cached(&self, identity: &ApplicationIdentity) -> Option<Handle> {
        let credential = match self.store.load_user_credential() {
            Ok(Some(credential)) => credential,
            Ok(None) => {
                tracing::debug!("No cached user credential");
                return None;
            }
            Err(e) => {
                tracing::warn!("Ignoring unreadable user credential: {}", e);
                return None;
            }
        };

        let expired = credential.is_expired();
        let handle = self.full_access(credential, identity.clone());

        if !expired {
            tracing::info!("Using cached credential");
            return Some(handle);
        }

        let lifecycle = handle.lifecycle()?.clone();
        match lifecycle.ensure_fresh().await {
            Ok(_) => {
                tracing::info!("Cached credential refreshed");
                Some(handle)
            }
            Err(e) => {
                tracing::warn!("Cached credential unusable, falling back to consent: {}", e);
                None
            }
        }
    }

    fn full_access(&self, credential: UserCredential, identity: ApplicationIdentity) -> Handle {
        let lifecycle = TokenLifecycle::from_config(
            credential,
            identity,
            self.store.clone(),
            self.client.clone(),
            &self.config,
        );
        Handle::full_access(Arc::new(lifecycle))
    }

    fn read_only(&self, key: &str) -> Result<(AuthTier, Handle)> {
        let key = key.trim();
        if key.is_empty() {
            return Err(Error::InvalidInput("API key must not be empty".to_string()));
        }

        if DEMO_KEYS.iter().any(|demo_key| key.eq_ignore_ascii_case(demo_key)) {
            tracing::info!("Demo key supplied, using sample data");
            return Ok(demo());
        }

        let prefix: String = key.chars().take(4).collect();
        tracing::info!("Using API key {}... (read-only)", prefix);
        Ok((AuthTier::ReadOnly, Handle::read_only(key)))
    }

    /// Forget the user credential; the next FullAccess negotiation needs consent
    pub fn logout(&self) -> Result<()> {
        self.store.clear()?;
        tracing::info!("🚪 Logged out");
        Ok(())
    }
}

fn demo() -> (AuthTier, Handle) {
    (AuthTier::Demo, Handle::demo())
}

/// Run the blocking prompt off the async runtime
async fn ask(callback: Arc<dyn InteractionCallback>, reason: PromptReason) -> Result<InteractionChoice> {
    tokio::task::spawn_blocking(move || callback.choose(&reason))
        .await
        .map_err(|e| Error::Authentication(format!("Interaction prompt failed: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration as ChronoDuration, Utc};
    use std::sync::Mutex;

    /// Scripted interface: returns queued choices, records prompts
    struct Scripted {
        choices: Mutex<Vec<InteractionChoice>>,
        prompts: Mutex<Vec<PromptReason>>,
    }

    impl Scripted {
        fn new(mut choices: Vec<InteractionChoice>) -> Arc<Self> {
            choices.reverse();
            Arc::new(Self {
                choices: Mutex::new(choices),
                prompts: Mutex::new(Vec::new()),
            })
        }

        fn prompts(&self) -> Vec<PromptReason> {
            self.prompts.lock().unwrap().clone()
        }
    }

    impl InteractionCallback for Scripted {
        fn choose(&self, reason: &PromptReason) -> InteractionChoice {
            self.prompts.lock().unwrap().push(reason.clone());
            self.choices
                .lock()
                .unwrap()
                .pop()
                .unwrap_or(InteractionChoice::Decline)
        }

        fn open_consent_page(&self, _url: &str) -> anyhow::Result<()> {
            anyhow::bail!("no browser in tests")
        }
    }

    fn config_in(dir: &tempfile::TempDir, token_url: &str) -> Config {
        Config {
            identity_file: dir.path().join("credentials.json"),
            token_file: dir.path().join("token.json"),
            token_url: token_url.to_string(),
            consent_timeout: 1,
            ..Config::default()
        }
    }

    fn write_identity(dir: &tempfile::TempDir) {
        std::fs::write(
            dir.path().join("credentials.json"),
            r#"{"installed":{"client_id":"cid","client_secret":"cs","redirect_uris":["http://localhost"]}}"#,
        )
        .unwrap();
    }

    fn cached(expires_in_secs: i64) -> UserCredential {
        UserCredential {
            access_token: "ya29.cached".into(),
            refresh_token: Some("1//r".into()),
            expires_at: Utc::now() + ChronoDuration::seconds(expires_in_secs),
            scopes: vec![],
        }
    }

    #[tokio::test]
    async fn test_valid_cached_credential_skips_prompt() {
        let dir = tempfile::tempdir().unwrap();
        write_identity(&dir);
        let negotiator = AuthNegotiator::with_client(config_in(&dir, "http://unused"), Client::new());
        negotiator.store().save_user_credential(&cached(3600)).unwrap();

        let ui = Scripted::new(vec![]);
        let (tier, handle) = negotiator.negotiate(AuthTier::FullAccess, ui.clone()).await.unwrap();

        assert_eq!(tier, AuthTier::FullAccess);
        assert_eq!(handle.tier(), AuthTier::FullAccess);
        assert!(ui.prompts().is_empty());
    }

    #[tokio::test]
    async fn test_missing_identity_fails_full_access() {
        let dir = tempfile::tempdir().unwrap();
        let negotiator = AuthNegotiator::with_client(config_in(&dir, "http://unused"), Client::new());

        let err = negotiator
            .negotiate(AuthTier::FullAccess, Scripted::new(vec![]))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[tokio::test]
    async fn test_read_only_does_not_need_identity() {
        let dir = tempfile::tempdir().unwrap();
        let negotiator = AuthNegotiator::with_client(config_in(&dir, "http://unused"), Client::new());

        let ui = Scripted::new(vec![InteractionChoice::AlternateKey("AIza-key".into())]);
        let (tier, handle) = negotiator.negotiate(AuthTier::ReadOnly, ui.clone()).await.unwrap();

        assert_eq!(tier, AuthTier::ReadOnly);
        assert_eq!(handle.api_key(), Some("AIza-key"));
        assert_eq!(ui.prompts(), vec![PromptReason::KeyRequired]);
        assert!(!negotiator.store().credential_path().exists());
    }

    #[tokio::test]
    async fn test_decline_yields_demo() {
        let dir = tempfile::tempdir().unwrap();
        write_identity(&dir);
        let negotiator = AuthNegotiator::with_client(config_in(&dir, "http://unused"), Client::new());

        let (tier, _) = negotiator
            .negotiate(AuthTier::FullAccess, Scripted::new(vec![InteractionChoice::Decline]))
            .await
            .unwrap();
        assert_eq!(tier, AuthTier::Demo);

        let (tier, _) = negotiator
            .negotiate(AuthTier::Demo, Scripted::new(vec![]))
            .await
            .unwrap();
        assert_eq!(tier, AuthTier::Demo);
    }

    #[tokio::test]
    async fn test_demo_key_and_empty_key() {
        let dir = tempfile::tempdir().unwrap();
        let negotiator = AuthNegotiator::with_client(config_in(&dir, "http://unused"), Client::new());

        let ui = Scripted::new(vec![InteractionChoice::AlternateKey("DEMO".into())]);
        let (tier, _) = negotiator.negotiate(AuthTier::ReadOnly, ui).await.unwrap();
        assert_eq!(tier, AuthTier::Demo);

        let ui = Scripted::new(vec![InteractionChoice::AlternateKey("   ".into())]);
        let err = negotiator.negotiate(AuthTier::ReadOnly, ui).await.unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_consent_failure_offers_fallback() {
        let dir = tempfile::tempdir().unwrap();
        write_identity(&dir);
        let negotiator = AuthNegotiator::with_client(config_in(&dir, "http://unused"), Client::new());

        // Browser cannot be opened, so consent fails and the user picks a key
        let ui = Scripted::new(vec![
            InteractionChoice::Accept,
            InteractionChoice::AlternateKey("AIza-key".into()),
        ]);
        let (tier, _) = negotiator.negotiate(AuthTier::FullAccess, ui.clone()).await.unwrap();

        assert_eq!(tier, AuthTier::ReadOnly);
        let prompts = ui.prompts();
        assert_eq!(prompts[0], PromptReason::NoCredential);
        assert!(matches!(prompts[1], PromptReason::ConsentFailed(_)));
    }

    #[tokio::test]
    async fn test_second_accept_after_failure_surfaces_error() {
        let dir = tempfile::tempdir().unwrap();
        write_identity(&dir);
        let negotiator = AuthNegotiator::with_client(config_in(&dir, "http://unused"), Client::new());

        let ui = Scripted::new(vec![InteractionChoice::Accept, InteractionChoice::Accept]);
        let err = negotiator.negotiate(AuthTier::FullAccess, ui).await.unwrap_err();
        assert!(matches!(err, Error::Authentication(_)));
    }

    #[tokio::test]
    async fn test_logout_clears_credential() {
        let dir = tempfile::tempdir().unwrap();
        let negotiator = AuthNegotiator::with_client(config_in(&dir, "http://unused"), Client::new());
        negotiator.store().save_user_credential(&cached(3600)).unwrap();

        negotiator.logout().unwrap();
        assert!(negotiator.store().load_user_credential().unwrap().is_none());
    }
}
