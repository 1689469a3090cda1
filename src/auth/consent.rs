// Interactive OAuth consent: PKCE, loopback redirect listener, code exchange

use axum::{extract::Query, extract::State, response::Html, Router};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::Rng;
use reqwest::Client;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use url::Url;

use super::refresh;
use super::types::{ApplicationIdentity, InteractionCallback, UserCredential};
use crate::config::Config;
use crate::error::{Error, Result};

const CALLBACK_PAGE: &str = "<html><body><h3>Authorization received.</h3>\
<p>You can close this window and return to the application.</p></body></html>";

/// How long to wait for the server task to release the port after shutdown
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// PKCE code verifier plus CSRF state
#[derive(Debug, Clone)]
pub struct PkceVerifier {
    verifier: String,
    state: String,
}

impl PkceVerifier {
    pub fn new() -> Self {
        let mut rng = rand::thread_rng();

        // 32 random bytes give a 43-char verifier (RFC 7636 allows 43-128)
        let mut verifier_bytes = [0u8; 32];
        rng.fill(&mut verifier_bytes);

        let mut state_bytes = [0u8; 16];
        rng.fill(&mut state_bytes);

        Self {
            verifier: URL_SAFE_NO_PAD.encode(verifier_bytes),
            state: URL_SAFE_NO_PAD.encode(state_bytes),
        }
    }

    pub fn verifier(&self) -> &str {
        &self.verifier
    }

    pub fn state(&self) -> &str {
        &self.state
    }

    /// S256 challenge: BASE64URL(SHA256(verifier))
    pub fn challenge(&self) -> String {
        let hash = Sha256::digest(self.verifier.as_bytes());
        URL_SAFE_NO_PAD.encode(hash)
    }
}

impl Default for PkceVerifier {
    fn default() -> Self {
        Self::new()
    }
}

/// Query parameters the platform appends to the redirect
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
}

/// Build the consent page URL
pub fn build_auth_url(
    auth_url: &str,
    client_id: &str,
    redirect_uri: &str,
    scopes: &[String],
    pkce: &PkceVerifier,
) -> Result<String> {
    let mut url = Url::parse(auth_url)
        .map_err(|e| Error::Configuration(format!("Invalid auth URL: {}", e)))?;

    url.query_pairs_mut()
        .append_pair("client_id", client_id)
        .append_pair("redirect_uri", redirect_uri)
        .append_pair("response_type", "code")
        .append_pair("scope", &scopes.join(" "))
        .append_pair("state", pkce.state())
        .append_pair("code_challenge", &pkce.challenge())
        .append_pair("code_challenge_method", "S256")
        // Request a refresh token, and re-issue it even if consent was given before
        .append_pair("access_type", "offline")
        .append_pair("prompt", "consent");

    Ok(url.to_string())
}

/// One-shot HTTP listener on 127.0.0.1 that captures the authorization redirect
pub struct LoopbackListener {
    port: u16,
    redirect_uri: String,
    callbacks: mpsc::Receiver<CallbackParams>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl LoopbackListener {
    /// Bind an ephemeral port; the redirect URI is `redirect_base` with that port
    pub async fn bind(redirect_base: &str) -> Result<Self> {
        let mut redirect = Url::parse(redirect_base)
            .map_err(|e| Error::Configuration(format!("Invalid redirect URI: {}", e)))?;

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .map_err(|e| Error::Configuration(format!("Failed to bind redirect listener: {}", e)))?;
        let port = listener
            .local_addr()
            .map_err(|e| Error::Configuration(format!("Redirect listener has no address: {}", e)))?
            .port();

        redirect
            .set_port(Some(port))
            .map_err(|_| Error::Configuration("Redirect URI cannot carry a port".to_string()))?;

        let (callback_tx, callbacks) = mpsc::channel(1);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let app = Router::new()
            .fallback(handle_callback)
            .with_state(callback_tx);

        let task = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
                .ok();
        });

        tracing::debug!(port, "Redirect listener bound");

        Ok(Self {
            port,
            redirect_uri: redirect.to_string(),
            callbacks,
            shutdown_tx: Some(shutdown_tx),
            task: Some(task),
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn redirect_uri(&self) -> &str {
        &self.redirect_uri
    }

    /// Wait for the redirect, then tear the listener down (also on timeout)
    pub async fn wait_for_callback(mut self, timeout: Duration) -> Result<CallbackParams> {
        let received = tokio::time::timeout(timeout, self.callbacks.recv()).await;
        self.shutdown().await;

        match received {
            Ok(Some(params)) => Ok(params),
            Ok(None) => Err(Error::Authentication(
                "Redirect listener stopped before receiving a response".to_string(),
            )),
            Err(_) => Err(Error::Authentication(format!(
                "Timed out after {}s waiting for consent",
                timeout.as_secs()
            ))),
        }
    }

    /// Stop serving and wait until the port is released
    async fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(mut task) = self.task.take() {
            if tokio::time::timeout(SHUTDOWN_GRACE, &mut task).await.is_err() {
                tracing::warn!(port = self.port, "Redirect listener did not stop in time, aborting");
                task.abort();
            }
        }
        tracing::debug!(port = self.port, "Redirect listener closed");
    }
}

impl Drop for LoopbackListener {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

async fn handle_callback(
    State(tx): State<mpsc::Sender<CallbackParams>>,
    Query(params): Query<CallbackParams>,
) -> Html<&'static str> {
    // Browsers also ask for /favicon.ico; only forward real redirects
    if params.code.is_some() || params.error.is_some() {
        let _ = tx.try_send(params);
    }
    Html(CALLBACK_PAGE)
}

/// Full authorization-code flow against the platform
pub struct ConsentFlow<'a> {
    client: &'a Client,
    config: &'a Config,
    identity: &'a ApplicationIdentity,
}

impl<'a> ConsentFlow<'a> {
    pub fn new(client: &'a Client, config: &'a Config, identity: &'a ApplicationIdentity) -> Self {
        Self {
            client,
            config,
            identity,
        }
    }

    /// Open the consent page, await the redirect and exchange the code
    pub async fn run(&self, callback: Arc<dyn InteractionCallback>) -> Result<UserCredential> {
        let listener = LoopbackListener::bind(&self.identity.redirect_uri).await?;
        let redirect_uri = listener.redirect_uri().to_string();
        let pkce = PkceVerifier::new();

        let auth_url = build_auth_url(
            &self.config.auth_url,
            &self.identity.client_id,
            &redirect_uri,
            &self.config.scopes,
            &pkce,
        )?;

        tracing::info!(port = listener.port(), "Waiting for user consent...");

        let opener = callback.clone();
        let url = auth_url.clone();
        tokio::task::spawn_blocking(move || opener.open_consent_page(&url))
            .await
            .map_err(|e| Error::Authentication(format!("Consent page task failed: {}", e)))?
            .map_err(|e| Error::Authentication(format!("Failed to open consent page: {}", e)))?;

        let params = listener
            .wait_for_callback(self.config.consent_timeout())
            .await?;
        let code = validate_callback(params, &pkce)?;

        let token = refresh::exchange_code(
            self.client,
            &self.config.token_url,
            self.identity,
            &code,
            &redirect_uri,
            pkce.verifier(),
        )
        .await?;

        tracing::info!("✅ Consent granted, credential obtained");
        Ok(UserCredential::from_token_response(&token, &self.config.scopes))
    }
}

/// Check the redirect for denial and CSRF mismatch, returning the code
fn validate_callback(params: CallbackParams, pkce: &PkceVerifier) -> Result<String> {
    if let Some(error) = params.error {
        return Err(Error::Authentication(format!("Consent denied: {}", error)));
    }

    if params.state.as_deref() != Some(pkce.state()) {
        tracing::warn!("OAuth state mismatch on redirect");
        return Err(Error::Authentication(
            "OAuth state mismatch on redirect".to_string(),
        ));
    }

    params
        .code
        .filter(|c| !c.is_empty())
        .ok_or_else(|| Error::Authentication("Redirect carried no authorization code".to_string()))
}
