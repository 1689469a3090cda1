// Token endpoint grants: refresh and authorization-code exchange

use reqwest::{Client, StatusCode};

use super::types::{ApplicationIdentity, OAuthErrorResponse, TokenResponse};
use crate::error::{Error, RefreshFailed};

/// Error code that marks a refresh token as permanently unusable
const INVALID_GRANT: &str = "invalid_grant";

/// Outcome classification of a failed token endpoint call
#[derive(Debug)]
enum GrantFailure {
    /// Platform returned `invalid_grant`
    InvalidGrant(String),
    /// Platform rejected the request for another reason
    Rejected { status: StatusCode, message: String },
    /// No usable response: connect error, timeout, 5xx, malformed body
    Transient(String),
}

/// Exchange a refresh token for a new access token
pub async fn refresh_grant(
    client: &Client,
    token_url: &str,
    identity: &ApplicationIdentity,
    refresh_token: &str,
) -> Result<TokenResponse, RefreshFailed> {
    tracing::info!("Refreshing access token via refresh grant...");

    let form = [
        ("grant_type", "refresh_token"),
        ("client_id", identity.client_id.as_str()),
        ("client_secret", identity.client_secret.as_str()),
        ("refresh_token", refresh_token),
    ];

    match post_form(client, token_url, &form).await {
        Ok(token) => {
            tracing::info!(
                "Token refreshed, expires: {}",
                token.expires_at().to_rfc3339()
            );
            Ok(token)
        }
        Err(GrantFailure::InvalidGrant(message)) => {
            tracing::warn!("Refresh token rejected by platform: {}", message);
            Err(RefreshFailed::Revoked(message))
        }
        // Anything short of invalid_grant keeps the stored credential
        Err(GrantFailure::Rejected { status, message }) => {
            Err(RefreshFailed::Transient(format!("{} - {}", status, message)))
        }
        Err(GrantFailure::Transient(message)) => Err(RefreshFailed::Transient(message)),
    }
}

/// Exchange an authorization code (with PKCE verifier) for a credential
pub async fn exchange_code(
    client: &Client,
    token_url: &str,
    identity: &ApplicationIdentity,
    code: &str,
    redirect_uri: &str,
    code_verifier: &str,
) -> Result<TokenResponse, Error> {
    tracing::debug!("Exchanging authorization code for tokens");

    let form = [
        ("grant_type", "authorization_code"),
        ("code", code),
        ("redirect_uri", redirect_uri),
        ("client_id", identity.client_id.as_str()),
        ("client_secret", identity.client_secret.as_str()),
        ("code_verifier", code_verifier),
    ];

    match post_form(client, token_url, &form).await {
        Ok(token) => {
            if token.refresh_token.is_none() {
                tracing::warn!("Platform granted no refresh token; re-consent will be needed on expiry");
            }
            Ok(token)
        }
        Err(GrantFailure::InvalidGrant(message)) => Err(Error::Authentication(format!(
            "Authorization code rejected: {}",
            message
        ))),
        Err(GrantFailure::Rejected { status, message }) => Err(Error::Authentication(format!(
            "Code exchange failed: {} - {}",
            status, message
        ))),
        Err(GrantFailure::Transient(message)) => Err(Error::TransientNetwork(message)),
    }
}

async fn post_form(
    client: &Client,
    token_url: &str,
    form: &[(&str, &str)],
) -> Result<TokenResponse, GrantFailure> {
    let response = client
        .post(token_url)
        .header("Content-Type", "application/x-www-form-urlencoded")
        .form(form)
        .send()
        .await
        .map_err(|e| GrantFailure::Transient(format!("Token request failed: {}", e)))?;

    let status = response.status();
    if !status.is_success() {
        let error_text = response.text().await.unwrap_or_default();
        tracing::error!(
            status = status.as_u16(),
            body = %error_text,
            "Token endpoint returned an error"
        );

        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            return Err(GrantFailure::Transient(format!("{} - {}", status, error_text)));
        }

        return Err(classify_rejection(status, &error_text));
    }

    let data: TokenResponse = response
        .json()
        .await
        .map_err(|e| GrantFailure::Transient(format!("Malformed token response: {}", e)))?;

    if data.access_token.is_empty() {
        return Err(GrantFailure::Transient(
            "Token response does not contain access_token".to_string(),
        ));
    }

    Ok(data)
}

fn classify_rejection(status: StatusCode, body: &str) -> GrantFailure {
    match serde_json::from_str::<OAuthErrorResponse>(body) {
        Ok(err) if err.error == INVALID_GRANT => {
            GrantFailure::InvalidGrant(err.error_description.unwrap_or(err.error))
        }
        Ok(err) => GrantFailure::Rejected {
            status,
            message: match err.error_description {
                Some(desc) => format!("{}: {}", err.error, desc),
                None => err.error,
            },
        },
        Err(_) => GrantFailure::Rejected {
            status,
            message: body.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity() -> ApplicationIdentity {
        ApplicationIdentity {
            client_id: "client-id".into(),
            client_secret: "client-secret".into(),
            redirect_uri: "http://localhost".into(),
        }
    }

    #[test]
    fn test_classify_invalid_grant() {
        let failure = classify_rejection(
            StatusCode::BAD_REQUEST,
            r#"{"error":"invalid_grant","error_description":"Token has been expired or revoked."}"#,
        );
        assert!(matches!(failure, GrantFailure::InvalidGrant(ref m) if m.contains("revoked")));
    }

    #[test]
    fn test_classify_other_oauth_error() {
        let failure = classify_rejection(StatusCode::UNAUTHORIZED, r#"{"error":"invalid_client"}"#);
        assert!(matches!(
            failure,
            GrantFailure::Rejected { status, ref message } if status == 401 && message == "invalid_client"
        ));
    }

    #[test]
    fn test_classify_non_json_body() {
        let failure = classify_rejection(StatusCode::BAD_REQUEST, "<html>nope</html>");
        assert!(matches!(failure, GrantFailure::Rejected { .. }));
    }

    #[tokio::test]
    async fn test_refresh_grant_success() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/token")
            .match_body(mockito::Matcher::AllOf(vec![
                mockito::Matcher::UrlEncoded("grant_type".into(), "refresh_token".into()),
                mockito::Matcher::UrlEncoded("refresh_token".into(), "1//stored".into()),
                mockito::Matcher::UrlEncoded("client_id".into(), "client-id".into()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"access_token":"ya29.new","expires_in":3599,"token_type":"Bearer"}"#)
            .expect(1)
            .create_async()
            .await;

        let url = format!("{}/token", server.url());
        let token = refresh_grant(&Client::new(), &url, &identity(), "1//stored")
            .await
            .unwrap();

        assert_eq!(token.access_token, "ya29.new");
        assert_eq!(token.expires_in, Some(3599));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_refresh_grant_invalid_grant_is_revoked() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/token")
            .with_status(400)
            .with_body(r#"{"error":"invalid_grant","error_description":"Token has been expired or revoked."}"#)
            .create_async()
            .await;

        let url = format!("{}/token", server.url());
        let err = refresh_grant(&Client::new(), &url, &identity(), "1//revoked")
            .await
            .unwrap_err();

        assert!(matches!(err, RefreshFailed::Revoked(_)));
    }

    #[tokio::test]
    async fn test_refresh_grant_server_error_is_transient() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/token")
            .with_status(503)
            .create_async()
            .await;

        let url = format!("{}/token", server.url());
        let err = refresh_grant(&Client::new(), &url, &identity(), "1//stored")
            .await
            .unwrap_err();

        assert!(matches!(err, RefreshFailed::Transient(_)));
    }

    #[tokio::test]
    async fn test_refresh_grant_malformed_body_is_transient() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/token")
            .with_status(200)
            .with_body("not json")
            .create_async()
            .await;

        let url = format!("{}/token", server.url());
        let err = refresh_grant(&Client::new(), &url, &identity(), "1//stored")
            .await
            .unwrap_err();

        assert!(matches!(err, RefreshFailed::Transient(_)));
    }

    #[tokio::test]
    async fn test_exchange_code_sends_verifier() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/token")
            .match_body(mockito::Matcher::AllOf(vec![
                mockito::Matcher::UrlEncoded("grant_type".into(), "authorization_code".into()),
                mockito::Matcher::UrlEncoded("code".into(), "4/abc".into()),
                mockito::Matcher::UrlEncoded("code_verifier".into(), "verifier".into()),
                mockito::Matcher::UrlEncoded(
                    "redirect_uri".into(),
                    "http://localhost:5555/".into(),
                ),
            ]))
            .with_status(200)
            .with_body(
                r#"{"access_token":"ya29.a","refresh_token":"1//r","expires_in":3599,"scope":"s1 s2"}"#,
            )
            .create_async()
            .await;

        let url = format!("{}/token", server.url());
        let token = exchange_code(
            &Client::new(),
            &url,
            &identity(),
            "4/abc",
            "http://localhost:5555/",
            "verifier",
        )
        .await
        .unwrap();

        assert_eq!(token.refresh_token.as_deref(), Some("1//r"));
        assert_eq!(token.scopes().unwrap(), vec!["s1".to_string(), "s2".to_string()]);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_exchange_code_unreachable_is_transient() {
        // Grab a free port and release it so nothing is listening there
        let port = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let err = exchange_code(
            &Client::new(),
            &format!("http://127.0.0.1:{}/token", port),
            &identity(),
            "4/abc",
            "http://localhost/",
            "verifier",
        )
        .await
        .unwrap_err();

        assert!(matches!(err, Error::TransientNetwork(_)));
    }
}
