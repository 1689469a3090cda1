use rand::Rng;
use reqwest::{redirect, Client, RequestBuilder, Response, StatusCode};
use std::future::Future;
use std::time::Duration;

use crate::config::Config;
use crate::error::{Error, Result};

/// `308 Resume Incomplete` is how the resumable protocol acknowledges a partial upload
pub const RESUME_INCOMPLETE: u16 = 308;

/// HTTP client for platform calls with retry logic
#[derive(Clone)]
pub struct RetryingHttpClient {
    /// Shared HTTP client with connection pooling
    client: Client,

    /// Total attempts per request, first try included
    max_attempts: u32,

    /// Base delay for exponential backoff (milliseconds)
    base_delay_ms: u64,
}

impl RetryingHttpClient {
    pub fn new(
        connect_timeout: u64,
        request_timeout: u64,
        max_attempts: u32,
        base_delay_ms: u64,
    ) -> Result<Self> {
        // 308 carries no Location in the upload protocol; never follow redirects
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(connect_timeout))
            .timeout(Duration::from_secs(request_timeout))
            .redirect(redirect::Policy::none())
            .build()
            .map_err(|e| Error::Configuration(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            max_attempts: max_attempts.max(1),
            base_delay_ms,
        })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(
            config.http_connect_timeout,
            config.http_request_timeout,
            config.http_max_attempts,
            config.retry_base_delay_ms,
        )
    }

    /// Execute a request with retry logic
    ///
    /// `make_request` runs before every attempt so it can refresh credentials
    /// and rebuild the body; an error from it aborts without retrying.
    /// - 401: authentication error, not retried
    /// - 429 / 5xx / timeouts / connection failures: exponential backoff
    /// - other 4xx: rejected, not retried
    pub async fn execute_with_retry<F, Fut>(&self, mut make_request: F) -> Result<Response>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<RequestBuilder>>,
    {
        let mut attempt = 0;

        loop {
            let request = make_request().await?;

            tracing::debug!(
                attempt = attempt + 1,
                max_attempts = self.max_attempts,
                "Executing request attempt"
            );

            let failure = match request.send().await {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() || status.as_u16() == RESUME_INCOMPLETE {
                        tracing::debug!(status = %status, "Request successful");
                        return Ok(response);
                    }

                    match classify_status(status) {
                        StatusClass::Retryable => format!("status {}", status),
                        StatusClass::Unauthorized => {
                            let body = response.text().await.unwrap_or_default();
                            tracing::error!(status = %status, body = %body, "Request unauthorized");
                            return Err(Error::Authentication(format!(
                                "Platform rejected access token: {}",
                                body
                            )));
                        }
                        StatusClass::Rejected => {
                            let body = response.text().await.unwrap_or_default();
                            tracing::error!(
                                status = status.as_u16(),
                                response_body = %body,
                                "HTTP request failed with error response"
                            );
                            return Err(Error::Rejected {
                                status: status.as_u16(),
                                message: body,
                            });
                        }
                    }
                }
                Err(e) => {
                    let error_kind = if e.is_timeout() {
                        "timeout"
                    } else if e.is_connect() {
                        "connection_failed"
                    } else if e.is_request() {
                        "request_error"
                    } else if e.is_body() {
                        "body_error"
                    } else {
                        "unknown"
                    };

                    tracing::warn!(
                        error_kind = error_kind,
                        error = %e,
                        attempt = attempt + 1,
                        "HTTP request error"
                    );
                    format!("{} ({})", e, error_kind)
                }
            };

            attempt += 1;
            if attempt >= self.max_attempts {
                tracing::error!(
                    total_attempts = attempt,
                    last_error = %failure,
                    "HTTP request failed after all retries"
                );
                return Err(Error::TransientNetwork(format!(
                    "giving up after {} attempts: {}",
                    attempt, failure
                )));
            }

            let delay = self.calculate_backoff_delay(attempt - 1);
            tracing::warn!(
                "Request failed: {}, retrying after {}ms (attempt {}/{})",
                failure,
                delay,
                attempt + 1,
                self.max_attempts
            );
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
    }

    /// Execute once and ignore the status (best-effort notifications)
    pub async fn execute_once(&self, request: RequestBuilder) -> Result<Response> {
        request
            .send()
            .await
            .map_err(|e| Error::TransientNetwork(e.to_string()))
    }

    /// Calculate exponential backoff delay
    fn calculate_backoff_delay(&self, attempt: u32) -> u64 {
        // base_delay * 2^attempt plus up to 10% jitter
        let delay = self.base_delay_ms.saturating_mul(2_u64.saturating_pow(attempt));
        let jitter = (delay as f64 * 0.1 * rand::thread_rng().gen::<f64>()) as u64;
        delay + jitter
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Get the underlying HTTP client
    pub fn client(&self) -> &Client {
        &self.client
    }
}

#[derive(Debug, PartialEq)]
enum StatusClass {
    Retryable,
    Unauthorized,
    Rejected,
}

fn classify_status(status: StatusCode) -> StatusClass {
    match status.as_u16() {
        401 => StatusClass::Unauthorized,
        429 | 500..=599 => StatusClass::Retryable,
        _ => StatusClass::Rejected,
    }
}
