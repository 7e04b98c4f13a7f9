//! HTTP client utilities shared by the status provider and the webhook
//! notifier: timeouts, retry classification and capped exponential backoff.

use std::time::Duration;

use anyhow::Context;
use reqwest::header::HeaderMap;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, info_span, Instrument};
use uuid::Uuid;

pub const CRATE_NAME: &str = "notewatch-http";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    Retryable,
    NonRetryable,
}

pub fn classify_status(status: StatusCode) -> RetryDisposition {
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

pub fn classify_reqwest_error(err: &reqwest::Error) -> RetryDisposition {
    if err.is_timeout() || err.is_connect() || err.is_request() {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub max_retries: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(4),
        }
    }
}

impl BackoffPolicy {
    /// No in-request retries; failures surface immediately.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    pub fn delay_for_attempt(&self, attempt_index: usize) -> Duration {
        let factor = 1u32.checked_shl(attempt_index as u32).unwrap_or(u32::MAX);
        let delay = self.base_delay.saturating_mul(factor);
        delay.min(self.max_delay)
    }
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
    pub backoff: BackoffPolicy,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(20),
            user_agent: None,
            backoff: BackoffPolicy::default(),
        }
    }
}

#[derive(Debug, Error)]
pub enum HttpError {
    #[error("request to {target} failed: {source}")]
    Request {
        target: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("http status {status} from {target}")]
    HttpStatus { status: u16, target: String },
    #[error("decoding response from {target}: {message}")]
    Decode { target: String, message: String },
}

/// Thin wrapper over `reqwest::Client` that retries transient failures.
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: reqwest::Client,
    backoff: BackoffPolicy,
}

impl HttpClient {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);

        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        let client = builder.build().context("building reqwest client")?;
        Ok(Self {
            client,
            backoff: config.backoff,
        })
    }

    /// Send the request produced by `build`, retrying retryable failures.
    /// `target` names the endpoint in logs and errors; it must not carry
    /// secrets.
    pub async fn execute<F>(
        &self,
        cycle_id: Uuid,
        target: &str,
        build: F,
    ) -> Result<Vec<u8>, HttpError>
    where
        F: Fn(&reqwest::Client) -> reqwest::RequestBuilder,
    {
        let span = info_span!("http_request", %cycle_id, target);
        async {
            let mut attempt = 0;
            loop {
                match build(&self.client).send().await {
                    Ok(resp) => {
                        let status = resp.status();
                        if status.is_success() {
                            let body = resp.bytes().await.map_err(|source| HttpError::Request {
                                target: target.to_string(),
                                source,
                            })?;
                            debug!(%status, bytes = body.len(), "response received");
                            return Ok(body.to_vec());
                        }

                        if classify_status(status) == RetryDisposition::Retryable
                            && attempt < self.backoff.max_retries
                        {
                            debug!(%status, attempt, "retrying after status");
                            tokio::time::sleep(self.backoff.delay_for_attempt(attempt)).await;
                            attempt += 1;
                            continue;
                        }

                        return Err(HttpError::HttpStatus {
                            status: status.as_u16(),
                            target: target.to_string(),
                        });
                    }
                    Err(err) => {
                        if classify_reqwest_error(&err) == RetryDisposition::Retryable
                            && attempt < self.backoff.max_retries
                        {
                            debug!(error = %err, attempt, "retrying after transport error");
                            tokio::time::sleep(self.backoff.delay_for_attempt(attempt)).await;
                            attempt += 1;
                            continue;
                        }
                        return Err(HttpError::Request {
                            target: target.to_string(),
                            source: err,
                        });
                    }
                }
            }
        }
        .instrument(span)
        .await
    }

    pub async fn get_json<T: DeserializeOwned>(
        &self,
        cycle_id: Uuid,
        target: &str,
        url: &str,
        headers: HeaderMap,
    ) -> Result<T, HttpError> {
        let body = self
            .execute(cycle_id, target, |client| client.get(url).headers(headers.clone()))
            .await?;
        serde_json::from_slice(&body).map_err(|err| HttpError::Decode {
            target: target.to_string(),
            message: err.to_string(),
        })
    }

    pub async fn post_json<B: Serialize + ?Sized>(
        &self,
        cycle_id: Uuid,
        target: &str,
        url: &str,
        body: &B,
    ) -> Result<(), HttpError> {
        self.execute(cycle_id, target, |client| client.post(url).json(body))
            .await?;
        Ok(())
    }
}

/// Short, stable identifier for a secret (webhook URL, cookie) that is safe
/// to log.
pub fn fingerprint(secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    hex::encode(hasher.finalize())[..12].to_string()
}

/// `scheme://host/…#fingerprint` for a URL whose path carries a secret.
pub fn redact_url(url: &str) -> String {
    let host = url
        .split_once("://")
        .map(|(scheme, rest)| {
            let host = rest.split('/').next().unwrap_or_default();
            format!("{scheme}://{host}")
        })
        .unwrap_or_else(|| "<url>".to_string());
    format!("{host}/…#{}", fingerprint(url))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_is_stable_and_short() {
        let a = fingerprint("https://hooks.slack.com/services/T000/B000/XXXX");
        let b = fingerprint("https://hooks.slack.com/services/T000/B000/XXXX");
        assert_eq!(a, b);
        assert_eq!(a.len(), 12);
        assert_eq!(fingerprint("hello world"), "b94d27b9934d");
    }

    #[test]
    fn redacted_url_hides_path() {
        let redacted = redact_url("https://hooks.slack.com/services/T000/B000/XXXX");
        assert!(redacted.starts_with("https://hooks.slack.com/…#"));
        assert!(!redacted.contains("XXXX"));
    }

    #[test]
    fn default_backoff_doubles_up_to_four_seconds() {
        let policy = BackoffPolicy::default();
        let delays: Vec<_> = (0..6).map(|i| policy.delay_for_attempt(i).as_millis()).collect();
        assert_eq!(delays, vec![500, 1000, 2000, 4000, 4000, 4000]);
        assert_eq!(BackoffPolicy::none().max_retries, 0);
    }

    #[test]
    fn rate_limits_and_server_errors_are_retryable() {
        assert_eq!(classify_status(StatusCode::TOO_MANY_REQUESTS), RetryDisposition::Retryable);
        assert_eq!(classify_status(StatusCode::BAD_GATEWAY), RetryDisposition::Retryable);
        assert_eq!(classify_status(StatusCode::UNAUTHORIZED), RetryDisposition::NonRetryable);
        assert_eq!(classify_status(StatusCode::NOT_FOUND), RetryDisposition::NonRetryable);
    }
}
