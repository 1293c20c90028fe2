use std::time::Duration;

use {
    drivelink_oauth::Credential,
    reqwest::{StatusCode, header::ACCEPT},
    serde::de::DeserializeOwned,
    tracing::{debug, warn},
};

use crate::{error::ApiError, request::ApiRequestSpec, retry::RetryPolicy};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

const TRANSIENT_MESSAGE_LEN: usize = 300;

/// Issues bearer-authenticated requests against one resource API.
///
/// Never refreshes on its own; see [`crate::Session`] for that.
#[derive(Debug, Clone)]
pub struct ApiCaller {
    client: reqwest::Client,
    base_url: String,
    retry: RetryPolicy,
}

impl ApiCaller {
    pub fn new(base_url: impl Into<String>) -> Result<Self, ApiError> {
        Self::with_timeout(base_url, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(base_url: impl Into<String>, timeout: Duration) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ApiError::InvalidRequest(format!("http client: {e}")))?;
        Ok(Self::with_client(client, base_url))
    }

    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Send `spec` with `credential` and decode the JSON response.
    ///
    /// Transient failures are retried per the retry policy; everything else
    /// is returned on first occurrence.
    pub async fn call<T: DeserializeOwned>(
        &self,
        spec: &ApiRequestSpec<T>,
        credential: &Credential,
    ) -> Result<T, ApiError> {
        let url = self.url_for(spec.path())?;
        if credential.is_expired() {
            return Err(ApiError::CredentialExpired {
                expires_at: credential.expires_at,
            });
        }

        let mut retry = 0;
        loop {
            match self.send_once(&url, spec, credential).await {
                Err(e) if e.is_retryable() && retry < self.retry.max_retries => {
                    retry += 1;
                    let delay = self.retry.delay_for(retry);
                    warn!(
                        path = spec.path(),
                        retry,
                        max_retries = self.retry.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "transient api failure; retrying"
                    );
                    tokio::time::sleep(delay).await;
                },
                result => return result,
            }
        }
    }

    async fn send_once<T: DeserializeOwned>(
        &self,
        url: &str,
        spec: &ApiRequestSpec<T>,
        credential: &Credential,
    ) -> Result<T, ApiError> {
        let mut request = self
            .client
            .request(spec.method().clone(), url)
            .bearer_auth(credential.access_token())
            .header(ACCEPT, "application/json");
        if !spec.query().is_empty() {
            request = request.query(spec.query());
        }
        if let Some(body) = spec.body() {
            request = request.json(body);
        }

        let response = request.send().await.map_err(transport_error)?;
        let status = response.status();
        let body = response.text().await.map_err(transport_error)?;
        debug!(method = %spec.method(), path = spec.path(), status = status.as_u16(), "api response");
        classify(status, body)
    }

    /// Resolve `path` against the base URL. Absolute URLs are refused so the
    /// bearer token only ever goes to the configured API.
    fn url_for(&self, path: &str) -> Result<String, ApiError> {
        if reqwest::Url::parse(path).is_ok() {
            return Err(ApiError::InvalidRequest(format!(
                "expected a path relative to the API base URL, got '{path}'"
            )));
        }
        Ok(format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        ))
    }
}

fn transport_error(e: reqwest::Error) -> ApiError {
    ApiError::Transient {
        status: e.status().map(|s| s.as_u16()),
        message: e.to_string(),
    }
}

fn classify<T: DeserializeOwned>(status: StatusCode, body: String) -> Result<T, ApiError> {
    if status.is_success() {
        let payload = if body.trim().is_empty() {
            "null"
        } else {
            body.as_str()
        };
        return match serde_json::from_str(payload) {
            Ok(value) => Ok(value),
            Err(source) => Err(ApiError::DecodeFailure { raw: body, source }),
        };
    }

    Err(match status {
        StatusCode::UNAUTHORIZED => ApiError::Unauthorized { body },
        s if s.is_server_error() => ApiError::Transient {
            status: Some(s.as_u16()),
            message: format!(
                "HTTP {}: {}",
                s.as_u16(),
                body.chars().take(TRANSIENT_MESSAGE_LEN).collect::<String>()
            ),
        },
        s => ApiError::Permanent {
            status: s.as_u16(),
            body,
        },
    })
}
