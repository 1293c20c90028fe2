use std::{fmt, time::Duration};

use {
    drivelink_api::RetryPolicy,
    drivelink_oauth::{OAuthConfig, deserialize_option_secret},
    secrecy::{ExposeSecret, Secret},
    serde::Deserialize,
};

pub const ENV_CLIENT_ID: &str = "DRIVELINK_CLIENT_ID";
pub const ENV_CLIENT_SECRET: &str = "DRIVELINK_CLIENT_SECRET";
pub const ENV_API_BASE_URL: &str = "DRIVELINK_API_BASE_URL";

/// Root of `drivelink.toml`.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct DrivelinkConfig {
    pub oauth: OAuthSection,
    pub api: ApiSection,
}

/// `[oauth]`: the registered client at the authorization server.
#[derive(Default, Deserialize)]
#[serde(default)]
pub struct OAuthSection {
    pub client_id: String,
    #[serde(deserialize_with = "deserialize_option_secret")]
    pub client_secret: Option<Secret<String>>,
    pub auth_url: String,
    pub token_url: String,
    pub redirect_uri: String,
    pub scopes: Vec<String>,
}

impl fmt::Debug for OAuthSection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OAuthSection")
            .field("client_id", &self.client_id)
            .field(
                "client_secret",
                &self.client_secret.as_ref().map(|_| "[REDACTED]"),
            )
            .field("auth_url", &self.auth_url)
            .field("token_url", &self.token_url)
            .field("redirect_uri", &self.redirect_uri)
            .field("scopes", &self.scopes)
            .finish()
    }
}

/// `[api]`: the resource server and request behaviour.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiSection {
    pub base_url: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    pub refresh_skew_secs: u64,
}

impl Default for ApiSection {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            timeout_secs: 30,
            max_retries: 3,
            retry_base_delay_ms: 250,
            retry_max_delay_ms: 5_000,
            refresh_skew_secs: 30,
        }
    }
}

impl ApiSection {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            base_delay: Duration::from_millis(self.retry_base_delay_ms),
            max_delay: Duration::from_millis(self.retry_max_delay_ms),
        }
    }
}

impl DrivelinkConfig {
    /// Apply environment overrides; `lookup` is `std::env::var` in production.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(id) = non_empty(ENV_CLIENT_ID) {
            self.oauth.client_id = id;
        }
        if let Some(secret) = non_empty(ENV_CLIENT_SECRET) {
            self.oauth.client_secret = Some(Secret::new(secret));
        }
        if let Some(url) = non_empty(ENV_API_BASE_URL) {
            self.api.base_url = url;
        }
    }

    pub fn oauth_config(&self) -> OAuthConfig {
        OAuthConfig {
            client_id: self.oauth.client_id.clone(),
            client_secret: self
                .oauth
                .client_secret
                .as_ref()
                .map(|s| Secret::new(s.expose_secret().clone())),
            auth_url: self.oauth.auth_url.clone(),
            token_url: self.oauth.token_url.clone(),
            redirect_uri: self.oauth.redirect_uri.clone(),
            scopes: self.oauth.scopes.clone(),
        }
    }
}
