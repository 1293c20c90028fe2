use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard},
    time::{Duration, Instant},
};

use {
    secrecy::ExposeSecret,
    serde_json::Value,
    tracing::{debug, info, warn},
    url::Url,
};

use crate::{
    error::AuthError,
    pkce,
    types::{AuthorizationCode, Credential, OAuthConfig, PkceChallenge},
};

/// Lifetime assumed when the token endpoint does not report `expires_in`.
pub const DEFAULT_TOKEN_LIFETIME_SECS: u64 = 3600;

/// Upper bound for a single token-endpoint request.
pub const DEFAULT_TOKEN_TIMEOUT: Duration = Duration::from_secs(30);

/// How long a redeemed code is remembered. Authorization servers expire codes
/// well within this window.
const REDEEMED_CODE_TTL: Duration = Duration::from_secs(10 * 60);

const ERROR_BODY_SNIPPET_LEN: usize = 500;

/// Everything the host needs to send the user to the authorization server.
#[derive(Debug, Clone)]
pub struct AuthorizationRequest {
    pub url: String,
    /// Anti-CSRF value the redirect must echo back.
    pub state: String,
    pub pkce: PkceChallenge,
}

/// Exchanges authorization codes and refresh tokens at the token endpoint.
///
/// Holds no credential itself; results are returned to the caller, who owns
/// persistence.
pub struct TokenExchanger {
    config: OAuthConfig,
    client: reqwest::Client,
    timeout: Duration,
    redeemed: Mutex<HashMap<String, Instant>>,
}

struct TokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    expires_in: Option<u64>,
}

impl TokenExchanger {
    pub fn new(config: OAuthConfig) -> Self {
        Self::with_client(config, reqwest::Client::new())
    }

    pub fn with_client(config: OAuthConfig, client: reqwest::Client) -> Self {
        Self {
            config,
            client,
            timeout: DEFAULT_TOKEN_TIMEOUT,
            redeemed: Mutex::new(HashMap::new()),
        }
    }

    /// Bound each token request; a stalled endpoint fails with
    /// [`AuthError::Network`].
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Build the authorization URL with a fresh `state` and PKCE challenge.
    pub fn start(&self) -> Result<AuthorizationRequest, AuthError> {
        let pkce = pkce::generate();
        let state = uuid::Uuid::new_v4().to_string();

        let mut url = Url::parse(&self.config.auth_url)
            .map_err(|e| AuthError::InvalidConfig(format!("auth_url: {e}")))?;
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("response_type", "code")
                .append_pair("client_id", &self.config.client_id)
                .append_pair("redirect_uri", &self.config.redirect_uri);
            if !self.config.scopes.is_empty() {
                query.append_pair("scope", &self.config.scopes.join(" "));
            }
            query
                .append_pair("state", &state)
                .append_pair("code_challenge", &pkce.challenge)
                .append_pair("code_challenge_method", "S256");
        }

        Ok(AuthorizationRequest {
            url: url.into(),
            state,
            pkce,
        })
    }

    /// Redeem a one-time authorization code for a credential.
    ///
    /// The code is reserved before the request goes out. It is released again
    /// only when the failure leaves it usable (network errors, 5xx).
    pub async fn exchange(&self, code: AuthorizationCode) -> Result<Credential, AuthError> {
        let code_str = code.as_str().trim().to_string();
        if code_str.is_empty() {
            return Err(AuthError::InvalidGrant {
                code: "invalid_request".into(),
                description: "authorization code is empty".into(),
            });
        }
        {
            let mut redeemed = self.redeemed();
            let now = Instant::now();
            prune_redeemed(&mut redeemed, now);
            if redeemed.contains_key(&code_str) {
                warn!("authorization code replay rejected");
                return Err(AuthError::CodeAlreadyRedeemed);
            }
            redeemed.insert(code_str.clone(), now);
        }

        let mut form = vec![
            ("grant_type", "authorization_code".to_string()),
            ("code", code_str.clone()),
            ("redirect_uri", self.config.redirect_uri.trim().to_string()),
        ];
        self.push_client_auth(&mut form);
        if let Some(verifier) = code.verifier() {
            form.push(("code_verifier", verifier.to_string()));
        }

        let result = self.request_token(&form).await.and_then(|tokens| {
            let refresh_token = tokens.refresh_token.ok_or_else(|| {
                AuthError::MalformedResponse("missing refresh_token".to_string())
            })?;
            Ok(Credential::with_lifetime(
                tokens.access_token,
                refresh_token,
                tokens.expires_in.unwrap_or(DEFAULT_TOKEN_LIFETIME_SECS),
            ))
        });

        match result {
            Ok(credential) => {
                info!(
                    expires_at = credential.expires_at,
                    "exchanged authorization code"
                );
                Ok(credential)
            },
            Err(e) => {
                if matches!(e, AuthError::Network(_))
                    || matches!(e, AuthError::Endpoint { status, .. } if status >= 500)
                {
                    self.redeemed().remove(&code_str);
                }
                Err(e)
            },
        }
    }

    /// Mint a new credential from the refresh token of `credential`.
    ///
    /// A revoked or expired refresh token fails with [`AuthError::InvalidGrant`];
    /// the user then has to authorize again.
    pub async fn refresh(&self, credential: &Credential) -> Result<Credential, AuthError> {
        let mut form = vec![
            ("grant_type", "refresh_token".to_string()),
            ("refresh_token", credential.refresh_token().to_string()),
        ];
        self.push_client_auth(&mut form);

        let tokens = self.request_token(&form).await?;
        let refresh_token = tokens
            .refresh_token
            .unwrap_or_else(|| credential.refresh_token().to_string());
        let refreshed = Credential::with_lifetime(
            tokens.access_token,
            refresh_token,
            tokens.expires_in.unwrap_or(DEFAULT_TOKEN_LIFETIME_SECS),
        );
        info!(expires_at = refreshed.expires_at, "refreshed access token");
        Ok(refreshed)
    }

    fn push_client_auth(&self, form: &mut Vec<(&'static str, String)>) {
        form.push(("client_id", self.config.client_id.trim().to_string()));
        if let Some(secret) = &self.config.client_secret {
            let secret = secret.expose_secret().trim();
            if !secret.is_empty() {
                form.push(("client_secret", secret.to_string()));
            }
        }
    }

    fn redeemed(&self) -> MutexGuard<'_, HashMap<String, Instant>> {
        self.redeemed.lock().unwrap_or_else(|p| p.into_inner())
    }

    async fn request_token(&self, form: &[(&str, String)]) -> Result<TokenResponse, AuthError> {
        debug!(token_url = %self.config.token_url, grant_type = %form[0].1, "requesting token");
        let response = self
            .client
            .post(self.config.token_url.trim())
            .timeout(self.timeout)
            .form(form)
            .send()
            .await?;
        parse_token_response(response).await
    }
}

fn prune_redeemed(redeemed: &mut HashMap<String, Instant>, now: Instant) {
    redeemed.retain(|_, at| now.saturating_duration_since(*at) < REDEEMED_CODE_TTL);
}

async fn parse_token_response(response: reqwest::Response) -> Result<TokenResponse, AuthError> {
    let status = response.status();
    let body = response.text().await?;

    if !status.is_success() {
        let (code, message) = parse_oauth_error_details(&body);
        warn!(
            status = status.as_u16(),
            code = code.as_deref().unwrap_or(""),
            "token endpoint rejected request"
        );
        let description = message.unwrap_or_default();
        return Err(match code.as_deref() {
            Some("invalid_grant") => AuthError::InvalidGrant {
                code: "invalid_grant".into(),
                description,
            },
            Some(c @ ("invalid_client" | "unauthorized_client")) => AuthError::InvalidClient {
                code: c.to_string(),
                description,
            },
            _ if is_refresh_token_reused_error(code.as_deref(), Some(description.as_str())) => {
                AuthError::InvalidGrant {
                    code: "refresh_token_reused".into(),
                    description,
                }
            },
            _ => AuthError::Endpoint {
                status: status.as_u16(),
                body: sanitize_error_body(&body),
            },
        });
    }

    let value: Value = serde_json::from_str(&body)
        .map_err(|e| AuthError::MalformedResponse(format!("invalid json: {e}")))?;

    let access_token = non_empty_str(&value, "access_token")
        .ok_or_else(|| AuthError::MalformedResponse("missing access_token".into()))?;
    let refresh_token = non_empty_str(&value, "refresh_token");
    let expires_in = value
        .get("expires_in")
        .and_then(parse_i64_lossy)
        .filter(|v| *v > 0)
        .map(|v| v as u64);

    Ok(TokenResponse {
        access_token,
        refresh_token,
        expires_in,
    })
}

fn non_empty_str(value: &Value, key: &str) -> Option<String> {
    value
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn parse_i64_lossy(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
}

/// Extract `(code, message)` from standard or nested OAuth error payloads.
fn parse_oauth_error_details(body: &str) -> (Option<String>, Option<String>) {
    let Ok(value) = serde_json::from_str::<Value>(body) else {
        return (None, None);
    };

    let mut code = non_empty_str(&value, "code");
    let mut message = non_empty_str(&value, "error_description");

    match value.get("error") {
        Some(Value::String(err)) if code.is_none() => {
            code = Some(err.trim().to_string());
        },
        Some(err @ Value::Object(_)) => {
            if code.is_none() {
                code = non_empty_str(err, "code").or_else(|| non_empty_str(err, "type"));
            }
            if message.is_none() {
                message = non_empty_str(err, "message");
            }
        },
        _ => {},
    }

    (code, message)
}

fn is_refresh_token_reused_error(code: Option<&str>, message: Option<&str>) -> bool {
    code.is_some_and(|c| c.trim().eq_ignore_ascii_case("refresh_token_reused"))
        || message
            .map(str::to_ascii_lowercase)
            .is_some_and(|m| m.contains("refresh token has already been used"))
}

fn is_sensitive_key(key: &str) -> bool {
    let key = key.trim().to_ascii_lowercase();
    key.contains("token") || key.contains("secret") || key == "authorization"
}

fn redact_sensitive_fields(value: &mut Value) {
    match value {
        Value::Object(map) => {
            for (key, nested) in map {
                if is_sensitive_key(key) && nested.is_string() {
                    *nested = Value::String("[REDACTED]".into());
                } else {
                    redact_sensitive_fields(nested);
                }
            }
        },
        Value::Array(items) => items.iter_mut().for_each(redact_sensitive_fields),
        _ => {},
    }
}

fn sanitize_error_body(body: &str) -> String {
    if let Ok(mut value) = serde_json::from_str::<Value>(body) {
        redact_sensitive_fields(&mut value);
        return value
            .to_string()
            .chars()
            .take(ERROR_BODY_SNIPPET_LEN)
            .collect();
    }
    body.chars().take(ERROR_BODY_SNIPPET_LEN).collect()
}
