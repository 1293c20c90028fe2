use std::{
    fmt,
    time::{SystemTime, UNIX_EPOCH},
};

use {
    secrecy::{ExposeSecret, Secret},
    serde::{Deserialize, Deserializer, Serialize, Serializer},
};

/// OAuth 2.0 client configuration for one authorization server.
pub struct OAuthConfig {
    pub client_id: String,
    /// Absent for public clients that rely on PKCE alone.
    pub client_secret: Option<Secret<String>>,
    pub auth_url: String,
    pub token_url: String,
    pub redirect_uri: String,
    pub scopes: Vec<String>,
}

impl Clone for OAuthConfig {
    fn clone(&self) -> Self {
        Self {
            client_id: self.client_id.clone(),
            client_secret: self
                .client_secret
                .as_ref()
                .map(|s| Secret::new(s.expose_secret().clone())),
            auth_url: self.auth_url.clone(),
            token_url: self.token_url.clone(),
            redirect_uri: self.redirect_uri.clone(),
            scopes: self.scopes.clone(),
        }
    }
}

impl fmt::Debug for OAuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OAuthConfig")
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

/// An OAuth grant: access token, refresh token and absolute expiry.
///
/// A credential is replaced wholesale on refresh, never patched in place.
#[derive(Serialize, Deserialize)]
pub struct Credential {
    #[serde(
        serialize_with = "serialize_secret",
        deserialize_with = "deserialize_secret"
    )]
    access_token: Secret<String>,
    #[serde(
        serialize_with = "serialize_secret",
        deserialize_with = "deserialize_secret"
    )]
    refresh_token: Secret<String>,
    /// Unix timestamp (seconds) at which the access token stops being valid.
    pub expires_at: u64,
}

impl Credential {
    pub fn new(access_token: String, refresh_token: String, expires_at: u64) -> Self {
        Self {
            access_token: Secret::new(access_token),
            refresh_token: Secret::new(refresh_token),
            expires_at,
        }
    }

    /// Build a credential from a server-reported lifetime in seconds.
    pub fn with_lifetime(access_token: String, refresh_token: String, expires_in: u64) -> Self {
        Self::new(
            access_token,
            refresh_token,
            now_unix().saturating_add(expires_in),
        )
    }

    pub fn access_token(&self) -> &str {
        self.access_token.expose_secret()
    }

    pub fn refresh_token(&self) -> &str {
        self.refresh_token.expose_secret()
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(now_unix())
    }

    pub fn is_expired_at(&self, now: u64) -> bool {
        now >= self.expires_at
    }

    /// True when the credential expires within `secs` seconds from now.
    pub fn expires_within(&self, secs: u64) -> bool {
        now_unix().saturating_add(secs) >= self.expires_at
    }

    pub fn remaining_secs(&self) -> u64 {
        self.expires_at.saturating_sub(now_unix())
    }

    /// Two credentials are the same grant when they carry the same access token.
    pub fn is_same_grant(&self, other: &Credential) -> bool {
        self.access_token() == other.access_token()
    }
}

impl Clone for Credential {
    fn clone(&self) -> Self {
        Self::new(
            self.access_token().to_string(),
            self.refresh_token().to_string(),
            self.expires_at,
        )
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// A one-time authorization code delivered by the redirect callback.
///
/// Exchanging consumes the value; the exchanger also rejects replays of the
/// same code string.
pub struct AuthorizationCode {
    code: String,
    verifier: Option<String>,
}

impl AuthorizationCode {
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            verifier: None,
        }
    }

    /// Attach the PKCE verifier generated for the authorization request.
    pub fn with_verifier(mut self, verifier: impl Into<String>) -> Self {
        self.verifier = Some(verifier.into());
        self
    }

    pub fn as_str(&self) -> &str {
        &self.code
    }

    pub fn verifier(&self) -> Option<&str> {
        self.verifier.as_deref()
    }
}

impl fmt::Debug for AuthorizationCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthorizationCode")
            .field("code", &"[REDACTED]")
            .field("has_verifier", &self.verifier.is_some())
            .finish()
    }
}

/// PKCE challenge pair.
#[derive(Debug, Clone)]
pub struct PkceChallenge {
    pub verifier: String,
    pub challenge: String,
}

pub fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

pub fn serialize_secret<S: Serializer>(secret: &Secret<String>, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(secret.expose_secret())
}

pub fn deserialize_secret<'de, D: Deserializer<'de>>(d: D) -> Result<Secret<String>, D::Error> {
    String::deserialize(d).map(Secret::new)
}

pub fn deserialize_option_secret<'de, D: Deserializer<'de>>(
    d: D,
) -> Result<Option<Secret<String>>, D::Error> {
    Ok(Option::<String>::deserialize(d)?
        .filter(|s| !s.trim().is_empty())
        .map(Secret::new))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expiry_checks() {
        let cred = Credential::new("a".into(), "r".into(), 1000);
        assert!(!cred.is_expired_at(999));
        assert!(cred.is_expired_at(1000));
        assert!(cred.is_expired_at(2000));
        assert!(cred.is_expired());
    }

    #[test]
    fn test_with_lifetime_is_in_the_future() {
        let cred = Credential::with_lifetime("a".into(), "r".into(), 3600);
        assert!(!cred.is_expired());
        assert!(cred.expires_within(3601));
        assert!(!cred.expires_within(3500));
        assert!(cred.remaining_secs() > 3500);
    }

    #[test]
    fn test_debug_redacts_tokens() {
        let cred = Credential::new("access-secret".into(), "refresh-secret".into(), 1);
        let out = format!("{cred:?}");
        assert!(!out.contains("access-secret"));
        assert!(!out.contains("refresh-secret"));

        let code = AuthorizationCode::new("one-time-code");
        assert!(!format!("{code:?}").contains("one-time-code"));
    }

    #[test]
    fn test_credential_json_round_trip_exposes_only_through_helpers() {
        let cred = Credential::new("at".into(), "rt".into(), 42);
        let json = serde_json::to_value(&cred).unwrap();
        assert_eq!(json["access_token"], "at");
        assert_eq!(json["refresh_token"], "rt");
        assert_eq!(json["expires_at"], 42);

        let back: Credential = serde_json::from_value(json).unwrap();
        assert!(back.is_same_grant(&cred));
        assert_eq!(back.refresh_token(), "rt");
    }
}
