/// Failures of the authorization-code and refresh-token grants.
///
/// None of these are retried automatically.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("authorization code was already redeemed")]
    CodeAlreadyRedeemed,

    /// `invalid_grant`: the code or refresh token is invalid, expired, already
    /// used or revoked, or the redirect URI does not match the registered one.
    #[error("authorization server rejected the grant ({code}): {description}")]
    InvalidGrant { code: String, description: String },

    #[error("client authentication failed ({code}): {description}")]
    InvalidClient { code: String, description: String },

    #[error("token endpoint returned HTTP {status}: {body}")]
    Endpoint { status: u16, body: String },

    #[error("token endpoint request failed: {0}")]
    Network(#[from] reqwest::Error),

    #[error("malformed token response: {0}")]
    MalformedResponse(String),

    #[error("invalid oauth configuration: {0}")]
    InvalidConfig(String),
}

impl AuthError {
    /// True when the user has to go through the authorization flow again.
    pub fn requires_reauthorization(&self) -> bool {
        matches!(self, Self::CodeAlreadyRedeemed | Self::InvalidGrant { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_requires_reauthorization() {
        assert!(AuthError::CodeAlreadyRedeemed.requires_reauthorization());
        assert!(
            AuthError::InvalidGrant {
                code: "invalid_grant".into(),
                description: "revoked".into(),
            }
            .requires_reauthorization()
        );
        assert!(
            !AuthError::Endpoint {
                status: 503,
                body: String::new(),
            }
            .requires_reauthorization()
        );
        assert!(!AuthError::MalformedResponse("x".into()).requires_reauthorization());
    }
}
