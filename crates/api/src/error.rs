use drivelink_oauth::AuthError;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The credential was already expired; nothing was sent.
    #[error("credential expired at {expires_at}; refresh before calling")]
    CredentialExpired { expires_at: u64 },

    /// HTTP 401: the server no longer accepts the access token.
    #[error("access token rejected by the server")]
    Unauthorized { body: String },

    /// Network failure, timeout or 5xx. Eligible for retry.
    #[error("transient failure: {message}")]
    Transient {
        status: Option<u16>,
        message: String,
    },

    /// 4xx other than 401. Never retried.
    #[error("request rejected with HTTP {status}: {body}")]
    Permanent { status: u16, body: String },

    /// The body did not match the expected shape. `raw` keeps the payload.
    #[error("response did not match the expected shape: {source}")]
    DecodeFailure {
        raw: String,
        source: serde_json::Error,
    },

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl ApiError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    /// HTTP status reported by the server, when there was one.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Unauthorized { .. } => Some(401),
            Self::Transient { status, .. } => *status,
            Self::Permanent { status, .. } => Some(*status),
            _ => None,
        }
    }
}
