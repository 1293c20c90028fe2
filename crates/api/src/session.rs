use std::sync::Arc;

use {
    drivelink_oauth::{Credential, SharedCredential, TokenExchanger},
    serde::de::DeserializeOwned,
    tracing::warn,
};

use crate::{caller::ApiCaller, error::ApiError, request::ApiRequestSpec};

/// Credentials this close to expiry are refreshed before use.
pub const DEFAULT_REFRESH_SKEW_SECS: u64 = 30;

/// An authenticated user session: one shared credential, the exchanger
/// that refreshes it and the caller that spends it.
///
/// Clones share the same credential.
#[derive(Clone)]
pub struct Session {
    caller: ApiCaller,
    exchanger: Arc<TokenExchanger>,
    credential: Arc<SharedCredential>,
    refresh_skew_secs: u64,
}

impl Session {
    pub fn new(
        caller: ApiCaller,
        exchanger: Arc<TokenExchanger>,
        credential: Arc<SharedCredential>,
    ) -> Self {
        Self {
            caller,
            exchanger,
            credential,
            refresh_skew_secs: DEFAULT_REFRESH_SKEW_SECS,
        }
    }

    pub fn with_refresh_skew(mut self, secs: u64) -> Self {
        self.refresh_skew_secs = secs;
        self
    }

    /// Current credential, for the host to persist.
    pub async fn credential(&self) -> Credential {
        self.credential.snapshot().await
    }

    pub fn shared_credential(&self) -> &Arc<SharedCredential> {
        &self.credential
    }

    /// Call with a fresh credential; on 401, refresh once and retry once.
    pub async fn call<T: DeserializeOwned>(&self, spec: &ApiRequestSpec<T>) -> Result<T, ApiError> {
        let credential = self
            .credential
            .fresh(&self.exchanger, self.refresh_skew_secs)
            .await?;

        match self.caller.call(spec, &credential).await {
            Err(ApiError::Unauthorized { .. }) => {
                warn!(path = spec.path(), "access token rejected; refreshing once");
                let refreshed = self
                    .credential
                    .refresh_if_current(&self.exchanger, &credential)
                    .await?;
                self.caller.call(spec, &refreshed).await
            },
            result => result,
        }
    }

    /// Force a refresh regardless of expiry.
    pub async fn refresh(&self) -> Result<Credential, ApiError> {
        let current = self.credential.snapshot().await;
        Ok(self
            .credential
            .refresh_if_current(&self.exchanger, &current)
            .await?)
    }
}
