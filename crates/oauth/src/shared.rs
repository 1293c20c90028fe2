use std::sync::atomic::{AtomicU64, Ordering};

use {tokio::sync::Mutex, tracing::debug};

use crate::{error::AuthError, exchange::TokenExchanger, types::Credential};

/// The single live credential of a session.
///
/// The lock is held across the refresh request, so concurrent callers that
/// find the credential stale queue behind one refresh and then read its
/// result instead of refreshing again. A refresh token the server rejected
/// is remembered, so queued callers get the same error without another
/// request.
pub struct SharedCredential {
    current: Mutex<Slot>,
    refreshes: AtomicU64,
}

struct Slot {
    credential: Credential,
    /// `(code, description)` of the `invalid_grant` that rejected this grant.
    rejected: Option<(String, String)>,
}

impl SharedCredential {
    pub fn new(credential: Credential) -> Self {
        Self {
            current: Mutex::new(Slot {
                credential,
                rejected: None,
            }),
            refreshes: AtomicU64::new(0),
        }
    }

    pub async fn snapshot(&self) -> Credential {
        self.current.lock().await.credential.clone()
    }

    /// Number of refreshes performed through this guard.
    pub fn refresh_count(&self) -> u64 {
        self.refreshes.load(Ordering::Relaxed)
    }

    /// Return a credential valid for at least `skew_secs` more seconds,
    /// refreshing first when needed.
    pub async fn fresh(
        &self,
        exchanger: &TokenExchanger,
        skew_secs: u64,
    ) -> Result<Credential, AuthError> {
        let mut slot = self.current.lock().await;
        if slot.credential.expires_within(skew_secs) {
            debug!(
                expires_at = slot.credential.expires_at,
                "credential stale, refreshing"
            );
            self.refresh_locked(&mut slot, exchanger).await?;
        }
        Ok(slot.credential.clone())
    }

    /// Refresh after the server rejected `rejected`.
    ///
    /// If another caller already replaced that grant, the replacement is
    /// returned without a second refresh.
    pub async fn refresh_if_current(
        &self,
        exchanger: &TokenExchanger,
        rejected: &Credential,
    ) -> Result<Credential, AuthError> {
        let mut slot = self.current.lock().await;
        if slot.credential.is_same_grant(rejected) {
            self.refresh_locked(&mut slot, exchanger).await?;
        } else {
            debug!("credential already replaced by a concurrent refresh");
        }
        Ok(slot.credential.clone())
    }

    async fn refresh_locked(
        &self,
        slot: &mut Slot,
        exchanger: &TokenExchanger,
    ) -> Result<(), AuthError> {
        if let Some((code, description)) = &slot.rejected {
            debug!("refresh token already rejected, not retrying");
            return Err(AuthError::InvalidGrant {
                code: code.clone(),
                description: description.clone(),
            });
        }
        match exchanger.refresh(&slot.credential).await {
            Ok(refreshed) => {
                slot.credential = refreshed;
                self.refreshes.fetch_add(1, Ordering::Relaxed);
                Ok(())
            },
            Err(AuthError::InvalidGrant { code, description }) => {
                slot.rejected = Some((code.clone(), description.clone()));
                Err(AuthError::InvalidGrant { code, description })
            },
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            Arc,
            atomic::{AtomicUsize, Ordering},
        },
        time::Duration,
    };

    use {
        axum::{Json, Router, extract::State, routing::post},
        secrecy::Secret,
    };

    use super::*;
    use crate::types::{OAuthConfig, now_unix};

    async fn spawn_token_server(hits: Arc<AtomicUsize>) -> String {
        async fn token(State(hits): State<Arc<AtomicUsize>>) -> Json<serde_json::Value> {
            let n = hits.fetch_add(1, Ordering::SeqCst) + 1;
            tokio::time::sleep(Duration::from_millis(50)).await;
            Json(serde_json::json!({
                "access_token": format!("at-{n}"),
                "refresh_token": format!("rt-{n}"),
                "expires_in": 3600,
            }))
        }

        let app = Router::new().route("/token", post(token)).with_state(hits);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn exchanger(base: &str) -> TokenExchanger {
        TokenExchanger::new(OAuthConfig {
            client_id: "client".into(),
            client_secret: Some(Secret::new("secret".into())),
            auth_url: format!("{base}/authorize"),
            token_url: format!("{base}/token"),
            redirect_uri: "drivelink://cb".into(),
            scopes: vec![],
        })
    }

    #[tokio::test]
    async fn test_fresh_does_not_refresh_valid_credential() {
        let hits = Arc::new(AtomicUsize::new(0));
        let base = spawn_token_server(Arc::clone(&hits)).await;
        let shared = SharedCredential::new(Credential::new(
            "valid".into(),
            "rt".into(),
            now_unix() + 600,
        ));

        let cred = shared.fresh(&exchanger(&base), 30).await.unwrap();
        assert_eq!(cred.access_token(), "valid");
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert_eq!(shared.refresh_count(), 0);
    }

    #[tokio::test]
    async fn test_fresh_refreshes_within_skew() {
        let hits = Arc::new(AtomicUsize::new(0));
        let base = spawn_token_server(Arc::clone(&hits)).await;
        let shared = SharedCredential::new(Credential::new(
            "almost".into(),
            "rt".into(),
            now_unix() + 10,
        ));

        let cred = shared.fresh(&exchanger(&base), 30).await.unwrap();
        assert_eq!(cred.access_token(), "at-1");
        assert_eq!(shared.snapshot().await.access_token(), "at-1");
    }

    #[tokio::test]
    async fn test_concurrent_fresh_refreshes_once() {
        let hits = Arc::new(AtomicUsize::new(0));
        let base = spawn_token_server(Arc::clone(&hits)).await;
        let exchanger = Arc::new(exchanger(&base));
        let shared = Arc::new(SharedCredential::new(Credential::new(
            "expired".into(),
            "rt".into(),
            0,
        )));

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let exchanger = Arc::clone(&exchanger);
            let shared = Arc::clone(&shared);
            tasks.push(tokio::spawn(async move {
                shared.fresh(&exchanger, 0).await.unwrap()
            }));
        }
        for task in tasks {
            assert_eq!(task.await.unwrap().access_token(), "at-1");
        }
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(shared.refresh_count(), 1);
    }

    #[tokio::test]
    async fn test_refresh_if_current_skips_replaced_grant() {
        let hits = Arc::new(AtomicUsize::new(0));
        let base = spawn_token_server(Arc::clone(&hits)).await;
        let exchanger = exchanger(&base);
        let rejected = Credential::new("old".into(), "rt".into(), now_unix() + 600);
        let shared = SharedCredential::new(rejected.clone());

        let first = shared
            .refresh_if_current(&exchanger, &rejected)
            .await
            .unwrap();
        let second = shared
            .refresh_if_current(&exchanger, &rejected)
            .await
            .unwrap();

        assert_eq!(first.access_token(), "at-1");
        assert!(second.is_same_grant(&first));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_rejected_refresh_is_shared_with_waiters() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/token")
            .with_status(400)
            .with_body(r#"{"error":"invalid_grant","error_description":"token revoked"}"#)
            .expect(1)
            .create_async()
            .await;
        let exchanger = Arc::new(exchanger(&server.url()));
        let shared = Arc::new(SharedCredential::new(Credential::new(
            "expired".into(),
            "revoked".into(),
            0,
        )));

        let mut tasks = Vec::new();
        for _ in 0..5 {
            let exchanger = Arc::clone(&exchanger);
            let shared = Arc::clone(&shared);
            tasks.push(tokio::spawn(async move {
                shared.fresh(&exchanger, 0).await
            }));
        }
        for task in tasks {
            match task.await.unwrap() {
                Err(AuthError::InvalidGrant { code, description }) => {
                    assert_eq!(code, "invalid_grant");
                    assert_eq!(description, "token revoked");
                },
                other => panic!("unexpected result: {other:?}"),
            }
        }

        let expired = shared.snapshot().await;
        let err = shared
            .refresh_if_current(&exchanger, &expired)
            .await
            .unwrap_err();
        assert!(err.requires_reauthorization());
        assert_eq!(shared.refresh_count(), 0);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_transient_refresh_failure_is_not_remembered() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/token")
            .with_status(503)
            .expect(2)
            .create_async()
            .await;
        let exchanger = exchanger(&server.url());
        let shared = SharedCredential::new(Credential::new("expired".into(), "rt".into(), 0));

        for _ in 0..2 {
            let err = shared.fresh(&exchanger, 0).await.unwrap_err();
            assert!(matches!(err, AuthError::Endpoint { status: 503, .. }));
        }
        mock.assert_async().await;
    }
}
