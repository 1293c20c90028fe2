pub mod error;
pub mod exchange;
pub mod pkce;
pub mod shared;
pub mod storage;
pub mod types;

pub use {
    error::AuthError,
    exchange::{AuthorizationRequest, TokenExchanger},
    shared::SharedCredential,
    storage::{CredentialStore, FileCredentialStore, MemoryCredentialStore, StoreError},
    types::{
        AuthorizationCode, Credential, OAuthConfig, PkceChallenge, deserialize_option_secret,
        deserialize_secret, now_unix, serialize_secret,
    },
};
