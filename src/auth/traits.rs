use super::models::{AccessToken, AuthorizationCode, Client, Interaction, RefreshToken};
use anyhow::Result;
use async_trait::async_trait;
use axum::http::HeaderMap;
use std::time::Duration;

// async_trait my beloved. this shit rocks

/// Failures a store backend may report. Only `Backend` is an internal error,
/// the other two are ordinary protocol outcomes.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("not found")]
    NotFound,
    #[error("already consumed")]
    AlreadyConsumed,
    #[error("storage backend failure: {0}")]
    Backend(String),
}

#[async_trait]
pub trait ClientStore: Send + Sync {
    async fn get_client(&self, client_id: &str) -> Result<Client, StoreError>;
    async fn validate_client_secret(
        &self,
        client_id: &str,
        client_secret: &str,
    ) -> Result<bool, StoreError>;
}

/// `consume_code` must be atomic: of any number of concurrent callers for the
/// same code, exactly one gets `Ok`, the rest get `AlreadyConsumed`.
#[async_trait]
pub trait AuthorizationCodeStore: Send + Sync {
    async fn create_code(&self, code: AuthorizationCode) -> Result<(), StoreError>;
    async fn consume_code(&self, code: &str) -> Result<AuthorizationCode, StoreError>;
}

/// Lookups return revoked and expired records as they are; callers decide.
#[async_trait]
pub trait TokenStore: Send + Sync {
    async fn save_access_token(&self, token: AccessToken) -> Result<(), StoreError>;
    async fn save_refresh_token(&self, token: RefreshToken) -> Result<(), StoreError>;

    async fn lookup_access_token(&self, token: &str) -> Result<AccessToken, StoreError>;
    async fn lookup_refresh_token(&self, token: &str) -> Result<RefreshToken, StoreError>;

    async fn revoke_access_token(&self, token: &str) -> Result<(), StoreError>;
    async fn revoke_refresh_token(&self, token: &str) -> Result<(), StoreError>;
}

/// `consume_interaction` has the same exactly-once contract as `consume_code`.
#[async_trait]
pub trait InteractionStore: Send + Sync {
    async fn create_interaction(&self, interaction: Interaction) -> Result<(), StoreError>;
    async fn get_interaction(&self, id: &str) -> Result<Interaction, StoreError>;
    async fn consume_interaction(&self, id: &str) -> Result<Interaction, StoreError>;
}

/// Bridges the server to whatever identity system owns end users.
#[async_trait]
pub trait SubjectResolver: Send + Sync {
    /// `Ok(None)` means the request carries no usable identity.
    async fn subject(&self, headers: &HeaderMap) -> Result<Option<String>>;

    async fn consented_scopes(&self, subject: &str, client_id: &str) -> Result<Vec<String>>;

    async fn save_consent(&self, subject: &str, client_id: &str, scopes: &[String])
    -> Result<()>;

    fn issue_access_token(
        &self,
        ttl: Duration,
        client_id: &str,
        subject: &str,
        scopes: &[String],
    ) -> Result<AccessToken>;
}
