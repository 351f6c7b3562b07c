use super::models::{
    AccessToken, AuthorizationCode, Client, Interaction, RefreshToken, is_expired,
};
use super::traits::{
    AuthorizationCodeStore, ClientStore, InteractionStore, StoreError, TokenStore,
};
use async_trait::async_trait;
use chrono::Utc;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tokio::sync::RwLock;

/// In-process store for every contract the server needs (in-memory, doesn't
/// persist). Fine for a single instance; anything replicated needs a backend
/// with conditional updates instead.
///
/// Codes, tokens and interaction ids are keyed by their SHA-256 digest so the
/// raw values never sit in the map keys.
#[derive(Clone, Default)]
pub struct MemoryStore {
    clients: Arc<RwLock<HashMap<String, Client>>>,
    codes: Arc<RwLock<HashMap<String, AuthorizationCode>>>,
    access_tokens: Arc<RwLock<HashMap<String, AccessToken>>>,
    refresh_tokens: Arc<RwLock<HashMap<String, RefreshToken>>>,
    interactions: Arc<RwLock<HashMap<String, Interaction>>>,
}

fn opaque_key(value: &str) -> String {
    format!("{:x}", Sha256::digest(value.as_bytes()))
}

impl MemoryStore {
    pub fn with_clients(clients: Vec<Client>) -> Self {
        let map = clients.into_iter().map(|c| (c.id.clone(), c)).collect();
        Self {
            clients: Arc::new(RwLock::new(map)),
            ..Self::default()
        }
    }

    /// boot out everything past its expiry. Consumed codes and interactions
    /// stay until then so a replay still reads as consumed, same for revoked
    /// tokens.
    pub async fn purge_expired(&self) {
        let now = Utc::now();

        let purged_codes = {
            let mut codes = self.codes.write().await;
            let before = codes.len();
            codes.retain(|_, c| !is_expired(c.expires_at, now));
            before - codes.len()
        };
        let purged_interactions = {
            let mut interactions = self.interactions.write().await;
            let before = interactions.len();
            interactions.retain(|_, i| !is_expired(i.expires_at, now));
            before - interactions.len()
        };
        let purged_access = {
            let mut tokens = self.access_tokens.write().await;
            let before = tokens.len();
            tokens.retain(|_, t| !is_expired(t.expires_at, now));
            before - tokens.len()
        };
        let purged_refresh = {
            let mut tokens = self.refresh_tokens.write().await;
            let before = tokens.len();
            tokens.retain(|_, t| !is_expired(t.expires_at, now));
            before - tokens.len()
        };

        if purged_codes + purged_interactions + purged_access + purged_refresh > 0 {
            tracing::debug!(
                "purged {} authorization codes, {} interactions, {} access tokens and {} refresh tokens",
                purged_codes,
                purged_interactions,
                purged_access,
                purged_refresh
            );
        }
    }
}

#[async_trait]
impl ClientStore for MemoryStore {
    async fn get_client(&self, client_id: &str) -> Result<Client, StoreError> {
        self.clients
            .read()
            .await
            .get(client_id)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn validate_client_secret(
        &self,
        client_id: &str,
        client_secret: &str,
    ) -> Result<bool, StoreError> {
        let client = self.get_client(client_id).await?;
        if client.is_public() {
            return Ok(client_secret.is_empty());
        }
        // Constant-time comparison to prevent timing attacks
        Ok(client
            .secret
            .as_bytes()
            .ct_eq(client_secret.as_bytes())
            .into())
    }
}

#[async_trait]
impl AuthorizationCodeStore for MemoryStore {
    async fn create_code(&self, code: AuthorizationCode) -> Result<(), StoreError> {
        if code.code.is_empty() {
            return Err(StoreError::Backend("missing authorization code".to_string()));
        }
        self.purge_expired().await;
        self.codes
            .write()
            .await
            .insert(opaque_key(&code.code), code);
        Ok(())
    }

    async fn consume_code(&self, code: &str) -> Result<AuthorizationCode, StoreError> {
        let mut codes = self.codes.write().await;
        let stored = codes.get_mut(&opaque_key(code)).ok_or(StoreError::NotFound)?;
        if stored.consumed {
            return Err(StoreError::AlreadyConsumed);
        }
        stored.consumed = true;
        Ok(stored.clone())
    }
}

#[async_trait]
impl TokenStore for MemoryStore {
    async fn save_access_token(&self, token: AccessToken) -> Result<(), StoreError> {
        if token.token.is_empty() {
            return Err(StoreError::Backend("missing access token".to_string()));
        }
        self.purge_expired().await;
        self.access_tokens
            .write()
            .await
            .insert(opaque_key(&token.token), token);
        Ok(())
    }

    async fn save_refresh_token(&self, token: RefreshToken) -> Result<(), StoreError> {
        if token.token.is_empty() {
            return Err(StoreError::Backend("missing refresh token".to_string()));
        }
        self.purge_expired().await;
        self.refresh_tokens
            .write()
            .await
            .insert(opaque_key(&token.token), token);
        Ok(())
    }

    async fn lookup_access_token(&self, token: &str) -> Result<AccessToken, StoreError> {
        self.access_tokens
            .read()
            .await
            .get(&opaque_key(token))
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn lookup_refresh_token(&self, token: &str) -> Result<RefreshToken, StoreError> {
        self.refresh_tokens
            .read()
            .await
            .get(&opaque_key(token))
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn revoke_access_token(&self, token: &str) -> Result<(), StoreError> {
        if let Some(t) = self.access_tokens.write().await.get_mut(&opaque_key(token)) {
            t.revoked = true;
        }
        Ok(())
    }

    async fn revoke_refresh_token(&self, token: &str) -> Result<(), StoreError> {
        if let Some(t) = self.refresh_tokens.write().await.get_mut(&opaque_key(token)) {
            t.revoked = true;
        }
        Ok(())
    }
}

#[async_trait]
impl InteractionStore for MemoryStore {
    async fn create_interaction(&self, interaction: Interaction) -> Result<(), StoreError> {
        if interaction.id.is_empty() || interaction.client_id.is_empty() {
            return Err(StoreError::Backend("incomplete interaction".to_string()));
        }
        self.purge_expired().await;
        self.interactions
            .write()
            .await
            .insert(opaque_key(&interaction.id), interaction);
        Ok(())
    }

    async fn get_interaction(&self, id: &str) -> Result<Interaction, StoreError> {
        self.interactions
            .read()
            .await
            .get(&opaque_key(id))
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn consume_interaction(&self, id: &str) -> Result<Interaction, StoreError> {
        let mut interactions = self.interactions.write().await;
        let stored = interactions
            .get_mut(&opaque_key(id))
            .ok_or(StoreError::NotFound)?;
        if stored.consumed {
            return Err(StoreError::AlreadyConsumed);
        }
        stored.consumed = true;
        Ok(stored.clone())
    }
}
