use super::models::{AccessToken, RefreshToken};
use super::validate::join_scopes;
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::Serialize;
use std::time::Duration;

pub const CODE_BYTES: usize = 32;
pub const ACCESS_TOKEN_BYTES: usize = 32;
pub const REFRESH_TOKEN_BYTES: usize = 48;
pub const INTERACTION_ID_BYTES: usize = 32;

/// Cryptographically random, URL-safe opaque string. The value carries no
/// information; validity is whatever the store says about it.
pub fn random_url_safe(n_bytes: usize) -> String {
    let mut buf = vec![0u8; n_bytes.max(1)];
    rand::rng().fill_bytes(&mut buf);
    URL_SAFE_NO_PAD.encode(buf)
}

/// Saturates instead of overflowing on absurd TTLs.
pub fn expires_at(now: DateTime<Utc>, ttl: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(ttl)
        .ok()
        .and_then(|d| now.checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

pub fn mint_refresh_token(
    now: DateTime<Utc>,
    ttl: Duration,
    client_id: &str,
    subject: &str,
    scopes: &[String],
    authorization_code: &str,
) -> RefreshToken {
    RefreshToken {
        token: random_url_safe(REFRESH_TOKEN_BYTES),
        client_id: client_id.to_string(),
        subject: subject.to_string(),
        scopes: scopes.to_vec(),
        issued_at: now,
        expires_at: expires_at(now, ttl),
        revoked: false,
        authorization_code: authorization_code.to_string(),
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: &'static str,
    pub expires_in: i64, // seconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

impl TokenResponse {
    pub fn new(access: &AccessToken, refresh: Option<&RefreshToken>) -> Self {
        Self {
            access_token: access.token.clone(),
            token_type: "Bearer",
            expires_in: (access.expires_at - Utc::now()).num_seconds().max(0),
            refresh_token: refresh.map(|r| r.token.clone()),
            scope: (!access.scopes.is_empty()).then(|| join_scopes(&access.scopes)),
        }
    }
}
