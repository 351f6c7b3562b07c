//! Subject resolution backed by the platform's session tokens.
//!
//! End users arrive with the HS256 session JWT the rest of the platform
//! already hands out, either in the session cookie or as a Bearer token.

use super::models::AccessToken;
use super::token::{ACCESS_TOKEN_BYTES, expires_at, random_url_safe};
use super::traits::SubjectResolver;
use anyhow::Result;
use async_trait::async_trait;
use axum::http::{HeaderMap, header};
use chrono::Utc;
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use serde_json::{Map, Value};
use std::time::Duration;

pub const DEFAULT_SESSION_COOKIE: &str = "session_token";
pub const DEFAULT_ACCOUNT_CLAIM: &str = "account";

/// Why a request did not resolve to a subject
#[derive(Debug, thiserror::Error)]
pub enum AuthenticationError {
    #[error("no session token on request")]
    MissingToken,
    #[error("invalid session token: {0}")]
    InvalidToken(#[from] jsonwebtoken::errors::Error),
    #[error("session token is missing the {0} claim")]
    MissingClaim(String),
    #[error("session token claim {0} has the wrong type")]
    MalformedClaim(String),
}

/// Verified session claims with typed accessors
#[derive(Debug, Clone)]
pub struct SessionClaims(Map<String, Value>);

impl SessionClaims {
    pub fn string(&self, name: &str) -> Result<&str, AuthenticationError> {
        match self.0.get(name) {
            None | Some(Value::Null) => Err(AuthenticationError::MissingClaim(name.to_string())),
            Some(Value::String(s)) if !s.is_empty() => Ok(s),
            Some(Value::String(_)) => Err(AuthenticationError::MissingClaim(name.to_string())),
            Some(_) => Err(AuthenticationError::MalformedClaim(name.to_string())),
        }
    }
}

pub struct SessionValidator {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl SessionValidator {
    pub fn new(secret: &[u8]) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.required_spec_claims = vec!["exp".to_string()].into_iter().collect();

        Self {
            decoding_key: DecodingKey::from_secret(secret),
            validation,
        }
    }

    pub fn validate(&self, token: &str) -> Result<SessionClaims, AuthenticationError> {
        let data = decode::<Map<String, Value>>(token, &self.decoding_key, &self.validation)?;
        Ok(SessionClaims(data.claims))
    }
}

/// The platform adapter: identity comes from the session layer, consent is
/// never remembered (so the consent screen shows up for every first-time
/// scope request), and access tokens are opaque random strings.
pub struct SessionSubjectResolver {
    validator: SessionValidator,
    cookie_name: String,
    account_claim: String,
}

impl SessionSubjectResolver {
    pub fn new(signing_key: &[u8], cookie_name: String, account_claim: String) -> Self {
        Self {
            validator: SessionValidator::new(signing_key),
            cookie_name,
            account_claim,
        }
    }

    /// Cookie first, then `Authorization: Bearer`.
    fn session_token<'a>(&self, headers: &'a HeaderMap) -> Option<&'a str> {
        let from_cookie = headers
            .get_all(header::COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(';'))
            .filter_map(|pair| pair.trim().split_once('='))
            .find(|(name, _)| *name == self.cookie_name)
            .map(|(_, value)| value.trim())
            .filter(|v| !v.is_empty());

        from_cookie.or_else(|| {
            let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
            let (scheme, token) = value.split_once(' ')?;
            scheme
                .eq_ignore_ascii_case("bearer")
                .then(|| token.trim())
                .filter(|t| !t.is_empty())
        })
    }

    pub fn authenticate(&self, headers: &HeaderMap) -> Result<String, AuthenticationError> {
        let token = self
            .session_token(headers)
            .ok_or(AuthenticationError::MissingToken)?;
        let claims = self.validator.validate(token)?;
        Ok(claims.string(&self.account_claim)?.to_string())
    }
}

#[async_trait]
impl SubjectResolver for SessionSubjectResolver {
    async fn subject(&self, headers: &HeaderMap) -> Result<Option<String>> {
        match self.authenticate(headers) {
            Ok(account) => Ok(Some(account)),
            Err(e) => {
                tracing::debug!("request not authenticated: {}", e);
                Ok(None)
            }
        }
    }

    async fn consented_scopes(&self, _subject: &str, _client_id: &str) -> Result<Vec<String>> {
        Ok(Vec::new())
    }

    async fn save_consent(
        &self,
        _subject: &str,
        _client_id: &str,
        _scopes: &[String],
    ) -> Result<()> {
        Ok(())
    }

    fn issue_access_token(
        &self,
        ttl: Duration,
        client_id: &str,
        subject: &str,
        scopes: &[String],
    ) -> Result<AccessToken> {
        let now = Utc::now();
        Ok(AccessToken {
            token: random_url_safe(ACCESS_TOKEN_BYTES),
            client_id: client_id.to_string(),
            subject: subject.to_string(),
            scopes: scopes.to_vec(),
            issued_at: now,
            expires_at: expires_at(now, ttl),
            revoked: false,
        })
    }
}
