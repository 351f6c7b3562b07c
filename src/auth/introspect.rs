//! Token introspection and revocation. Both endpoints are for confidential
//! clients only and never reveal anything about tokens the caller does not own.

use super::AuthorizationServer;
use super::client_auth::authenticate_client;
use super::error::{OAuthError, json_response};
use super::form::parse_form_body;
use super::models::{AccessToken, RefreshToken, is_expired};
use super::traits::StoreError;
use super::validate::join_scopes;
use axum::{
    body::Bytes,
    extract::{State, rejection::BytesRejection},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TokenKind {
    Access,
    Refresh,
}

impl TokenKind {
    fn as_str(&self) -> &'static str {
        match self {
            TokenKind::Access => "access_token",
            TokenKind::Refresh => "refresh_token",
        }
    }
}

/// Lookup order for a `token_type_hint`. Unknown hints are ignored.
fn lookup_order(hint: Option<&str>) -> [TokenKind; 2] {
    match hint {
        Some("refresh_token") => [TokenKind::Refresh, TokenKind::Access],
        _ => [TokenKind::Access, TokenKind::Refresh],
    }
}

#[derive(Debug, Serialize, Default)]
pub struct IntrospectionResponse {
    pub active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_type: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
}

impl IntrospectionResponse {
    fn inactive() -> Self {
        Self::default()
    }
}

/// The fields introspection needs, whichever store the token came from.
struct Found {
    kind: TokenKind,
    client_id: String,
    subject: String,
    scopes: Vec<String>,
    issued_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    revoked: bool,
}

impl From<AccessToken> for Found {
    fn from(t: AccessToken) -> Self {
        Self {
            kind: TokenKind::Access,
            client_id: t.client_id,
            subject: t.subject,
            scopes: t.scopes,
            issued_at: t.issued_at,
            expires_at: t.expires_at,
            revoked: t.revoked,
        }
    }
}

impl From<RefreshToken> for Found {
    fn from(t: RefreshToken) -> Self {
        Self {
            kind: TokenKind::Refresh,
            client_id: t.client_id,
            subject: t.subject,
            scopes: t.scopes,
            issued_at: t.issued_at,
            expires_at: t.expires_at,
            revoked: t.revoked,
        }
    }
}

async fn lookup(
    server: &AuthorizationServer,
    kind: TokenKind,
    token: &str,
) -> Result<Option<Found>, OAuthError> {
    let result = match kind {
        TokenKind::Access => server.tokens.lookup_access_token(token).await.map(Found::from),
        TokenKind::Refresh => server.tokens.lookup_refresh_token(token).await.map(Found::from),
    };
    match result {
        Ok(found) => Ok(Some(found)),
        Err(StoreError::NotFound) => Ok(None),
        Err(e) => {
            tracing::error!("failed to look up {}: {}", kind.as_str(), e);
            Err(OAuthError::server_error("failed to look up token"))
        }
    }
}

/// Handler for POST {introspect_path}
pub async fn introspect_handler(
    State(server): State<AuthorizationServer>,
    headers: HeaderMap,
    body: Result<Bytes, BytesRejection>,
) -> Response {
    match introspect(&server, &headers, body).await {
        Ok(resp) => json_response(StatusCode::OK, resp),
        Err(e) => e.into_response(),
    }
}

async fn introspect(
    server: &AuthorizationServer,
    headers: &HeaderMap,
    body: Result<Bytes, BytesRejection>,
) -> Result<IntrospectionResponse, OAuthError> {
    let form = parse_form_body(headers, body)?;
    let client = authenticate_client(server.clients.as_ref(), headers, &form, false).await?;
    let token = form
        .get("token")
        .ok_or_else(|| OAuthError::invalid_request("Missing required parameter: token"))?;

    // an inactive hit in the first store still falls through to the other
    let now = Utc::now();
    let mut found = None;
    for kind in lookup_order(form.get("token_type_hint")) {
        if let Some(f) = lookup(server, kind, token).await? {
            if !f.revoked && !is_expired(f.expires_at, now) {
                found = Some(f);
                break;
            }
        }
    }

    let Some(found) = found else {
        return Ok(IntrospectionResponse::inactive());
    };
    if found.client_id != client.id {
        tracing::warn!("client {} tried to introspect a foreign token", client.id);
        return Ok(IntrospectionResponse::inactive());
    }

    let issuer = &server.config.issuer;
    Ok(IntrospectionResponse {
        active: true,
        client_id: Some(found.client_id),
        sub: Some(found.subject),
        scope: (!found.scopes.is_empty()).then(|| join_scopes(&found.scopes)),
        exp: Some(found.expires_at.timestamp()),
        iat: Some(found.issued_at.timestamp()),
        token_type: Some(found.kind.as_str()),
        iss: (!issuer.is_empty()).then(|| issuer.clone()),
    })
}

/// Handler for POST {revoke_path}
///
/// Answers 200 whether or not the token existed.
pub async fn revoke_handler(
    State(server): State<AuthorizationServer>,
    headers: HeaderMap,
    body: Result<Bytes, BytesRejection>,
) -> Response {
    match revoke(&server, &headers, body).await {
        Ok(()) => (
            StatusCode::OK,
            [
                (header::CACHE_CONTROL, HeaderValue::from_static("no-store")),
                (header::PRAGMA, HeaderValue::from_static("no-cache")),
            ],
        )
            .into_response(),
        Err(e) => e.into_response(),
    }
}

async fn revoke(
    server: &AuthorizationServer,
    headers: &HeaderMap,
    body: Result<Bytes, BytesRejection>,
) -> Result<(), OAuthError> {
    let form = parse_form_body(headers, body)?;
    let client = authenticate_client(server.clients.as_ref(), headers, &form, false).await?;
    let token = form
        .get("token")
        .ok_or_else(|| OAuthError::invalid_request("Missing required parameter: token"))?;

    // with a hint only that store is touched, without one both are tried
    let kinds: &[TokenKind] = match form.get("token_type_hint") {
        Some("access_token") => &[TokenKind::Access],
        Some("refresh_token") => &[TokenKind::Refresh],
        _ => &[TokenKind::Access, TokenKind::Refresh],
    };

    for &kind in kinds {
        let Some(found) = lookup(server, kind, token).await? else {
            continue;
        };
        if found.client_id != client.id {
            tracing::warn!("client {} tried to revoke a foreign token", client.id);
            continue;
        }

        let result = match kind {
            TokenKind::Access => server.tokens.revoke_access_token(token).await,
            TokenKind::Refresh => server.tokens.revoke_refresh_token(token).await,
        };
        if let Err(e) = result {
            tracing::error!("failed to revoke {}: {}", kind.as_str(), e);
            return Err(OAuthError::server_error("failed to revoke token"));
        }
        tracing::info!("Revoked {} for client: {}", kind.as_str(), client.id);
    }

    Ok(())
}
