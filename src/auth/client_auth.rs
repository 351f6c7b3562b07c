//! Client authentication for the token, introspection and revocation endpoints.
//!
//! HTTP Basic credentials win over `client_id`/`client_secret` in the body;
//! a body `client_id` that disagrees with the Basic one is rejected outright.

use super::error::OAuthError;
use super::form::FormParams;
use super::models::Client;
use super::traits::{ClientStore, StoreError};
use axum::http::{HeaderMap, header};
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};

/// Pull `client_id:client_secret` out of an `Authorization: Basic` header.
pub fn parse_basic_auth(headers: &HeaderMap) -> Option<(String, String)> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, encoded) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return None;
    }
    let decoded = BASE64.decode(encoded.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (id, secret) = decoded.split_once(':')?;
    Some((id.to_string(), secret.to_string()))
}

/// Authenticate the calling client. `allow_public` decides whether a client
/// without a secret may get through on this endpoint; confidential clients
/// always need a verified secret.
pub async fn authenticate_client(
    clients: &dyn ClientStore,
    headers: &HeaderMap,
    form: &FormParams,
    allow_public: bool,
) -> Result<Client, OAuthError> {
    let body_id = form.get("client_id");

    let (client_id, client_secret) = match parse_basic_auth(headers) {
        Some((id, secret)) => {
            if body_id.is_some_and(|b| b != id) {
                tracing::warn!("client_id mismatch between Authorization header and body");
                return Err(OAuthError::invalid_client(
                    "client_id mismatch between Authorization header and body",
                ));
            }
            (id, secret)
        }
        None => (
            body_id.unwrap_or_default().to_string(),
            form.raw("client_secret").unwrap_or_default().to_string(),
        ),
    };

    if client_id.is_empty() {
        return Err(OAuthError::invalid_client("missing client authentication"));
    }

    let client = match clients.get_client(&client_id).await {
        Ok(c) => c,
        Err(StoreError::NotFound) => {
            tracing::warn!("authentication attempted for unknown client_id: {}", client_id);
            return Err(OAuthError::invalid_client("unknown client"));
        }
        Err(e) => {
            tracing::error!("failed to load client {}: {}", client_id, e);
            return Err(OAuthError::server_error("client validation error"));
        }
    };

    if client.is_public() {
        if !allow_public {
            return Err(OAuthError::invalid_client(
                "public clients are not allowed on this endpoint",
            ));
        }
        // a public client that sends a secret anyway still has it checked
        if !client_secret.is_empty() {
            verify_secret(clients, &client_id, &client_secret).await?;
        }
        return Ok(client);
    }

    if client_secret.is_empty() {
        return Err(OAuthError::invalid_client("missing client secret"));
    }
    verify_secret(clients, &client_id, &client_secret).await?;

    Ok(client)
}

async fn verify_secret(
    clients: &dyn ClientStore,
    client_id: &str,
    client_secret: &str,
) -> Result<(), OAuthError> {
    match clients.validate_client_secret(client_id, client_secret).await {
        Ok(true) => Ok(()),
        Ok(false) => {
            tracing::warn!("invalid client secret for client_id: {}", client_id);
            Err(OAuthError::invalid_client("invalid client secret"))
        }
        Err(e) => {
            tracing::warn!("client secret validation error for {}: {}", client_id, e);
            Err(OAuthError::server_error("client validation error"))
        }
    }
}
