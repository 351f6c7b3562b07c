use super::AuthorizationServer;
use super::client_auth::authenticate_client;
use super::error::{ErrorCode, OAuthError, json_response};
use super::form::{FormParams, parse_form_body};
use super::models::{AccessToken, Client, GrantType, RefreshToken, is_expired};
use super::token::{TokenResponse, mint_refresh_token};
use super::traits::StoreError;
use super::validate::{grant_allowed, is_subset, parse_scopes, scopes_allowed};
use axum::{
    body::Bytes,
    extract::{State, rejection::BytesRejection},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use chrono::Utc;

/// Handler for POST {token_path}
pub async fn token_handler(
    State(server): State<AuthorizationServer>,
    headers: HeaderMap,
    body: Result<Bytes, BytesRejection>,
) -> Response {
    let form = match parse_form_body(&headers, body) {
        Ok(f) => f,
        Err(e) => return e.into_response(),
    };

    let grant_type = form.get("grant_type").unwrap_or_default();
    tracing::info!("Token request: grant_type={}", grant_type);

    let result = match grant_type {
        "authorization_code" => handle_authorization_code_grant(&server, &headers, &form).await,
        "refresh_token" => handle_refresh_token_grant(&server, &headers, &form).await,
        "client_credentials" => handle_client_credentials_grant(&server, &headers, &form).await,
        "" => Err(OAuthError::invalid_request("missing grant_type")),
        _ => Err(OAuthError::new(
            ErrorCode::UnsupportedGrantType,
            "unsupported grant_type",
        )),
    };

    match result {
        Ok(body) => json_response(StatusCode::OK, body),
        Err(e) => e.into_response(),
    }
}

fn require_grant(client: &Client, grant: GrantType) -> Result<(), OAuthError> {
    if grant_allowed(&client.allowed_grants, grant) {
        return Ok(());
    }
    tracing::warn!("client {} attempted disallowed grant {}", client.id, grant);
    Err(OAuthError::unauthorized_client(format!(
        "client is not allowed to use {}",
        grant
    )))
}

async fn issue_access_token(
    server: &AuthorizationServer,
    client_id: &str,
    subject: &str,
    scopes: &[String],
) -> Result<AccessToken, OAuthError> {
    let token = server
        .subjects
        .issue_access_token(server.config.access_token_ttl, client_id, subject, scopes)
        .map_err(|e| {
            tracing::error!("failed to issue access token: {:#}", e);
            OAuthError::server_error("failed to issue access token")
        })?;

    server
        .tokens
        .save_access_token(token.clone())
        .await
        .map_err(|e| {
            tracing::error!("failed to store access token: {}", e);
            OAuthError::server_error("failed to store access token")
        })?;

    Ok(token)
}

async fn store_refresh_token(
    server: &AuthorizationServer,
    token: RefreshToken,
) -> Result<RefreshToken, OAuthError> {
    server
        .tokens
        .save_refresh_token(token.clone())
        .await
        .map_err(|e| {
            tracing::error!("failed to store refresh token: {}", e);
            OAuthError::server_error("failed to store refresh token")
        })?;
    Ok(token)
}

async fn handle_authorization_code_grant(
    server: &AuthorizationServer,
    headers: &HeaderMap,
    form: &FormParams,
) -> Result<TokenResponse, OAuthError> {
    let code = form
        .get("code")
        .ok_or_else(|| OAuthError::invalid_request("Missing required parameter: code"))?;
    let redirect_uri = form
        .get("redirect_uri")
        .ok_or_else(|| OAuthError::invalid_request("Missing required parameter: redirect_uri"))?;

    let client = authenticate_client(
        server.clients.as_ref(),
        headers,
        form,
        server.config.allow_public_clients_on_token_endpoint,
    )
    .await?;
    require_grant(&client, GrantType::AuthorizationCode)?;

    // single use: whoever consumes first owns the code, even if a later
    // check fails
    let stored = match server.codes.consume_code(code).await {
        Ok(c) => c,
        Err(StoreError::NotFound) => {
            tracing::warn!("unknown authorization code presented by {}", client.id);
            return Err(OAuthError::invalid_grant("invalid authorization code"));
        }
        Err(StoreError::AlreadyConsumed) => {
            tracing::warn!("authorization code replayed by {}", client.id);
            return Err(OAuthError::invalid_grant("authorization code already used"));
        }
        Err(e) => {
            tracing::error!("failed to consume authorization code: {}", e);
            return Err(OAuthError::server_error("failed to consume authorization code"));
        }
    };

    if is_expired(stored.expires_at, Utc::now()) {
        return Err(OAuthError::invalid_grant("authorization code expired"));
    }
    if stored.client_id != client.id {
        tracing::warn!(
            "client {} presented a code issued to {}",
            client.id,
            stored.client_id
        );
        return Err(OAuthError::invalid_grant("authorization code was issued to another client"));
    }
    if stored.redirect_uri != redirect_uri {
        tracing::warn!(
            "redirect_uri mismatch for client {}: expected '{}', got '{}'",
            client.id,
            stored.redirect_uri,
            redirect_uri
        );
        return Err(OAuthError::invalid_grant("redirect_uri mismatch"));
    }

    let access = issue_access_token(server, &client.id, &stored.subject, &stored.scopes).await?;

    let refresh = if server.config.issue_refresh_token {
        let token = mint_refresh_token(
            Utc::now(),
            server.config.refresh_token_ttl,
            &client.id,
            &stored.subject,
            &stored.scopes,
            &stored.code,
        );
        Some(store_refresh_token(server, token).await?)
    } else {
        None
    };

    tracing::info!(
        "Issued tokens via authorization_code for client: {}",
        client.id
    );
    Ok(TokenResponse::new(&access, refresh.as_ref()))
}

async fn handle_refresh_token_grant(
    server: &AuthorizationServer,
    headers: &HeaderMap,
    form: &FormParams,
) -> Result<TokenResponse, OAuthError> {
    let presented = form
        .get("refresh_token")
        .ok_or_else(|| OAuthError::invalid_request("Missing required parameter: refresh_token"))?;

    let client = authenticate_client(
        server.clients.as_ref(),
        headers,
        form,
        server.config.allow_public_clients_on_token_endpoint,
    )
    .await?;
    require_grant(&client, GrantType::RefreshToken)?;

    let old = match server.tokens.lookup_refresh_token(presented).await {
        Ok(t) => t,
        Err(StoreError::NotFound) => {
            return Err(OAuthError::invalid_grant("invalid refresh token"));
        }
        Err(e) => {
            tracing::error!("failed to load refresh token: {}", e);
            return Err(OAuthError::server_error("failed to load refresh token"));
        }
    };

    if old.revoked {
        tracing::warn!("revoked refresh token presented by {}", client.id);
        return Err(OAuthError::invalid_grant("refresh token revoked"));
    }
    if is_expired(old.expires_at, Utc::now()) {
        return Err(OAuthError::invalid_grant("refresh token expired"));
    }
    if old.client_id != client.id {
        tracing::warn!(
            "client {} presented a refresh token issued to {}",
            client.id,
            old.client_id
        );
        return Err(OAuthError::invalid_grant("refresh token was issued to another client"));
    }

    // narrowing only
    let scopes = match form.get("scope") {
        Some(raw) => {
            let requested = parse_scopes(raw);
            if !is_subset(&requested, &old.scopes) {
                return Err(OAuthError::invalid_scope(
                    "requested scope exceeds the original grant",
                ));
            }
            requested
        }
        None => old.scopes.clone(),
    };

    let access = issue_access_token(server, &client.id, &old.subject, &scopes).await?;

    let rotated = if server.config.rotate_refresh_tokens {
        let token = mint_refresh_token(
            Utc::now(),
            server.config.refresh_token_ttl,
            &client.id,
            &old.subject,
            &old.scopes,
            &old.authorization_code,
        );
        let token = store_refresh_token(server, token).await?;

        // only once the replacement is stored
        if server.config.revoke_old_refresh_token {
            if let Err(e) = server.tokens.revoke_refresh_token(&old.token).await {
                tracing::warn!("failed to revoke rotated refresh token: {}", e);
            }
        }
        Some(token)
    } else {
        None
    };

    tracing::info!("Issued tokens via refresh_token for client: {}", client.id);
    Ok(TokenResponse::new(&access, rotated.as_ref()))
}

async fn handle_client_credentials_grant(
    server: &AuthorizationServer,
    headers: &HeaderMap,
    form: &FormParams,
) -> Result<TokenResponse, OAuthError> {
    let client = authenticate_client(server.clients.as_ref(), headers, form, false).await?;
    require_grant(&client, GrantType::ClientCredentials)?;

    let scopes = parse_scopes(form.raw("scope").unwrap_or_default());
    if !scopes_allowed(&client.allowed_scopes, &scopes) {
        return Err(OAuthError::invalid_scope(
            "requested scope is not allowed for this client",
        ));
    }

    // the client acts on its own behalf
    let access = issue_access_token(server, &client.id, &client.id, &scopes).await?;

    tracing::info!(
        "Issued OAuth token via client_credentials for client: {}",
        client.id
    );
    Ok(TokenResponse::new(&access, None))
}
