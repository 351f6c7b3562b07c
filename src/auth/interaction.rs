use super::AuthorizationServer;
use super::authorization_code::issue_code;
use super::error::{ErrorCode, OAuthError, json_response};
use super::models::{ClientDisplay, GrantType, Interaction, is_expired};
use super::traits::StoreError;
use super::validate::{grant_allowed, is_subset, scopes_allowed, union};
use axum::{
    Json,
    extract::{OriginalUri, Path, State, rejection::JsonRejection},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
pub struct InteractionClient {
    pub id: String,
    #[serde(flatten)]
    pub display: ClientDisplay,
}

/// What the consent UI needs to render the decision
#[derive(Debug, Serialize)]
pub struct InteractionView {
    pub interaction_id: String,
    pub client: InteractionClient,
    pub account: String,
    pub requested_scopes: Vec<String>,
    pub existing_scopes: Vec<String>,
    pub missing_scopes: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct ConfirmRequest {
    pub approve: bool,
    /// narrows the grant; omitted approves everything requested, empty approves nothing
    #[serde(default)]
    pub scopes: Option<Vec<String>>,
}

#[derive(Debug, Serialize)]
pub struct ConfirmResponse {
    pub redirect_to: String,
}

fn expired() -> OAuthError {
    OAuthError::new(ErrorCode::InteractionExpired, "interaction expired")
}

fn not_found() -> OAuthError {
    OAuthError::new(ErrorCode::NotFound, "interaction not found")
}

/// Handler for GET {interaction_path}/{id}
pub async fn interaction_handler(
    State(server): State<AuthorizationServer>,
    Path(id): Path<String>,
) -> Response {
    let interaction = match server.interactions.get_interaction(&id).await {
        Ok(i) => i,
        Err(StoreError::NotFound) => return not_found().into_response(),
        Err(StoreError::AlreadyConsumed) => return expired().into_response(),
        Err(e) => {
            tracing::error!("failed to load interaction: {}", e);
            return OAuthError::server_error("failed to load interaction").into_response();
        }
    };

    if interaction.consumed || is_expired(interaction.expires_at, Utc::now()) {
        return expired().into_response();
    }

    let display = match server.clients.get_client(&interaction.client_id).await {
        Ok(client) => client.display,
        Err(StoreError::NotFound) => {
            return OAuthError::unauthorized_client("unknown client").into_response();
        }
        Err(e) => {
            tracing::error!("failed to load client {}: {}", interaction.client_id, e);
            return OAuthError::server_error("failed to load client").into_response();
        }
    };

    let missing_scopes = interaction.missing_scopes();
    let Interaction {
        id,
        client_id,
        subject,
        requested_scopes,
        existing_scopes,
        created_at,
        expires_at,
        ..
    } = interaction;

    json_response(
        StatusCode::OK,
        InteractionView {
            interaction_id: id,
            client: InteractionClient {
                id: client_id,
                display,
            },
            account: subject,
            requested_scopes,
            existing_scopes,
            missing_scopes,
            created_at,
            expires_at,
        },
    )
}

/// Handler for POST {interaction_path}/{id}/confirm
///
/// On success the code-bearing redirect comes back as JSON so the consent UI
/// does the navigation itself.
pub async fn confirm_handler(
    State(server): State<AuthorizationServer>,
    Path(id): Path<String>,
    OriginalUri(original_uri): OriginalUri,
    headers: HeaderMap,
    body: Result<Json<ConfirmRequest>, JsonRejection>,
) -> Response {
    let Json(confirm) = match body {
        Ok(b) => b,
        Err(e) => {
            tracing::warn!("rejected consent confirmation body: {}", e);
            return OAuthError::invalid_request("invalid confirmation body").plain_text();
        }
    };

    // resolve identity before burning the interaction, so a logged-out user
    // can come back to the same link after signing in
    let subject = match server.subjects.subject(&headers).await {
        Ok(Some(s)) => s,
        Ok(None) => return server.login_redirect(&original_uri.to_string()),
        Err(e) => {
            tracing::error!("subject resolution failed: {:#}", e);
            return OAuthError::server_error("failed to resolve subject").plain_text();
        }
    };

    let interaction = match server.interactions.consume_interaction(&id).await {
        Ok(i) => i,
        Err(StoreError::NotFound) => return not_found().plain_text(),
        Err(StoreError::AlreadyConsumed) => {
            tracing::warn!("interaction confirmed more than once");
            return expired().plain_text();
        }
        Err(e) => {
            tracing::error!("failed to consume interaction: {}", e);
            return OAuthError::server_error("failed to consume interaction").plain_text();
        }
    };

    if is_expired(interaction.expires_at, Utc::now()) {
        return expired().plain_text();
    }

    if interaction.subject != subject {
        tracing::warn!(
            "interaction for client {} confirmed by a different subject",
            interaction.client_id
        );
        return OAuthError::access_denied("interaction belongs to another subject").plain_text();
    }

    let client = match server.clients.get_client(&interaction.client_id).await {
        Ok(c) => c,
        Err(StoreError::NotFound) => {
            return OAuthError::unauthorized_client("unknown client").plain_text();
        }
        Err(e) => {
            tracing::error!("failed to load client {}: {}", interaction.client_id, e);
            return OAuthError::server_error("failed to load client").plain_text();
        }
    };

    let still_registered = client
        .redirect_uris
        .iter()
        .any(|r| *r == interaction.redirect_uri);
    let state = interaction.state.as_deref();
    let fail = |e: OAuthError| e.redirect(&interaction.redirect_uri, state);

    if !grant_allowed(&client.allowed_grants, GrantType::AuthorizationCode) {
        let err = OAuthError::unauthorized_client("client is not allowed to use authorization_code");
        return if still_registered {
            fail(err)
        } else {
            err.plain_text()
        };
    }
    if !still_registered {
        return OAuthError::invalid_request("redirect_uri is no longer registered").plain_text();
    }

    if !confirm.approve {
        tracing::info!("Consent denied for client_id={}", client.id);
        return fail(OAuthError::access_denied("user denied the authorization request"));
    }

    let approved = match confirm.scopes {
        Some(scopes) if scopes.is_empty() => {
            tracing::info!("Consent approved with no scopes for client_id={}", client.id);
            return fail(OAuthError::access_denied("no scopes were approved"));
        }
        Some(scopes) => scopes,
        None => interaction.requested_scopes.clone(),
    };
    if !is_subset(&approved, &interaction.requested_scopes)
        || !scopes_allowed(&client.allowed_scopes, &approved)
    {
        return fail(OAuthError::invalid_scope(
            "approved scopes exceed the requested scopes",
        ));
    }

    let consent = union(&interaction.existing_scopes, &approved);
    if let Err(e) = server
        .subjects
        .save_consent(&subject, &client.id, &consent)
        .await
    {
        tracing::error!("failed to save consent for client {}: {:#}", client.id, e);
        return fail(OAuthError::server_error("failed to save consent"));
    }

    match issue_code(
        &server,
        &client,
        &interaction.redirect_uri,
        &subject,
        &approved,
        state,
    )
    .await
    {
        Ok(redirect_to) => {
            tracing::info!("Consent approved for client_id={}", client.id);
            json_response(StatusCode::OK, ConfirmResponse { redirect_to })
        }
        Err(e) => fail(e),
    }
}
