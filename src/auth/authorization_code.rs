use super::AuthorizationServer;
use super::error::{ErrorCode, OAuthError, append_query, found};
use super::form::FormParams;
use super::models::{AuthorizationCode, Client, GrantType, Interaction};
use super::token::{CODE_BYTES, INTERACTION_ID_BYTES, expires_at, random_url_safe};
use super::traits::StoreError;
use super::validate::{difference, grant_allowed, parse_scopes, resolve_redirect_uri, scopes_allowed};
use axum::{
    extract::{OriginalUri, RawQuery, State},
    http::HeaderMap,
    response::Response,
};
use chrono::Utc;

#[derive(Debug, Clone)]
pub struct AuthorizeRequest {
    pub response_type: String,
    pub client_id: String,
    pub redirect_uri: Option<String>,
    pub scopes: Vec<String>,
    pub state: Option<String>,
}

impl AuthorizeRequest {
    pub fn from_params(params: &FormParams) -> Result<Self, OAuthError> {
        let response_type = params
            .get("response_type")
            .ok_or_else(|| OAuthError::invalid_request("missing response_type"))?;
        let client_id = params
            .get("client_id")
            .ok_or_else(|| OAuthError::invalid_request("missing client_id"))?;

        Ok(Self {
            response_type: response_type.to_string(),
            client_id: client_id.to_string(),
            redirect_uri: params.get("redirect_uri").map(str::to_string),
            scopes: parse_scopes(params.raw("scope").unwrap_or_default()),
            state: params.raw("state").filter(|s| !s.is_empty()).map(str::to_string),
        })
    }
}

/// Front channel of the authorization code grant.
///
/// Errors go back to the client's redirect URI once both the client and that
/// URI are validated; before that they are written to the user agent as plain
/// text, so an unvalidated URI is never redirected to.
pub async fn authorize_handler(
    State(server): State<AuthorizationServer>,
    OriginalUri(original_uri): OriginalUri,
    headers: HeaderMap,
    RawQuery(query): RawQuery,
) -> Response {
    let params = match FormParams::parse(query.unwrap_or_default().as_bytes()) {
        Ok(p) => p,
        Err(e) => return e.plain_text(),
    };
    let req = match AuthorizeRequest::from_params(&params) {
        Ok(r) => r,
        Err(e) => return e.plain_text(),
    };

    tracing::info!("Authorization request from client_id={}", req.client_id);

    let client = match server.clients.get_client(&req.client_id).await {
        Ok(c) => c,
        Err(StoreError::NotFound) => {
            tracing::warn!("authorization request for unknown client_id={}", req.client_id);
            return OAuthError::unauthorized_client("unknown client").plain_text();
        }
        Err(e) => {
            tracing::error!("failed to load client {}: {}", req.client_id, e);
            return OAuthError::server_error("failed to load client").plain_text();
        }
    };

    let redirect_uri = resolve_redirect_uri(&client.redirect_uris, req.redirect_uri.as_deref());

    if !grant_allowed(&client.allowed_grants, GrantType::AuthorizationCode) {
        let err = OAuthError::unauthorized_client("client is not allowed to use authorization_code");
        return match &redirect_uri {
            Some(uri) => err.redirect(uri, req.state.as_deref()),
            None => err.plain_text(),
        };
    }

    // validate redirect_uri BEFORE we redirect anywhere
    let Some(redirect_uri) = redirect_uri else {
        tracing::warn!(
            "rejected redirect_uri {:?} for client '{}'",
            req.redirect_uri,
            client.id
        );
        return OAuthError::invalid_request("invalid redirect_uri").plain_text();
    };
    let fail = |e: OAuthError| e.redirect(&redirect_uri, req.state.as_deref());

    if req.response_type != "code" {
        return fail(OAuthError::new(
            ErrorCode::UnsupportedResponseType,
            "only response_type=code is supported",
        ));
    }

    if !scopes_allowed(&client.allowed_scopes, &req.scopes) {
        return fail(OAuthError::invalid_scope(
            "requested scope is not allowed for this client",
        ));
    }

    let subject = match server.subjects.subject(&headers).await {
        Ok(Some(s)) => s,
        Ok(None) => return server.login_redirect(&original_uri.to_string()),
        Err(e) => {
            tracing::error!("subject resolution failed: {:#}", e);
            return fail(OAuthError::server_error("failed to resolve subject"));
        }
    };

    let existing = match server.subjects.consented_scopes(&subject, &client.id).await {
        Ok(s) => s,
        Err(e) => {
            tracing::error!("failed to load consent for client {}: {:#}", client.id, e);
            return fail(OAuthError::server_error("failed to load consent"));
        }
    };

    let missing = difference(&req.scopes, &existing);
    if !missing.is_empty() {
        return match start_interaction(&server, &client, &redirect_uri, &req, subject, existing).await {
            Ok(location) => found(&location),
            Err(e) => fail(e),
        };
    }

    match issue_code(&server, &client, &redirect_uri, &subject, &req.scopes, req.state.as_deref()).await {
        Ok(location) => {
            tracing::info!("Authorization granted for client_id={}", client.id);
            found(&location)
        }
        Err(e) => fail(e),
    }
}

/// Park the decision and send the user agent to the consent UI.
async fn start_interaction(
    server: &AuthorizationServer,
    client: &Client,
    redirect_uri: &str,
    req: &AuthorizeRequest,
    subject: String,
    existing: Vec<String>,
) -> Result<String, OAuthError> {
    let now = Utc::now();
    let interaction = Interaction {
        id: random_url_safe(INTERACTION_ID_BYTES),
        client_id: client.id.clone(),
        redirect_uri: redirect_uri.to_string(),
        state: req.state.clone(),
        subject,
        requested_scopes: req.scopes.clone(),
        existing_scopes: existing,
        created_at: now,
        expires_at: expires_at(now, server.config.interaction_ttl),
        consumed: false,
    };
    let id = interaction.id.clone();

    server
        .interactions
        .create_interaction(interaction)
        .await
        .map_err(|e| {
            tracing::error!("failed to store interaction: {}", e);
            OAuthError::server_error("failed to store interaction")
        })?;

    tracing::info!("Consent required for client_id={}, starting interaction", client.id);

    append_query(&server.config.consent_url, &[("interaction_id", id.as_str())])
        .ok_or_else(|| OAuthError::server_error("invalid consent url"))
}

/// Store a fresh single-use code and build the client redirect carrying it.
pub(crate) async fn issue_code(
    server: &AuthorizationServer,
    client: &Client,
    redirect_uri: &str,
    subject: &str,
    scopes: &[String],
    state: Option<&str>,
) -> Result<String, OAuthError> {
    let now = Utc::now();
    let code = AuthorizationCode {
        code: random_url_safe(CODE_BYTES),
        client_id: client.id.clone(),
        redirect_uri: redirect_uri.to_string(),
        subject: subject.to_string(),
        scopes: scopes.to_vec(),
        issued_at: now,
        expires_at: expires_at(now, server.config.authorization_code_ttl),
        consumed: false,
    };
    let value = code.code.clone();

    server.codes.create_code(code).await.map_err(|e| {
        tracing::error!("failed to store authorization code: {}", e);
        OAuthError::server_error("failed to store authorization code")
    })?;

    let mut params = vec![("code", value.as_str())];
    if let Some(state) = state.filter(|s| !s.is_empty()) {
        params.push(("state", state));
    }
    append_query(redirect_uri, &params)
        .ok_or_else(|| OAuthError::server_error("failed to parse redirect_uri"))
}
