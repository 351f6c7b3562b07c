use axum::{
    Json,
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use std::borrow::Cow;
use std::fmt;
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    InvalidRequest,
    InvalidClient,
    InvalidGrant,
    UnauthorizedClient,
    UnsupportedGrantType,
    UnsupportedResponseType,
    InvalidScope,
    AccessDenied,
    ServerError,
    InteractionExpired,
    NotFound,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::InvalidRequest => "invalid_request",
            ErrorCode::InvalidClient => "invalid_client",
            ErrorCode::InvalidGrant => "invalid_grant",
            ErrorCode::UnauthorizedClient => "unauthorized_client",
            ErrorCode::UnsupportedGrantType => "unsupported_grant_type",
            ErrorCode::UnsupportedResponseType => "unsupported_response_type",
            ErrorCode::InvalidScope => "invalid_scope",
            ErrorCode::AccessDenied => "access_denied",
            ErrorCode::ServerError => "server_error",
            ErrorCode::InteractionExpired => "interaction_expired",
            ErrorCode::NotFound => "not_found",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ErrorCode::InvalidClient => StatusCode::UNAUTHORIZED,
            ErrorCode::AccessDenied => StatusCode::FORBIDDEN,
            ErrorCode::ServerError => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorCode::InteractionExpired => StatusCode::GONE,
            ErrorCode::NotFound => StatusCode::NOT_FOUND,
            _ => StatusCode::BAD_REQUEST,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// OAuth2 error: wire code, human description and the HTTP status it maps to
#[derive(Debug, Clone, thiserror::Error)]
#[error("{code}: {description}")]
pub struct OAuthError {
    pub code: ErrorCode,
    pub description: Cow<'static, str>,
    pub status: StatusCode,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: &'static str,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub error_description: String,
}

impl OAuthError {
    pub fn new(code: ErrorCode, description: impl Into<Cow<'static, str>>) -> Self {
        Self {
            code,
            description: description.into(),
            status: code.status(),
        }
    }

    pub fn invalid_request(description: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorCode::InvalidRequest, description)
    }

    pub fn invalid_client(description: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorCode::InvalidClient, description)
    }

    pub fn invalid_grant(description: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorCode::InvalidGrant, description)
    }

    pub fn unauthorized_client(description: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorCode::UnauthorizedClient, description)
    }

    pub fn invalid_scope(description: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorCode::InvalidScope, description)
    }

    pub fn access_denied(description: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorCode::AccessDenied, description)
    }

    /// Description goes to the caller, so never pass internal detail here.
    pub fn server_error(description: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorCode::ServerError, description)
    }

    fn body(&self) -> ErrorResponse {
        ErrorResponse {
            error: self.code.as_str(),
            error_description: self.description.to_string(),
        }
    }

    /// Written straight to the caller when there is no validated redirect target.
    pub fn plain_text(&self) -> Response {
        (
            self.status,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            format!("{}: {}", self.code, self.description),
        )
            .into_response()
    }

    /// Delivered to the client's redirect URI. Only call this with a URI that
    /// has already been matched against the client's registration.
    pub fn redirect(&self, redirect_uri: &str, state: Option<&str>) -> Response {
        let mut params = vec![("error", self.code.as_str())];
        if !self.description.is_empty() {
            params.push(("error_description", self.description.as_ref()));
        }
        if let Some(state) = state.filter(|s| !s.is_empty()) {
            params.push(("state", state));
        }

        match append_query(redirect_uri, &params) {
            Some(location) => found(&location),
            None => OAuthError::server_error("failed to parse redirect_uri").plain_text(),
        }
    }
}

/// JSON body for the back-channel endpoints.
impl IntoResponse for OAuthError {
    fn into_response(self) -> Response {
        let mut headers = no_store_headers();
        if self.code == ErrorCode::InvalidClient && self.status == StatusCode::UNAUTHORIZED {
            headers.insert(
                header::WWW_AUTHENTICATE,
                HeaderValue::from_static("Basic realm=\"oauth2\""),
            );
        }
        (self.status, headers, Json(self.body())).into_response()
    }
}

fn no_store_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
    headers
}

/// Every JSON body leaves with caching disabled.
pub fn json_response<T: Serialize>(status: StatusCode, body: T) -> Response {
    (status, no_store_headers(), Json(body)).into_response()
}

/// 302 Found. axum's `Redirect` only does 303/307/308.
pub fn found(location: &str) -> Response {
    match HeaderValue::try_from(location) {
        Ok(value) => (StatusCode::FOUND, [(header::LOCATION, value)]).into_response(),
        Err(_) => OAuthError::server_error("invalid redirect location").plain_text(),
    }
}

/// Add query parameters to an absolute URL, or to a relative path such as a
/// same-origin login page. Returns None only when an absolute-looking URL
/// fails to parse.
pub fn append_query(base: &str, params: &[(&str, &str)]) -> Option<String> {
    match Url::parse(base) {
        Ok(mut url) => {
            {
                let mut pairs = url.query_pairs_mut();
                for (k, v) in params {
                    pairs.append_pair(k, v);
                }
            }
            Some(url.to_string())
        }
        Err(url::ParseError::RelativeUrlWithoutBase) => {
            let mut out = base.to_string();
            for (k, v) in params {
                out.push(if out.contains('?') { '&' } else { '?' });
                out.push_str(&format!("{}={}", k, urlencoding::encode(v)));
            }
            Some(out)
        }
        Err(_) => None,
    }
}
