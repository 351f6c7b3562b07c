use super::error::OAuthError;
use axum::{
    body::Bytes,
    extract::rejection::BytesRejection,
    http::{HeaderMap, header},
};

/// Decoded `application/x-www-form-urlencoded` pairs. Lookups return the
/// first value, trimmed, with empty values treated as absent.
#[derive(Debug, Default, Clone)]
pub struct FormParams(Vec<(String, String)>);

impl FormParams {
    pub fn parse(raw: &[u8]) -> Result<Self, OAuthError> {
        serde_urlencoded::from_bytes::<Vec<(String, String)>>(raw)
            .map(Self)
            .map_err(|_| OAuthError::invalid_request("failed to parse form"))
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.raw(key).map(str::trim).filter(|v| !v.is_empty())
    }

    /// Untrimmed value, for opaque parameters like `state` and secrets.
    pub fn raw(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Body of a back-channel POST. The size cap itself is enforced by the
/// router's `DefaultBodyLimit`; an oversized body shows up as a rejection.
pub fn parse_form_body(
    headers: &HeaderMap,
    body: Result<Bytes, BytesRejection>,
) -> Result<FormParams, OAuthError> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if !content_type.starts_with("application/x-www-form-urlencoded") {
        return Err(OAuthError::invalid_request(
            "content-type must be application/x-www-form-urlencoded",
        ));
    }

    let body = body.map_err(|e| {
        tracing::warn!("rejected request body: {}", e);
        OAuthError::invalid_request("failed to read request body")
    })?;

    FormParams::parse(&body)
}
