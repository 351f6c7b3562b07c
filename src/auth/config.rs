use std::time::Duration;

pub const DEFAULT_CODE_TTL: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_ACCESS_TOKEN_TTL: Duration = Duration::from_secs(15 * 60);
pub const DEFAULT_REFRESH_TOKEN_TTL: Duration = Duration::from_secs(30 * 24 * 60 * 60);
pub const DEFAULT_INTERACTION_TTL: Duration = Duration::from_secs(10 * 60);
pub const DEFAULT_MAX_BODY_BYTES: usize = 1 << 20;

/// Configuration for the authorization server
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// reported as `iss` by introspection, omitted when empty
    pub issuer: String,

    /// prefix every route is mounted under; empty or "/" mounts at the root
    pub base_path: String,
    pub authorize_path: String,
    pub token_path: String,
    pub introspect_path: String,
    pub revoke_path: String,
    /// `{interaction_path}/{id}` and `{interaction_path}/{id}/confirm`
    pub interaction_path: String,

    /// where unauthenticated users go; receives `return_to`
    pub login_url: String,
    /// consent UI; receives `interaction_id`
    pub consent_url: String,

    pub authorization_code_ttl: Duration,
    pub access_token_ttl: Duration,
    pub refresh_token_ttl: Duration,
    pub interaction_ttl: Duration,

    pub issue_refresh_token: bool,
    pub rotate_refresh_tokens: bool,
    pub revoke_old_refresh_token: bool,

    pub max_body_bytes: usize,

    /// lets secretless clients use the authorization_code and refresh_token grants
    pub allow_public_clients_on_token_endpoint: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            issuer: String::new(),
            base_path: "/oauth".to_string(),
            authorize_path: "/authorize".to_string(),
            token_path: "/token".to_string(),
            introspect_path: "/introspect".to_string(),
            revoke_path: "/revoke".to_string(),
            interaction_path: "/interaction".to_string(),
            login_url: "/login".to_string(),
            consent_url: "/consent".to_string(),
            authorization_code_ttl: DEFAULT_CODE_TTL,
            access_token_ttl: DEFAULT_ACCESS_TOKEN_TTL,
            refresh_token_ttl: DEFAULT_REFRESH_TOKEN_TTL,
            interaction_ttl: DEFAULT_INTERACTION_TTL,
            issue_refresh_token: true,
            rotate_refresh_tokens: true,
            revoke_old_refresh_token: true,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            allow_public_clients_on_token_endpoint: false,
        }
    }
}

impl ServerConfig {
    /// Replace zero durations and empty paths with the defaults, and make
    /// sure every path starts with a slash.
    pub fn normalized(mut self) -> Self {
        let defaults = Self::default();

        for (value, default) in [
            (&mut self.authorize_path, defaults.authorize_path),
            (&mut self.token_path, defaults.token_path),
            (&mut self.introspect_path, defaults.introspect_path),
            (&mut self.revoke_path, defaults.revoke_path),
            (&mut self.interaction_path, defaults.interaction_path),
            (&mut self.login_url, defaults.login_url),
            (&mut self.consent_url, defaults.consent_url),
        ] {
            if value.trim().is_empty() {
                *value = default;
            }
        }

        for path in [
            &mut self.authorize_path,
            &mut self.token_path,
            &mut self.introspect_path,
            &mut self.revoke_path,
            &mut self.interaction_path,
        ] {
            if !path.starts_with('/') {
                path.insert(0, '/');
            }
            let trimmed_len = path.trim_end_matches('/').len().max(1);
            path.truncate(trimmed_len);
        }

        self.base_path = self.base_path.trim().trim_end_matches('/').to_string();
        if !self.base_path.is_empty() && !self.base_path.starts_with('/') {
            self.base_path.insert(0, '/');
        }

        for (ttl, default) in [
            (&mut self.authorization_code_ttl, DEFAULT_CODE_TTL),
            (&mut self.access_token_ttl, DEFAULT_ACCESS_TOKEN_TTL),
            (&mut self.refresh_token_ttl, DEFAULT_REFRESH_TOKEN_TTL),
            (&mut self.interaction_ttl, DEFAULT_INTERACTION_TTL),
        ] {
            if ttl.is_zero() {
                *ttl = default;
            }
        }

        if self.max_body_bytes == 0 {
            self.max_body_bytes = DEFAULT_MAX_BODY_BYTES;
        }

        self
    }
}
