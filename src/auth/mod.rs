mod authorization_code;
mod client_auth;
mod config;
mod error;
mod form;
mod handlers;
mod interaction;
mod introspect;
mod memory;
mod models;
mod subject;
mod token;
mod traits;
mod validate;


pub use authorization_code::authorize_handler;
pub use config::ServerConfig;
pub use error::OAuthError;
pub use handlers::token_handler;
pub use interaction::{confirm_handler, interaction_handler};
pub use introspect::{introspect_handler, revoke_handler};
pub use memory::MemoryStore;
pub use models::Client;
pub use subject::{DEFAULT_ACCOUNT_CLAIM, DEFAULT_SESSION_COOKIE, SessionSubjectResolver};
pub use traits::{AuthorizationCodeStore, ClientStore, InteractionStore, SubjectResolver, TokenStore};

use axum::{
    Router,
    extract::DefaultBodyLimit,
    response::Response,
    routing::{get, post},
};
use std::sync::Arc;

/// Everything the server reads and writes through. Several fields may point
/// at the same backend.
pub struct Dependencies {
    pub clients: Arc<dyn ClientStore>,
    pub codes: Arc<dyn AuthorizationCodeStore>,
    pub tokens: Arc<dyn TokenStore>,
    pub interactions: Arc<dyn InteractionStore>,
    pub subjects: Arc<dyn SubjectResolver>,
}

impl Dependencies {
    /// All four store contracts served by one in-memory backend.
    pub fn in_memory(store: MemoryStore, subjects: Arc<dyn SubjectResolver>) -> Self {
        let store = Arc::new(store);
        Self {
            clients: store.clone(),
            codes: store.clone(),
            tokens: store.clone(),
            interactions: store,
            subjects,
        }
    }
}

/// The authorization server: normalized config plus its injected
/// dependencies. Cheap to clone, used directly as axum state.
#[derive(Clone)]
pub struct AuthorizationServer {
    config: Arc<ServerConfig>,
    clients: Arc<dyn ClientStore>,
    codes: Arc<dyn AuthorizationCodeStore>,
    tokens: Arc<dyn TokenStore>,
    interactions: Arc<dyn InteractionStore>,
    subjects: Arc<dyn SubjectResolver>,
}

impl AuthorizationServer {
    pub fn new(config: ServerConfig, deps: Dependencies) -> Self {
        Self {
            config: Arc::new(config.normalized()),
            clients: deps.clients,
            codes: deps.codes,
            tokens: deps.tokens,
            interactions: deps.interactions,
            subjects: deps.subjects,
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Front-channel routes: authorize and the consent interaction.
    pub fn browser_router(&self) -> Router {
        let cfg = &self.config;
        let interaction = self.path(&cfg.interaction_path);
        Router::new()
            .route(&self.path(&cfg.authorize_path), get(authorize_handler))
            .route(&format!("{}/{{id}}", interaction), get(interaction_handler))
            .route(
                &format!("{}/{{id}}/confirm", interaction),
                post(confirm_handler),
            )
            .layer(DefaultBodyLimit::max(cfg.max_body_bytes))
            .with_state(self.clone())
    }

    /// Back-channel routes called by clients with their credentials.
    pub fn client_router(&self) -> Router {
        let cfg = &self.config;
        Router::new()
            .route(&self.path(&cfg.token_path), post(token_handler))
            .route(&self.path(&cfg.introspect_path), post(introspect_handler))
            .route(&self.path(&cfg.revoke_path), post(revoke_handler))
            .layer(DefaultBodyLimit::max(cfg.max_body_bytes))
            .with_state(self.clone())
    }

    /// Every endpoint on one router.
    pub fn router(&self) -> Router {
        self.browser_router().merge(self.client_router())
    }

    /// Endpoint path under the base path.
    pub fn path(&self, endpoint: &str) -> String {
        format!("{}{}", self.config.base_path, endpoint)
    }

    /// Send an unauthenticated user agent to the login page, with a way back.
    pub(crate) fn login_redirect(&self, return_to: &str) -> Response {
        match error::append_query(&self.config.login_url, &[("return_to", return_to)]) {
            Some(location) => error::found(&location),
            None => OAuthError::server_error("invalid login url").plain_text(),
        }
    }
}
