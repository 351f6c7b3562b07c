mod auth;

use anyhow::{Context, Result};
use auth::{
    AuthorizationServer, Client, DEFAULT_ACCOUNT_CLAIM, DEFAULT_SESSION_COOKIE, Dependencies,
    MemoryStore, ServerConfig, SessionSubjectResolver,
};
use clap::Parser;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "consentd")]
#[command(about = "oauth2 authorization server with a consent interaction flow")]
struct Args {
    /// Host to bind to
    #[arg(long, env = "OAUTH2_HOST", default_value = "localhost")]
    host: String,

    /// Port to bind to
    #[arg(short, long, env = "OAUTH2_PORT", default_value = "3000")]
    port: u16,

    /// Reported as `iss` by introspection
    #[arg(long, env = "OAUTH2_ISSUER", default_value = "")]
    issuer: String,

    /// Prefix for every endpoint ("/" mounts at the root)
    #[arg(long, env = "OAUTH2_BASE_PATH", default_value = "/oauth")]
    base_path: String,

    /// Login page for unauthenticated users, receives `return_to`
    #[arg(long, env = "OAUTH2_LOGIN_URL", default_value = "/login")]
    login_url: String,

    /// Consent UI, receives `interaction_id`
    #[arg(long, env = "OAUTH2_CONSENT_URL", default_value = "/consent")]
    consent_url: String,

    /// Authorization code lifetime in seconds
    #[arg(long, env = "OAUTH2_CODE_TTL", default_value = "300")]
    code_ttl: u64,

    /// Access token lifetime in seconds
    #[arg(long, env = "OAUTH2_ACCESS_TOKEN_TTL", default_value = "900")]
    access_token_ttl: u64,

    /// Refresh token lifetime in seconds
    #[arg(long, env = "OAUTH2_REFRESH_TOKEN_TTL", default_value = "2592000")]
    refresh_token_ttl: u64,

    /// How long a consent interaction stays open, in seconds
    #[arg(long, env = "OAUTH2_INTERACTION_TTL", default_value = "600")]
    interaction_ttl: u64,

    #[arg(long, env = "OAUTH2_ISSUE_REFRESH_TOKEN", default_value = "true", action = clap::ArgAction::Set)]
    issue_refresh_token: bool,

    #[arg(long, env = "OAUTH2_ROTATE_REFRESH_TOKENS", default_value = "true", action = clap::ArgAction::Set)]
    rotate_refresh_tokens: bool,

    #[arg(long, env = "OAUTH2_REVOKE_OLD_REFRESH_TOKEN", default_value = "true", action = clap::ArgAction::Set)]
    revoke_old_refresh_token: bool,

    /// Let secretless clients use the authorization_code and refresh_token grants
    #[arg(long, env = "OAUTH2_ALLOW_PUBLIC_CLIENTS", default_value = "false", action = clap::ArgAction::Set)]
    allow_public_clients: bool,

    /// Request body cap for the form and JSON endpoints
    #[arg(long, env = "OAUTH2_MAX_BODY_BYTES", default_value = "1048576")]
    max_body_bytes: usize,

    /// JSON array of client registrations
    #[arg(long, env = "OAUTH2_CLIENTS_FILE")]
    clients_file: Option<PathBuf>,

    /// HS256 key the platform signs session tokens with
    #[arg(long, env = "SESSION_SIGNING_KEY", hide_env_values = true)]
    session_signing_key: String,

    /// Cookie carrying the session token
    #[arg(long, env = "SESSION_COOKIE", default_value = DEFAULT_SESSION_COOKIE)]
    session_cookie: String,

    /// Session claim holding the account id
    #[arg(long, env = "SESSION_ACCOUNT_CLAIM", default_value = DEFAULT_ACCOUNT_CLAIM)]
    session_account_claim: String,
}

impl Args {
    fn server_config(&self) -> ServerConfig {
        ServerConfig {
            issuer: self.issuer.clone(),
            base_path: self.base_path.clone(),
            login_url: self.login_url.clone(),
            consent_url: self.consent_url.clone(),
            authorization_code_ttl: Duration::from_secs(self.code_ttl),
            access_token_ttl: Duration::from_secs(self.access_token_ttl),
            refresh_token_ttl: Duration::from_secs(self.refresh_token_ttl),
            interaction_ttl: Duration::from_secs(self.interaction_ttl),
            issue_refresh_token: self.issue_refresh_token,
            rotate_refresh_tokens: self.rotate_refresh_tokens,
            revoke_old_refresh_token: self.revoke_old_refresh_token,
            max_body_bytes: self.max_body_bytes,
            allow_public_clients_on_token_endpoint: self.allow_public_clients,
            ..ServerConfig::default()
        }
    }
}

fn load_clients(path: &Path) -> Result<Vec<Client>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read clients file {}", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse clients file {}", path.display()))
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "consentd=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    if args.session_signing_key.is_empty() {
        anyhow::bail!("SESSION_SIGNING_KEY must not be empty");
    }

    let clients = match &args.clients_file {
        Some(path) => load_clients(path)?,
        None => {
            tracing::warn!("No OAUTH2_CLIENTS_FILE set, no client will be able to authorize");
            Vec::new()
        }
    };
    tracing::info!("Loaded {} client registrations", clients.len());

    let store = MemoryStore::with_clients(clients);
    let subjects = Arc::new(SessionSubjectResolver::new(
        args.session_signing_key.as_bytes(),
        args.session_cookie.clone(),
        args.session_account_claim.clone(),
    ));
    let server = AuthorizationServer::new(
        args.server_config(),
        Dependencies::in_memory(store, subjects),
    );

    run(server, &args.host, args.port).await
}

async fn run(server: AuthorizationServer, host: &str, port: u16) -> Result<()> {
    use tower_governor::{
        GovernorLayer, governor::GovernorConfigBuilder, key_extractor::SmartIpKeyExtractor,
    };

    // we pass this to TcpListener::bind() which accepts ToSocketAddrs,
    // so hostnames like "localhost" get resolved properly (unlike SocketAddr::parse)
    let bind_addr = format!("{}:{}", host, port);

    let cfg = server.config();
    tracing::info!("Authorization endpoint: {}", server.path(&cfg.authorize_path));
    tracing::info!("Token endpoint: {}", server.path(&cfg.token_path));
    tracing::info!("Introspection endpoint: {}", server.path(&cfg.introspect_path));
    tracing::info!("Revocation endpoint: {}", server.path(&cfg.revoke_path));
    tracing::info!("Interaction endpoint: {}/{{id}}", server.path(&cfg.interaction_path));

    // Rate limiting: 10 requests per second per IP, burst of 30
    // SmartIpKeyExtractor checks x-forwarded-for and friends before falling back to peer ip,
    // so this works both behind a proxy and when running locally
    let governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .key_extractor(SmartIpKeyExtractor)
            .per_second(10)
            .burst_size(30)
            .finish()
            .ok_or_else(|| anyhow::anyhow!("failed to build rate limiter config"))?,
    );
    let governor_limiter = governor_conf.limiter().clone();
    let rate_limit_layer = GovernorLayer::new(governor_conf);

    // Stricter for the credentialed endpoints: 5 requests per second, burst of 10
    let client_governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .key_extractor(SmartIpKeyExtractor)
            .per_second(5)
            .burst_size(10)
            .finish()
            .ok_or_else(|| anyhow::anyhow!("failed to build client rate limiter config"))?,
    );
    let client_governor_limiter = client_governor_conf.limiter().clone();
    let client_rate_limit_layer = GovernorLayer::new(client_governor_conf);

    // Start background task to clean up rate limiter state
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(Duration::from_secs(60)).await;
            governor_limiter.retain_recent();
            client_governor_limiter.retain_recent();
        }
    });

    let app = server
        .browser_router()
        .layer(rate_limit_layer)
        .merge(server.client_router().layer(client_rate_limit_layer))
        .layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!("Server ready at http://{}", bind_addr);

    // into_make_service_with_connect_info gives us the peer ip for rate limiting fallback
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
