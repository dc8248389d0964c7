//! Tollgate OAuth2 Authorization Server
//!
//! HTTP token endpoint, client registrar, and storage.

mod clock;
mod config;
mod db;
mod envelope;
mod models;
mod oauth;
mod routes;
mod state;
mod store;

use std::net::SocketAddr;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::envelope::new_ray_id;
use crate::models::RegistrationRequest;
use crate::state::AppState;

#[derive(Parser)]
#[command(name = "tollgate", about = "Tollgate OAuth2 authorization server")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server (default).
    Serve,
    /// Register a new OAuth client and print its one-time credentials.
    RegisterClient(RegisterClientArgs),
}

#[derive(Args)]
struct RegisterClientArgs {
    /// Owner of the client.
    #[arg(long)]
    user_id: String,

    /// Public client identifier; must be unique.
    #[arg(long)]
    client_identifier: String,

    /// Register a confidential client (a secret is generated and printed once).
    #[arg(long)]
    confidential: bool,

    /// Redirect URI (repeatable); must be absolute.
    #[arg(long = "redirect-uri", required = true)]
    redirect_uris: Vec<String>,

    /// Grant type (repeatable).
    #[arg(long = "grant-type", required = true)]
    grant_types: Vec<String>,

    /// Response type (repeatable).
    #[arg(long = "response-type", default_values_t = vec!["code".to_string()])]
    response_types: Vec<String>,

    /// Scope (repeatable).
    #[arg(long = "scope")]
    scopes: Vec<String>,

    /// Require PKCE on the authorization-code flow.
    #[arg(long)]
    require_pkce: bool,

    /// Allowed PKCE method (repeatable).
    #[arg(long = "pkce-method")]
    pkce_methods: Vec<String>,

    /// Access token lifetime in seconds.
    #[arg(long, default_value_t = 3600)]
    access_token_ttl: i64,

    /// Refresh token lifetime in seconds.
    #[arg(long)]
    refresh_token_ttl: Option<i64>,

    /// Authorization code lifetime in seconds.
    #[arg(long, default_value_t = 600)]
    authorization_code_ttl: i64,

    /// Cap on concurrently active access tokens per refresh token.
    #[arg(long)]
    max_active_access_tokens: Option<i64>,

    /// Cap on concurrently active refresh tokens.
    #[arg(long)]
    max_active_refresh_tokens: Option<i64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    init_tracing();

    let cli = Cli::parse();

    match cli.command {
        None | Some(Commands::Serve) => run_server().await,
        Some(Commands::RegisterClient(args)) => run_register_client(args).await,
    }
}

/// Run the HTTP server.
async fn run_server() -> Result<()> {
    info!("Starting Tollgate authorization server");

    // Load configuration from environment
    let config = Config::from_env().context("failed to load configuration")?;
    info!(port = config.port, "Configuration loaded");

    // Initialize application state (database pool, flow engine, registrar)
    let state = AppState::new(&config)
        .await
        .context("failed to initialize application state")?;

    info!(
        grant_types = ?state.flow_engine().supported_grant_types(),
        rotate_refresh_tokens = config.rotate_refresh_tokens,
        "Flow engine ready"
    );

    let app = routes::build_router(state);

    // Start the server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("failed to bind to address")?;

    info!(%addr, "Server listening");

    axum::serve(listener, app).await.context("server error")?;

    Ok(())
}

/// Register a client from the command line and print the result as JSON.
///
/// The printed `client_secret` is shown exactly once; it is never persisted
/// and cannot be recovered later.
async fn run_register_client(args: RegisterClientArgs) -> Result<()> {
    let config = Config::from_env().context("failed to load configuration")?;
    let state = AppState::new(&config)
        .await
        .context("failed to initialize application state")?;

    let request = RegistrationRequest {
        user_id: args.user_id,
        client_identifier: args.client_identifier,
        is_confidential: args.confidential,
        redirect_uris: args.redirect_uris,
        grant_types: args.grant_types,
        response_types: args.response_types,
        scopes: args.scopes,
        require_pkce: args.require_pkce,
        pkce_methods: if args.pkce_methods.is_empty() {
            None
        } else {
            Some(args.pkce_methods)
        },
        access_token_ttl: args.access_token_ttl,
        refresh_token_ttl: args.refresh_token_ttl,
        authorization_code_ttl: args.authorization_code_ttl,
        max_active_access_tokens: args.max_active_access_tokens,
        max_active_refresh_tokens: args.max_active_refresh_tokens,
        device_code_ttl: None,
        device_poll_interval: None,
        metadata: None,
    };

    let ray_id = new_ray_id();
    match state.registrar().register_client(&request, &ray_id).await {
        Ok(client) => {
            let rendered =
                serde_json::to_string_pretty(&client).context("failed to render client")?;
            println!("{rendered}");
            if client.client_secret.is_some() {
                eprintln!("note: client_secret is shown once and cannot be recovered");
            }
            Ok(())
        }
        Err(failure) => {
            anyhow::bail!("registration failed ({}): {}", failure.error_code, failure.client_message)
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug,sqlx=warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
