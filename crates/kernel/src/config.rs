//! Configuration loaded from environment variables.

use std::env;

use anyhow::{Context, Result};

/// Application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP server port (default: 3000).
    pub port: u16,

    /// SQLite connection URL.
    pub database_url: String,

    /// Maximum database connections in pool (default: 10).
    pub database_max_connections: u32,

    /// Whether a successful refresh-token grant rotates the refresh token
    /// (default: true).
    pub rotate_refresh_tokens: bool,

    /// Whether presenting a revoked refresh token revokes the whole token
    /// family (default: true).
    pub revoke_family_on_reuse: bool,

    /// Maximum concurrent Argon2 hash/verify operations (default: 4).
    pub hasher_concurrency: usize,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let port = env::var("PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse()
            .context("PORT must be a valid u16")?;

        let database_url =
            env::var("DATABASE_URL").context("DATABASE_URL environment variable is required")?;

        let database_max_connections = env::var("DATABASE_MAX_CONNECTIONS")
            .unwrap_or_else(|_| "10".to_string())
            .parse()
            .context("DATABASE_MAX_CONNECTIONS must be a valid u32")?;

        let rotate_refresh_tokens = parse_bool_env("ROTATE_REFRESH_TOKENS", true)?;
        let revoke_family_on_reuse = parse_bool_env("REVOKE_FAMILY_ON_REUSE", true)?;

        let hasher_concurrency = env::var("HASHER_CONCURRENCY")
            .unwrap_or_else(|_| "4".to_string())
            .parse()
            .context("HASHER_CONCURRENCY must be a valid usize")?;

        Ok(Self {
            port,
            database_url,
            database_max_connections,
            rotate_refresh_tokens,
            revoke_family_on_reuse,
            hasher_concurrency,
        })
    }
}

/// Parse a boolean env var accepting `true`/`false`/`1`/`0`.
fn parse_bool_env(name: &str, default: bool) -> Result<bool> {
    match env::var(name) {
        Err(_) => Ok(default),
        Ok(raw) => match raw.to_lowercase().as_str() {
            "true" | "1" => Ok(true),
            "false" | "0" => Ok(false),
            _ => anyhow::bail!("{name} must be one of true/false/1/0"),
        },
    }
}
