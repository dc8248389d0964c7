//! SQLite pool setup and schema health.
//!
//! `DATABASE_URL` may be a bare path or a `sqlite:` URL. Connections enforce
//! foreign keys: the identity → configuration cascade and the token → client
//! references in the schema depend on it, and SQLite leaves the pragma off
//! by default.

use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::SqlitePool;
use sqlx::migrate::Migrator;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};

use crate::config::Config;

// Embed migrations at compile time
static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// How long a writer waits on a locked database before giving up. Token
/// issuance transactions are short; anything blocked longer than this is
/// better surfaced as a failure envelope than queued.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Open the connection pool the stores run on.
pub async fn create_pool(config: &Config) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(&config.database_url)
        .context("DATABASE_URL is not a valid SQLite path or URL")?
        .create_if_missing(true)
        .foreign_keys(true)
        .busy_timeout(BUSY_TIMEOUT)
        // WAL lets token validation reads proceed while a rotation commits.
        .journal_mode(SqliteJournalMode::Wal);

    let pool = SqlitePoolOptions::new()
        .max_connections(config.database_max_connections)
        .connect_with(options)
        .await
        .context("failed to open SQLite database")?;

    Ok(pool)
}

/// Run database migrations.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    MIGRATOR
        .run(pool)
        .await
        .context("failed to run database migrations")?;

    Ok(())
}

/// Check that the database answers and the token schema is in place.
///
/// A reachable but unmigrated database must not receive traffic, so the
/// probe requires the three tables every grant touches.
pub async fn check_health(pool: &SqlitePool) -> bool {
    let result: Result<(i64,), sqlx::Error> = sqlx::query_as(
        r#"
        SELECT COUNT(*) FROM sqlite_master
        WHERE type = 'table'
          AND name IN ('oauth_clients', 'oauth_refresh_tokens', 'oauth_access_tokens')
        "#,
    )
    .fetch_one(pool)
    .await;

    matches!(result, Ok((3,)))
}
