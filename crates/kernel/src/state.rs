//! Application state shared across all handlers.
//!
//! The single dependency record: everything a handler or flow needs hangs
//! off this, and nothing lives in process globals.

use std::sync::Arc;

use anyhow::{Context, Result};
use sqlx::SqlitePool;

use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::db;
use crate::oauth::flow::FlowEngine;
use crate::oauth::refresh_token::RefreshTokenFlow;
use crate::oauth::registrar::ClientRegistrar;
use crate::oauth::secrets::SecretService;
use crate::store::Storage;

/// Shared application state.
///
/// Wrapped in Arc internally so Clone is cheap.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    /// SQLite connection pool.
    db: SqlitePool,

    /// Repositories.
    storage: Storage,

    /// Injected time source; the only shared mutable-adjacent state.
    clock: Arc<dyn Clock>,

    /// Secret generation and hashing.
    secrets: SecretService,

    /// Grant dispatch.
    flow_engine: FlowEngine,

    /// Client provisioning.
    registrar: ClientRegistrar,

    /// Configuration snapshot.
    config: Config,
}

impl AppState {
    /// Initialize state for production use: connect, migrate, wire.
    pub async fn new(config: &Config) -> Result<Self> {
        let pool = db::create_pool(config)
            .await
            .context("failed to create database pool")?;
        db::run_migrations(&pool)
            .await
            .context("failed to run migrations")?;

        Self::from_parts(config.clone(), pool, Arc::new(SystemClock))
    }

    /// Wire state from pre-built parts. Tests use this with an in-memory
    /// pool and a fixed clock.
    pub fn from_parts(
        config: Config,
        pool: SqlitePool,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let storage = Storage::new(pool.clone());
        let secrets =
            SecretService::new(config.hasher_concurrency).context("failed to build hasher")?;

        let mut flow_engine = FlowEngine::new(storage.audit_log.clone(), clock.clone());
        flow_engine.register(Arc::new(RefreshTokenFlow::new(
            storage.clone(),
            clock.clone(),
            secrets.clone(),
            config.rotate_refresh_tokens,
            config.revoke_family_on_reuse,
        )));

        let registrar = ClientRegistrar::new(storage.clone(), secrets.clone(), clock.clone());

        Ok(Self {
            inner: Arc::new(AppStateInner {
                db: pool,
                storage,
                clock,
                secrets,
                flow_engine,
                registrar,
                config,
            }),
        })
    }

    pub fn db(&self) -> &SqlitePool {
        &self.inner.db
    }

    pub fn storage(&self) -> &Storage {
        &self.inner.storage
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.inner.clock
    }

    pub fn secrets(&self) -> &SecretService {
        &self.inner.secrets
    }

    pub fn flow_engine(&self) -> &FlowEngine {
        &self.inner.flow_engine
    }

    pub fn registrar(&self) -> &ClientRegistrar {
        &self.inner.registrar
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub async fn database_healthy(&self) -> bool {
        db::check_health(&self.inner.db).await
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState").finish()
    }
}
