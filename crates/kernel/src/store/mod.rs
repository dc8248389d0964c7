//! Narrow repositories over the OAuth tables.
//!
//! Every operation returns an [`Envelope`](crate::envelope::Envelope): business
//! and infrastructure failures are values with a storage error code
//! (`NOT_FOUND`, `INSERT_FAILED`, `FETCH_FAILED`, `UPDATE_FAILED`,
//! `DELETE_FAILED`) that higher layers translate. Writes that must join a
//! caller-owned transaction take a `&mut SqliteConnection`; everything else
//! runs on the pool.

pub mod access_token;
pub mod audit_log;
pub mod client;
pub mod client_config;
pub mod refresh_token;

pub use access_token::AccessTokenStore;
pub use audit_log::AuditLogStore;
pub use client::ClientStore;
pub use client_config::ClientConfigStore;
pub use refresh_token::RefreshTokenStore;

use sqlx::{Sqlite, SqlitePool, Transaction};

use crate::envelope::{Envelope, ErrorCode, Failure};

/// All repositories behind one handle.
#[derive(Clone)]
pub struct Storage {
    pool: SqlitePool,
    pub clients: ClientStore,
    pub client_configs: ClientConfigStore,
    pub access_tokens: AccessTokenStore,
    pub refresh_tokens: RefreshTokenStore,
    pub audit_log: AuditLogStore,
}

impl Storage {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            clients: ClientStore::new(pool.clone()),
            client_configs: ClientConfigStore::new(pool.clone()),
            access_tokens: AccessTokenStore::new(pool.clone()),
            refresh_tokens: RefreshTokenStore::new(pool.clone()),
            audit_log: AuditLogStore::new(pool.clone()),
            pool,
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Open a transaction for a multi-write unit of work.
    pub async fn begin(&self, ray_id: &str) -> Envelope<Transaction<'static, Sqlite>> {
        self.pool.begin().await.map_err(|e| {
            tracing::error!(error = %e, ray_id = %ray_id, "failed to open transaction");
            Failure::new(ErrorCode::InsertFailed, "storage unavailable", ray_id)
        })
    }
}

impl std::fmt::Debug for Storage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Storage").finish()
    }
}
