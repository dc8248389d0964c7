//! Audit log repository.
//!
//! Append-only by construction: this store exposes no update or delete, and
//! no UPDATE/DELETE statement against `oauth_audit_log` exists anywhere in
//! the crate.

use sqlx::{SqliteConnection, SqliteExecutor, SqlitePool};
use tracing::debug;

use crate::envelope::{Envelope, ErrorCode, Failure};
use crate::models::AuditLogEntry;

const INSERT_SQL: &str = r#"
    INSERT INTO oauth_audit_log (
        id, event_type, subject, client_id, user_id, metadata,
        created_at, created_by, updated_at, updated_by
    ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
"#;

/// Repository for `oauth_audit_log`.
#[derive(Clone)]
pub struct AuditLogStore {
    pool: SqlitePool,
}

impl AuditLogStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn append(&self, entry: &AuditLogEntry, ray_id: &str) -> Envelope<()> {
        insert_exec(&self.pool, entry).await.map_err(|e| {
            tracing::error!(error = %e, ray_id = %ray_id, "audit log append failed");
            Failure::new(ErrorCode::InsertFailed, "failed to write audit log", ray_id)
        })?;

        debug!(event_type = %entry.event_type, ray_id = %ray_id, "audit log entry appended");
        Ok(())
    }

    /// Append inside a caller-owned transaction.
    pub async fn append_with(
        &self,
        conn: &mut SqliteConnection,
        entry: &AuditLogEntry,
        ray_id: &str,
    ) -> Envelope<()> {
        insert_exec(&mut *conn, entry).await.map_err(|e| {
            tracing::error!(error = %e, ray_id = %ray_id, "audit log append failed");
            Failure::new(ErrorCode::InsertFailed, "failed to write audit log", ray_id)
        })
    }

    pub async fn get_by_id(&self, id: &str, ray_id: &str) -> Envelope<AuditLogEntry> {
        let row = sqlx::query_as::<_, AuditLogEntry>("SELECT * FROM oauth_audit_log WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, ray_id = %ray_id, "audit log fetch failed");
                Failure::new(ErrorCode::FetchFailed, "failed to fetch audit log entry", ray_id)
            })?;

        row.ok_or_else(|| Failure::new(ErrorCode::NotFound, "audit log entry not found", ray_id))
    }

    /// Entries of one event type, oldest first.
    pub async fn list_by_event_type(
        &self,
        event_type: &str,
        ray_id: &str,
    ) -> Envelope<Vec<AuditLogEntry>> {
        sqlx::query_as::<_, AuditLogEntry>(
            "SELECT * FROM oauth_audit_log WHERE event_type = ? ORDER BY created_at ASC, id ASC",
        )
        .bind(event_type)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, ray_id = %ray_id, "audit log fetch failed");
            Failure::new(ErrorCode::FetchFailed, "failed to list audit log entries", ray_id)
        })
    }
}

async fn insert_exec<'e>(exec: impl SqliteExecutor<'e>, entry: &AuditLogEntry) -> sqlx::Result<()> {
    sqlx::query(INSERT_SQL)
        .bind(&entry.id)
        .bind(&entry.event_type)
        .bind(&entry.subject)
        .bind(&entry.client_id)
        .bind(&entry.user_id)
        .bind(&entry.metadata)
        .bind(entry.created_at)
        .bind(&entry.created_by)
        .bind(entry.updated_at)
        .bind(&entry.updated_by)
        .execute(exec)
        .await?;

    Ok(())
}

impl std::fmt::Debug for AuditLogStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditLogStore").finish()
    }
}
