//! Client identity repository.

use sqlx::{SqliteConnection, SqliteExecutor, SqlitePool};
use tracing::debug;

use crate::envelope::{Envelope, ErrorCode, Failure};
use crate::models::OAuthClient;

const INSERT_SQL: &str = r#"
    INSERT INTO oauth_clients (
        id, client_identifier, client_secret_hash, is_confidential,
        redirect_uris, grant_types, scopes, is_enabled,
        created_at, created_by, updated_at, updated_by
    ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
"#;

/// Repository for `oauth_clients`.
#[derive(Clone)]
pub struct ClientStore {
    pool: SqlitePool,
}

impl ClientStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn insert(&self, row: &OAuthClient, ray_id: &str) -> Envelope<()> {
        insert_exec(&self.pool, row).await.map_err(|e| {
            tracing::error!(error = %e, ray_id = %ray_id, "client insert failed");
            Failure::new(ErrorCode::InsertFailed, "failed to store client", ray_id)
        })?;

        debug!(client_identifier = %row.client_identifier, ray_id = %ray_id, "client inserted");
        Ok(())
    }

    /// Insert inside a caller-owned transaction.
    pub async fn insert_with(
        &self,
        conn: &mut SqliteConnection,
        row: &OAuthClient,
        ray_id: &str,
    ) -> Envelope<()> {
        insert_exec(&mut *conn, row).await.map_err(|e| {
            tracing::error!(error = %e, ray_id = %ray_id, "client insert failed");
            Failure::new(ErrorCode::InsertFailed, "failed to store client", ray_id)
        })
    }

    pub async fn get_by_id(&self, id: &str, ray_id: &str) -> Envelope<OAuthClient> {
        let row = sqlx::query_as::<_, OAuthClient>("SELECT * FROM oauth_clients WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, ray_id = %ray_id, "client fetch failed");
                Failure::new(ErrorCode::FetchFailed, "failed to fetch client", ray_id)
            })?;

        row.ok_or_else(|| Failure::new(ErrorCode::NotFound, "client not found", ray_id))
    }

    pub async fn get_by_client_identifier(
        &self,
        client_identifier: &str,
        ray_id: &str,
    ) -> Envelope<OAuthClient> {
        let row = sqlx::query_as::<_, OAuthClient>(
            "SELECT * FROM oauth_clients WHERE client_identifier = ?",
        )
        .bind(client_identifier)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, ray_id = %ray_id, "client fetch failed");
            Failure::new(ErrorCode::FetchFailed, "failed to fetch client", ray_id)
        })?;

        row.ok_or_else(|| Failure::new(ErrorCode::NotFound, "client not found", ray_id))
    }

    pub async fn update(&self, row: &OAuthClient, ray_id: &str) -> Envelope<()> {
        let result = sqlx::query(
            r#"
            UPDATE oauth_clients
            SET client_identifier = ?, client_secret_hash = ?, is_confidential = ?,
                redirect_uris = ?, grant_types = ?, scopes = ?, is_enabled = ?,
                updated_at = ?, updated_by = ?
            WHERE id = ?
            "#,
        )
        .bind(&row.client_identifier)
        .bind(&row.client_secret_hash)
        .bind(row.is_confidential)
        .bind(&row.redirect_uris)
        .bind(&row.grant_types)
        .bind(&row.scopes)
        .bind(row.is_enabled)
        .bind(row.updated_at)
        .bind(&row.updated_by)
        .bind(&row.id)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, ray_id = %ray_id, "client update failed");
            Failure::new(ErrorCode::UpdateFailed, "failed to update client", ray_id)
        })?;

        if result.rows_affected() == 0 {
            return Err(Failure::new(ErrorCode::NotFound, "client not found", ray_id));
        }

        debug!(client_id = %row.id, ray_id = %ray_id, "client updated");
        Ok(())
    }

    pub async fn delete_by_id(&self, id: &str, ray_id: &str) -> Envelope<()> {
        let result = sqlx::query("DELETE FROM oauth_clients WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, ray_id = %ray_id, "client delete failed");
                Failure::new(ErrorCode::DeleteFailed, "failed to delete client", ray_id)
            })?;

        if result.rows_affected() == 0 {
            return Err(Failure::new(ErrorCode::NotFound, "client not found", ray_id));
        }

        debug!(client_id = %id, ray_id = %ray_id, "client deleted");
        Ok(())
    }
}

async fn insert_exec<'e>(exec: impl SqliteExecutor<'e>, row: &OAuthClient) -> sqlx::Result<()> {
    sqlx::query(INSERT_SQL)
        .bind(&row.id)
        .bind(&row.client_identifier)
        .bind(&row.client_secret_hash)
        .bind(row.is_confidential)
        .bind(&row.redirect_uris)
        .bind(&row.grant_types)
        .bind(&row.scopes)
        .bind(row.is_enabled)
        .bind(row.created_at)
        .bind(&row.created_by)
        .bind(row.updated_at)
        .bind(&row.updated_by)
        .execute(exec)
        .await?;

    Ok(())
}

impl std::fmt::Debug for ClientStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientStore").finish()
    }
}
