//! Client configuration repository.

use sqlx::{SqliteConnection, SqliteExecutor, SqlitePool};
use tracing::debug;

use crate::envelope::{Envelope, ErrorCode, Failure};
use crate::models::ClientConfig;

const INSERT_SQL: &str = r#"
    INSERT INTO oauth_client_configs (
        client_id, response_types, require_pkce, pkce_methods,
        access_token_ttl, refresh_token_ttl, authorization_code_ttl,
        max_active_access_tokens, max_active_refresh_tokens,
        device_code_ttl, device_poll_interval, metadata,
        created_at, created_by, updated_at, updated_by
    ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
"#;

/// Repository for `oauth_client_configs`. Keyed by `client_id` (1:1 with the
/// identity row).
#[derive(Clone)]
pub struct ClientConfigStore {
    pool: SqlitePool,
}

impl ClientConfigStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn insert(&self, row: &ClientConfig, ray_id: &str) -> Envelope<()> {
        insert_exec(&self.pool, row).await.map_err(|e| {
            tracing::error!(error = %e, ray_id = %ray_id, "client config insert failed");
            Failure::new(
                ErrorCode::InsertFailed,
                "failed to store client configuration",
                ray_id,
            )
        })?;

        debug!(client_id = %row.client_id, ray_id = %ray_id, "client config inserted");
        Ok(())
    }

    /// Insert inside a caller-owned transaction.
    pub async fn insert_with(
        &self,
        conn: &mut SqliteConnection,
        row: &ClientConfig,
        ray_id: &str,
    ) -> Envelope<()> {
        insert_exec(&mut *conn, row).await.map_err(|e| {
            tracing::error!(error = %e, ray_id = %ray_id, "client config insert failed");
            Failure::new(
                ErrorCode::InsertFailed,
                "failed to store client configuration",
                ray_id,
            )
        })
    }

    pub async fn get_by_client_id(&self, client_id: &str, ray_id: &str) -> Envelope<ClientConfig> {
        let row = sqlx::query_as::<_, ClientConfig>(
            "SELECT * FROM oauth_client_configs WHERE client_id = ?",
        )
        .bind(client_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, ray_id = %ray_id, "client config fetch failed");
            Failure::new(
                ErrorCode::FetchFailed,
                "failed to fetch client configuration",
                ray_id,
            )
        })?;

        row.ok_or_else(|| {
            Failure::new(
                ErrorCode::NotFound,
                "client configuration not found",
                ray_id,
            )
        })
    }

    pub async fn update(&self, row: &ClientConfig, ray_id: &str) -> Envelope<()> {
        let result = sqlx::query(
            r#"
            UPDATE oauth_client_configs
            SET response_types = ?, require_pkce = ?, pkce_methods = ?,
                access_token_ttl = ?, refresh_token_ttl = ?, authorization_code_ttl = ?,
                max_active_access_tokens = ?, max_active_refresh_tokens = ?,
                device_code_ttl = ?, device_poll_interval = ?, metadata = ?,
                updated_at = ?, updated_by = ?
            WHERE client_id = ?
            "#,
        )
        .bind(&row.response_types)
        .bind(row.require_pkce)
        .bind(&row.pkce_methods)
        .bind(row.access_token_ttl)
        .bind(row.refresh_token_ttl)
        .bind(row.authorization_code_ttl)
        .bind(row.max_active_access_tokens)
        .bind(row.max_active_refresh_tokens)
        .bind(row.device_code_ttl)
        .bind(row.device_poll_interval)
        .bind(&row.metadata)
        .bind(row.updated_at)
        .bind(&row.updated_by)
        .bind(&row.client_id)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, ray_id = %ray_id, "client config update failed");
            Failure::new(
                ErrorCode::UpdateFailed,
                "failed to update client configuration",
                ray_id,
            )
        })?;

        if result.rows_affected() == 0 {
            return Err(Failure::new(
                ErrorCode::NotFound,
                "client configuration not found",
                ray_id,
            ));
        }

        Ok(())
    }

    pub async fn delete_by_client_id(&self, client_id: &str, ray_id: &str) -> Envelope<()> {
        let result = sqlx::query("DELETE FROM oauth_client_configs WHERE client_id = ?")
            .bind(client_id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, ray_id = %ray_id, "client config delete failed");
                Failure::new(
                    ErrorCode::DeleteFailed,
                    "failed to delete client configuration",
                    ray_id,
                )
            })?;

        if result.rows_affected() == 0 {
            return Err(Failure::new(
                ErrorCode::NotFound,
                "client configuration not found",
                ray_id,
            ));
        }

        Ok(())
    }
}

async fn insert_exec<'e>(exec: impl SqliteExecutor<'e>, row: &ClientConfig) -> sqlx::Result<()> {
    sqlx::query(INSERT_SQL)
        .bind(&row.client_id)
        .bind(&row.response_types)
        .bind(row.require_pkce)
        .bind(&row.pkce_methods)
        .bind(row.access_token_ttl)
        .bind(row.refresh_token_ttl)
        .bind(row.authorization_code_ttl)
        .bind(row.max_active_access_tokens)
        .bind(row.max_active_refresh_tokens)
        .bind(row.device_code_ttl)
        .bind(row.device_poll_interval)
        .bind(&row.metadata)
        .bind(row.created_at)
        .bind(&row.created_by)
        .bind(row.updated_at)
        .bind(&row.updated_by)
        .execute(exec)
        .await?;

    Ok(())
}

impl std::fmt::Debug for ClientConfigStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfigStore").finish()
    }
}
