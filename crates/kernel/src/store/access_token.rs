//! Access token repository.

use sqlx::{SqliteConnection, SqliteExecutor, SqlitePool};
use tracing::debug;

use crate::envelope::{Envelope, ErrorCode, Failure};
use crate::models::AccessToken;

const INSERT_SQL: &str = r#"
    INSERT INTO oauth_access_tokens (
        id, token, client_id, user_id, scopes, refresh_token_id,
        expires_at, revoked_at, created_at, created_by, updated_at, updated_by
    ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
"#;

/// Repository for `oauth_access_tokens`.
#[derive(Clone)]
pub struct AccessTokenStore {
    pool: SqlitePool,
}

impl AccessTokenStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn insert(&self, row: &AccessToken, ray_id: &str) -> Envelope<()> {
        insert_exec(&self.pool, row).await.map_err(|e| {
            tracing::error!(error = %e, ray_id = %ray_id, "access token insert failed");
            Failure::new(ErrorCode::InsertFailed, "failed to store access token", ray_id)
        })?;

        debug!(token_id = %row.id, ray_id = %ray_id, "access token inserted");
        Ok(())
    }

    /// Insert inside a caller-owned transaction.
    pub async fn insert_with(
        &self,
        conn: &mut SqliteConnection,
        row: &AccessToken,
        ray_id: &str,
    ) -> Envelope<()> {
        insert_exec(&mut *conn, row).await.map_err(|e| {
            tracing::error!(error = %e, ray_id = %ray_id, "access token insert failed");
            Failure::new(ErrorCode::InsertFailed, "failed to store access token", ray_id)
        })
    }

    pub async fn get_by_id(&self, id: &str, ray_id: &str) -> Envelope<AccessToken> {
        let row = sqlx::query_as::<_, AccessToken>("SELECT * FROM oauth_access_tokens WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, ray_id = %ray_id, "access token fetch failed");
                Failure::new(ErrorCode::FetchFailed, "failed to fetch access token", ray_id)
            })?;

        row.ok_or_else(|| Failure::new(ErrorCode::NotFound, "access token not found", ray_id))
    }

    pub async fn get_by_token(&self, token: &str, ray_id: &str) -> Envelope<AccessToken> {
        let row =
            sqlx::query_as::<_, AccessToken>("SELECT * FROM oauth_access_tokens WHERE token = ?")
                .bind(token)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| {
                    tracing::error!(error = %e, ray_id = %ray_id, "access token fetch failed");
                    Failure::new(ErrorCode::FetchFailed, "failed to fetch access token", ray_id)
                })?;

        row.ok_or_else(|| Failure::new(ErrorCode::NotFound, "access token not found", ray_id))
    }

    /// Mark a token revoked. Revocation is permanent; an already-revoked
    /// token keeps its original `revoked_at`.
    pub async fn revoke(&self, id: &str, revoked_at: i64, ray_id: &str) -> Envelope<()> {
        let result = sqlx::query(
            r#"
            UPDATE oauth_access_tokens
            SET revoked_at = ?, updated_at = ?
            WHERE id = ? AND revoked_at IS NULL
            "#,
        )
        .bind(revoked_at)
        .bind(revoked_at)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, ray_id = %ray_id, "access token revoke failed");
            Failure::new(ErrorCode::UpdateFailed, "failed to revoke access token", ray_id)
        })?;

        if result.rows_affected() == 0 {
            return Err(Failure::new(
                ErrorCode::NotFound,
                "access token not found or already revoked",
                ray_id,
            ));
        }

        debug!(token_id = %id, ray_id = %ray_id, "access token revoked");
        Ok(())
    }

    /// Revoke every active access token owned by `(client_id, user_id)`.
    /// Returns the number of tokens revoked.
    pub async fn revoke_all_for_owner(
        &self,
        client_id: &str,
        user_id: Option<&str>,
        revoked_at: i64,
        ray_id: &str,
    ) -> Envelope<u64> {
        let result = sqlx::query(
            r#"
            UPDATE oauth_access_tokens
            SET revoked_at = ?, updated_at = ?
            WHERE client_id = ?
              AND (user_id IS ? OR user_id = ?)
              AND revoked_at IS NULL
            "#,
        )
        .bind(revoked_at)
        .bind(revoked_at)
        .bind(client_id)
        .bind(user_id)
        .bind(user_id)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, ray_id = %ray_id, "access token family revoke failed");
            Failure::new(ErrorCode::UpdateFailed, "failed to revoke access tokens", ray_id)
        })?;

        Ok(result.rows_affected())
    }

    /// Count active access tokens that originated from a refresh token.
    pub async fn count_active_by_refresh_token(
        &self,
        refresh_token_id: &str,
        now: i64,
        ray_id: &str,
    ) -> Envelope<i64> {
        let row: (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*) FROM oauth_access_tokens
            WHERE refresh_token_id = ? AND revoked_at IS NULL AND expires_at > ?
            "#,
        )
        .bind(refresh_token_id)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, ray_id = %ray_id, "access token count failed");
            Failure::new(ErrorCode::FetchFailed, "failed to count access tokens", ray_id)
        })?;

        Ok(row.0)
    }

    /// Oldest active access token for a refresh token: FIFO by `created_at`,
    /// ties broken by `id`.
    pub async fn get_oldest_active_by_refresh_token(
        &self,
        refresh_token_id: &str,
        now: i64,
        ray_id: &str,
    ) -> Envelope<Option<AccessToken>> {
        sqlx::query_as::<_, AccessToken>(
            r#"
            SELECT * FROM oauth_access_tokens
            WHERE refresh_token_id = ? AND revoked_at IS NULL AND expires_at > ?
            ORDER BY created_at ASC, id ASC
            LIMIT 1
            "#,
        )
        .bind(refresh_token_id)
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, ray_id = %ray_id, "access token fetch failed");
            Failure::new(ErrorCode::FetchFailed, "failed to fetch access token", ray_id)
        })
    }

    pub async fn delete_by_id(&self, id: &str, ray_id: &str) -> Envelope<()> {
        let result = sqlx::query("DELETE FROM oauth_access_tokens WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, ray_id = %ray_id, "access token delete failed");
                Failure::new(ErrorCode::DeleteFailed, "failed to delete access token", ray_id)
            })?;

        if result.rows_affected() == 0 {
            return Err(Failure::new(ErrorCode::NotFound, "access token not found", ray_id));
        }

        Ok(())
    }
}

async fn insert_exec<'e>(exec: impl SqliteExecutor<'e>, row: &AccessToken) -> sqlx::Result<()> {
    sqlx::query(INSERT_SQL)
        .bind(&row.id)
        .bind(&row.token)
        .bind(&row.client_id)
        .bind(&row.user_id)
        .bind(&row.scopes)
        .bind(&row.refresh_token_id)
        .bind(row.expires_at)
        .bind(row.revoked_at)
        .bind(row.created_at)
        .bind(&row.created_by)
        .bind(row.updated_at)
        .bind(&row.updated_by)
        .execute(exec)
        .await?;

    Ok(())
}

impl std::fmt::Debug for AccessTokenStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessTokenStore").finish()
    }
}
