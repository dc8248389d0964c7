//! Refresh token repository.
//!
//! Mutation surface is deliberately narrow: revocation and a last-used touch.
//! There is no whole-row update, so a set `revoked_at` can never be cleared.

use sqlx::{SqliteConnection, SqliteExecutor, SqlitePool};
use tracing::debug;

use crate::envelope::{Envelope, ErrorCode, Failure};
use crate::models::RefreshToken;

const INSERT_SQL: &str = r#"
    INSERT INTO oauth_refresh_tokens (
        id, token, client_id, user_id, scopes, revoked_at,
        created_at, created_by, updated_at, updated_by
    ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
"#;

/// Repository for `oauth_refresh_tokens`.
#[derive(Clone)]
pub struct RefreshTokenStore {
    pool: SqlitePool,
}

impl RefreshTokenStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn insert(&self, row: &RefreshToken, ray_id: &str) -> Envelope<()> {
        insert_exec(&self.pool, row).await.map_err(|e| {
            tracing::error!(error = %e, ray_id = %ray_id, "refresh token insert failed");
            Failure::new(ErrorCode::InsertFailed, "failed to store refresh token", ray_id)
        })?;

        debug!(token_id = %row.id, ray_id = %ray_id, "refresh token inserted");
        Ok(())
    }

    /// Insert inside a caller-owned transaction.
    pub async fn insert_with(
        &self,
        conn: &mut SqliteConnection,
        row: &RefreshToken,
        ray_id: &str,
    ) -> Envelope<()> {
        insert_exec(&mut *conn, row).await.map_err(|e| {
            tracing::error!(error = %e, ray_id = %ray_id, "refresh token insert failed");
            Failure::new(ErrorCode::InsertFailed, "failed to store refresh token", ray_id)
        })
    }

    pub async fn get_by_id(&self, id: &str, ray_id: &str) -> Envelope<RefreshToken> {
        let row =
            sqlx::query_as::<_, RefreshToken>("SELECT * FROM oauth_refresh_tokens WHERE id = ?")
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| {
                    tracing::error!(error = %e, ray_id = %ray_id, "refresh token fetch failed");
                    Failure::new(ErrorCode::FetchFailed, "failed to fetch refresh token", ray_id)
                })?;

        row.ok_or_else(|| Failure::new(ErrorCode::NotFound, "refresh token not found", ray_id))
    }

    pub async fn get_by_token(&self, token: &str, ray_id: &str) -> Envelope<RefreshToken> {
        let row =
            sqlx::query_as::<_, RefreshToken>("SELECT * FROM oauth_refresh_tokens WHERE token = ?")
                .bind(token)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| {
                    tracing::error!(error = %e, ray_id = %ray_id, "refresh token fetch failed");
                    Failure::new(ErrorCode::FetchFailed, "failed to fetch refresh token", ray_id)
                })?;

        row.ok_or_else(|| Failure::new(ErrorCode::NotFound, "refresh token not found", ray_id))
    }

    /// Conditionally revoke inside a caller-owned transaction.
    ///
    /// Transitions `revoked_at NULL -> revoked_at` and reports how many rows
    /// changed. Two concurrent rotations of the same token race here: exactly
    /// one observes `1`, the loser observes `0` and must abort.
    pub async fn revoke_with(
        &self,
        conn: &mut SqliteConnection,
        id: &str,
        revoked_at: i64,
        ray_id: &str,
    ) -> Envelope<u64> {
        let result = sqlx::query(
            r#"
            UPDATE oauth_refresh_tokens
            SET revoked_at = ?, updated_at = ?
            WHERE id = ? AND revoked_at IS NULL
            "#,
        )
        .bind(revoked_at)
        .bind(revoked_at)
        .bind(id)
        .execute(&mut *conn)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, ray_id = %ray_id, "refresh token revoke failed");
            Failure::new(ErrorCode::UpdateFailed, "failed to revoke refresh token", ray_id)
        })?;

        Ok(result.rows_affected())
    }

    /// Pool-based revocation for administrative paths.
    pub async fn revoke(&self, id: &str, revoked_at: i64, ray_id: &str) -> Envelope<()> {
        let result = sqlx::query(
            r#"
            UPDATE oauth_refresh_tokens
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
            tracing::error!(error = %e, ray_id = %ray_id, "refresh token revoke failed");
            Failure::new(ErrorCode::UpdateFailed, "failed to revoke refresh token", ray_id)
        })?;

        if result.rows_affected() == 0 {
            return Err(Failure::new(
                ErrorCode::NotFound,
                "refresh token not found or already revoked",
                ray_id,
            ));
        }

        debug!(token_id = %id, ray_id = %ray_id, "refresh token revoked");
        Ok(())
    }

    /// Revoke every active refresh token owned by `(client_id, user_id)`.
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
            UPDATE oauth_refresh_tokens
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
            tracing::error!(error = %e, ray_id = %ray_id, "refresh token family revoke failed");
            Failure::new(ErrorCode::UpdateFailed, "failed to revoke refresh tokens", ray_id)
        })?;

        Ok(result.rows_affected())
    }

    /// Update `updated_at` inside a caller-owned transaction (non-rotating
    /// grants record last use this way).
    pub async fn touch_with(
        &self,
        conn: &mut SqliteConnection,
        id: &str,
        updated_at: i64,
        ray_id: &str,
    ) -> Envelope<()> {
        let result = sqlx::query("UPDATE oauth_refresh_tokens SET updated_at = ? WHERE id = ?")
            .bind(updated_at)
            .bind(id)
            .execute(&mut *conn)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, ray_id = %ray_id, "refresh token touch failed");
                Failure::new(ErrorCode::UpdateFailed, "failed to update refresh token", ray_id)
            })?;

        if result.rows_affected() == 0 {
            return Err(Failure::new(ErrorCode::NotFound, "refresh token not found", ray_id));
        }

        Ok(())
    }

    pub async fn delete_by_id(&self, id: &str, ray_id: &str) -> Envelope<()> {
        let result = sqlx::query("DELETE FROM oauth_refresh_tokens WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, ray_id = %ray_id, "refresh token delete failed");
                Failure::new(ErrorCode::DeleteFailed, "failed to delete refresh token", ray_id)
            })?;

        if result.rows_affected() == 0 {
            return Err(Failure::new(ErrorCode::NotFound, "refresh token not found", ray_id));
        }

        Ok(())
    }
}

async fn insert_exec<'e>(exec: impl SqliteExecutor<'e>, row: &RefreshToken) -> sqlx::Result<()> {
    sqlx::query(INSERT_SQL)
        .bind(&row.id)
        .bind(&row.token)
        .bind(&row.client_id)
        .bind(&row.user_id)
        .bind(&row.scopes)
        .bind(row.revoked_at)
        .bind(row.created_at)
        .bind(&row.created_by)
        .bind(row.updated_at)
        .bind(&row.updated_by)
        .execute(exec)
        .await?;

    Ok(())
}

impl std::fmt::Debug for RefreshTokenStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshTokenStore").finish()
    }
}
