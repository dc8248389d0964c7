//! Refresh token records (`oauth_refresh_tokens`).

use serde::{Deserialize, Serialize};

/// Stored refresh token row.
///
/// Refresh tokens carry no expiry; they end by revocation or rotation.
/// A set `revoked_at` is permanent.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct RefreshToken {
    pub id: String,
    #[serde(skip_serializing)]
    pub token: String,
    pub client_id: String,
    pub user_id: Option<String>,
    pub scopes: Option<String>,
    pub revoked_at: Option<i64>,
    pub created_at: i64,
    pub created_by: String,
    pub updated_at: i64,
    pub updated_by: String,
}

impl RefreshToken {
    pub fn is_active(&self) -> bool {
        self.revoked_at.is_none()
    }
}
