//! Access token records (`oauth_access_tokens`).

use serde::{Deserialize, Serialize};

/// Stored access token row.
///
/// `token` is the opaque bearer value. `refresh_token_id` links back to the
/// refresh token that produced this one; quota enforcement counts through it.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct AccessToken {
    pub id: String,
    #[serde(skip_serializing)]
    pub token: String,
    pub client_id: String,
    pub user_id: Option<String>,
    pub scopes: Option<String>,
    pub refresh_token_id: Option<String>,
    pub expires_at: i64,
    pub revoked_at: Option<i64>,
    pub created_at: i64,
    pub created_by: String,
    pub updated_at: i64,
    pub updated_by: String,
}

impl AccessToken {
    /// A token is active until revoked or past its expiry.
    pub fn is_active(&self, now: i64) -> bool {
        self.revoked_at.is_none() && self.expires_at > now
    }
}
