//! Per-client configuration (`oauth_client_configs`, 1:1 with identity).

use serde::{Deserialize, Serialize};

/// Stored client configuration row.
///
/// TTLs are seconds; `metadata` is opaque JSON text carried through verbatim.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ClientConfig {
    pub client_id: String,

    pub response_types: String,
    pub require_pkce: bool,
    pub pkce_methods: Option<String>,

    pub access_token_ttl: i64,
    pub refresh_token_ttl: Option<i64>,
    pub authorization_code_ttl: i64,

    pub max_active_access_tokens: Option<i64>,
    pub max_active_refresh_tokens: Option<i64>,

    pub device_code_ttl: Option<i64>,
    pub device_poll_interval: Option<i64>,

    pub metadata: Option<String>,

    pub created_at: i64,
    pub created_by: String,
    pub updated_at: i64,
    pub updated_by: String,
}
