//! Client identity records and registration values.

use serde::{Deserialize, Serialize};

/// Stored client identity row (`oauth_clients`).
///
/// `client_secret_hash` is Argon2id output for confidential clients and
/// `NULL` for public ones; the plaintext secret is never persisted.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct OAuthClient {
    pub id: String,
    pub client_identifier: String,
    #[serde(skip_serializing)]
    pub client_secret_hash: Option<String>,
    pub is_confidential: bool,
    pub redirect_uris: String,
    pub grant_types: String,
    pub scopes: Option<String>,
    pub is_enabled: bool,
    pub created_at: i64,
    pub created_by: String,
    pub updated_at: i64,
    pub updated_by: String,
}

impl OAuthClient {
    /// Check if this client is registered for a given grant type.
    pub fn supports_grant_type(&self, grant_type: &str) -> bool {
        self.grant_types.split_whitespace().any(|g| g == grant_type)
    }
}

/// Input for registering a new client.
#[derive(Debug, Clone, Deserialize)]
pub struct RegistrationRequest {
    /// Owner of the client; also the hashing context.
    pub user_id: String,

    pub client_identifier: String,
    pub is_confidential: bool,

    pub redirect_uris: Vec<String>,
    pub grant_types: Vec<String>,
    pub response_types: Vec<String>,
    #[serde(default)]
    pub scopes: Vec<String>,

    pub require_pkce: bool,
    #[serde(default)]
    pub pkce_methods: Option<Vec<String>>,

    pub access_token_ttl: i64,
    #[serde(default)]
    pub refresh_token_ttl: Option<i64>,
    pub authorization_code_ttl: i64,

    #[serde(default)]
    pub max_active_access_tokens: Option<i64>,
    #[serde(default)]
    pub max_active_refresh_tokens: Option<i64>,

    #[serde(default)]
    pub device_code_ttl: Option<i64>,
    #[serde(default)]
    pub device_poll_interval: Option<i64>,

    #[serde(default)]
    pub metadata: Option<std::collections::BTreeMap<String, String>>,
}

/// Registration result returned to the caller.
///
/// The only value in the system that ever carries the plaintext secret:
/// present exactly once, on creation, and not re-derivable afterwards.
#[derive(Debug, Clone, Serialize)]
pub struct Client {
    pub id: String,
    pub client_identifier: String,
    pub user_id: String,

    pub is_confidential: bool,
    pub client_secret: Option<String>,

    pub redirect_uris: Vec<String>,
    pub grant_types: Vec<String>,
    pub response_types: Vec<String>,
    pub scopes: Vec<String>,

    pub require_pkce: bool,
    pub pkce_methods: Option<Vec<String>>,

    pub access_token_ttl: i64,
    pub refresh_token_ttl: Option<i64>,
    pub authorization_code_ttl: i64,

    pub max_active_access_tokens: Option<i64>,
    pub max_active_refresh_tokens: Option<i64>,

    pub device_code_ttl: Option<i64>,
    pub device_poll_interval: Option<i64>,

    pub is_enabled: bool,
    pub created_at: i64,
    pub created_by: String,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn client(grant_types: &str) -> OAuthClient {
        OAuthClient {
            id: "c1".to_string(),
            client_identifier: "web-app".to_string(),
            client_secret_hash: None,
            is_confidential: false,
            redirect_uris: "https://a/cb".to_string(),
            grant_types: grant_types.to_string(),
            scopes: None,
            is_enabled: true,
            created_at: 0,
            created_by: "test".to_string(),
            updated_at: 0,
            updated_by: "test".to_string(),
        }
    }

    #[test]
    fn grant_type_membership() {
        let c = client("authorization_code refresh_token");
        assert!(c.supports_grant_type("refresh_token"));
        assert!(c.supports_grant_type("authorization_code"));
        assert!(!c.supports_grant_type("client_credentials"));
    }

    #[test]
    fn secret_hash_not_serialized() {
        let mut c = client("refresh_token");
        c.client_secret_hash = Some("$argon2id$v=19$...".to_string());
        let json = serde_json::to_string(&c).unwrap();
        assert!(!json.contains("argon2"));
        assert!(!json.contains("client_secret_hash"));
    }
}
