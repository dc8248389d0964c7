//! Client provisioning and administrative mutations.

use std::sync::Arc;

use tracing::{error, info, warn};
use url::Url;
use uuid::Uuid;

use crate::clock::Clock;
use crate::envelope::{Envelope, ErrorCode, Failure};
use crate::models::{
    AuditLogEntry, Client, ClientConfig, OAuthClient, RegistrationRequest, join_list,
};
use crate::oauth::secrets::SecretService;
use crate::store::Storage;

/// Grant types a client may register for.
const ALLOWED_GRANT_TYPES: [&str; 4] = [
    "authorization_code",
    "refresh_token",
    "client_credentials",
    "urn:ietf:params:oauth:grant-type:device_code",
];

/// Response types a client may register for.
const ALLOWED_RESPONSE_TYPES: [&str; 2] = ["code", "token"];

/// PKCE challenge methods a client may register for.
const ALLOWED_PKCE_METHODS: [&str; 2] = ["S256", "plain"];

/// Registers OAuth clients and owns their administrative lifecycle
/// (enable/disable, secret rotation).
#[derive(Clone)]
pub struct ClientRegistrar {
    storage: Storage,
    secrets: SecretService,
    clock: Arc<dyn Clock>,
}

impl ClientRegistrar {
    pub fn new(storage: Storage, secrets: SecretService, clock: Arc<dyn Clock>) -> Self {
        Self {
            storage,
            secrets,
            clock,
        }
    }

    /// Register a new client.
    ///
    /// Identity and configuration rows are written in one transaction, so a
    /// configuration failure leaves no orphan identity. On success the
    /// returned [`Client`] carries the plaintext secret — the only time it
    /// exists outside the hasher.
    pub async fn register_client(
        &self,
        request: &RegistrationRequest,
        ray_id: &str,
    ) -> Envelope<Client> {
        validate_request(request, ray_id)?;

        self.check_duplicate_identifier(&request.client_identifier, ray_id)
            .await?;

        let client_id = Uuid::now_v7().to_string();

        let (plaintext_secret, hashed_secret) = if request.is_confidential {
            let plaintext = self.secrets.generate_secret(&request.user_id);
            let hashed = match self
                .secrets
                .hash(&plaintext, &request.user_id, &client_id)
                .await
            {
                Ok(hashed) => hashed,
                Err(e) => {
                    error!(ray_id = %ray_id, error = %e, "secret hashing failed");
                    self.audit(
                        "server_error",
                        &client_id,
                        Some(&request.user_id),
                        &request.user_id,
                        ray_id,
                    )
                    .await;
                    return Err(Failure::new(
                        ErrorCode::ServerError,
                        "Failed to hash client secret",
                        ray_id,
                    ));
                }
            };
            (Some(plaintext), Some(hashed))
        } else {
            (None, None)
        };

        let now = self.clock.now();

        let identity = OAuthClient {
            id: client_id.clone(),
            client_identifier: request.client_identifier.clone(),
            client_secret_hash: hashed_secret,
            is_confidential: request.is_confidential,
            redirect_uris: join_list(&request.redirect_uris),
            grant_types: join_list(&request.grant_types),
            scopes: if request.scopes.is_empty() {
                None
            } else {
                Some(join_list(&request.scopes))
            },
            is_enabled: true,
            created_at: now,
            created_by: request.user_id.clone(),
            updated_at: now,
            updated_by: request.user_id.clone(),
        };

        let config = ClientConfig {
            client_id: client_id.clone(),
            response_types: join_list(&request.response_types),
            require_pkce: request.require_pkce,
            pkce_methods: request.pkce_methods.as_deref().map(join_list),
            access_token_ttl: request.access_token_ttl,
            refresh_token_ttl: request.refresh_token_ttl,
            authorization_code_ttl: request.authorization_code_ttl,
            max_active_access_tokens: request.max_active_access_tokens,
            max_active_refresh_tokens: request.max_active_refresh_tokens,
            device_code_ttl: request.device_code_ttl,
            device_poll_interval: request.device_poll_interval,
            metadata: request
                .metadata
                .as_ref()
                .map(|m| serde_json::json!(m).to_string()),
            created_at: now,
            created_by: request.user_id.clone(),
            updated_at: now,
            updated_by: request.user_id.clone(),
        };

        // Both rows or neither: the transaction rolls back on any failure.
        let mut tx = self.storage.begin(ray_id).await?;
        self.storage
            .clients
            .insert_with(&mut tx, &identity, ray_id)
            .await?;
        self.storage
            .client_configs
            .insert_with(&mut tx, &config, ray_id)
            .await?;
        tx.commit().await.map_err(|e| {
            error!(ray_id = %ray_id, error = %e, "client registration commit failed");
            Failure::new(ErrorCode::InsertFailed, "failed to store client", ray_id)
        })?;

        info!(
            ray_id = %ray_id,
            client_identifier = %request.client_identifier,
            client_id = %client_id,
            "client registered"
        );

        self.audit(
            "client.registered",
            &client_id,
            Some(&request.user_id),
            &request.user_id,
            ray_id,
        )
        .await;

        Ok(Client {
            id: client_id,
            client_identifier: request.client_identifier.clone(),
            user_id: request.user_id.clone(),
            is_confidential: request.is_confidential,
            client_secret: plaintext_secret,
            redirect_uris: request.redirect_uris.clone(),
            grant_types: request.grant_types.clone(),
            response_types: request.response_types.clone(),
            scopes: request.scopes.clone(),
            require_pkce: request.require_pkce,
            pkce_methods: request.pkce_methods.clone(),
            access_token_ttl: request.access_token_ttl,
            refresh_token_ttl: request.refresh_token_ttl,
            authorization_code_ttl: request.authorization_code_ttl,
            max_active_access_tokens: request.max_active_access_tokens,
            max_active_refresh_tokens: request.max_active_refresh_tokens,
            device_code_ttl: request.device_code_ttl,
            device_poll_interval: request.device_poll_interval,
            is_enabled: true,
            created_at: now,
            created_by: request.user_id.clone(),
        })
    }

    /// Retrieve a client by its internal id. No secret material is exposed.
    pub async fn get_client_by_id(&self, client_id: &str, ray_id: &str) -> Envelope<OAuthClient> {
        self.storage.clients.get_by_id(client_id, ray_id).await
    }

    /// Retrieve a client by its public identifier. No secret material is
    /// exposed.
    pub async fn get_client_by_identifier(
        &self,
        client_identifier: &str,
        ray_id: &str,
    ) -> Envelope<OAuthClient> {
        self.storage
            .clients
            .get_by_client_identifier(client_identifier, ray_id)
            .await
    }

    /// Enable or disable a client. Disabling is the soft delete: the client
    /// stops authenticating but its rows and audit trail remain.
    pub async fn set_client_enabled(
        &self,
        client_id: &str,
        enabled: bool,
        actor: &str,
        ray_id: &str,
    ) -> Envelope<()> {
        let mut client = self.storage.clients.get_by_id(client_id, ray_id).await?;

        if client.is_enabled == enabled {
            return Ok(());
        }

        client.is_enabled = enabled;
        client.updated_at = self.clock.now();
        client.updated_by = actor.to_string();

        self.storage.clients.update(&client, ray_id).await?;

        let event = if enabled {
            "client.enabled"
        } else {
            "client.disabled"
        };
        self.audit(event, client_id, Some(client.created_by.as_str()), actor, ray_id)
            .await;

        Ok(())
    }

    /// Rotate a confidential client's secret. Returns the fresh plaintext
    /// exactly once; the stored hash is replaced in place.
    pub async fn rotate_client_secret(
        &self,
        client_id: &str,
        actor: &str,
        ray_id: &str,
    ) -> Envelope<String> {
        let mut client = self.storage.clients.get_by_id(client_id, ray_id).await?;

        if !client.is_confidential {
            return Err(Failure::new(
                ErrorCode::InvalidRequest,
                "Public clients have no secret to rotate",
                ray_id,
            ));
        }

        let plaintext = self.secrets.generate_secret(&client.created_by);
        let hashed = match self
            .secrets
            .hash(&plaintext, &client.created_by, &client.id)
            .await
        {
            Ok(hashed) => hashed,
            Err(e) => {
                error!(ray_id = %ray_id, error = %e, "secret hashing failed");
                self.audit(
                    "server_error",
                    client_id,
                    Some(&client.created_by),
                    actor,
                    ray_id,
                )
                .await;
                return Err(Failure::new(
                    ErrorCode::ServerError,
                    "Failed to hash client secret",
                    ray_id,
                ));
            }
        };

        client.client_secret_hash = Some(hashed);
        client.updated_at = self.clock.now();
        client.updated_by = actor.to_string();

        self.storage.clients.update(&client, ray_id).await?;

        self.audit("client.secret_rotated", client_id, None, actor, ray_id)
            .await;

        Ok(plaintext)
    }

    /// Probe the identifier for uniqueness. `NOT_FOUND` means available;
    /// any other storage failure propagates.
    async fn check_duplicate_identifier(
        &self,
        client_identifier: &str,
        ray_id: &str,
    ) -> Envelope<()> {
        match self
            .storage
            .clients
            .get_by_client_identifier(client_identifier, ray_id)
            .await
        {
            Ok(_) => Err(Failure::new(
                ErrorCode::DuplicateClientIdentifier,
                format!("Client identifier '{client_identifier}' already exists"),
                ray_id,
            )),
            Err(failure) if failure.error_code == ErrorCode::NotFound => Ok(()),
            Err(failure) => Err(failure),
        }
    }

    /// Best-effort audit append; registration and admin mutations succeed
    /// even when the audit write fails, but the failure is logged.
    async fn audit(
        &self,
        event_type: &str,
        client_id: &str,
        user_id: Option<&str>,
        actor: &str,
        ray_id: &str,
    ) {
        let now = self.clock.now();
        let entry = AuditLogEntry {
            id: Uuid::now_v7().to_string(),
            event_type: event_type.to_string(),
            subject: Some(client_id.to_string()),
            client_id: Some(client_id.to_string()),
            user_id: user_id.map(str::to_string),
            metadata: None,
            created_at: now,
            created_by: actor.to_string(),
            updated_at: now,
            updated_by: actor.to_string(),
        };

        if let Err(failure) = self.storage.audit_log.append(&entry, ray_id).await {
            warn!(ray_id = %ray_id, error = %failure, event_type = %event_type, "audit append failed");
        }
    }
}

/// Synchronous, pure request validation.
fn validate_request(request: &RegistrationRequest, ray_id: &str) -> Envelope<()> {
    let invalid = |message: &str| Failure::new(ErrorCode::InvalidRequest, message, ray_id);

    if request.user_id.trim().is_empty() {
        return Err(invalid("user_id is required"));
    }

    if request.client_identifier.trim().is_empty() {
        return Err(invalid("client_identifier is required"));
    }

    if request.redirect_uris.is_empty() {
        return Err(invalid("At least one redirect_uri is required"));
    }

    for uri in &request.redirect_uris {
        if Url::parse(uri).is_err() {
            return Err(invalid(&format!("redirect_uri '{uri}' is not an absolute URI")));
        }
    }

    if request.grant_types.is_empty() {
        return Err(invalid("At least one grant_type is required"));
    }

    for grant_type in &request.grant_types {
        if !ALLOWED_GRANT_TYPES.contains(&grant_type.as_str()) {
            return Err(invalid(&format!("Unknown grant_type '{grant_type}'")));
        }
    }

    for response_type in &request.response_types {
        if !ALLOWED_RESPONSE_TYPES.contains(&response_type.as_str()) {
            return Err(invalid(&format!("Unknown response_type '{response_type}'")));
        }
    }

    if let Some(methods) = &request.pkce_methods {
        for method in methods {
            if !ALLOWED_PKCE_METHODS.contains(&method.as_str()) {
                return Err(invalid(&format!("Unknown pkce_method '{method}'")));
            }
        }
    }

    if request.access_token_ttl <= 0 {
        return Err(invalid("access_token_ttl must be positive"));
    }

    if request.authorization_code_ttl <= 0 {
        return Err(invalid("authorization_code_ttl must be positive"));
    }

    let optional_positives = [
        ("refresh_token_ttl", request.refresh_token_ttl),
        ("max_active_access_tokens", request.max_active_access_tokens),
        (
            "max_active_refresh_tokens",
            request.max_active_refresh_tokens,
        ),
        ("device_code_ttl", request.device_code_ttl),
        ("device_poll_interval", request.device_poll_interval),
    ];

    for (name, value) in optional_positives {
        if let Some(value) = value
            && value <= 0
        {
            return Err(invalid(&format!("{name} must be positive when set")));
        }
    }

    Ok(())
}

impl std::fmt::Debug for ClientRegistrar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientRegistrar").finish()
    }
}
