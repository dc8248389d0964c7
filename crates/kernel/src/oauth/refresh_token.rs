//! The refresh-token grant.
//!
//! Preconditions run as a condition chain: presence, client authentication,
//! grant authorization, token validation, scope check, access-token quota.
//! `run` constructs the replacement credentials without touching storage;
//! `postconditions` persists them in a single transaction, using a
//! conditional update on the predecessor row so that two concurrent uses of
//! the same refresh token cannot both rotate it.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::envelope::{Envelope, ErrorCode, Failure};
use crate::models::{AccessToken, AuditLogEntry, RefreshToken};
use crate::oauth::condition::{Condition, ConditionChain, FlowContext};
use crate::oauth::error::OAuthError;
use crate::oauth::flow::{AuthorizationFlow, TokenGrant};
use crate::oauth::{scope, secrets};
use crate::store::Storage;

pub const GRANT_TYPE: &str = "refresh_token";

/// The `refresh_token` request parameter is present and non-empty.
struct RefreshTokenPresence;

#[async_trait]
impl Condition for RefreshTokenPresence {
    fn name(&self) -> &'static str {
        "refresh_token_presence"
    }

    async fn check(&self, ctx: &mut FlowContext, ray_id: &str) -> Envelope<()> {
        match ctx.refresh_token.as_deref() {
            Some(token) if !token.is_empty() => Ok(()),
            _ => Err(Failure::new(
                ErrorCode::InvalidRequest,
                "Missing refresh_token parameter",
                ray_id,
            )),
        }
    }
}

/// Resolve and authenticate the client, then load its configuration.
///
/// Confidential clients must present a secret that verifies under their
/// `(owner, client)` context; public clients skip verification. Resolved
/// rows land in the context for the rest of the chain.
struct AuthenticateClient {
    storage: Storage,
    secrets: secrets::SecretService,
}

#[async_trait]
impl Condition for AuthenticateClient {
    fn name(&self) -> &'static str {
        "authenticate_client"
    }

    async fn check(&self, ctx: &mut FlowContext, ray_id: &str) -> Envelope<()> {
        let client_identifier = match ctx.client_id.as_deref() {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => {
                return Err(Failure::new(
                    ErrorCode::InvalidClient,
                    "Missing client_id",
                    ray_id,
                ));
            }
        };

        let client = match self
            .storage
            .clients
            .get_by_client_identifier(&client_identifier, ray_id)
            .await
        {
            Ok(client) => client,
            Err(failure) if failure.error_code == ErrorCode::NotFound => {
                return Err(Failure::new(ErrorCode::InvalidClient, "Invalid client", ray_id));
            }
            Err(failure) => {
                error!(ray_id = %ray_id, error = %failure, "client lookup failed");
                return Err(Failure::new(
                    ErrorCode::ServerError,
                    "Failed to resolve client",
                    ray_id,
                ));
            }
        };

        // Disabled clients are soft-deleted; they do not authenticate.
        if !client.is_enabled {
            return Err(Failure::new(ErrorCode::InvalidClient, "Invalid client", ray_id));
        }

        if client.is_confidential {
            let secret = match ctx.client_secret.as_deref() {
                Some(secret) if !secret.is_empty() => secret,
                _ => {
                    return Err(Failure::new(
                        ErrorCode::InvalidClient,
                        "Missing client_secret",
                        ray_id,
                    ));
                }
            };

            let Some(hash) = client.client_secret_hash.as_deref() else {
                return Err(Failure::new(
                    ErrorCode::InvalidClient,
                    "Invalid client credentials",
                    ray_id,
                ));
            };

            match self
                .secrets
                .verify(secret, hash, &client.created_by, &client.id)
                .await
            {
                Ok(true) => {}
                Ok(false) => {
                    return Err(Failure::new(
                        ErrorCode::InvalidClient,
                        "Invalid client credentials",
                        ray_id,
                    ));
                }
                Err(e) => {
                    error!(ray_id = %ray_id, error = %e, "secret verification failed");
                    return Err(Failure::new(
                        ErrorCode::ServerError,
                        "Secret verification unavailable",
                        ray_id,
                    ));
                }
            }
        }

        // Every identity row owns exactly one configuration row; a missing
        // config is a server-side integrity failure, not a client error.
        let config = match self
            .storage
            .client_configs
            .get_by_client_id(&client.id, ray_id)
            .await
        {
            Ok(config) => config,
            Err(failure) => {
                error!(ray_id = %ray_id, error = %failure, client_id = %client.id, "client config missing");
                return Err(Failure::new(
                    ErrorCode::ServerError,
                    "Client configuration missing",
                    ray_id,
                ));
            }
        };

        ctx.client = Some(client);
        ctx.client_config = Some(config);
        Ok(())
    }
}

/// The authenticated client must be registered for this grant.
struct ClientGrantAllowed;

#[async_trait]
impl Condition for ClientGrantAllowed {
    fn name(&self) -> &'static str {
        "client_grant_allowed"
    }

    async fn check(&self, ctx: &mut FlowContext, ray_id: &str) -> Envelope<()> {
        let Some(client) = ctx.client.as_ref() else {
            return Err(Failure::new(ErrorCode::ServerError, "client not resolved", ray_id));
        };

        if !client.supports_grant_type(GRANT_TYPE) {
            return Err(Failure::new(
                ErrorCode::UnauthorizedClient,
                "Client is not authorized for the refresh_token grant",
                ray_id,
            ));
        }

        Ok(())
    }
}

/// Resolve the refresh token row: it must exist, be unrevoked, and belong to
/// the authenticated client.
///
/// A revoked token presented again is the canonical replay signal
/// (RFC 6819 §5.2.2.3); when family revocation is on, every live credential
/// sharing the token's owner is revoked before the failure is returned.
struct ValidateRefreshToken {
    storage: Storage,
    clock: Arc<dyn Clock>,
    revoke_family_on_reuse: bool,
}

impl ValidateRefreshToken {
    async fn revoke_family(&self, row: &RefreshToken, ray_id: &str) {
        let now = self.clock.now();

        let refresh_revoked = self
            .storage
            .refresh_tokens
            .revoke_all_for_owner(&row.client_id, row.user_id.as_deref(), now, ray_id)
            .await;
        let access_revoked = self
            .storage
            .access_tokens
            .revoke_all_for_owner(&row.client_id, row.user_id.as_deref(), now, ray_id)
            .await;

        match (&refresh_revoked, &access_revoked) {
            (Ok(refresh), Ok(access)) => {
                info!(
                    ray_id = %ray_id,
                    refresh_revoked = refresh,
                    access_revoked = access,
                    client_id = %row.client_id,
                    "token family revoked after refresh token reuse"
                );
            }
            _ => {
                error!(ray_id = %ray_id, client_id = %row.client_id, "token family revocation failed");
            }
        }

        let entry = AuditLogEntry {
            id: Uuid::now_v7().to_string(),
            event_type: "token.reuse_detected".to_string(),
            subject: Some(row.id.clone()),
            client_id: Some(row.client_id.clone()),
            user_id: row.user_id.clone(),
            metadata: Some(
                serde_json::json!({
                    "refresh_tokens_revoked": refresh_revoked.unwrap_or(0),
                    "access_tokens_revoked": access_revoked.unwrap_or(0),
                })
                .to_string(),
            ),
            created_at: now,
            created_by: "system".to_string(),
            updated_at: now,
            updated_by: "system".to_string(),
        };

        if let Err(failure) = self.storage.audit_log.append(&entry, ray_id).await {
            warn!(ray_id = %ray_id, error = %failure, "failed to audit token reuse");
        }
    }
}

#[async_trait]
impl Condition for ValidateRefreshToken {
    fn name(&self) -> &'static str {
        "validate_refresh_token"
    }

    async fn check(&self, ctx: &mut FlowContext, ray_id: &str) -> Envelope<()> {
        let Some(token_value) = ctx.refresh_token.as_deref() else {
            return Err(Failure::new(ErrorCode::ServerError, "token not resolved", ray_id));
        };
        let Some(client) = ctx.client.as_ref() else {
            return Err(Failure::new(ErrorCode::ServerError, "client not resolved", ray_id));
        };

        let row = match self
            .storage
            .refresh_tokens
            .get_by_token(token_value, ray_id)
            .await
        {
            Ok(row) => row,
            Err(failure) if failure.error_code == ErrorCode::NotFound => {
                return Err(Failure::new(
                    ErrorCode::InvalidGrant,
                    "Invalid refresh token",
                    ray_id,
                ));
            }
            Err(failure) => {
                error!(ray_id = %ray_id, error = %failure, "refresh token lookup failed");
                return Err(Failure::new(
                    ErrorCode::ServerError,
                    "Failed to resolve refresh token",
                    ray_id,
                ));
            }
        };

        if row.revoked_at.is_some() {
            if self.revoke_family_on_reuse {
                self.revoke_family(&row, ray_id).await;
            }
            return Err(Failure::new(
                ErrorCode::InvalidGrant,
                "Refresh token revoked",
                ray_id,
            ));
        }

        if row.client_id != client.id {
            return Err(Failure::new(
                ErrorCode::InvalidGrant,
                "Refresh token does not belong to client",
                ray_id,
            ));
        }

        ctx.refresh_token_row = Some(row);
        Ok(())
    }
}

/// The requested scope must be a subset of what the refresh token granted;
/// the surviving set becomes the effective scope.
struct ScopeSubset;

#[async_trait]
impl Condition for ScopeSubset {
    fn name(&self) -> &'static str {
        "scope_subset"
    }

    async fn check(&self, ctx: &mut FlowContext, ray_id: &str) -> Envelope<()> {
        let Some(row) = ctx.refresh_token_row.as_ref() else {
            return Err(Failure::new(ErrorCode::ServerError, "token not resolved", ray_id));
        };

        match ctx.scope.as_deref() {
            None => {
                ctx.effective_scope = row.scopes.as_deref().map(scope::canonicalize);
            }
            Some(requested) => {
                let granted = row.scopes.as_deref().unwrap_or("");
                if !scope::is_subset(requested, granted) {
                    return Err(Failure::new(
                        ErrorCode::InvalidScope,
                        "Requested scope exceeds grant",
                        ray_id,
                    ));
                }
                ctx.effective_scope = Some(scope::canonicalize(requested));
            }
        }

        Ok(())
    }
}

/// Enforce `max_active_access_tokens`: while the count of active access
/// tokens issued through this refresh token is at the cap, revoke the oldest
/// (FIFO by `created_at`, ties by `id`).
struct AccessTokenQuota {
    storage: Storage,
    clock: Arc<dyn Clock>,
}

#[async_trait]
impl Condition for AccessTokenQuota {
    fn name(&self) -> &'static str {
        "access_token_quota"
    }

    async fn check(&self, ctx: &mut FlowContext, ray_id: &str) -> Envelope<()> {
        let Some(config) = ctx.client_config.as_ref() else {
            return Err(Failure::new(ErrorCode::ServerError, "config not resolved", ray_id));
        };
        let Some(row) = ctx.refresh_token_row.as_ref() else {
            return Err(Failure::new(ErrorCode::ServerError, "token not resolved", ray_id));
        };

        let Some(limit) = config.max_active_access_tokens else {
            return Ok(());
        };

        let now = self.clock.now();
        let mut count = self
            .storage
            .access_tokens
            .count_active_by_refresh_token(&row.id, now, ray_id)
            .await
            .map_err(|failure| infra(failure, ray_id))?;

        while count >= limit {
            let oldest = self
                .storage
                .access_tokens
                .get_oldest_active_by_refresh_token(&row.id, now, ray_id)
                .await
                .map_err(|failure| infra(failure, ray_id))?;

            let Some(oldest) = oldest else {
                break;
            };

            self.storage
                .access_tokens
                .revoke(&oldest.id, now, ray_id)
                .await
                .map_err(|failure| infra(failure, ray_id))?;

            info!(ray_id = %ray_id, token_id = %oldest.id, "access token quota reached, oldest revoked");
            count -= 1;
        }

        Ok(())
    }
}

/// Storage trouble inside a condition surfaces as `SERVER_ERROR`.
fn infra(failure: Failure, ray_id: &str) -> Failure {
    error!(ray_id = %ray_id, error = %failure, "storage failure in condition");
    Failure::new(ErrorCode::ServerError, "storage unavailable", ray_id)
}

/// Concrete flow for `grant_type=refresh_token`.
pub struct RefreshTokenFlow {
    storage: Storage,
    clock: Arc<dyn Clock>,
    secrets: secrets::SecretService,
    rotate_refresh_tokens: bool,
    revoke_family_on_reuse: bool,
}

impl RefreshTokenFlow {
    pub fn new(
        storage: Storage,
        clock: Arc<dyn Clock>,
        secrets: secrets::SecretService,
        rotate_refresh_tokens: bool,
        revoke_family_on_reuse: bool,
    ) -> Self {
        Self {
            storage,
            clock,
            secrets,
            rotate_refresh_tokens,
            revoke_family_on_reuse,
        }
    }

    fn missing_context(what: &str) -> OAuthError {
        OAuthError::server_error(format!("{what} missing from flow context"))
    }
}

#[async_trait]
impl AuthorizationFlow for RefreshTokenFlow {
    fn grant_type(&self) -> &'static str {
        GRANT_TYPE
    }

    fn name(&self) -> &'static str {
        "RefreshTokenFlow"
    }

    async fn preconditions(&self, ctx: &mut FlowContext, ray_id: &str) -> Result<(), OAuthError> {
        let chain = ConditionChain::new(vec![
            Box::new(RefreshTokenPresence),
            Box::new(AuthenticateClient {
                storage: self.storage.clone(),
                secrets: self.secrets.clone(),
            }),
            Box::new(ClientGrantAllowed),
            Box::new(ValidateRefreshToken {
                storage: self.storage.clone(),
                clock: self.clock.clone(),
                revoke_family_on_reuse: self.revoke_family_on_reuse,
            }),
            Box::new(ScopeSubset),
            Box::new(AccessTokenQuota {
                storage: self.storage.clone(),
                clock: self.clock.clone(),
            }),
        ]);

        chain.execute(ctx, ray_id).await.map_err(OAuthError::from)
    }

    async fn run(&self, ctx: &FlowContext, _ray_id: &str) -> Result<TokenGrant, OAuthError> {
        let row = ctx
            .refresh_token_row
            .as_ref()
            .ok_or_else(|| Self::missing_context("refresh token"))?;
        let config = ctx
            .client_config
            .as_ref()
            .ok_or_else(|| Self::missing_context("client config"))?;

        let (refresh_token, is_rotated) = if self.rotate_refresh_tokens {
            (secrets::generate_token(), true)
        } else {
            (row.token.clone(), false)
        };

        Ok(TokenGrant {
            access_token: secrets::generate_token(),
            token_type: "Bearer".to_string(),
            expires_in: config.access_token_ttl,
            refresh_token: Some(refresh_token),
            scope: ctx.effective_scope.clone(),
            is_rotated,
            original_refresh_token_id: Some(row.id.clone()),
        })
    }

    async fn postconditions(
        &self,
        ctx: &FlowContext,
        grant: &TokenGrant,
        ray_id: &str,
    ) -> Result<(), OAuthError> {
        let client = ctx
            .client
            .as_ref()
            .ok_or_else(|| Self::missing_context("client"))?;
        let row = ctx
            .refresh_token_row
            .as_ref()
            .ok_or_else(|| Self::missing_context("refresh token"))?;

        let now = self.clock.now();
        let mut tx = self.storage.begin(ray_id).await.map_err(OAuthError::from)?;

        // The successor row is built up front so the access token can link to
        // the refresh token it will live under.
        let successor = grant.is_rotated.then(|| RefreshToken {
            id: Uuid::now_v7().to_string(),
            token: grant
                .refresh_token
                .clone()
                .unwrap_or_else(|| row.token.clone()),
            client_id: row.client_id.clone(),
            user_id: row.user_id.clone(),
            scopes: grant.scope.clone(),
            revoked_at: None,
            created_at: now,
            created_by: "system".to_string(),
            updated_at: now,
            updated_by: "system".to_string(),
        });

        let access = AccessToken {
            id: Uuid::now_v7().to_string(),
            token: grant.access_token.clone(),
            client_id: client.id.clone(),
            user_id: row.user_id.clone(),
            scopes: grant.scope.clone(),
            refresh_token_id: Some(
                successor
                    .as_ref()
                    .map_or_else(|| row.id.clone(), |s| s.id.clone()),
            ),
            expires_at: now + grant.expires_in,
            revoked_at: None,
            created_at: now,
            created_by: "system".to_string(),
            updated_at: now,
            updated_by: "system".to_string(),
        };

        self.storage
            .access_tokens
            .insert_with(&mut tx, &access, ray_id)
            .await
            .map_err(OAuthError::from)?;

        match &successor {
            Some(successor) => {
                let revoked = self
                    .storage
                    .refresh_tokens
                    .revoke_with(&mut tx, &row.id, now, ray_id)
                    .await
                    .map_err(OAuthError::from)?;

                // Conditional update: a concurrent rotation of the same token
                // already revoked it. This request loses; the open transaction
                // rolls back on drop.
                if revoked == 0 {
                    return Err(OAuthError::new(
                        ErrorCode::InvalidGrant,
                        "Refresh token revoked",
                    ));
                }

                self.storage
                    .refresh_tokens
                    .insert_with(&mut tx, successor, ray_id)
                    .await
                    .map_err(OAuthError::from)?;
            }
            None => {
                self.storage
                    .refresh_tokens
                    .touch_with(&mut tx, &row.id, now, ray_id)
                    .await
                    .map_err(OAuthError::from)?;
            }
        }

        let entry = AuditLogEntry {
            id: Uuid::now_v7().to_string(),
            event_type: "token.issued".to_string(),
            subject: Some(access.id.clone()),
            client_id: Some(client.id.clone()),
            user_id: row.user_id.clone(),
            metadata: Some(
                serde_json::json!({
                    "grant_type": GRANT_TYPE,
                    "rotated": grant.is_rotated,
                    "refresh_token_id": access.refresh_token_id,
                })
                .to_string(),
            ),
            created_at: now,
            created_by: "system".to_string(),
            updated_at: now,
            updated_by: "system".to_string(),
        };

        self.storage
            .audit_log
            .append_with(&mut tx, &entry, ray_id)
            .await
            .map_err(OAuthError::from)?;

        tx.commit().await.map_err(|e| {
            error!(ray_id = %ray_id, error = %e, "token issuance commit failed");
            OAuthError::server_error("Failed to persist token issuance")
        })?;

        Ok(())
    }
}

impl std::fmt::Debug for RefreshTokenFlow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshTokenFlow")
            .field("rotate_refresh_tokens", &self.rotate_refresh_tokens)
            .field("revoke_family_on_reuse", &self.revoke_family_on_reuse)
            .finish()
    }
}
