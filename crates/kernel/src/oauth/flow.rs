//! Authorization flow lifecycle.
//!
//! Every grant runs the same fixed sequence: log start, preconditions, run,
//! postconditions, log success. The sequence lives on [`FlowEngine`], not on
//! the flow trait, so no grant can override it. Contract: no persistence
//! before all preconditions pass; success is not logged before post-commit
//! work completes.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::envelope::ErrorCode;
use crate::models::AuditLogEntry;
use crate::oauth::condition::FlowContext;
use crate::oauth::error::OAuthError;
use crate::store::AuditLogStore;

/// Values produced by a successful grant; serializes to the RFC 6749 token
/// response body.
#[derive(Debug, Clone, Serialize)]
pub struct TokenGrant {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: i64,
    pub refresh_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,

    /// Whether the presented refresh token was rotated.
    #[serde(skip)]
    pub is_rotated: bool,
    /// Row id of the refresh token that was presented.
    #[serde(skip)]
    pub original_refresh_token_id: Option<String>,
}

/// A concrete grant. Implementations provide the three hooks; the engine
/// owns the order they run in.
#[async_trait]
pub trait AuthorizationFlow: Send + Sync {
    /// The `grant_type` value this flow serves.
    fn grant_type(&self) -> &'static str;

    /// Human-readable flow name for logs.
    fn name(&self) -> &'static str;

    /// Validate the request. A failure here means nothing was persisted by
    /// the flow itself.
    async fn preconditions(&self, ctx: &mut FlowContext, ray_id: &str) -> Result<(), OAuthError>;

    /// Construct the new credentials and derived values. No persistence.
    async fn run(&self, ctx: &FlowContext, ray_id: &str) -> Result<TokenGrant, OAuthError>;

    /// Durable side-effects, atomically.
    async fn postconditions(
        &self,
        ctx: &FlowContext,
        grant: &TokenGrant,
        ray_id: &str,
    ) -> Result<(), OAuthError>;
}

/// Dispatches token requests to registered flows and drives the lifecycle.
pub struct FlowEngine {
    flows: HashMap<&'static str, Arc<dyn AuthorizationFlow>>,
    audit_log: AuditLogStore,
    clock: Arc<dyn Clock>,
}

impl FlowEngine {
    pub fn new(audit_log: AuditLogStore, clock: Arc<dyn Clock>) -> Self {
        Self {
            flows: HashMap::new(),
            audit_log,
            clock,
        }
    }

    /// Register a grant. Adding a new grant type to the server is exactly
    /// this: implement the three hooks and register the flow.
    pub fn register(&mut self, flow: Arc<dyn AuthorizationFlow>) {
        self.flows.insert(flow.grant_type(), flow);
    }

    pub fn supported_grant_types(&self) -> Vec<&'static str> {
        let mut grants: Vec<_> = self.flows.keys().copied().collect();
        grants.sort_unstable();
        grants
    }

    /// Execute the flow registered for `ctx.grant_type`.
    pub async fn execute(
        &self,
        ctx: &mut FlowContext,
        ray_id: &str,
    ) -> Result<TokenGrant, OAuthError> {
        let flow = self.flows.get(ctx.grant_type.as_str()).ok_or_else(|| {
            OAuthError::new(
                ErrorCode::UnsupportedGrantType,
                format!("unsupported grant_type: {}", ctx.grant_type),
            )
        })?;

        info!(flow = flow.name(), ray_id = %ray_id, "oauth.flow.start");

        if let Err(err) = flow.preconditions(ctx, ray_id).await {
            self.audit_flow_failure("preconditions", ctx, &err, ray_id).await;
            return Err(err);
        }

        let grant = match flow.run(ctx, ray_id).await {
            Ok(grant) => grant,
            Err(err) => {
                self.audit_flow_failure("run", ctx, &err, ray_id).await;
                return Err(err);
            }
        };

        if let Err(err) = flow.postconditions(ctx, &grant, ray_id).await {
            self.audit_flow_failure("postconditions", ctx, &err, ray_id).await;
            return Err(err);
        }

        info!(flow = flow.name(), ray_id = %ray_id, "oauth.flow.success");

        Ok(grant)
    }

    /// Best-effort audit entry for failed client authentication and for
    /// server-side failures in any lifecycle stage. Losing this entry never
    /// changes the outcome the caller sees.
    async fn audit_flow_failure(
        &self,
        stage: &str,
        ctx: &FlowContext,
        err: &OAuthError,
        ray_id: &str,
    ) {
        let event_type = match err.code {
            ErrorCode::InvalidClient => "client.auth_failed",
            ErrorCode::ServerError => "server_error",
            _ => return,
        };

        let now = self.clock.now();
        let entry = AuditLogEntry {
            id: Uuid::now_v7().to_string(),
            event_type: event_type.to_string(),
            subject: ctx.client_id.clone(),
            client_id: ctx.client.as_ref().map(|c| c.id.clone()),
            user_id: ctx
                .refresh_token_row
                .as_ref()
                .and_then(|row| row.user_id.clone()),
            metadata: Some(
                serde_json::json!({
                    "grant_type": ctx.grant_type,
                    "stage": stage,
                    "code": err.code.as_str(),
                })
                .to_string(),
            ),
            created_at: now,
            created_by: "system".to_string(),
            updated_at: now,
            updated_by: "system".to_string(),
        };

        if let Err(failure) = self.audit_log.append(&entry, ray_id).await {
            warn!(ray_id = %ray_id, event_type = %event_type, error = %failure, "failed to audit flow failure");
        }
    }
}

impl std::fmt::Debug for FlowEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlowEngine")
            .field("grant_types", &self.supported_grant_types())
            .finish()
    }
}
