//! Ordered precondition execution.
//!
//! A [`ConditionChain`] runs its conditions strictly in declaration order and
//! stops at the first failure envelope. Conditions report business failures
//! as values; infrastructure trouble surfaces as a failure with
//! `SERVER_ERROR`. A condition may write derived values into the shared
//! [`FlowContext`] so later conditions avoid re-reading storage.

use async_trait::async_trait;
use tracing::debug;

use crate::envelope::Envelope;
use crate::models::{ClientConfig, OAuthClient, RefreshToken};

/// Mutable per-request state threaded through a flow.
///
/// Request inputs come from the transport; derived fields are filled by
/// conditions as they resolve rows.
#[derive(Default, Clone)]
pub struct FlowContext {
    pub grant_type: String,
    pub refresh_token: Option<String>,
    pub scope: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,

    // Derived by conditions.
    pub client: Option<OAuthClient>,
    pub client_config: Option<ClientConfig>,
    pub refresh_token_row: Option<RefreshToken>,
    pub effective_scope: Option<String>,
}

impl FlowContext {
    pub fn new(grant_type: &str) -> Self {
        Self {
            grant_type: grant_type.to_string(),
            ..Self::default()
        }
    }
}

// Token and secret material never reaches log output.
impl std::fmt::Debug for FlowContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlowContext")
            .field("grant_type", &self.grant_type)
            .field("client_id", &self.client_id)
            .field("scope", &self.scope)
            .field("effective_scope", &self.effective_scope)
            .finish_non_exhaustive()
    }
}

/// A single precondition over the flow context.
#[async_trait]
pub trait Condition: Send + Sync {
    fn name(&self) -> &'static str;

    /// Return `Ok(())` to continue, a failure envelope to stop the chain.
    /// Must not panic for business failures.
    async fn check(&self, ctx: &mut FlowContext, ray_id: &str) -> Envelope<()>;
}

/// Immutable ordered sequence of conditions.
pub struct ConditionChain {
    conditions: Vec<Box<dyn Condition>>,
}

impl ConditionChain {
    pub fn new(conditions: Vec<Box<dyn Condition>>) -> Self {
        Self { conditions }
    }

    /// Run every condition in order; the first failure short-circuits.
    pub async fn execute(&self, ctx: &mut FlowContext, ray_id: &str) -> Envelope<()> {
        for condition in &self.conditions {
            debug!(condition = condition.name(), ray_id = %ray_id, "checking condition");
            condition.check(ctx, ray_id).await?;
        }

        Ok(())
    }
}

impl std::fmt::Debug for ConditionChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConditionChain")
            .field("len", &self.conditions.len())
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::envelope::{ErrorCode, Failure};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Recorder {
        calls: Arc<AtomicUsize>,
        fail: bool,
    }

    #[async_trait]
    impl Condition for Recorder {
        fn name(&self) -> &'static str {
            "recorder"
        }

        async fn check(&self, _ctx: &mut FlowContext, ray_id: &str) -> Envelope<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(Failure::new(ErrorCode::InvalidRequest, "boom", ray_id));
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn first_failure_short_circuits() {
        let calls = Arc::new(AtomicUsize::new(0));
        let chain = ConditionChain::new(vec![
            Box::new(Recorder {
                calls: calls.clone(),
                fail: false,
            }),
            Box::new(Recorder {
                calls: calls.clone(),
                fail: true,
            }),
            Box::new(Recorder {
                calls: calls.clone(),
                fail: false,
            }),
        ]);

        let mut ctx = FlowContext::new("refresh_token");
        let result = chain.execute(&mut ctx, "ray-1").await;

        let failure = result.unwrap_err();
        assert_eq!(failure.error_code, ErrorCode::InvalidRequest);
        // The third condition never ran.
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn all_passing_chain_succeeds() {
        let calls = Arc::new(AtomicUsize::new(0));
        let chain = ConditionChain::new(vec![
            Box::new(Recorder {
                calls: calls.clone(),
                fail: false,
            }),
            Box::new(Recorder {
                calls: calls.clone(),
                fail: false,
            }),
        ]);

        let mut ctx = FlowContext::new("refresh_token");
        assert!(chain.execute(&mut ctx, "ray-1").await.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
