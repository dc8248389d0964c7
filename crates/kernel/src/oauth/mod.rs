//! OAuth2 core: error taxonomy, secret handling, the condition chain, the
//! flow engine, the refresh-token grant, and the client registrar.

pub mod condition;
pub mod error;
pub mod flow;
pub mod refresh_token;
pub mod registrar;
pub mod scope;
pub mod secrets;

pub use condition::{Condition, ConditionChain, FlowContext};
pub use error::OAuthError;
pub use flow::{AuthorizationFlow, FlowEngine, TokenGrant};
pub use refresh_token::RefreshTokenFlow;
pub use registrar::ClientRegistrar;
pub use secrets::{Argon2SecretHasher, SecretGenerator, SecretService};
