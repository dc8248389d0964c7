//! The uniform result envelope passed through every core boundary.
//!
//! Repositories, conditions, the registrar, and the flows all report
//! failure as a value: a [`Failure`] carrying an [`ErrorCode`], a message
//! safe to show the caller, and the ray id of the request that produced it.
//! Success is the `Ok` arm of [`Envelope`], so the envelope's `status`
//! boolean is the `Result` discriminant.

use uuid::Uuid;

/// Closed vocabulary of failure codes.
///
/// The `oauth.*` group is the protocol taxonomy; the storage group is what
/// repositories speak. Higher layers translate storage codes before they
/// reach a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    // Protocol failures.
    InvalidRequest,
    InvalidClient,
    InvalidGrant,
    InvalidScope,
    UnsupportedGrantType,
    UnauthorizedClient,
    ServerError,

    // Registration failures.
    DuplicateClientIdentifier,

    // Storage failures.
    NotFound,
    InsertFailed,
    FetchFailed,
    UpdateFailed,
    DeleteFailed,
}

impl ErrorCode {
    /// Internal wire-independent code string.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::InvalidRequest => "oauth.invalid_request",
            ErrorCode::InvalidClient => "oauth.invalid_client",
            ErrorCode::InvalidGrant => "oauth.invalid_grant",
            ErrorCode::InvalidScope => "oauth.invalid_scope",
            ErrorCode::UnsupportedGrantType => "oauth.unsupported_grant_type",
            ErrorCode::UnauthorizedClient => "oauth.unauthorized_client",
            ErrorCode::ServerError => "oauth.server_error",
            ErrorCode::DuplicateClientIdentifier => "DUPLICATE_CLIENT_IDENTIFIER",
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::InsertFailed => "INSERT_FAILED",
            ErrorCode::FetchFailed => "FETCH_FAILED",
            ErrorCode::UpdateFailed => "UPDATE_FAILED",
            ErrorCode::DeleteFailed => "DELETE_FAILED",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure half of the envelope.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{error_code}: {client_message}")]
pub struct Failure {
    pub error_code: ErrorCode,
    /// Message safe to surface to the caller.
    pub client_message: String,
    pub ray_id: String,
}

impl Failure {
    pub fn new(error_code: ErrorCode, client_message: impl Into<String>, ray_id: &str) -> Self {
        Self {
            error_code,
            client_message: client_message.into(),
            ray_id: ray_id.to_string(),
        }
    }
}

/// Uniform success/failure value returned by every async operation in the core.
pub type Envelope<T> = Result<T, Failure>;

/// Mint a fresh ray id for a request with no inbound correlation id.
pub fn new_ray_id() -> String {
    Uuid::now_v7().to_string()
}
