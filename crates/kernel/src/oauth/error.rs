//! Flow-boundary error type.

use thiserror::Error;

use crate::envelope::{ErrorCode, Failure};

/// Error surfaced by a flow (or the engine) to the transport layer.
///
/// Carries the internal error code plus a message safe to render to the
/// client. Transport maps [`OAuthError::rfc_code`] onto RFC 6749 wire codes
/// and status lines.
#[derive(Debug, Clone, Error)]
#[error("{code}: {message}")]
pub struct OAuthError {
    pub code: ErrorCode,
    pub message: String,
}

impl OAuthError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn server_error(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ServerError, message)
    }

    /// RFC 6749 error code: the internal `oauth.` prefix stripped.
    ///
    /// Codes outside the protocol vocabulary (storage failures leaking this
    /// far, registration collisions) render as `server_error` /
    /// `invalid_request` — they are not part of the wire contract.
    pub fn rfc_code(&self) -> &'static str {
        match self.code {
            ErrorCode::InvalidRequest => "invalid_request",
            ErrorCode::InvalidClient => "invalid_client",
            ErrorCode::InvalidGrant => "invalid_grant",
            ErrorCode::InvalidScope => "invalid_scope",
            ErrorCode::UnsupportedGrantType => "unsupported_grant_type",
            ErrorCode::UnauthorizedClient => "unauthorized_client",
            ErrorCode::DuplicateClientIdentifier => "invalid_request",
            ErrorCode::ServerError
            | ErrorCode::NotFound
            | ErrorCode::InsertFailed
            | ErrorCode::FetchFailed
            | ErrorCode::UpdateFailed
            | ErrorCode::DeleteFailed => "server_error",
        }
    }
}

/// Storage-layer failures crossing the flow boundary become `SERVER_ERROR`;
/// protocol failures keep their code.
impl From<Failure> for OAuthError {
    fn from(failure: Failure) -> Self {
        let code = match failure.error_code {
            ErrorCode::NotFound
            | ErrorCode::InsertFailed
            | ErrorCode::FetchFailed
            | ErrorCode::UpdateFailed
            | ErrorCode::DeleteFailed => ErrorCode::ServerError,
            other => other,
        };

        Self {
            code,
            message: failure.client_message,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn rfc_code_strips_oauth_prefix() {
        let err = OAuthError::new(ErrorCode::InvalidGrant, "bad token");
        assert_eq!(err.rfc_code(), "invalid_grant");
        assert_eq!(err.code.as_str(), "oauth.invalid_grant");
    }

    #[test]
    fn storage_failures_become_server_error() {
        let failure = Failure::new(ErrorCode::FetchFailed, "db down", "ray-1");
        let err = OAuthError::from(failure);
        assert_eq!(err.code, ErrorCode::ServerError);
        assert_eq!(err.rfc_code(), "server_error");
    }

    #[test]
    fn protocol_failures_keep_their_code() {
        let failure = Failure::new(ErrorCode::InvalidScope, "too broad", "ray-1");
        let err = OAuthError::from(failure);
        assert_eq!(err.code, ErrorCode::InvalidScope);
    }
}
