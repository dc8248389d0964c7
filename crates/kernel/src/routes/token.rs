//! Token endpoint (RFC 6749 §3.2).
//!
//! Accepts `application/json` bodies. Client credentials may arrive in the
//! body or via HTTP Basic; a well-formed Basic header takes precedence, a
//! malformed one is rejected outright.

use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::envelope::new_ray_id;
use crate::oauth::condition::FlowContext;
use crate::oauth::error::OAuthError;
use crate::oauth::scope;
use crate::state::AppState;

/// Token request payload.
#[derive(Debug, Deserialize)]
pub struct TokenRequest {
    #[serde(default)]
    pub grant_type: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub client_secret: Option<String>,
}

/// RFC 6749 §5.2 error body.
#[derive(Debug, Serialize)]
struct ErrorBody {
    error: &'static str,
    error_description: String,
}

/// Build token response headers per RFC 6749 §5.1.
fn token_response_headers() -> [(axum::http::HeaderName, &'static str); 2] {
    [
        (header::CACHE_CONTROL, "no-store"),
        (header::PRAGMA, "no-cache"),
    ]
}

/// Create the token router.
pub fn router() -> Router<AppState> {
    Router::new().route("/token", post(token))
}

/// POST /token — execute the flow registered for the request's grant type.
async fn token(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<TokenRequest>, JsonRejection>,
) -> Response {
    let ray_id = headers
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(new_ray_id);

    let Ok(Json(payload)) = body else {
        return error_response(
            StatusCode::BAD_REQUEST,
            "invalid_request",
            "Request body must be valid application/json",
        );
    };

    let grant_type = match payload.grant_type.as_deref() {
        Some(grant_type) if !grant_type.is_empty() => grant_type.to_string(),
        _ => {
            return error_response(
                StatusCode::BAD_REQUEST,
                "invalid_request",
                "Missing grant_type parameter",
            );
        }
    };

    // Scope syntax check (RFC 6749 §3.3) before anything touches storage.
    if let Some(raw_scope) = payload.scope.as_deref()
        && !scope::is_valid(raw_scope)
    {
        return error_response(
            StatusCode::BAD_REQUEST,
            "invalid_request",
            "Invalid scope characters",
        );
    }

    let mut client_id = payload.client_id;
    let mut client_secret = payload.client_secret;

    // Basic credentials take precedence over body credentials when present
    // and well-formed; a malformed header fails the request.
    if let Some(value) = headers.get(header::AUTHORIZATION) {
        match parse_basic_credentials(value) {
            Ok(Some((id, secret))) => {
                client_id = Some(id);
                client_secret = Some(secret);
            }
            Ok(None) => {}
            Err(()) => {
                return error_response(
                    StatusCode::UNAUTHORIZED,
                    "invalid_client",
                    "Invalid Basic authorization header",
                );
            }
        }
    }

    let mut ctx = FlowContext::new(&grant_type);
    ctx.refresh_token = payload.refresh_token.filter(|t| !t.is_empty());
    ctx.scope = payload.scope.filter(|s| !s.is_empty());
    ctx.client_id = client_id;
    ctx.client_secret = client_secret;

    match state.flow_engine().execute(&mut ctx, &ray_id).await {
        Ok(grant) => (token_response_headers(), Json(grant)).into_response(),
        Err(err) => {
            debug!(ray_id = %ray_id, code = %err.code, "token request failed");
            oauth_error_response(&err)
        }
    }
}

/// Decode `Authorization: Basic base64(client_id:client_secret)`.
///
/// `Ok(None)` when the header is not Basic at all; `Err` when it claims to
/// be Basic but does not decode.
fn parse_basic_credentials(
    value: &axum::http::HeaderValue,
) -> Result<Option<(String, String)>, ()> {
    let raw = value.to_str().map_err(|_| ())?;

    let Some(encoded) = raw.strip_prefix("Basic ") else {
        return Ok(None);
    };

    let decoded = BASE64_STANDARD.decode(encoded.trim()).map_err(|_| ())?;
    let decoded = String::from_utf8(decoded).map_err(|_| ())?;

    let (client_id, client_secret) = decoded.split_once(':').ok_or(())?;
    Ok(Some((client_id.to_string(), client_secret.to_string())))
}

/// Map a flow error onto the RFC 6749 wire contract.
fn oauth_error_response(err: &OAuthError) -> Response {
    let rfc_code = err.rfc_code();
    let status = match rfc_code {
        "invalid_client" => StatusCode::UNAUTHORIZED,
        "server_error" => StatusCode::INTERNAL_SERVER_ERROR,
        _ => StatusCode::BAD_REQUEST,
    };

    (
        status,
        token_response_headers(),
        Json(ErrorBody {
            error: rfc_code,
            error_description: err.message.clone(),
        }),
    )
        .into_response()
}

fn error_response(status: StatusCode, error: &'static str, description: &str) -> Response {
    (
        status,
        token_response_headers(),
        Json(ErrorBody {
            error,
            error_description: description.to_string(),
        }),
    )
        .into_response()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn basic(raw: &str) -> HeaderValue {
        HeaderValue::from_str(&format!("Basic {}", BASE64_STANDARD.encode(raw))).unwrap()
    }

    #[test]
    fn basic_credentials_decode() {
        let parsed = parse_basic_credentials(&basic("web-app:s3cret")).unwrap();
        assert_eq!(
            parsed,
            Some(("web-app".to_string(), "s3cret".to_string()))
        );
    }

    #[test]
    fn secret_may_contain_colons() {
        let parsed = parse_basic_credentials(&basic("web-app:a:b:c")).unwrap();
        assert_eq!(parsed, Some(("web-app".to_string(), "a:b:c".to_string())));
    }

    #[test]
    fn non_basic_schemes_are_ignored() {
        let header = HeaderValue::from_static("Bearer some-token");
        assert_eq!(parse_basic_credentials(&header).unwrap(), None);
    }

    #[test]
    fn malformed_basic_is_rejected() {
        let no_colon = HeaderValue::from_str(&format!(
            "Basic {}",
            BASE64_STANDARD.encode("missing-separator")
        ))
        .unwrap();
        assert!(parse_basic_credentials(&no_colon).is_err());

        let not_base64 = HeaderValue::from_static("Basic !!!not-base64!!!");
        assert!(parse_basic_credentials(&not_base64).is_err());
    }
}
