#![allow(clippy::unwrap_used, clippy::expect_used)]
//! Integration tests for client registration and administration.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;

use tollgate_kernel::envelope::ErrorCode;

mod common;
use common::{TEST_NOW, TestApp, scenario_registration};

// =============================================================================
// Registration
// =============================================================================

#[tokio::test]
async fn confidential_registration_returns_one_time_secret() {
    let app = TestApp::new().await;

    let client = app.register_scenario_client().await;

    assert!(!client.id.is_empty());
    assert_eq!(client.client_identifier, "web-app");
    assert!(client.is_enabled);
    assert_eq!(client.created_at, TEST_NOW);

    // The returned secret is non-empty, URL-safe base64, and not the hash.
    let secret = client.client_secret.clone().unwrap();
    assert!(!secret.is_empty());
    assert!(URL_SAFE_NO_PAD.decode(secret.as_bytes()).is_ok());

    let stored = app
        .state
        .registrar()
        .get_client_by_identifier("web-app", "ray-test")
        .await
        .unwrap();
    let hash = stored.client_secret_hash.clone().unwrap();
    assert!(hash.starts_with("$argon2"));
    assert_ne!(hash, secret);

    // The plaintext never reaches a table (P1).
    let rows: Vec<(String,)> =
        sqlx::query_as("SELECT client_secret_hash FROM oauth_clients WHERE client_secret_hash LIKE ?")
            .bind(format!("%{secret}%"))
            .fetch_all(app.state.db())
            .await
            .unwrap();
    assert!(rows.is_empty());
}

#[tokio::test]
async fn registration_writes_identity_and_config_as_a_pair() {
    let app = TestApp::new().await;

    let client = app.register_scenario_client().await;

    // Exactly one row in each table, keyed consistently (P2).
    assert_eq!(
        app.count_rows("oauth_clients", "client_identifier = 'web-app'")
            .await,
        1
    );
    assert_eq!(app.count_rows("oauth_client_configs", "").await, 1);

    let config = app
        .state
        .storage()
        .client_configs
        .get_by_client_id(&client.id, "ray-test")
        .await
        .unwrap();
    assert_eq!(config.access_token_ttl, 3600);
    assert_eq!(config.refresh_token_ttl, Some(2_592_000));
    assert_eq!(config.authorization_code_ttl, 600);
    assert!(config.require_pkce);
    assert_eq!(config.pkce_methods.as_deref(), Some("S256"));
    assert_eq!(config.response_types, "code");

    // Scopes stored canonicalized, insertion order preserved.
    let identity = app
        .state
        .storage()
        .clients
        .get_by_id(&client.id, "ray-test")
        .await
        .unwrap();
    assert_eq!(identity.scopes.as_deref(), Some("read write"));
    assert_eq!(identity.grant_types, "authorization_code refresh_token");
    assert!(identity.is_confidential);

    // Registration is audited.
    let events = app
        .state
        .storage()
        .audit_log
        .list_by_event_type("client.registered", "ray-test")
        .await
        .unwrap();
    assert_eq!(events.len(), 1);
}

#[tokio::test]
async fn duplicate_identifier_is_rejected() {
    let app = TestApp::new().await;

    app.register_scenario_client().await;

    let failure = app
        .state
        .registrar()
        .register_client(&scenario_registration(), "ray-test")
        .await
        .unwrap_err();

    assert_eq!(failure.error_code, ErrorCode::DuplicateClientIdentifier);

    // The row count for that identifier is still 1, and no orphan config
    // appeared.
    assert_eq!(
        app.count_rows("oauth_clients", "client_identifier = 'web-app'")
            .await,
        1
    );
    assert_eq!(app.count_rows("oauth_client_configs", "").await, 1);
}

#[tokio::test]
async fn public_client_has_no_secret() {
    let app = TestApp::new().await;

    let mut registration = scenario_registration();
    registration.client_identifier = "spa".to_string();
    registration.is_confidential = false;

    let client = app
        .state
        .registrar()
        .register_client(&registration, "ray-test")
        .await
        .unwrap();

    assert!(client.client_secret.is_none());

    let stored = app
        .state
        .registrar()
        .get_client_by_id(&client.id, "ray-test")
        .await
        .unwrap();
    assert!(stored.client_secret_hash.is_none());
    assert!(!stored.is_confidential);
}

#[tokio::test]
async fn invalid_registrations_leave_no_rows() {
    let app = TestApp::new().await;

    let mut missing_redirects = scenario_registration();
    missing_redirects.redirect_uris = vec![];

    let mut relative_redirect = scenario_registration();
    relative_redirect.redirect_uris = vec!["/cb".to_string()];

    let mut unknown_grant = scenario_registration();
    unknown_grant.grant_types = vec!["password".to_string()];

    let mut zero_ttl = scenario_registration();
    zero_ttl.access_token_ttl = 0;

    for request in [
        missing_redirects,
        relative_redirect,
        unknown_grant,
        zero_ttl,
    ] {
        let failure = app
            .state
            .registrar()
            .register_client(&request, "ray-test")
            .await
            .unwrap_err();
        assert_eq!(failure.error_code, ErrorCode::InvalidRequest);
    }

    assert_eq!(app.count_rows("oauth_clients", "").await, 0);
    assert_eq!(app.count_rows("oauth_client_configs", "").await, 0);
}

#[tokio::test]
async fn metadata_round_trips_as_json() {
    let app = TestApp::new().await;

    let mut registration = scenario_registration();
    registration.metadata = Some(
        [("team".to_string(), "payments".to_string())]
            .into_iter()
            .collect(),
    );

    let client = app
        .state
        .registrar()
        .register_client(&registration, "ray-test")
        .await
        .unwrap();

    let config = app
        .state
        .storage()
        .client_configs
        .get_by_client_id(&client.id, "ray-test")
        .await
        .unwrap();

    let metadata: serde_json::Value =
        serde_json::from_str(config.metadata.as_deref().unwrap()).unwrap();
    assert_eq!(metadata["team"], "payments");
}

// =============================================================================
// Reads
// =============================================================================

#[tokio::test]
async fn lookups_find_the_stored_client() {
    let app = TestApp::new().await;
    let client = app.register_scenario_client().await;

    let by_id = app
        .state
        .registrar()
        .get_client_by_id(&client.id, "ray-test")
        .await
        .unwrap();
    assert_eq!(by_id.client_identifier, "web-app");

    let by_identifier = app
        .state
        .registrar()
        .get_client_by_identifier("web-app", "ray-test")
        .await
        .unwrap();
    assert_eq!(by_identifier.id, client.id);

    let missing = app
        .state
        .registrar()
        .get_client_by_identifier("nobody", "ray-test")
        .await
        .unwrap_err();
    assert_eq!(missing.error_code, ErrorCode::NotFound);
}

// =============================================================================
// Administrative mutations
// =============================================================================

#[tokio::test]
async fn enable_disable_round_trip() {
    let app = TestApp::new().await;
    let client = app.register_scenario_client().await;

    app.state
        .registrar()
        .set_client_enabled(&client.id, false, "admin", "ray-test")
        .await
        .unwrap();

    let stored = app
        .state
        .registrar()
        .get_client_by_id(&client.id, "ray-test")
        .await
        .unwrap();
    assert!(!stored.is_enabled);

    app.state
        .registrar()
        .set_client_enabled(&client.id, true, "admin", "ray-test")
        .await
        .unwrap();

    let stored = app
        .state
        .registrar()
        .get_client_by_id(&client.id, "ray-test")
        .await
        .unwrap();
    assert!(stored.is_enabled);

    let disabled_events = app
        .state
        .storage()
        .audit_log
        .list_by_event_type("client.disabled", "ray-test")
        .await
        .unwrap();
    assert_eq!(disabled_events.len(), 1);
}

#[tokio::test]
async fn secret_rotation_invalidates_the_old_secret() {
    let app = TestApp::new().await;
    let client = app.register_scenario_client().await;
    let old_secret = client.client_secret.clone().unwrap();

    let new_secret = app
        .state
        .registrar()
        .rotate_client_secret(&client.id, "admin", "ray-test")
        .await
        .unwrap();
    assert_ne!(new_secret, old_secret);

    let stored = app
        .state
        .registrar()
        .get_client_by_id(&client.id, "ray-test")
        .await
        .unwrap();
    let hash = stored.client_secret_hash.as_deref().unwrap();

    // Verification is bound to the owner/client context used at registration.
    let secrets = app.state.secrets();
    assert!(
        secrets
            .verify(&new_secret, hash, &stored.created_by, &stored.id)
            .await
            .unwrap()
    );
    assert!(
        !secrets
            .verify(&old_secret, hash, &stored.created_by, &stored.id)
            .await
            .unwrap()
    );
}

#[tokio::test]
async fn public_client_secret_rotation_is_rejected() {
    let app = TestApp::new().await;

    let mut registration = scenario_registration();
    registration.client_identifier = "spa".to_string();
    registration.is_confidential = false;
    let client = app
        .state
        .registrar()
        .register_client(&registration, "ray-test")
        .await
        .unwrap();

    let failure = app
        .state
        .registrar()
        .rotate_client_secret(&client.id, "admin", "ray-test")
        .await
        .unwrap_err();
    assert_eq!(failure.error_code, ErrorCode::InvalidRequest);
}
