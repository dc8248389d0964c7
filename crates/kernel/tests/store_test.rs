#![allow(clippy::unwrap_used, clippy::expect_used)]
//! Integration tests for the repositories.

use uuid::Uuid;

use tollgate_kernel::envelope::ErrorCode;
use tollgate_kernel::models::{AccessToken, AuditLogEntry};

mod common;
use common::{TEST_NOW, TestApp};

fn access_token(
    id: &str,
    token: &str,
    client_id: &str,
    refresh_token_id: &str,
    created_at: i64,
) -> AccessToken {
    AccessToken {
        id: id.to_string(),
        token: token.to_string(),
        client_id: client_id.to_string(),
        user_id: Some("user_1".to_string()),
        scopes: Some("read".to_string()),
        refresh_token_id: Some(refresh_token_id.to_string()),
        expires_at: created_at + 3600,
        revoked_at: None,
        created_at,
        created_by: "test".to_string(),
        updated_at: created_at,
        updated_by: "test".to_string(),
    }
}

// =============================================================================
// Client store
// =============================================================================

#[tokio::test]
async fn client_crud_round_trip() {
    let app = TestApp::new().await;
    let client = app.register_scenario_client().await;
    let store = &app.state.storage().clients;

    let mut row = store.get_by_id(&client.id, "ray-test").await.unwrap();
    assert_eq!(row.client_identifier, "web-app");

    row.scopes = Some("read".to_string());
    row.updated_at = TEST_NOW + 5;
    store.update(&row, "ray-test").await.unwrap();

    let updated = store.get_by_id(&client.id, "ray-test").await.unwrap();
    assert_eq!(updated.scopes.as_deref(), Some("read"));
    assert_eq!(updated.updated_at, TEST_NOW + 5);

    store.delete_by_id(&client.id, "ray-test").await.unwrap();
    let missing = store.get_by_id(&client.id, "ray-test").await.unwrap_err();
    assert_eq!(missing.error_code, ErrorCode::NotFound);

    // Deleting the identity cascades to its configuration.
    assert_eq!(app.count_rows("oauth_client_configs", "").await, 0);
}

#[tokio::test]
async fn unknown_ids_report_not_found() {
    let app = TestApp::new().await;

    let failure = app
        .state
        .storage()
        .clients
        .delete_by_id("missing", "ray-test")
        .await
        .unwrap_err();
    assert_eq!(failure.error_code, ErrorCode::NotFound);

    let failure = app
        .state
        .storage()
        .refresh_tokens
        .get_by_token("missing", "ray-test")
        .await
        .unwrap_err();
    assert_eq!(failure.error_code, ErrorCode::NotFound);
    assert_eq!(failure.ray_id, "ray-test");
}

// =============================================================================
// Refresh token store
// =============================================================================

#[tokio::test]
async fn revocation_is_permanent() {
    let app = TestApp::new().await;
    let client = app.register_scenario_client().await;
    let token_id = app
        .seed_refresh_token(&client.id, "user_1", "valid", "read")
        .await;
    let store = &app.state.storage().refresh_tokens;

    store.revoke(&token_id, TEST_NOW + 10, "ray-test").await.unwrap();

    let row = store.get_by_id(&token_id, "ray-test").await.unwrap();
    assert_eq!(row.revoked_at, Some(TEST_NOW + 10));
    assert!(!row.is_active());

    // A second revocation finds nothing to transition and the original
    // timestamp stands.
    let failure = store
        .revoke(&token_id, TEST_NOW + 99, "ray-test")
        .await
        .unwrap_err();
    assert_eq!(failure.error_code, ErrorCode::NotFound);

    let row = store.get_by_id(&token_id, "ray-test").await.unwrap();
    assert_eq!(row.revoked_at, Some(TEST_NOW + 10));
}

// =============================================================================
// Access token store: quota lookups
// =============================================================================

#[tokio::test]
async fn quota_lookups_are_fifo_with_id_tiebreak() {
    let app = TestApp::new().await;
    let client = app.register_scenario_client().await;
    let refresh_id = app
        .seed_refresh_token(&client.id, "user_1", "valid", "read")
        .await;
    let store = &app.state.storage().access_tokens;

    // Two tokens share created_at 1000; "aa" sorts before "ab". A third is
    // newer, a fourth is already revoked and never counts.
    store
        .insert(&access_token("ab", "t2", &client.id, &refresh_id, 1000), "ray-test")
        .await
        .unwrap();
    store
        .insert(&access_token("aa", "t1", &client.id, &refresh_id, 1000), "ray-test")
        .await
        .unwrap();
    store
        .insert(&access_token("zz", "t3", &client.id, &refresh_id, 1005), "ray-test")
        .await
        .unwrap();
    let mut revoked = access_token("rr", "t4", &client.id, &refresh_id, 999);
    revoked.revoked_at = Some(999);
    store.insert(&revoked, "ray-test").await.unwrap();

    let count = store
        .count_active_by_refresh_token(&refresh_id, TEST_NOW, "ray-test")
        .await
        .unwrap();
    assert_eq!(count, 3);

    let oldest = store
        .get_oldest_active_by_refresh_token(&refresh_id, TEST_NOW, "ray-test")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(oldest.id, "aa");

    store.revoke("aa", TEST_NOW, "ray-test").await.unwrap();
    let oldest = store
        .get_oldest_active_by_refresh_token(&refresh_id, TEST_NOW, "ray-test")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(oldest.id, "ab");

    // Expired tokens drop out of the active set.
    let count = store
        .count_active_by_refresh_token(&refresh_id, TEST_NOW + 4700, "ray-test")
        .await
        .unwrap();
    assert_eq!(count, 0);

    store.delete_by_id("zz", "ray-test").await.unwrap();
    let failure = store.get_by_id("zz", "ray-test").await.unwrap_err();
    assert_eq!(failure.error_code, ErrorCode::NotFound);
}

// =============================================================================
// Audit log store
// =============================================================================

#[tokio::test]
async fn audit_log_appends_and_lists_in_order() {
    let app = TestApp::new().await;
    let store = &app.state.storage().audit_log;

    for (step, subject) in ["first", "second"].iter().enumerate() {
        let entry = AuditLogEntry {
            id: Uuid::now_v7().to_string(),
            event_type: "client.registered".to_string(),
            subject: Some((*subject).to_string()),
            client_id: Some("client_1".to_string()),
            user_id: None,
            metadata: None,
            created_at: TEST_NOW + step as i64,
            created_by: "test".to_string(),
            updated_at: TEST_NOW + step as i64,
            updated_by: "test".to_string(),
        };
        store.append(&entry, "ray-test").await.unwrap();

        let fetched = store.get_by_id(&entry.id, "ray-test").await.unwrap();
        assert_eq!(fetched.subject, entry.subject);
    }

    let entries = store
        .list_by_event_type("client.registered", "ray-test")
        .await
        .unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].subject.as_deref(), Some("first"));
    assert_eq!(entries[1].subject.as_deref(), Some("second"));

    assert!(
        store
            .list_by_event_type("token.issued", "ray-test")
            .await
            .unwrap()
            .is_empty()
    );
}
