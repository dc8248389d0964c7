#![allow(clippy::unwrap_used, clippy::expect_used)]
//! Common test utilities for integration tests.
//!
//! Tests drive the REAL kernel: the actual router, flow engine, registrar,
//! and stores over an in-memory SQLite database, with a fixed clock at 1000.

#![allow(dead_code)]

use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, Response, header};
use http_body_util::BodyExt;
use sqlx::sqlite::SqlitePoolOptions;
use tower::ServiceExt;
use uuid::Uuid;

use tollgate_kernel::clock::{Clock, FixedClock};
use tollgate_kernel::models::{Client, RefreshToken, RegistrationRequest};
use tollgate_kernel::{AppState, Config};

/// Fixed test instant.
pub const TEST_NOW: i64 = 1000;

/// Test application wrapper using the real kernel routes and state.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    pub clock: Arc<FixedClock>,
}

impl TestApp {
    /// Default app: rotation and family revocation on.
    pub async fn new() -> Self {
        Self::with_policies(true, true).await
    }

    pub async fn with_policies(rotate_refresh_tokens: bool, revoke_family_on_reuse: bool) -> Self {
        let config = Config {
            port: 0,
            database_url: "sqlite::memory:".to_string(),
            database_max_connections: 1,
            rotate_refresh_tokens,
            revoke_family_on_reuse,
            hasher_concurrency: 2,
        };

        // A single connection keeps the in-memory database alive and shared.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect(&config.database_url)
            .await
            .expect("failed to open in-memory database");

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .expect("failed to run migrations");

        let clock = FixedClock::new(TEST_NOW);
        let clock_dyn: Arc<dyn Clock> = clock.clone();

        let state =
            AppState::from_parts(config, pool, clock_dyn).expect("failed to build app state");
        let router = tollgate_kernel::routes::build_router(state.clone());

        Self {
            router,
            state,
            clock,
        }
    }

    /// Send a request through the real router.
    pub async fn request(&self, request: Request<Body>) -> Response<Body> {
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("request failed")
    }

    /// POST /token with a JSON body.
    pub async fn post_token(&self, body: &serde_json::Value) -> Response<Body> {
        let request = Request::post("/token")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(serde_json::to_vec(body).unwrap()))
            .unwrap();

        self.request(request).await
    }

    /// Register the standard confidential test client and return it
    /// (including the one-time secret).
    pub async fn register_scenario_client(&self) -> Client {
        self.state
            .registrar()
            .register_client(&scenario_registration(), "ray-test")
            .await
            .expect("scenario registration failed")
    }

    /// Insert a refresh token row directly; returns its id.
    pub async fn seed_refresh_token(
        &self,
        client_row_id: &str,
        user_id: &str,
        token: &str,
        scopes: &str,
    ) -> String {
        let now = self.clock.now();
        let row = RefreshToken {
            id: Uuid::now_v7().to_string(),
            token: token.to_string(),
            client_id: client_row_id.to_string(),
            user_id: Some(user_id.to_string()),
            scopes: Some(scopes.to_string()),
            revoked_at: None,
            created_at: now,
            created_by: "test".to_string(),
            updated_at: now,
            updated_by: "test".to_string(),
        };

        self.state
            .storage()
            .refresh_tokens
            .insert(&row, "ray-test")
            .await
            .expect("failed to seed refresh token");

        row.id
    }

    /// Count rows in a table, optionally filtered by a WHERE fragment.
    pub async fn count_rows(&self, table: &str, where_clause: &str) -> i64 {
        let sql = if where_clause.is_empty() {
            format!("SELECT COUNT(*) FROM {table}")
        } else {
            format!("SELECT COUNT(*) FROM {table} WHERE {where_clause}")
        };

        let row: (i64,) = sqlx::query_as(&sql)
            .fetch_one(self.state.db())
            .await
            .expect("count query failed");
        row.0
    }
}

/// A confidential web-app registration request.
pub fn scenario_registration() -> RegistrationRequest {
    RegistrationRequest {
        user_id: "user_123".to_string(),
        client_identifier: "web-app".to_string(),
        is_confidential: true,
        redirect_uris: vec!["https://a/cb".to_string()],
        grant_types: vec![
            "authorization_code".to_string(),
            "refresh_token".to_string(),
        ],
        response_types: vec!["code".to_string()],
        scopes: vec!["read".to_string(), "write".to_string()],
        require_pkce: true,
        pkce_methods: Some(vec!["S256".to_string()]),
        access_token_ttl: 3600,
        refresh_token_ttl: Some(2_592_000),
        authorization_code_ttl: 600,
        max_active_access_tokens: None,
        max_active_refresh_tokens: None,
        device_code_ttl: None,
        device_poll_interval: None,
        metadata: None,
    }
}

/// Read a JSON response body.
pub async fn response_json(response: Response<Body>) -> serde_json::Value {
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("failed to read body")
        .to_bytes();
    serde_json::from_slice(&bytes).expect("body was not JSON")
}
