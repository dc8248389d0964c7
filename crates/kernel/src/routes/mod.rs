//! HTTP route handlers.

pub mod health;
pub mod token;

use axum::Router;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Assemble the full application router. Shared by the server binary and the
/// integration tests so both drive the same surface.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(health::router())
        .merge(token::router())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
