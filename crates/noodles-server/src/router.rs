//! Axum router construction.

use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::state::AppState;
use crate::ws;

/// Build the router: `GET /` upgrades to a scene session.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(ws::ws_session))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
