pub mod health;
pub mod inbound;
pub mod sessions;

use axum::routing::{get, post};
use axum::Router;

use crate::state::AppState;

/// Build the API router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/health", get(health::health))
        // Inbound (channel connector contract)
        .route("/v1/inbound", post(inbound::inbound))
        // Session directory
        .route("/v1/sessions", get(sessions::list_sessions))
        .route("/v1/sessions/:token", get(sessions::get_session))
}
