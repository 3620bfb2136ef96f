//! Inbound channel contract: the normalized envelope that connectors post.
//!
//! `POST /v1/inbound` accepts `{channel, chat_id, text}` from any connector
//! and returns the replies to deliver, in order.  Webhook verification is
//! the connector's job.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};

use crate::dispatch::InboundMessage;
use crate::state::AppState;

pub async fn inbound(
    State(state): State<AppState>,
    Json(msg): Json<InboundMessage>,
) -> impl IntoResponse {
    if msg.channel.trim().is_empty() || msg.chat_id.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({ "error": "channel and chat_id are required" })),
        )
            .into_response();
    }

    tracing::debug!(channel = %msg.channel, chat_id = %msg.chat_id, "inbound message");
    let replies = state.dispatcher.handle(&msg).await;
    Json(serde_json::json!({ "replies": replies })).into_response()
}
