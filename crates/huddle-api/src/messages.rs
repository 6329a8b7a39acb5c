use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use uuid::Uuid;

use huddle_gateway::identity::Identity;
use huddle_types::api::SendMessageRequest;
use huddle_types::models::Message;

use crate::auth::AppState;
use crate::error::ApiResult;

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub since_id: Option<i64>,
    pub limit: Option<u32>,
}

/// GET /rooms/{room_id}/messages
pub async fn get_messages(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(room_id): Path<Uuid>,
    Query(query): Query<HistoryQuery>,
) -> ApiResult<Json<Vec<Message>>> {
    let messages = state
        .dispatcher
        .history(identity.user_id, room_id, query.since_id, query.limit)
        .await?;
    Ok(Json(messages))
}

/// POST /rooms/{room_id}/messages: same path as a gateway `Send`, so live
/// subscribers see the message as well.
pub async fn send_message(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(room_id): Path<Uuid>,
    Json(req): Json<SendMessageRequest>,
) -> ApiResult<impl IntoResponse> {
    let message = state
        .dispatcher
        .send_message(
            &identity,
            room_id,
            req.content,
            req.message_type,
            req.attachment,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(message)))
}
