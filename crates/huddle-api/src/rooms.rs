use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

use huddle_gateway::identity::Identity;
use huddle_types::api::{AddMemberRequest, DirectRoomRequest, GroupRoomRequest, RoomResponse};
use huddle_types::error::ChatError;
use huddle_types::models::RoomKind;

use crate::auth::AppState;
use crate::error::ApiResult;

#[derive(Debug, Deserialize)]
pub struct RoomFilter {
    pub kind: Option<RoomKind>,
}

/// GET /rooms
pub async fn list_rooms(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Query(filter): Query<RoomFilter>,
) -> ApiResult<Json<Vec<RoomResponse>>> {
    let rooms = state
        .dispatcher
        .store()
        .list_rooms_for_user(identity.user_id, filter.kind)
        .await?
        .into_iter()
        .map(|room| RoomResponse::for_viewer(room, identity.user_id))
        .collect();
    Ok(Json(rooms))
}

/// POST /rooms/direct: returns the existing conversation when there is one.
pub async fn open_direct(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Json(req): Json<DirectRoomRequest>,
) -> ApiResult<Json<RoomResponse>> {
    let room = state
        .dispatcher
        .store()
        .get_or_create_direct(identity.user_id, req.user_id)
        .await?;

    state.dispatcher.announce_room(&room, [req.user_id]);
    Ok(Json(RoomResponse::for_viewer(room, identity.user_id)))
}

/// POST /rooms/group
pub async fn create_group(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Json(req): Json<GroupRoomRequest>,
) -> ApiResult<impl IntoResponse> {
    let room = state
        .dispatcher
        .store()
        .create_group(identity.user_id, req.name, req.member_ids)
        .await?;

    info!(
        "{} created group {} with {} members",
        identity.username,
        room.id,
        room.members.len()
    );
    let others: Vec<Uuid> = room
        .member_ids()
        .filter(|&id| id != identity.user_id)
        .collect();
    state.dispatcher.announce_room(&room, others);

    Ok((
        StatusCode::CREATED,
        Json(RoomResponse::for_viewer(room, identity.user_id)),
    ))
}

/// POST /rooms/{room_id}/members: only existing members may add others.
pub async fn add_member(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(room_id): Path<Uuid>,
    Json(req): Json<AddMemberRequest>,
) -> ApiResult<Json<RoomResponse>> {
    let store = state.dispatcher.store();
    if !store.get_room(room_id).await?.has_member(identity.user_id) {
        return Err(ChatError::Forbidden.into());
    }

    let room = store.add_member(room_id, req.user_id).await?;
    state.dispatcher.announce_room(&room, [req.user_id]);
    Ok(Json(RoomResponse::for_viewer(room, identity.user_id)))
}
