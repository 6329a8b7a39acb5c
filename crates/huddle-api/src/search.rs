use axum::{
    Extension, Json,
    extract::{Query, State},
};
use serde::Deserialize;

use huddle_gateway::identity::Identity;
use huddle_types::api::SearchHit;

use crate::auth::AppState;
use crate::error::ApiResult;

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    pub q: String,
    pub limit: Option<u32>,
}

/// GET /search: matches across every room the caller belongs to.
pub async fn search_messages(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Query(query): Query<SearchQuery>,
) -> ApiResult<Json<Vec<SearchHit>>> {
    let hits = state
        .dispatcher
        .search(identity.user_id, query.q, query.limit)
        .await?
        .into_iter()
        .map(|m| SearchHit {
            message_id: m.id,
            content: m.content,
            sender_name: m.sender_name,
            timestamp: m.created_at,
            room_id: m.room_id,
        })
        .collect();
    Ok(Json(hits))
}
