use axum::{Extension, Json, extract::State};

use huddle_gateway::identity::Identity;
use huddle_types::models::User;

use crate::auth::AppState;
use crate::error::ApiResult;

/// GET /users: everyone the caller could start a conversation with.
pub async fn list_users(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
) -> ApiResult<Json<Vec<User>>> {
    let users = state
        .dispatcher
        .store()
        .list_users()
        .await?
        .into_iter()
        .filter(|u| u.id != identity.user_id)
        .collect();
    Ok(Json(users))
}
