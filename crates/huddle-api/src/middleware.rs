use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use axum_extra::TypedHeader;
use axum_extra::headers::{Authorization, authorization::Bearer};

use huddle_types::error::ChatError;

use crate::auth::AppState;
use crate::error::ApiResult;

/// Validates the bearer token and stores the caller's `Identity` in the
/// request extensions.
pub async fn require_auth(
    State(state): State<AppState>,
    bearer: Option<TypedHeader<Authorization<Bearer>>>,
    mut req: Request,
    next: Next,
) -> ApiResult<Response> {
    let TypedHeader(Authorization(bearer)) = bearer.ok_or(ChatError::Unauthenticated)?;
    let identity = state
        .verifier
        .verify(bearer.token())
        .ok_or(ChatError::Unauthenticated)?;

    req.extensions_mut().insert(identity);
    Ok(next.run(req).await)
}
