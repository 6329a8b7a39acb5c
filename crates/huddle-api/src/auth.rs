use std::sync::Arc;

use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
    password_hash::{SaltString, rand_core::OsRng},
};
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use tracing::info;

use huddle_gateway::dispatcher::Dispatcher;
use huddle_gateway::identity::TokenVerifier;
use huddle_types::api::{AuthResponse, LoginRequest, RegisterRequest};
use huddle_types::error::ChatError;

use crate::attachments::AttachmentStore;
use crate::error::{ApiError, ApiResult};

/// Lifetime of issued session tokens.
const TOKEN_TTL_DAYS: i64 = 30;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub dispatcher: Dispatcher,
    pub verifier: TokenVerifier,
    pub attachments: AttachmentStore,
}

pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> ApiResult<impl IntoResponse> {
    let username = req.username.trim().to_string();
    let name_len = username.chars().count();
    if !(3..=32).contains(&name_len) {
        return Err(ChatError::invalid("username must be 3-32 characters").into());
    }
    if req.password.chars().count() < 8 {
        return Err(ChatError::invalid("password must be at least 8 characters").into());
    }

    let store = state.dispatcher.store();
    if store.credentials(username.clone()).await?.is_some() {
        return Err(ApiError::Status(StatusCode::CONFLICT, "username taken"));
    }

    let salt = SaltString::generate(&mut OsRng);
    let password_hash = Argon2::default()
        .hash_password(req.password.as_bytes(), &salt)
        .map_err(|e| ApiError::internal("password hashing failed", e))?
        .to_string();

    let user = match store.create_user(username.clone(), password_hash).await {
        Ok(user) => user,
        Err(e) => {
            // Lost a race with a concurrent registration of the same name.
            if store.credentials(username).await?.is_some() {
                return Err(ApiError::Status(StatusCode::CONFLICT, "username taken"));
            }
            return Err(e.into());
        }
    };

    let token = state
        .verifier
        .issue(user.id, &user.username, chrono::Duration::days(TOKEN_TTL_DAYS))
        .map_err(|e| ApiError::internal("token signing failed", e))?;

    info!("Registered user {} ({})", user.username, user.id);
    Ok((
        StatusCode::CREATED,
        Json(AuthResponse {
            user_id: user.id,
            username: user.username,
            token,
        }),
    ))
}

pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> ApiResult<Json<AuthResponse>> {
    let (user, hash) = state
        .dispatcher
        .store()
        .credentials(req.username.trim().to_string())
        .await?
        .ok_or(ChatError::Unauthenticated)?;

    let parsed_hash =
        PasswordHash::new(&hash).map_err(|e| ApiError::internal("stored hash unreadable", e))?;
    Argon2::default()
        .verify_password(req.password.as_bytes(), &parsed_hash)
        .map_err(|_| ChatError::Unauthenticated)?;

    let token = state
        .verifier
        .issue(user.id, &user.username, chrono::Duration::days(TOKEN_TTL_DAYS))
        .map_err(|e| ApiError::internal("token signing failed", e))?;

    Ok(Json(AuthResponse {
        user_id: user.id,
        username: user.username,
        token,
    }))
}
