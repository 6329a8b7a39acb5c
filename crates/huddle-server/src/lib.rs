pub mod config;

use std::sync::Arc;

use axum::{
    Router,
    extract::{DefaultBodyLimit, Query, State, WebSocketUpgrade},
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use huddle_api::attachments::{self, AttachmentStore, MAX_ATTACHMENT_BYTES, PUBLIC_PREFIX};
use huddle_api::auth::{self, AppState, AppStateInner};
use huddle_api::middleware::require_auth;
use huddle_api::{messages, rooms, search, users};
use huddle_db::Database;
use huddle_gateway::connection;
use huddle_gateway::dispatcher::Dispatcher;
use huddle_gateway::identity::TokenVerifier;
use huddle_gateway::store::Store;

use crate::config::Config;

/// Opens the database and wires the dispatcher and stores together.
pub fn build_state(config: &Config) -> anyhow::Result<AppState> {
    let db = Database::open(&config.db_path)?;
    let store = Store::new(Arc::new(db), config.store_timeout);

    Ok(Arc::new(AppStateInner {
        dispatcher: Dispatcher::new(store, config.outbound_queue),
        verifier: TokenVerifier::new(&config.jwt_secret),
        attachments: AttachmentStore::new(&config.upload_dir),
    }))
}

pub fn build_router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .with_state(state.clone());

    let protected_routes = Router::new()
        .route("/users", get(users::list_users))
        .route("/rooms", get(rooms::list_rooms))
        .route("/rooms/direct", post(rooms::open_direct))
        .route("/rooms/group", post(rooms::create_group))
        .route("/rooms/{room_id}/members", post(rooms::add_member))
        .route(
            "/rooms/{room_id}/messages",
            get(messages::get_messages).post(messages::send_message),
        )
        .route("/search", get(search::search_messages))
        .route(
            "/attachments",
            post(attachments::upload).layer(DefaultBodyLimit::max(MAX_ATTACHMENT_BYTES)),
        )
        .layer(middleware::from_fn_with_state(state.clone(), require_auth))
        .with_state(state.clone());

    let ws_route = Router::new()
        .route("/gateway", get(ws_upgrade))
        .with_state(state.clone());

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .merge(ws_route)
        .nest_service(PUBLIC_PREFIX, ServeDir::new(state.attachments.dir()))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

#[derive(Debug, Deserialize)]
struct GatewayQuery {
    token: Option<String>,
}

/// GET /gateway: a `?token=` is checked before upgrading; without one the
/// client has to send `Identify` as its first frame.
async fn ws_upgrade(
    State(state): State<AppState>,
    Query(query): Query<GatewayQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    let identity = match query.token {
        Some(token) => match state.verifier.verify(&token) {
            Some(identity) => Some(identity),
            None => return StatusCode::UNAUTHORIZED.into_response(),
        },
        None => None,
    };

    let dispatcher = state.dispatcher.clone();
    let verifier = state.verifier.clone();
    ws.on_upgrade(move |socket| connection::handle_connection(socket, dispatcher, verifier, identity))
}
