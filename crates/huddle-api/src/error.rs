use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use tracing::error;

use huddle_types::error::ChatError;

pub type ApiResult<T> = Result<T, ApiError>;

/// Handler error: either a core rejection or a plain HTTP status.
#[derive(Debug)]
pub enum ApiError {
    Chat(ChatError),
    Status(StatusCode, &'static str),
}

impl ApiError {
    pub fn internal(context: &str, err: impl std::fmt::Display) -> Self {
        error!("{}: {}", context, err);
        Self::Status(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::Chat(err) => match err {
                ChatError::Unauthenticated => StatusCode::UNAUTHORIZED,
                ChatError::Forbidden => StatusCode::FORBIDDEN,
                ChatError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
                ChatError::NotFound(_) => StatusCode::NOT_FOUND,
                ChatError::Storage(_) | ChatError::Delivery(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::Status(status, _) => *status,
        }
    }
}

impl From<ChatError> for ApiError {
    fn from(err: ChatError) -> Self {
        Self::Chat(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match &self {
            Self::Chat(err) => json!({ "error": err.to_string(), "kind": err.kind() }),
            Self::Status(_, msg) => json!({ "error": msg }),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_errors_map_to_statuses() {
        let cases = [
            (ChatError::Unauthenticated, StatusCode::UNAUTHORIZED),
            (ChatError::Forbidden, StatusCode::FORBIDDEN),
            (ChatError::invalid("x"), StatusCode::BAD_REQUEST),
            (ChatError::not_found("room"), StatusCode::NOT_FOUND),
            (ChatError::storage("disk"), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).into_response().status(), status);
        }
    }
}
