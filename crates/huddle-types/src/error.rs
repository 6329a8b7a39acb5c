use serde::{Deserialize, Serialize};

/// Failure kinds surfaced by room, membership and delivery operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChatError {
    #[error("not authenticated")]
    Unauthenticated,

    #[error("not a member of this room")]
    Forbidden,

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("storage failure: {0}")]
    Storage(String),

    /// Local to a single connection; never reported back to a sender.
    #[error("delivery failure: {0}")]
    Delivery(String),
}

impl ChatError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn storage(err: impl std::fmt::Display) -> Self {
        Self::Storage(err.to_string())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Unauthenticated => ErrorKind::Unauthenticated,
            Self::Forbidden => ErrorKind::Forbidden,
            Self::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Storage(_) => ErrorKind::StorageFailure,
            Self::Delivery(_) => ErrorKind::DeliveryFailure,
        }
    }
}

/// Wire form of [`ChatError`] carried by error events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Unauthenticated,
    Forbidden,
    InvalidArgument,
    NotFound,
    StorageFailure,
    DeliveryFailure,
}

pub type ChatResult<T> = Result<T, ChatError>;
