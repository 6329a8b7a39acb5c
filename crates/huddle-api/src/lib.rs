pub mod attachments;
pub mod auth;
pub mod error;
pub mod messages;
pub mod middleware;
pub mod rooms;
pub mod search;
pub mod users;
