pub mod connection;
pub mod dispatcher;
pub mod identity;
pub mod registry;
pub mod store;
