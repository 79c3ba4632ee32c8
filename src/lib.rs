//! Account creation and bearer-token lookup over a pluggable storage backend.

pub mod app;
pub mod auth;
pub mod config;
pub mod db;
pub mod errors;
pub mod state;

#[cfg(test)]
mod test_logs;

pub use auth::repo_types::{Token, User, UserLookup};
pub use db::{BackendRegistry, Store};
pub use errors::{Entity, StorageFailure, StoreError};
