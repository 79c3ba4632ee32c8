//! Storage capability set and the backends that implement it.
//!
//! Everything above this module talks to an `Arc<dyn Store>`; `sqlx` errors are
//! translated into [`StoreError`] here and never escape.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use crate::auth::repo_types::{Token, User, UserLookup};
use crate::errors::{Entity, StorageFailure, StoreError};

pub mod postgres;
pub mod registry;
pub mod sqlite;

pub use registry::{BackendFactory, BackendRegistry, BUILTIN_BACKENDS};

/// Upper bound for a connectivity check, regardless of the caller's deadline.
pub const CONNECTIVITY_TIMEOUT: Duration = Duration::from_secs(5);

/// Operations every storage backend offers.
///
/// Implementations are shared across concurrent requests for the whole process
/// lifetime. A backend that does not support an operation keeps the default
/// body, which reports [`StoreError::NotImplemented`] instead of pretending to
/// succeed.
#[async_trait]
pub trait Store: Send + Sync {
    /// Registry tag of this backend.
    fn backend(&self) -> &'static str;

    /// Round-trips to the store, bounded by [`CONNECTIVITY_TIMEOUT`].
    async fn test_connectivity(&self) -> Result<(), StoreError>;

    /// Drains and closes the connection pool. Safe to call more than once.
    async fn close(&self) -> Result<(), StoreError>;

    /// Applies the embedded schema migrations.
    async fn migrate(&self) -> Result<(), StoreError> {
        Err(not_implemented(self.backend(), "migrate"))
    }

    async fn create_user(&self, _username: &str, _password_hash: &str) -> Result<User, StoreError> {
        Err(not_implemented(self.backend(), "create_user"))
    }

    async fn get_user(&self, _lookup: &UserLookup) -> Result<User, StoreError> {
        Err(not_implemented(self.backend(), "get_user"))
    }

    async fn get_token(&self, _id: Uuid) -> Result<Token, StoreError> {
        Err(not_implemented(self.backend(), "get_token"))
    }
}

fn not_implemented(backend: &'static str, operation: &'static str) -> StoreError {
    StoreError::NotImplemented { backend, operation }
}

/// Runs a store operation under a caller-supplied deadline.
///
/// Dropping the inner future cancels the query and returns its connection to
/// the pool.
pub async fn with_deadline<T, F>(deadline: Duration, op: F) -> Result<T, StoreError>
where
    F: Future<Output = Result<T, StoreError>>,
{
    match tokio::time::timeout(deadline, op).await {
        Ok(result) => result,
        Err(elapsed) => Err(StoreError::storage(StorageFailure::Timeout, elapsed)),
    }
}

/// Translates a `sqlx` error raised while working on `entity`.
pub(crate) fn map_sqlx_error(entity: Entity, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::RowNotFound => StoreError::NotFound { entity },
        sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
            StoreError::AlreadyExists { entity }
        }
        sqlx::Error::PoolTimedOut => StoreError::storage(StorageFailure::Timeout, err),
        sqlx::Error::PoolClosed => StoreError::storage(StorageFailure::Closed, err),
        other => StoreError::storage(StorageFailure::Backend, other),
    }
}

/// Pings through `ping`, giving up after [`CONNECTIVITY_TIMEOUT`].
pub(crate) async fn bounded_ping<F>(backend: &'static str, ping: F) -> Result<(), StoreError>
where
    F: Future<Output = Result<(), sqlx::Error>>,
{
    match tokio::time::timeout(CONNECTIVITY_TIMEOUT, ping).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(StoreError::Connectivity(
            anyhow::Error::new(e).context(format!("{backend} ping failed")),
        )),
        Err(elapsed) => Err(StoreError::Connectivity(
            anyhow::Error::new(elapsed).context(format!("{backend} ping timed out")),
        )),
    }
}
