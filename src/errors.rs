use std::fmt;

/// Which record a lookup or insert was about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entity {
    User,
    Token,
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Entity::User => f.write_str("user"),
            Entity::Token => f.write_str("token"),
        }
    }
}

/// Classification of a generic storage failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageFailure {
    /// No pooled connection (or query result) became available before the deadline.
    Timeout,
    /// The backend was already closed.
    Closed,
    Backend,
}

impl fmt::Display for StorageFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageFailure::Timeout => f.write_str("timed out"),
            StorageFailure::Closed => f.write_str("backend closed"),
            StorageFailure::Backend => f.write_str("backend error"),
        }
    }
}

/// Error taxonomy shared by every storage backend and the credential service.
///
/// Backend-native errors never cross the store boundary: they are wrapped as an
/// opaque `anyhow::Error` source that is meant for logs, not for clients.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{entity} not found")]
    NotFound { entity: Entity },

    #[error("{entity} already exists")]
    AlreadyExists { entity: Entity },

    #[error("insert returned no row")]
    UnexpectedEmptyResult,

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("storage is unreachable")]
    Connectivity(#[source] anyhow::Error),

    #[error("storage operation failed ({kind})")]
    Storage {
        kind: StorageFailure,
        #[source]
        source: anyhow::Error,
    },

    #[error("password hashing failed")]
    Hashing(#[source] anyhow::Error),

    #[error("`{operation}` is not implemented by the {backend} backend")]
    NotImplemented {
        backend: &'static str,
        operation: &'static str,
    },
}

impl StoreError {
    pub fn validation(msg: impl Into<String>) -> Self {
        StoreError::Validation(msg.into())
    }

    pub fn storage(kind: StorageFailure, source: impl Into<anyhow::Error>) -> Self {
        StoreError::Storage {
            kind,
            source: source.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }

    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            StoreError::Storage {
                kind: StorageFailure::Timeout,
                ..
            }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_message_hides_underlying_cause() {
        let err = StoreError::storage(
            StorageFailure::Backend,
            anyhow::anyhow!("relation \"users\" does not exist"),
        );
        assert_eq!(err.to_string(), "storage operation failed (backend error)");

        let source = std::error::Error::source(&err).expect("source is kept for logging");
        assert!(source.to_string().contains("relation"));
    }

    #[test]
    fn classification_helpers() {
        assert!(StoreError::NotFound { entity: Entity::User }.is_not_found());
        assert!(!StoreError::validation("empty").is_not_found());

        let timeout = StoreError::storage(StorageFailure::Timeout, anyhow::anyhow!("pool timed out"));
        assert!(timeout.is_timeout());
        assert!(!StoreError::UnexpectedEmptyResult.is_timeout());
    }

    #[test]
    fn not_implemented_names_backend_and_operation() {
        let err = StoreError::NotImplemented {
            backend: "sqlite",
            operation: "get_token",
        };
        assert_eq!(
            err.to_string(),
            "`get_token` is not implemented by the sqlite backend"
        );
    }
}
