use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use tracing::info;

use super::{postgres, sqlite, Store};
use crate::{config::DatabaseConfig, errors::StoreError};

/// Builds a backend from connection parameters. Must not perform I/O.
pub type BackendFactory = fn(&DatabaseConfig) -> Result<Arc<dyn Store>, StoreError>;

/// Every backend compiled into this binary.
pub const BUILTIN_BACKENDS: &[(&str, BackendFactory)] = &[
    (postgres::BACKEND, postgres::factory),
    (sqlite::BACKEND, sqlite::factory),
];

/// Maps a backend tag to its constructor.
///
/// Assembled explicitly at startup, then used once to build the single store
/// instance the process runs with.
#[derive(Clone, Default)]
pub struct BackendRegistry {
    factories: BTreeMap<&'static str, BackendFactory>,
}

impl fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendRegistry")
            .field("tags", &self.tags())
            .finish()
    }
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding [`BUILTIN_BACKENDS`].
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        for (tag, factory) in BUILTIN_BACKENDS {
            registry.register(*tag, *factory);
        }
        registry
    }

    /// Adds `factory` under `tag`, returning the factory it replaced.
    pub fn register(&mut self, tag: &'static str, factory: BackendFactory) -> Option<BackendFactory> {
        self.factories.insert(tag, factory)
    }

    /// Registered tags, sorted.
    pub fn tags(&self) -> Vec<&'static str> {
        self.factories.keys().copied().collect()
    }

    /// Constructs the backend named by `config.backend`.
    ///
    /// Unknown tags and invalid pool settings fail here, before any factory runs.
    pub fn resolve(&self, config: &DatabaseConfig) -> Result<Arc<dyn Store>, StoreError> {
        let factory = self.factories.get(config.backend.as_str()).ok_or_else(|| {
            StoreError::Configuration(format!(
                "unsupported database type `{}`; available types: [{}]",
                config.backend,
                self.tags().join(", ")
            ))
        })?;

        if config.max_conns == 0 {
            return Err(StoreError::Configuration(
                "max open connections must be greater than zero".into(),
            ));
        }
        if config.conn_max_lifetime.is_zero() {
            return Err(StoreError::Configuration(
                "connection max lifetime must be greater than zero".into(),
            ));
        }
        if config.acquire_timeout.is_zero() {
            return Err(StoreError::Configuration(
                "connection acquire timeout must be greater than zero".into(),
            ));
        }

        let store = factory(config)?;
        info!(
            backend = store.backend(),
            max_conns = config.max_conns,
            conn_max_lifetime_secs = config.conn_max_lifetime.as_secs(),
            "storage backend constructed"
        );
        Ok(store)
    }
}
