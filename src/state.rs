use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::db::{BackendRegistry, Store};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub config: Arc<AppConfig>,
}

impl AppState {
    /// Resolves the configured backend, checks it is reachable and applies migrations.
    pub async fn init(config: AppConfig, registry: &BackendRegistry) -> anyhow::Result<Self> {
        let store = registry
            .resolve(&config.database)
            .context("resolve storage backend")?;

        store
            .test_connectivity()
            .await
            .context("test database connection")?;
        info!(backend = store.backend(), "database connection established");

        if let Err(e) = store.migrate().await {
            warn!(error = %e, detail = ?e, "migration failed; continuing");
        }

        Ok(Self {
            store,
            config: Arc::new(config),
        })
    }

    pub fn from_parts(store: Arc<dyn Store>, config: Arc<AppConfig>) -> Self {
        Self { store, config }
    }
}
