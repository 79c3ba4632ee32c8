use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use sqlx::{
    postgres::{PgConnectOptions, PgPoolOptions},
    Connection, PgPool,
};
use tracing::{debug, info};
use uuid::Uuid;

use super::{bounded_ping, map_sqlx_error, Store};
use crate::{
    auth::repo_types::{Token, User, UserLookup},
    config::DatabaseConfig,
    errors::{Entity, StorageFailure, StoreError},
};

pub const BACKEND: &str = "postgresql";

/// PostgreSQL backend over a bounded `sqlx` pool.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Builds the pool without opening a connection.
    pub fn connect_lazy(config: &DatabaseConfig) -> Result<Self, StoreError> {
        let options = PgConnectOptions::from_str(&config.uri)
            .map_err(|e| StoreError::Configuration(format!("invalid postgresql uri: {e}")))?;
        let pool = PgPoolOptions::new()
            .max_connections(config.max_conns)
            .max_lifetime(config.conn_max_lifetime)
            .acquire_timeout(config.acquire_timeout)
            .connect_lazy_with(options);
        Ok(Self { pool })
    }

    #[cfg(test)]
    pub(crate) fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// Registry constructor for [`BACKEND`].
pub fn factory(config: &DatabaseConfig) -> Result<Arc<dyn Store>, StoreError> {
    Ok(Arc::new(PostgresStore::connect_lazy(config)?))
}

#[async_trait]
impl Store for PostgresStore {
    fn backend(&self) -> &'static str {
        BACKEND
    }

    async fn test_connectivity(&self) -> Result<(), StoreError> {
        bounded_ping(BACKEND, async {
            let mut conn = self.pool.acquire().await?;
            conn.ping().await
        })
        .await
    }

    async fn close(&self) -> Result<(), StoreError> {
        if !self.pool.is_closed() {
            self.pool.close().await;
            info!(backend = BACKEND, "connection pool closed");
        }
        Ok(())
    }

    async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations/postgres")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::storage(StorageFailure::Backend, e))
    }

    async fn create_user(&self, username: &str, password_hash: &str) -> Result<User, StoreError> {
        let user = sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (username, password_hash)
            VALUES ($1, $2)
            RETURNING id, username, password_hash, created_at, updated_at
            "#,
        )
        .bind(username)
        .bind(password_hash)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error(Entity::User, e))?
        .ok_or(StoreError::UnexpectedEmptyResult)?;

        debug!(user_id = %user.id, "user row inserted");
        Ok(user)
    }

    async fn get_user(&self, lookup: &UserLookup) -> Result<User, StoreError> {
        lookup.validate()?;
        let query = match lookup {
            UserLookup::Id(id) => sqlx::query_as::<_, User>(
                r#"
                SELECT id, username, password_hash, created_at, updated_at
                FROM users
                WHERE id = $1
                "#,
            )
            .bind(*id),
            UserLookup::Identifier(username) => sqlx::query_as::<_, User>(
                r#"
                SELECT id, username, password_hash, created_at, updated_at
                FROM users
                WHERE username = $1
                "#,
            )
            .bind(username.as_str()),
        };

        query
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error(Entity::User, e))?
            .ok_or(StoreError::NotFound {
                entity: Entity::User,
            })
    }

    async fn get_token(&self, id: Uuid) -> Result<Token, StoreError> {
        sqlx::query_as::<_, Token>(
            r#"
            SELECT id, user_id, is_revoked, issued_at, expires_at, updated_at
            FROM tokens
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error(Entity::Token, e))?
        .ok_or(StoreError::NotFound {
            entity: Entity::Token,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn config(uri: &str) -> DatabaseConfig {
        DatabaseConfig {
            backend: BACKEND.into(),
            uri: uri.into(),
            max_conns: 2,
            conn_max_lifetime: Duration::from_secs(30),
            acquire_timeout: Duration::from_millis(200),
        }
    }

    #[tokio::test]
    async fn construction_is_lazy() {
        // Nothing listens on port 1; building the pool must still succeed.
        let store = PostgresStore::connect_lazy(&config("postgres://u:p@127.0.0.1:1/db")).unwrap();
        assert_eq!(store.pool().size(), 0);

        let err = store.test_connectivity().await.unwrap_err();
        assert!(matches!(err, StoreError::Connectivity(_)));

        store.close().await.unwrap();
        store.close().await.unwrap();
        assert!(store.pool().is_closed());
    }

    #[tokio::test]
    async fn closed_pool_reports_closed_storage_error() {
        let store = PostgresStore::connect_lazy(&config("postgres://u:p@127.0.0.1:1/db")).unwrap();
        store.close().await.unwrap();
        let err = store.get_token(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(
            err,
            StoreError::Storage {
                kind: StorageFailure::Closed,
                ..
            }
        ));
    }

    #[test]
    fn malformed_uri_is_a_configuration_error() {
        let err = PostgresStore::connect_lazy(&config("definitely not a uri")).err().unwrap();
        assert!(matches!(err, StoreError::Configuration(_)));
    }

    async fn live_store() -> Option<PostgresStore> {
        let uri = std::env::var("TEST_DATABASE_URI").ok()?;
        let store = PostgresStore::connect_lazy(&config(&uri)).ok()?;
        store.migrate().await.ok()?;
        Some(store)
    }

    #[tokio::test]
    #[ignore = "needs TEST_DATABASE_URI pointing at a disposable PostgreSQL database"]
    async fn create_and_read_back_against_live_database() {
        let Some(store) = live_store().await else { return };
        let username = format!("user-{}", Uuid::new_v4());

        let created = store.create_user(&username, "c2FsdA$aGFzaA").await.unwrap();
        let by_id = store.get_user(&UserLookup::Id(created.id)).await.unwrap();
        let by_name = store
            .get_user(&UserLookup::Identifier(username.clone()))
            .await
            .unwrap();
        assert_eq!(by_id, by_name);

        let dup = store.create_user(&username, "c2FsdA$aGFzaA").await.unwrap_err();
        assert!(matches!(dup, StoreError::AlreadyExists { entity: Entity::User }));

        let missing = store.get_token(Uuid::new_v4()).await.unwrap_err();
        assert!(missing.is_not_found());
    }
}
