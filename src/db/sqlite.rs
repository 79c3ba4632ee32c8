use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous},
    Connection, SqlitePool,
};
use time::OffsetDateTime;
use tracing::{debug, info};
use uuid::Uuid;

use super::{bounded_ping, map_sqlx_error, Store};
use crate::{
    auth::repo_types::{Token, User, UserLookup},
    config::DatabaseConfig,
    errors::{Entity, StorageFailure, StoreError},
};

pub const BACKEND: &str = "sqlite";

/// Embedded SQLite backend. Ids and timestamps are produced here rather than
/// by column defaults.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn connect_lazy(config: &DatabaseConfig) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(&config.uri)
            .map_err(|e| StoreError::Configuration(format!("invalid sqlite uri: {e}")))?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);
        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_conns)
            .max_lifetime(config.conn_max_lifetime)
            .acquire_timeout(config.acquire_timeout)
            .connect_lazy_with(options);
        Ok(Self { pool })
    }

    #[cfg(test)]
    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

/// Registry constructor for [`BACKEND`].
pub fn factory(config: &DatabaseConfig) -> Result<Arc<dyn Store>, StoreError> {
    Ok(Arc::new(SqliteStore::connect_lazy(config)?))
}

#[async_trait]
impl Store for SqliteStore {
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
        sqlx::migrate!("./migrations/sqlite")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::storage(StorageFailure::Backend, e))
    }

    async fn create_user(&self, username: &str, password_hash: &str) -> Result<User, StoreError> {
        let now = OffsetDateTime::now_utc();
        let user = sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (id, username, password_hash, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?4)
            RETURNING id, username, password_hash, created_at, updated_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(username)
        .bind(password_hash)
        .bind(now)
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
                WHERE id = ?1
                "#,
            )
            .bind(*id),
            UserLookup::Identifier(username) => sqlx::query_as::<_, User>(
                r#"
                SELECT id, username, password_hash, created_at, updated_at
                FROM users
                WHERE username = ?1
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
            WHERE id = ?1
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

/// Fresh migrated in-memory store for tests.
#[cfg(test)]
pub(crate) async fn memory_store() -> SqliteStore {
    let store = SqliteStore::connect_lazy(&DatabaseConfig::sqlite_memory()).expect("memory store");
    store.migrate().await.expect("sqlite migrations");
    store
}

/// Inserts a token row the way an external issuer would.
#[cfg(test)]
pub(crate) async fn insert_token(
    store: &SqliteStore,
    user_id: Uuid,
    is_revoked: bool,
    expires_at: Option<OffsetDateTime>,
) -> Uuid {
    let id = Uuid::new_v4();
    let now = OffsetDateTime::now_utc();
    sqlx::query(
        r#"
        INSERT INTO tokens (id, user_id, is_revoked, issued_at, expires_at, updated_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?4)
        "#,
    )
    .bind(id)
    .bind(user_id)
    .bind(is_revoked)
    .bind(now)
    .bind(expires_at)
    .execute(store.pool())
    .await
    .expect("insert token");
    id
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::Duration;

    const HASH: &str = "c2FsdHNhbHRzYWx0c2FsdA$aGFzaGhhc2hoYXNoaGFzaGhhc2hoYXNoaGFzaGg";

    #[tokio::test]
    async fn create_then_get_by_either_key() {
        let store = memory_store().await;
        store.test_connectivity().await.unwrap();

        let created = store.create_user("alice", HASH).await.unwrap();
        assert_eq!(created.username, "alice");
        assert_eq!(created.password_hash, HASH);

        let by_id = store.get_user(&UserLookup::Id(created.id)).await.unwrap();
        let by_name = store
            .get_user(&UserLookup::Identifier("alice".into()))
            .await
            .unwrap();
        assert_eq!(by_id, created);
        assert_eq!(by_name, created);
    }

    #[tokio::test]
    async fn duplicate_username_is_already_exists() {
        let store = memory_store().await;
        store.create_user("alice", HASH).await.unwrap();

        let err = store.create_user("alice", HASH).await.unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists { entity: Entity::User }));

        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM users WHERE username = ?1")
            .bind("alice")
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn missing_rows_are_not_found() {
        let store = memory_store().await;

        let err = store.get_user(&UserLookup::Id(Uuid::new_v4())).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound { entity: Entity::User }));

        let err = store
            .get_user(&UserLookup::Identifier("nobody".into()))
            .await
            .unwrap_err();
        assert!(err.is_not_found());

        let err = store.get_token(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound { entity: Entity::Token }));
    }

    #[tokio::test]
    async fn blank_identifier_is_rejected_before_querying() {
        let store = memory_store().await;
        let err = store
            .get_user(&UserLookup::Identifier("  ".into()))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)));
    }

    #[tokio::test]
    async fn revoked_and_expired_tokens_are_still_returned() {
        let store = memory_store().await;
        let user = store.create_user("alice", HASH).await.unwrap();
        let expired_at = OffsetDateTime::now_utc() - Duration::hours(1);

        let revoked = insert_token(&store, user.id, true, None).await;
        let expired = insert_token(&store, user.id, false, Some(expired_at)).await;

        let token = store.get_token(revoked).await.unwrap();
        assert!(token.is_revoked);
        assert_eq!(token.user_id, user.id);
        assert_eq!(token.expires_at, None);

        let token = store.get_token(expired).await.unwrap();
        assert!(!token.is_revoked);
        assert!(token.expires_at.is_some());
        assert!(!token.is_active_at(OffsetDateTime::now_utc()));
    }

    #[tokio::test]
    async fn tokens_must_reference_an_existing_user() {
        let store = memory_store().await;
        let result = sqlx::query(
            "INSERT INTO tokens (id, user_id, is_revoked, issued_at, updated_at) VALUES (?1, ?2, 0, ?3, ?3)",
        )
        .bind(Uuid::new_v4())
        .bind(Uuid::new_v4())
        .bind(OffsetDateTime::now_utc())
        .execute(store.pool())
        .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn close_is_idempotent_and_later_calls_fail_cleanly() {
        let store = memory_store().await;
        store.close().await.unwrap();
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
}
