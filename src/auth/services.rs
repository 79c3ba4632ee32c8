use lazy_static::lazy_static;
use regex::Regex;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::{
    auth::{
        password,
        repo_types::{Token, User, UserLookup},
    },
    db::Store,
    errors::{Entity, StoreError},
};

pub const MAX_USERNAME_LEN: usize = 255;
pub const MAX_PASSWORD_LEN: usize = 1024;

pub(crate) fn is_valid_username(username: &str) -> bool {
    lazy_static! {
        static ref USERNAME_RE: Regex = Regex::new(r"^[A-Za-z0-9._@+\-]+$").unwrap();
    }
    username.chars().count() <= MAX_USERNAME_LEN && USERNAME_RE.is_match(username)
}

fn validate_sign_up(username: &str, password: &str) -> Result<(), StoreError> {
    if username.is_empty() {
        return Err(StoreError::validation("username is required"));
    }
    if !is_valid_username(username) {
        return Err(StoreError::validation(
            "username may only contain letters, digits and . _ @ + - (at most 255)",
        ));
    }
    if password.is_empty() {
        return Err(StoreError::validation("password is required"));
    }
    if password.len() > MAX_PASSWORD_LEN {
        return Err(StoreError::validation("password is too long"));
    }
    Ok(())
}

/// Creates an account: validates input, hashes the password, persists the user.
///
/// Storage errors come back already classified by the store
/// (`AlreadyExists`, `UnexpectedEmptyResult`, `Storage`).
#[instrument(skip(store, password), fields(backend = store.backend()))]
pub async fn sign_up(store: &dyn Store, username: &str, password: &str) -> Result<User, StoreError> {
    let username = username.trim();
    validate_sign_up(username, password)?;

    // Argon2 with 64 MiB is too heavy for a runtime worker thread.
    let plain = password.to_owned();
    let hash = tokio::task::spawn_blocking(move || password::hash_password(&plain))
        .await
        .map_err(|e| StoreError::Hashing(e.into()))??;

    match store.create_user(username, &hash).await {
        Ok(user) => {
            info!(user_id = %user.id, "user signed up");
            Ok(user)
        }
        Err(e @ StoreError::AlreadyExists { .. }) => {
            warn!(%username, "username already registered");
            Err(e)
        }
        Err(e) => Err(e),
    }
}

/// Resolves a bearer token to its record and owning user.
///
/// A missing token and a token whose user is missing look the same to the
/// caller. Revocation and expiry are left to the caller (`Token::is_active_at`).
///
/// The token id is the credential itself and is never recorded.
#[instrument(skip_all)]
pub async fn resolve_bearer(store: &dyn Store, token_id: Uuid) -> Result<(Token, User), StoreError> {
    let token = store.get_token(token_id).await?;
    match store.get_user(&UserLookup::Id(token.user_id)).await {
        Ok(user) => {
            debug!(user_id = %user.id, "bearer token resolved");
            Ok((token, user))
        }
        Err(StoreError::NotFound { .. }) => {
            warn!(user_id = %token.user_id, "token references a missing user");
            Err(StoreError::NotFound {
                entity: Entity::Token,
            })
        }
        Err(e) => Err(e),
    }
}
