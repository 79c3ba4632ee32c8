use serde::Serialize;
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::errors::StoreError;

/// User record in the database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, FromRow)]
pub struct User {
    pub id: Uuid,                   // assigned by the backend
    pub username: String,           // unique across all users
    #[serde(skip_serializing)]
    pub password_hash: String,      // `salt$hash`, never the plaintext
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

/// Bearer token record. Issued and revoked elsewhere; only ever read here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, FromRow)]
pub struct Token {
    pub id: Uuid,
    pub user_id: Uuid,
    pub is_revoked: bool,
    pub issued_at: OffsetDateTime,
    pub expires_at: Option<OffsetDateTime>,
    pub updated_at: OffsetDateTime,
}

impl Token {
    /// Caller-side policy check: not revoked and not past `expires_at`.
    ///
    /// Store lookups return revoked and expired tokens as-is.
    pub fn is_active_at(&self, now: OffsetDateTime) -> bool {
        !self.is_revoked && self.expires_at.map_or(true, |expires_at| now < expires_at)
    }
}

/// Key for a single-user lookup. Exactly one key is ever supplied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserLookup {
    Id(Uuid),
    Identifier(String),
}

impl UserLookup {
    /// Builds a lookup from two optional keys, as they arrive from a request.
    ///
    /// Blank identifiers count as absent. Supplying neither key or both keys is
    /// rejected rather than guessing between "any" and "all".
    pub fn from_parts(id: Option<Uuid>, identifier: Option<&str>) -> Result<Self, StoreError> {
        let identifier = identifier.map(str::trim).filter(|s| !s.is_empty());
        match (id, identifier) {
            (Some(id), None) => Ok(UserLookup::Id(id)),
            (None, Some(identifier)) => Ok(UserLookup::Identifier(identifier.to_owned())),
            (None, None) => Err(StoreError::validation(
                "a user id or a username is required",
            )),
            (Some(_), Some(_)) => Err(StoreError::validation(
                "supply either a user id or a username, not both",
            )),
        }
    }

    pub(crate) fn validate(&self) -> Result<(), StoreError> {
        match self {
            UserLookup::Identifier(identifier) if identifier.trim().is_empty() => Err(
                StoreError::validation("username must not be blank"),
            ),
            _ => Ok(()),
        }
    }
}
