//! Durable record of users and refresh-token records.
//!
//! The store is injected as `Arc<dyn CredentialStore>`; `PgStore` backs the
//! service in production and `MemoryStore` backs tests and local runs.

use async_trait::async_trait;
use serde::Serialize;
use sqlx::FromRow;
use thiserror::Error;
use time::OffsetDateTime;
use uuid::Uuid;

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// User record.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String, // argon2 PHC string, never exposed
    pub display_name: String,
    pub created_at: OffsetDateTime,
}

/// Refresh-token record. Only the digest of the raw token is kept.
#[derive(Debug, Clone, FromRow)]
pub struct RefreshTokenRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub token_hash: String,
    pub expires_at: OffsetDateTime,
    pub is_revoked: bool,
    pub created_at: OffsetDateTime,
}

/// Lifecycle state derived at read time. `Expired` is never written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenState {
    Active,
    Revoked,
    Expired,
}

impl RefreshTokenRecord {
    pub fn state_at(&self, now: OffsetDateTime) -> TokenState {
        if self.expires_at < now {
            TokenState::Expired
        } else if self.is_revoked {
            TokenState::Revoked
        } else {
            TokenState::Active
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewUser<'a> {
    pub email: &'a str,
    pub password_hash: &'a str,
    pub display_name: &'a str,
}

#[derive(Debug, Clone)]
pub struct NewRefreshToken {
    pub user_id: Uuid,
    pub token_hash: String,
    pub expires_at: OffsetDateTime,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("email already registered")]
    DuplicateEmail,

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// `email` must already be normalized.
    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError>;

    async fn find_user_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError>;

    /// Fails with `StoreError::DuplicateEmail` when the email is taken.
    async fn create_user(&self, user: NewUser<'_>) -> Result<User, StoreError>;

    async fn insert_refresh_token(
        &self,
        token: NewRefreshToken,
    ) -> Result<RefreshTokenRecord, StoreError>;

    async fn find_refresh_token(
        &self,
        token_hash: &str,
    ) -> Result<Option<RefreshTokenRecord>, StoreError>;

    /// Revoke `old_id` only if it is not yet revoked and, in the same atomic
    /// unit, insert `replacement`. Returns `None` when the old record was
    /// already revoked, in which case nothing is inserted.
    async fn rotate_refresh_token(
        &self,
        old_id: Uuid,
        replacement: NewRefreshToken,
    ) -> Result<Option<RefreshTokenRecord>, StoreError>;

    /// Returns true if this call flipped the record to revoked.
    async fn revoke_refresh_token(&self, id: Uuid) -> Result<bool, StoreError>;

    /// Returns the number of records flipped to revoked.
    async fn revoke_all_refresh_tokens(&self, user_id: Uuid) -> Result<u64, StoreError>;
}
