use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use super::{CredentialStore, NewRefreshToken, NewUser, RefreshTokenRecord, StoreError, User};

#[derive(Default)]
struct Tables {
    users: HashMap<Uuid, User>,
    refresh_tokens: HashMap<Uuid, RefreshTokenRecord>,
}

impl Tables {
    fn insert_token(&mut self, token: NewRefreshToken) -> RefreshTokenRecord {
        let record = RefreshTokenRecord {
            id: Uuid::new_v4(),
            user_id: token.user_id,
            token_hash: token.token_hash,
            expires_at: token.expires_at,
            is_revoked: false,
            created_at: OffsetDateTime::now_utc(),
        };
        self.refresh_tokens.insert(record.id, record.clone());
        record
    }
}

/// In-process store. A single mutex guards both tables, so every trait
/// method is atomic with respect to every other.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Tables> {
        // A poisoned lock only means another request panicked mid-call; the
        // tables themselves are still consistent.
        self.tables.lock().unwrap_or_else(|e| e.into_inner())
    }

    #[cfg(test)]
    pub(crate) fn refresh_tokens_for(&self, user_id: Uuid) -> Vec<RefreshTokenRecord> {
        self.lock()
            .refresh_tokens
            .values()
            .filter(|r| r.user_id == user_id)
            .cloned()
            .collect()
    }

    #[cfg(test)]
    pub(crate) fn set_expiry(&self, id: Uuid, expires_at: OffsetDateTime) {
        if let Some(r) = self.lock().refresh_tokens.get_mut(&id) {
            r.expires_at = expires_at;
        }
    }
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        Ok(self
            .lock()
            .users
            .values()
            .find(|u| u.email == email)
            .cloned())
    }

    async fn find_user_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        Ok(self.lock().users.get(&id).cloned())
    }

    async fn create_user(&self, user: NewUser<'_>) -> Result<User, StoreError> {
        let mut tables = self.lock();
        if tables.users.values().any(|u| u.email == user.email) {
            return Err(StoreError::DuplicateEmail);
        }
        let created = User {
            id: Uuid::new_v4(),
            email: user.email.to_owned(),
            password_hash: user.password_hash.to_owned(),
            display_name: user.display_name.to_owned(),
            created_at: OffsetDateTime::now_utc(),
        };
        tables.users.insert(created.id, created.clone());
        Ok(created)
    }

    async fn insert_refresh_token(
        &self,
        token: NewRefreshToken,
    ) -> Result<RefreshTokenRecord, StoreError> {
        Ok(self.lock().insert_token(token))
    }

    async fn find_refresh_token(
        &self,
        token_hash: &str,
    ) -> Result<Option<RefreshTokenRecord>, StoreError> {
        Ok(self
            .lock()
            .refresh_tokens
            .values()
            .find(|r| r.token_hash == token_hash)
            .cloned())
    }

    async fn rotate_refresh_token(
        &self,
        old_id: Uuid,
        replacement: NewRefreshToken,
    ) -> Result<Option<RefreshTokenRecord>, StoreError> {
        let mut tables = self.lock();
        match tables.refresh_tokens.get_mut(&old_id) {
            Some(old) if !old.is_revoked => old.is_revoked = true,
            _ => return Ok(None),
        }
        Ok(Some(tables.insert_token(replacement)))
    }

    async fn revoke_refresh_token(&self, id: Uuid) -> Result<bool, StoreError> {
        let mut tables = self.lock();
        match tables.refresh_tokens.get_mut(&id) {
            Some(r) if !r.is_revoked => {
                r.is_revoked = true;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn revoke_all_refresh_tokens(&self, user_id: Uuid) -> Result<u64, StoreError> {
        let mut count = 0;
        for r in self.lock().refresh_tokens.values_mut() {
            if r.user_id == user_id && !r.is_revoked {
                r.is_revoked = true;
                count += 1;
            }
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::Duration;

    fn new_token(user_id: Uuid, hash: &str) -> NewRefreshToken {
        NewRefreshToken {
            user_id,
            token_hash: hash.into(),
            expires_at: OffsetDateTime::now_utc() + Duration::days(7),
        }
    }

    async fn make_user(store: &MemoryStore, email: &str) -> User {
        store
            .create_user(NewUser {
                email,
                password_hash: "hash",
                display_name: "Someone",
            })
            .await
            .expect("create user")
    }

    #[tokio::test]
    async fn create_user_rejects_duplicate_email() {
        let store = MemoryStore::new();
        make_user(&store, "dup@example.com").await;
        let err = store
            .create_user(NewUser {
                email: "dup@example.com",
                password_hash: "other",
                display_name: "Other",
            })
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::DuplicateEmail));
    }

    #[tokio::test]
    async fn rotate_only_succeeds_once() {
        let store = MemoryStore::new();
        let user = make_user(&store, "rot@example.com").await;
        let first = store
            .insert_refresh_token(new_token(user.id, "h1"))
            .await
            .unwrap();

        let rotated = store
            .rotate_refresh_token(first.id, new_token(user.id, "h2"))
            .await
            .unwrap();
        assert!(rotated.is_some());

        let again = store
            .rotate_refresh_token(first.id, new_token(user.id, "h3"))
            .await
            .unwrap();
        assert!(again.is_none());
        assert!(store.find_refresh_token("h3").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn revoke_is_idempotent_and_revoke_all_is_scoped_to_user() {
        let store = MemoryStore::new();
        let alice = make_user(&store, "alice@example.com").await;
        let bob = make_user(&store, "bob@example.com").await;
        let a1 = store.insert_refresh_token(new_token(alice.id, "a1")).await.unwrap();
        store.insert_refresh_token(new_token(alice.id, "a2")).await.unwrap();
        store.insert_refresh_token(new_token(bob.id, "b1")).await.unwrap();

        assert!(store.revoke_refresh_token(a1.id).await.unwrap());
        assert!(!store.revoke_refresh_token(a1.id).await.unwrap());

        assert_eq!(store.revoke_all_refresh_tokens(alice.id).await.unwrap(), 1);
        assert!(store.refresh_tokens_for(alice.id).iter().all(|r| r.is_revoked));
        assert!(store.refresh_tokens_for(bob.id).iter().all(|r| !r.is_revoked));
    }
}
