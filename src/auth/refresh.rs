//! Refresh-token lifecycle: issue, single-use rotation with reuse detection,
//! and revocation.
//!
//! A record moves `Active -> Revoked` exactly once, either through rotation
//! or through logout/cascade. `Expired` is derived from `expires_at` at
//! lookup and never written. Presenting a token whose record is already
//! revoked is treated as theft: every record of that user is revoked.

use std::sync::Arc;

use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};
use thiserror::Error;
use time::{Duration, OffsetDateTime};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::store::{
    CredentialStore, NewRefreshToken, RefreshTokenRecord, StoreError, TokenState,
};

/// Raw token length in bytes (512 bits).
pub const TOKEN_BYTES: usize = 64;

#[derive(Debug, Error)]
pub enum RefreshError {
    /// Unknown or expired. Deliberately does not say which.
    #[error("invalid refresh token")]
    Invalid,

    /// An already-revoked token was presented; the user's sessions were revoked.
    #[error("refresh token reuse detected")]
    Compromised { user_id: Uuid },

    /// The configured lifetime pushes `expires_at` past the representable range.
    #[error("refresh token lifetime out of range")]
    ExpiryOutOfRange,

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// A freshly minted token. `raw` goes to the client and nowhere else.
pub struct IssuedRefreshToken {
    pub raw: String,
    pub record: RefreshTokenRecord,
}

impl std::fmt::Debug for IssuedRefreshToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IssuedRefreshToken")
            .field("raw", &"<redacted>")
            .field("record", &self.record.id)
            .finish()
    }
}

#[derive(Clone)]
pub struct RefreshTokens {
    store: Arc<dyn CredentialStore>,
    ttl: Duration,
    pepper: Arc<str>,
}

impl RefreshTokens {
    pub fn new(store: Arc<dyn CredentialStore>, ttl: Duration, pepper: &str) -> Self {
        Self {
            store,
            ttl,
            pepper: Arc::from(pepper),
        }
    }

    /// Hex SHA-256 of the pepper followed by the raw token.
    pub fn digest(&self, raw: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.pepper.as_bytes());
        hasher.update(raw.as_bytes());
        hex::encode(hasher.finalize())
    }

    fn mint(&self, user_id: Uuid) -> Result<(String, NewRefreshToken), RefreshError> {
        let expires_at = OffsetDateTime::now_utc()
            .checked_add(self.ttl)
            .ok_or(RefreshError::ExpiryOutOfRange)?;
        let mut bytes = [0u8; TOKEN_BYTES];
        OsRng.fill_bytes(&mut bytes);
        let raw = hex::encode(bytes);
        let new = NewRefreshToken {
            user_id,
            token_hash: self.digest(&raw),
            expires_at,
        };
        Ok((raw, new))
    }

    pub async fn issue(&self, user_id: Uuid) -> Result<IssuedRefreshToken, RefreshError> {
        let (raw, new) = self.mint(user_id)?;
        let record = self.store.insert_refresh_token(new).await?;
        debug!(user_id = %user_id, token_id = %record.id, "refresh token issued");
        Ok(IssuedRefreshToken { raw, record })
    }

    /// Consume `raw` and return its replacement.
    pub async fn redeem(&self, raw: &str) -> Result<IssuedRefreshToken, RefreshError> {
        let digest = self.digest(raw);
        let Some(record) = self.store.find_refresh_token(&digest).await? else {
            debug!("refresh token not found");
            return Err(RefreshError::Invalid);
        };

        match record.state_at(OffsetDateTime::now_utc()) {
            TokenState::Expired => {
                debug!(token_id = %record.id, "refresh token expired");
                Err(RefreshError::Invalid)
            }
            TokenState::Revoked => Err(self.cascade(&record).await),
            TokenState::Active => {
                let (new_raw, replacement) = self.mint(record.user_id)?;
                match self.store.rotate_refresh_token(record.id, replacement).await? {
                    Some(new_record) => {
                        debug!(
                            user_id = %record.user_id,
                            old_token_id = %record.id,
                            new_token_id = %new_record.id,
                            "refresh token rotated"
                        );
                        Ok(IssuedRefreshToken {
                            raw: new_raw,
                            record: new_record,
                        })
                    }
                    // Someone else redeemed it between our read and the update.
                    None => Err(self.cascade(&record).await),
                }
            }
        }
    }

    async fn cascade(&self, record: &RefreshTokenRecord) -> RefreshError {
        warn!(
            user_id = %record.user_id,
            token_id = %record.id,
            "refresh token reuse detected; revoking all sessions"
        );
        match self.revoke_all(record.user_id).await {
            Ok(n) => {
                info!(user_id = %record.user_id, revoked = n, "sessions revoked");
                RefreshError::Compromised {
                    user_id: record.user_id,
                }
            }
            Err(e) => e,
        }
    }

    /// Idempotent. Returns true if this call revoked the record.
    pub async fn revoke(&self, token_id: Uuid) -> Result<bool, RefreshError> {
        Ok(self.store.revoke_refresh_token(token_id).await?)
    }

    /// Revoke the record behind `raw`, if any. Never cascades.
    pub async fn revoke_by_token(&self, raw: &str) -> Result<bool, RefreshError> {
        let digest = self.digest(raw);
        match self.store.find_refresh_token(&digest).await? {
            Some(record) if !record.is_revoked => self.revoke(record.id).await,
            _ => Ok(false),
        }
    }

    pub async fn revoke_all(&self, user_id: Uuid) -> Result<u64, RefreshError> {
        Ok(self.store.revoke_all_refresh_tokens(user_id).await?)
    }
}
