use std::{fmt, sync::Arc};

use time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

use super::{
    dto::{LoginRequest, PublicUser, RegisterRequest, UserProfile},
    jwt::JwtKeys,
    password::PasswordHasher,
    refresh::RefreshTokens,
    validators::{is_strong_password, is_valid_display_name, is_valid_email, normalize_email},
};
use crate::{
    config::AppConfig,
    error::{AuthError, ValidationReason},
    store::{CredentialStore, NewUser},
};

pub struct LoginOutcome {
    pub access_token: String,
    pub refresh_token: String,
    pub user: PublicUser,
}

pub struct RefreshOutcome {
    pub access_token: String,
    pub refresh_token: String,
}

impl fmt::Debug for LoginOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoginOutcome")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .field("user", &self.user)
            .finish()
    }
}

impl fmt::Debug for RefreshOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RefreshOutcome")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .finish()
    }
}

/// Register, login, refresh, logout and profile lookup over the credential
/// primitives.
#[derive(Clone)]
pub struct SessionService {
    store: Arc<dyn CredentialStore>,
    hasher: PasswordHasher,
    keys: JwtKeys,
    refresh: RefreshTokens,
    // Verified against when the email is unknown so both login failures cost
    // the same argon2 work.
    dummy_digest: Arc<str>,
}

impl SessionService {
    pub fn new(store: Arc<dyn CredentialStore>, config: &AppConfig) -> anyhow::Result<Self> {
        let hasher = PasswordHasher::new(config.password)?;
        let dummy_digest = Arc::from(hasher.hash(&Uuid::new_v4().to_string())?);
        let refresh = RefreshTokens::new(
            store.clone(),
            Duration::days(config.refresh.ttl_days),
            &config.refresh.pepper,
        );
        Ok(Self {
            store,
            hasher,
            keys: JwtKeys::from_config(&config.jwt),
            refresh,
            dummy_digest,
        })
    }

    pub fn keys(&self) -> &JwtKeys {
        &self.keys
    }

    pub async fn register(&self, req: RegisterRequest) -> Result<UserProfile, AuthError> {
        let (Some(email), Some(password), Some(display_name)) =
            (req.email, req.password, req.display_name)
        else {
            return Err(AuthError::Validation(ValidationReason::MissingFields));
        };

        let email = normalize_email(&email);
        if !is_valid_email(&email) {
            return Err(AuthError::Validation(ValidationReason::InvalidEmail));
        }
        if !is_strong_password(&password) {
            return Err(AuthError::Validation(ValidationReason::WeakPassword));
        }
        if !is_valid_display_name(&display_name) {
            return Err(AuthError::Validation(ValidationReason::InvalidDisplayName));
        }

        if self.store.find_user_by_email(&email).await?.is_some() {
            warn!("registration with existing email");
            return Err(AuthError::Conflict);
        }

        let password_hash = self.hasher.hash_blocking(password).await?;
        // create_user still reports DuplicateEmail if a concurrent register won.
        let user = self
            .store
            .create_user(NewUser {
                email: &email,
                password_hash: &password_hash,
                display_name: display_name.trim(),
            })
            .await?;

        info!(user_id = %user.id, "user registered");
        Ok(user.into())
    }

    pub async fn login(&self, req: LoginRequest) -> Result<LoginOutcome, AuthError> {
        let (Some(email), Some(password)) = (req.email, req.password) else {
            return Err(AuthError::InvalidCredentials);
        };
        let email = normalize_email(&email);

        let user = self.store.find_user_by_email(&email).await?;
        let digest = match &user {
            Some(u) => u.password_hash.clone(),
            None => self.dummy_digest.to_string(),
        };
        let password_ok = self.hasher.verify_blocking(digest, password).await?;

        let user = match user {
            Some(u) if password_ok => u,
            Some(u) => {
                warn!(user_id = %u.id, "login invalid password");
                return Err(AuthError::InvalidCredentials);
            }
            None => {
                warn!("login unknown email");
                return Err(AuthError::InvalidCredentials);
            }
        };

        let access_token = self.keys.sign_access(user.id)?;
        let issued = self.refresh.issue(user.id).await?;

        info!(user_id = %user.id, "user logged in");
        Ok(LoginOutcome {
            access_token,
            refresh_token: issued.raw,
            user: user.into(),
        })
    }

    pub async fn refresh(&self, raw: Option<&str>) -> Result<RefreshOutcome, AuthError> {
        let raw = raw.filter(|t| !t.is_empty()).ok_or(AuthError::MissingRefresh)?;
        let issued = self.refresh.redeem(raw).await?;
        let access_token = self.keys.sign_access(issued.record.user_id)?;
        Ok(RefreshOutcome {
            access_token,
            refresh_token: issued.raw,
        })
    }

    /// Revokes the presented token if it is live. Absent or dead tokens are
    /// not an error.
    pub async fn logout(&self, raw: Option<&str>) -> Result<(), AuthError> {
        if let Some(raw) = raw.filter(|t| !t.is_empty()) {
            if self.refresh.revoke_by_token(raw).await? {
                info!("refresh token revoked on logout");
            }
        }
        Ok(())
    }

    pub async fn current_user(&self, user_id: Uuid) -> Result<UserProfile, AuthError> {
        self.store
            .find_user_by_id(user_id)
            .await?
            .map(UserProfile::from)
            .ok_or(AuthError::NotFound)
    }
}
