use anyhow::Context;
use argon2::{
    password_hash::{self, PasswordHash, PasswordHasher as _, PasswordVerifier, SaltString},
    Algorithm, Argon2, Params, Version,
};
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};
use tracing::{error, warn};

use crate::config::PasswordConfig;

/// Inputs longer than this (in chars) are collapsed with SHA-256 first.
pub const PREHASH_THRESHOLD: usize = 64;

/// Argon2id hasher with a bounded-length input.
#[derive(Clone)]
pub struct PasswordHasher {
    argon2: Argon2<'static>,
}

impl PasswordHasher {
    pub fn new(cfg: PasswordConfig) -> anyhow::Result<Self> {
        let params = Params::new(cfg.memory_kib, cfg.iterations, cfg.parallelism, None)
            .map_err(|e| anyhow::anyhow!("invalid argon2 params: {e}"))?;
        Ok(Self {
            argon2: Argon2::new(Algorithm::Argon2id, Version::V0x13, params),
        })
    }

    pub fn hash(&self, password: &str) -> anyhow::Result<String> {
        let salt = SaltString::generate(&mut OsRng);
        let input = prehash(password);
        let hash = self
            .argon2
            .hash_password(input.as_bytes(), &salt)
            .map_err(|e| {
                error!(error = %e, "argon2 hash_password error");
                anyhow::anyhow!(e.to_string())
            })?
            .to_string();
        Ok(hash)
    }

    /// A mismatch or a malformed digest verifies as false. Any other argon2
    /// failure is an error.
    pub fn verify(&self, digest: &str, password: &str) -> anyhow::Result<bool> {
        let parsed = match PasswordHash::new(digest) {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "argon2 parse hash error");
                return Ok(false);
            }
        };
        let input = prehash(password);
        match self.argon2.verify_password(input.as_bytes(), &parsed) {
            Ok(()) => Ok(true),
            Err(password_hash::Error::Password) => Ok(false),
            Err(e) => {
                error!(error = %e, "argon2 verify_password error");
                Err(anyhow::anyhow!(e.to_string()))
            }
        }
    }

    pub async fn hash_blocking(&self, password: String) -> anyhow::Result<String> {
        let hasher = self.clone();
        tokio::task::spawn_blocking(move || hasher.hash(&password))
            .await
            .context("password hashing task")?
    }

    pub async fn verify_blocking(&self, digest: String, password: String) -> anyhow::Result<bool> {
        let hasher = self.clone();
        tokio::task::spawn_blocking(move || hasher.verify(&digest, &password))
            .await
            .context("password verification task")?
    }
}

fn prehash(password: &str) -> std::borrow::Cow<'_, str> {
    if password.chars().count() > PREHASH_THRESHOLD {
        std::borrow::Cow::Owned(hex::encode(Sha256::digest(password.as_bytes())))
    } else {
        std::borrow::Cow::Borrowed(password)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_config;

    fn hasher() -> PasswordHasher {
        PasswordHasher::new(test_config().password).expect("params")
    }

    #[test]
    fn hash_and_verify_roundtrip() {
        let h = hasher();
        let password = "Secur3P@ssw0rd!";
        let hash = h.hash(password).expect("hashing should succeed");
        assert!(hash.starts_with("$argon2id$"));
        assert!(h.verify(&hash, password).unwrap());
    }

    #[test]
    fn verify_rejects_wrong_password() {
        let h = hasher();
        let hash = h.hash("correct-horse-battery-staple").expect("hash");
        assert!(!h.verify(&hash, "wrong-password").unwrap());
    }

    #[test]
    fn verify_returns_false_on_malformed_hash() {
        assert!(!hasher().verify("not-a-valid-hash", "anything").unwrap());
    }

    #[test]
    fn verify_surfaces_unusable_parameters_as_error() {
        // Parses as a PHC string, but m=1 is below argon2's memory floor.
        let digest = format!("$argon2id$v=19$m=1,t=1,p=1$c29tZXNhbHQ${}", "A".repeat(43));
        assert!(PasswordHash::new(&digest).is_ok());
        assert!(hasher().verify(&digest, "anything").is_err());
    }

    #[test]
    fn same_password_hashes_differently() {
        let h = hasher();
        let a = h.hash("Same-Password-1").unwrap();
        let b = h.hash("Same-Password-1").unwrap();
        assert_ne!(a, b);
        assert!(h.verify(&a, "Same-Password-1").unwrap());
        assert!(h.verify(&b, "Same-Password-1").unwrap());
    }

    #[test]
    fn long_passwords_are_prehashed_but_still_distinguished() {
        let h = hasher();
        let long: String = "A1b!".repeat(40);
        assert!(long.chars().count() > PREHASH_THRESHOLD);
        let hash = h.hash(&long).unwrap();
        assert!(h.verify(&hash, &long).unwrap());

        let mut other = long.clone();
        other.push('x');
        assert!(!h.verify(&hash, &other).unwrap());
    }

    #[test]
    fn prehash_only_applies_above_threshold() {
        let exact = "a".repeat(PREHASH_THRESHOLD);
        assert_eq!(prehash(&exact), exact.as_str());
        let over = "a".repeat(PREHASH_THRESHOLD + 1);
        let collapsed = prehash(&over);
        assert_eq!(collapsed.len(), 64);
        assert_ne!(collapsed, over.as_str());
    }

    #[test]
    fn production_params_are_accepted() {
        assert!(PasswordHasher::new(PasswordConfig::default()).is_ok());
    }

    #[tokio::test]
    async fn blocking_wrappers_agree_with_sync_api() {
        let h = hasher();
        let hash = h.hash_blocking("Pa55word!".into()).await.unwrap();
        assert!(h.verify_blocking(hash.clone(), "Pa55word!".into()).await.unwrap());
        assert!(!h.verify_blocking(hash, "nope".into()).await.unwrap());
    }
}
