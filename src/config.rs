use std::fmt;

use anyhow::Context;
use serde::Deserialize;

#[derive(Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: String,
    pub audience: String,
    pub ttl_minutes: i64,
}

// The signing secret must never reach the logs.
impl fmt::Debug for JwtConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JwtConfig")
            .field("secret", &"<redacted>")
            .field("issuer", &self.issuer)
            .field("audience", &self.audience)
            .field("ttl_minutes", &self.ttl_minutes)
            .finish()
    }
}

#[derive(Clone, Deserialize)]
pub struct RefreshConfig {
    pub ttl_days: i64,
    pub cookie_name: String,
    pub cookie_path: String,
    pub cookie_secure: bool,
    pub pepper: String,
}

impl fmt::Debug for RefreshConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RefreshConfig")
            .field("ttl_days", &self.ttl_days)
            .field("cookie_name", &self.cookie_name)
            .field("cookie_path", &self.cookie_path)
            .field("cookie_secure", &self.cookie_secure)
            .field("pepper", &"<redacted>")
            .finish()
    }
}

/// Argon2id cost parameters.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct PasswordConfig {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Default for PasswordConfig {
    fn default() -> Self {
        Self {
            memory_kib: 64 * 1024,
            iterations: 3,
            parallelism: 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    Postgres,
    Memory,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub store: StoreKind,
    pub database_url: Option<String>,
    pub jwt: JwtConfig,
    pub refresh: RefreshConfig,
    pub password: PasswordConfig,
    pub cors_origins: Vec<String>,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let store = match std::env::var("STORE").as_deref() {
            Ok("memory") => StoreKind::Memory,
            Ok("postgres") | Err(_) => StoreKind::Postgres,
            Ok(other) => anyhow::bail!("unknown STORE value: {other}"),
        };
        let database_url = std::env::var("DATABASE_URL").ok();
        if store == StoreKind::Postgres && database_url.is_none() {
            anyhow::bail!("DATABASE_URL is required when STORE=postgres");
        }

        let jwt = JwtConfig {
            secret: std::env::var("JWT_SECRET").context("JWT_SECRET must be set")?,
            issuer: std::env::var("JWT_ISSUER").unwrap_or_else(|_| "sessionguard".into()),
            audience: std::env::var("JWT_AUDIENCE")
                .unwrap_or_else(|_| "sessionguard-users".into()),
            ttl_minutes: env_parse("JWT_TTL_MINUTES", 15),
        };
        anyhow::ensure!(!jwt.secret.is_empty(), "JWT_SECRET must not be empty");

        let refresh = RefreshConfig {
            ttl_days: env_parse("REFRESH_TTL_DAYS", 7),
            cookie_name: std::env::var("REFRESH_COOKIE_NAME")
                .unwrap_or_else(|_| "refreshToken".into()),
            cookie_path: std::env::var("REFRESH_COOKIE_PATH")
                .unwrap_or_else(|_| "/api/auth/refresh".into()),
            cookie_secure: env_parse("COOKIE_SECURE", false),
            pepper: std::env::var("REFRESH_TOKEN_PEPPER").unwrap_or_default(),
        };

        let defaults = PasswordConfig::default();
        let password = PasswordConfig {
            memory_kib: env_parse("ARGON2_MEMORY_KIB", defaults.memory_kib),
            iterations: env_parse("ARGON2_ITERATIONS", defaults.iterations),
            parallelism: env_parse("ARGON2_PARALLELISM", defaults.parallelism),
        };

        let cors_origins = std::env::var("CORS_ORIGINS")
            .map(|v| {
                v.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();

        let config = Self {
            store,
            database_url,
            jwt,
            refresh,
            password,
            cors_origins,
        };
        config.validate()?;
        Ok(config)
    }

    /// Lifetimes are bounded so expiry arithmetic can never overflow.
    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            (1..=MAX_ACCESS_TTL_MINUTES).contains(&self.jwt.ttl_minutes),
            "JWT_TTL_MINUTES must be between 1 and {MAX_ACCESS_TTL_MINUTES}"
        );
        anyhow::ensure!(
            (1..=MAX_REFRESH_TTL_DAYS).contains(&self.refresh.ttl_days),
            "REFRESH_TTL_DAYS must be between 1 and {MAX_REFRESH_TTL_DAYS}"
        );
        Ok(())
    }
}

const MAX_ACCESS_TTL_MINUTES: i64 = 24 * 60;
const MAX_REFRESH_TTL_DAYS: i64 = 365;

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

#[cfg(test)]
pub(crate) fn test_config() -> AppConfig {
    AppConfig {
        store: StoreKind::Memory,
        database_url: None,
        jwt: JwtConfig {
            secret: "test-secret".into(),
            issuer: "test-issuer".into(),
            audience: "test-aud".into(),
            ttl_minutes: 15,
        },
        refresh: RefreshConfig {
            ttl_days: 7,
            cookie_name: "refreshToken".into(),
            cookie_path: "/api/auth/refresh".into(),
            cookie_secure: false,
            pepper: String::new(),
        },
        // Cheap parameters keep the test suite fast.
        password: PasswordConfig {
            memory_kib: 1024,
            iterations: 1,
            parallelism: 1,
        },
        cors_origins: Vec::new(),
    }
}
