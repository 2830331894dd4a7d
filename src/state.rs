use std::sync::Arc;

use axum::extract::FromRef;

use crate::auth::{jwt::JwtKeys, session::SessionService};
use crate::config::{AppConfig, StoreKind};
use crate::store::{CredentialStore, MemoryStore, PgStore};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub sessions: SessionService,
}

impl AppState {
    pub async fn init(config: AppConfig) -> anyhow::Result<Self> {
        let store: Arc<dyn CredentialStore> = match config.store {
            StoreKind::Postgres => {
                let url = config
                    .database_url
                    .as_deref()
                    .ok_or_else(|| anyhow::anyhow!("DATABASE_URL is not set"))?;
                let pg = PgStore::connect(url).await?;
                sqlx::migrate!("./migrations").run(pg.pool()).await?;
                Arc::new(pg)
            }
            StoreKind::Memory => {
                tracing::warn!("using in-memory credential store; data is lost on restart");
                Arc::new(MemoryStore::new())
            }
        };
        Self::from_parts(store, config)
    }

    pub fn from_parts(store: Arc<dyn CredentialStore>, config: AppConfig) -> anyhow::Result<Self> {
        let sessions = SessionService::new(store, &config)?;
        Ok(Self {
            config: Arc::new(config),
            sessions,
        })
    }

    #[cfg(test)]
    pub fn fake() -> Self {
        Self::from_parts(Arc::new(MemoryStore::new()), crate::config::test_config())
            .expect("test state")
    }
}

impl FromRef<AppState> for JwtKeys {
    fn from_ref(state: &AppState) -> Self {
        state.sessions.keys().clone()
    }
}
