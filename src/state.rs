use std::sync::Arc;

use anyhow::Result;

use crate::config::Config;
use crate::db::{self, PgStore};
use crate::models::app::App;
use crate::repositories::memory::MemoryStore;
use crate::repositories::{AppRepository, Store};

/// The application's state.
#[derive(Clone)]
pub struct AppState {
    /// The session, app and user store.
    pub store: Arc<dyn Store>,
    /// The application's configuration.
    pub config: Arc<Config>,
}

impl AppState {
    /// Creates a new `AppState`, opening and migrating the store.
    ///
    /// # Arguments
    ///
    /// * `config` - The application's configuration.
    ///
    /// # Returns
    ///
    /// A `Result` containing the `AppState`.
    pub async fn new(config: &Config) -> Result<Self> {
        let store: Arc<dyn Store> = match &config.database_url {
            Some(url) => {
                let pool = db::create_pool(url)?;
                tracing::info!("✅ PostgreSQL Pool initialized with deadpool-postgres");
                db::migrate(&pool).await?;
                Arc::new(PgStore::new(pool))
            }
            None => {
                tracing::warn!("⚠️ DATABASE_URL not set, sessions live in memory only");
                Arc::new(MemoryStore::new())
            }
        };

        let state = Self::with_store(config.clone(), store);
        state.bootstrap_admin_app().await?;
        Ok(state)
    }

    /// Wraps an already opened store. Does not bootstrap anything.
    pub fn with_store(config: Config, store: Arc<dyn Store>) -> Self {
        Self {
            store,
            config: Arc::new(config),
        }
    }

    /// Creates the admin app, same-origin only, unless it already exists.
    pub async fn bootstrap_admin_app(&self) -> Result<App> {
        let slug = &self.config.admin_app_slug;
        if let Some(app) = self.store.find_app_by_slug(slug).await? {
            return Ok(app);
        }
        let app = self.store.insert_app(slug, &[String::new()]).await?;
        tracing::info!("🆕 Admin app {} created", slug);
        Ok(app)
    }
}
