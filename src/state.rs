use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use mongodb::{
    bson::{doc, Document},
    options::IndexOptions,
    Client, Database, IndexModel,
};
use tracing::info;

use crate::auth::repo::{MongoUserStore, UserStore, USERS_COLLECTION};
use crate::config::AppConfig;
use crate::error::ApiError;
use crate::retry::with_backoff;

/// Dependencies shared by every handler; constructed once at startup and
/// cloned into the router. No ambient globals.
#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub users: Arc<dyn UserStore>,
    pub config: Arc<AppConfig>,
}

impl AppState {
    pub async fn init() -> anyhow::Result<Self> {
        let config = Arc::new(AppConfig::from_env()?);
        let client = Client::with_uri_str(&config.mongodb_uri)
            .await
            .context("parse MongoDB connection string")?;
        let db = client.database(&config.database_name);

        // Fail fast at startup if the database is unreachable, allowing a
        // few attempts for it to come up.
        with_backoff(5, Duration::from_millis(500), || {
            let db = db.clone();
            async move {
                db.run_command(doc! { "ping": 1 }, None)
                    .await
                    .map(|_| ())
                    .map_err(ApiError::from)
            }
        })
        .await
        .map_err(|e| anyhow::anyhow!("database ping failed: {e}"))?;

        ensure_user_indexes(&db).await.context("create user indexes")?;

        info!(database = %config.database_name, "connected to MongoDB");
        let users = Arc::new(MongoUserStore::new(&db)) as Arc<dyn UserStore>;
        Ok(Self { db, users, config })
    }

    /// State for unit tests: lazily-connecting client (no database is
    /// touched) and an in-memory credential store.
    #[cfg(test)]
    pub async fn fake() -> Self {
        use crate::auth::repo::test_store::InMemoryUserStore;

        let config = Arc::new(AppConfig::for_tests());
        let client = Client::with_uri_str(&config.mongodb_uri)
            .await
            .expect("lazy client should construct");
        let db = client.database(&config.database_name);
        let users = Arc::new(InMemoryUserStore::new()) as Arc<dyn UserStore>;
        Self { db, users, config }
    }
}

/// Duplicate registrations are ultimately rejected by the database, not by
/// the pre-insert lookups, which can race.
async fn ensure_user_indexes(db: &Database) -> mongodb::error::Result<()> {
    let coll = db.collection::<Document>(USERS_COLLECTION);
    for field in ["username", "email"] {
        let model = IndexModel::builder()
            .keys(doc! { field: 1 })
            .options(IndexOptions::builder().unique(true).build())
            .build();
        coll.create_index(model, None).await?;
    }
    Ok(())
}
