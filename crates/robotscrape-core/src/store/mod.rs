//! Tabular store: connection pool, embedded migrations, and one submodule
//! of prepared-statement queries per entity.

pub mod api_keys;
pub mod cache;
pub mod idempotency;
pub mod jobs;
pub mod logs;
pub mod queue;
pub mod rate_limit;
pub mod schedules;
pub mod webhooks;

use sqlx::sqlite::{SqlitePoolOptions, SqliteConnectOptions};
use sqlx::SqlitePool;
use std::str::FromStr;

use crate::error::Result;

/// Handle to the tabular store. Cheap to clone (wraps a connection pool).
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Connect to the store at `url` (an sqlx connection string, e.g.
    /// `sqlite://robotscrape.db`), creating the database file if missing.
    pub async fn connect(url: &str) -> Result<Self> {
        let opts = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(10)
            .connect_with(opts)
            .await?;
        Ok(Self { pool })
    }

    /// Apply pending embedded migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    /// Build a store around an already-open pool (used by tests).
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[cfg(test)]
pub(crate) async fn test_store() -> Store {
    let store = Store::connect("sqlite::memory:").await.unwrap();
    store.migrate().await.unwrap();
    store
}
