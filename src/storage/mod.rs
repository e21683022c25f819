pub mod cached;
pub mod postgres;
pub mod sqlite;
pub mod trait_def;

pub use cached::CachedCounterStore;
pub use postgres::PostgresStore;
pub use sqlite::SqliteStore;
pub use trait_def::{CounterStore, StorageError, StorageResult};

use crate::config::{DatabaseBackend, DatabaseConfig};
use std::sync::Arc;

/// Connect to the configured backend. Does not create tables.
pub async fn connect(config: &DatabaseConfig) -> anyhow::Result<Arc<dyn CounterStore>> {
    let store: Arc<dyn CounterStore> = match config.backend {
        DatabaseBackend::Sqlite => {
            Arc::new(SqliteStore::new(&config.url, config.max_connections).await?)
        }
        DatabaseBackend::Postgres => {
            Arc::new(PostgresStore::new(&config.url, config.max_connections).await?)
        }
    };
    Ok(store)
}
