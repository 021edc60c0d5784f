use std::sync::Arc;

use tracing::info;

use crate::store::{CheckpointStore, DatabaseConfig, DatabaseType, InMemoryStore, SqliteStore};

/// Build and initialize the configured checkpoint store.
pub async fn create_store(config: &DatabaseConfig) -> crate::Result<Arc<dyn CheckpointStore>> {
    config.validate().map_err(crate::Error::Config)?;

    let store: Arc<dyn CheckpointStore> = match config.db_type {
        DatabaseType::Sqlite => {
            let path = config
                .sqlite_path
                .as_ref()
                .ok_or_else(|| crate::Error::Config("SQLite path not configured".into()))?;
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                tokio::fs::create_dir_all(parent).await?;
            }
            let url = format!("sqlite://{}", path.display());
            Arc::new(SqliteStore::new(&url, config.max_connections).await?)
        }
        DatabaseType::Memory => {
            info!("Using in-memory checkpoint store; runs will not survive a restart");
            Arc::new(InMemoryStore::new())
        }
    };

    store.init().await?;
    Ok(store)
}
