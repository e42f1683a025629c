pub mod config;
pub mod delete;
pub mod list;
pub mod run;

use crate::config::AgentPaths;
use crate::storage::{DuckDbSessionStore, SessionStore, StorageError};

/// Open the session database under `paths`, creating the schema if needed.
pub async fn open_store(paths: &AgentPaths) -> Result<DuckDbSessionStore, StorageError> {
    paths.ensure().map_err(|e| {
        StorageError::Database(format!(
            "cannot create {}: {}",
            paths.base().display(),
            e
        ))
    })?;
    let store = DuckDbSessionStore::new(paths.db_path())?;
    store.init_schema().await?;
    Ok(store)
}
