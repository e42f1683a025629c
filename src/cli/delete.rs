use crate::config::AgentPaths;
use crate::pipeline::runner::is_safe_session_id;
use crate::storage::{SessionStore, StorageError};
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeleteTarget {
    Session(String),
    All,
}

/// What a delete removed. Zero counts are a normal outcome.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeleteReport {
    pub records: usize,
    pub buffers: usize,
}

pub async fn delete(paths: &AgentPaths, target: DeleteTarget) -> Result<(), Box<dyn std::error::Error>> {
    let store = super::open_store(paths).await?;
    let report = delete_sessions(&store, paths, &target).await?;

    match target {
        DeleteTarget::Session(id) if report.records == 0 && report.buffers == 0 => {
            println!("Session {} not found, nothing to delete", id)
        }
        DeleteTarget::Session(id) => println!("Deleted session {}", id),
        DeleteTarget::All => println!(
            "Deleted {} sessions and {} buffer files",
            report.records, report.buffers
        ),
    }
    Ok(())
}

/// Remove session records and their buffer files. Deleting something that is
/// already gone succeeds.
pub async fn delete_sessions(
    store: &dyn SessionStore,
    paths: &AgentPaths,
    target: &DeleteTarget,
) -> Result<DeleteReport, StorageError> {
    let mut report = DeleteReport::default();
    match target {
        DeleteTarget::Session(id) => {
            if store.delete_session(id).await? {
                report.records = 1;
            }
            if is_safe_session_id(id) && remove_file(&paths.buffer_path(id)) {
                report.buffers = 1;
            }
        }
        DeleteTarget::All => {
            report.records = store.delete_all().await?;
            let buffers = paths
                .buffer_files()
                .map_err(|e| StorageError::Database(format!("cannot list buffer files: {}", e)))?;
            report.buffers = buffers.iter().filter(|path| remove_file(path)).count();
        }
    }
    Ok(report)
}

fn remove_file(path: &std::path::Path) -> bool {
    match std::fs::remove_file(path) {
        Ok(()) => true,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Failed to remove buffer file");
            false
        }
    }
}
