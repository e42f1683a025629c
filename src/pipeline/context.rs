use crate::config::{AgentPaths, Config, SessionMode};
use std::path::PathBuf;
use std::sync::Arc;

/// Everything one run's components need to know about the session they serve.
/// Built once by the runner and shared read-only.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub session_id: String,
    pub tag: Option<String>,
    pub mode: SessionMode,
    pub buffer_path: PathBuf,
    pub config: Arc<Config>,
}

impl RunContext {
    pub fn new(
        session_id: impl Into<String>,
        tag: Option<String>,
        paths: &AgentPaths,
        config: Arc<Config>,
    ) -> Self {
        let session_id = session_id.into();
        Self {
            buffer_path: paths.buffer_path(&session_id),
            mode: config.session_mode(),
            session_id,
            tag,
            config,
        }
    }

    pub fn share_url(&self) -> String {
        format!("{}{}", self.config.collector.share_url, self.session_id)
    }
}
