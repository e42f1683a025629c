use super::context::RunContext;
use super::state::{Lifecycle, SessionState, TransitionError};
use crate::buffer::{BufferError, BufferWriter};
use crate::capture::{self, CaptureEngine, CaptureError, CaptureSummary, CommandExit, CommandSpec, Echo};
use crate::config::{AgentPaths, Config};
use crate::storage::{Session, SessionStore, StorageError};
use crate::tail::{OffsetTailer, TailOptions, TailSummary, TailWorker};
use crate::upload::{BatchUploader, Batcher, CircuitBreaker, Collector, SessionProvisioner};
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum RunError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("buffer error: {0}")]
    Buffer(#[from] BufferError),

    #[error("capture error: {0}")]
    Capture(#[from] CaptureError),

    #[error("lifecycle error: {0}")]
    Lifecycle(#[from] TransitionError),

    #[error("task join error: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// How a run ended.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub session_id: String,
    pub share_url: String,
    pub state: SessionState,
    /// None when the command could not be waited on
    pub exit: Option<CommandExit>,
    pub interrupted: bool,
    pub capture: Option<CaptureSummary>,
    /// None when the drain was cut off after the grace period
    pub tail: Option<TailSummary>,
    pub uploaded: bool,
    /// Set when the buffer file was left on disk
    pub kept_buffer: Option<PathBuf>,
}

/// Coordinates one supervised run from session creation to teardown.
pub struct SessionRunner {
    config: Arc<Config>,
    paths: AgentPaths,
    store: Arc<dyn SessionStore>,
    provisioner: Arc<dyn SessionProvisioner>,
    collector: Arc<dyn Collector>,
    echo: Echo,
}

impl SessionRunner {
    pub fn new(
        config: Arc<Config>,
        paths: AgentPaths,
        store: Arc<dyn SessionStore>,
        provisioner: Arc<dyn SessionProvisioner>,
        collector: Arc<dyn Collector>,
    ) -> Self {
        Self {
            config,
            paths,
            store,
            provisioner,
            collector,
            echo: Echo::Stdout,
        }
    }

    pub fn with_echo(mut self, echo: Echo) -> Self {
        self.echo = echo;
        self
    }

    /// Run `command` to completion while shipping its output.
    ///
    /// When `interrupt` resolves, intake is cancelled (the command is killed)
    /// and the already buffered records get `shutdown.grace_period` to drain.
    pub async fn run<I>(
        &self,
        command: &CommandSpec,
        tag: Option<String>,
        interrupt: I,
    ) -> Result<RunOutcome, RunError>
    where
        I: Future<Output = ()> + Send + 'static,
    {
        self.paths.ensure()?;

        let session_id = self.provision_session_id().await;
        let mut lifecycle = Lifecycle::new(&session_id);
        let ctx = Arc::new(RunContext::new(
            session_id,
            tag.clone(),
            &self.paths,
            self.config.clone(),
        ));

        self.store
            .insert_session(&Session::new(&ctx.session_id, ctx.mode, tag))
            .await?;
        let writer = Arc::new(BufferWriter::create(&ctx.buffer_path).await?);

        let (done_tx, done_rx) = oneshot::channel();
        let engine = CaptureEngine::new(
            capture::strategy_for(&self.config.capture),
            writer,
            self.store.clone(),
            ctx.clone(),
            self.echo.clone(),
        );
        let running = match engine.start(command, done_tx) {
            Ok(running) => running,
            Err(e) => {
                lifecycle.advance(SessionState::Aborted)?;
                self.discard_session(&ctx).await;
                return Err(e.into());
            }
        };
        lifecycle.advance(SessionState::Active)?;
        info!(session_id = %ctx.session_id, command = %command, "Session active");

        let cancel = CancellationToken::new();
        let mut tail_handle = tokio::spawn(self.tail_worker(&ctx).run(done_rx, cancel.clone()));
        let interrupt_handle = tokio::spawn({
            let cancel = cancel.clone();
            async move {
                interrupt.await;
                cancel.cancel();
            }
        });

        let mut process = running.process;
        let exit = match process.wait(cancel.clone()).await {
            Ok(exit) => Some(exit),
            Err(e) => {
                error!(session_id = %ctx.session_id, error = %e, "Failed to wait for command");
                None
            }
        };
        lifecycle.advance(SessionState::Draining)?;
        info!(
            session_id = %ctx.session_id,
            exit = %exit.map(|e| e.to_string()).unwrap_or_else(|| "unknown".to_string()),
            "Command finished, draining"
        );

        let tail = if cancel.is_cancelled() {
            self.drain_within_grace(&mut tail_handle).await?
        } else {
            tokio::select! {
                joined = &mut tail_handle => Some(joined?),
                _ = cancel.cancelled() => self.drain_within_grace(&mut tail_handle).await?,
            }
        };
        let interrupted = cancel.is_cancelled();
        interrupt_handle.abort();

        let capture = match &tail {
            Some(summary) => match summary.capture {
                Some(capture) => Some(capture),
                None => running.writer_task.await.ok(),
            },
            None => {
                running.writer_task.abort();
                None
            }
        };

        let mut outcome = RunOutcome {
            session_id: ctx.session_id.clone(),
            share_url: ctx.share_url(),
            state: lifecycle.state(),
            exit,
            interrupted,
            capture,
            tail,
            uploaded: false,
            kept_buffer: None,
        };

        match &outcome.tail {
            Some(summary) => {
                lifecycle.advance(SessionState::Finalized)?;
                if summary.fully_shipped() {
                    // Every record reached the collector, so the buffer goes
                    // even when the metadata update fails.
                    match self.store.mark_uploaded(&ctx.session_id).await {
                        Ok(()) => outcome.uploaded = true,
                        Err(e) => warn!(
                            session_id = %ctx.session_id,
                            error = %e,
                            "Shipped every record but failed to mark session uploaded"
                        ),
                    }
                    remove_buffer(&ctx).await;
                } else {
                    warn!(
                        session_id = %ctx.session_id,
                        abandoned = summary.abandoned,
                        buffer = %ctx.buffer_path.display(),
                        "Not every record was shipped, keeping buffer"
                    );
                    outcome.kept_buffer = Some(ctx.buffer_path.clone());
                }
            }
            None => {
                lifecycle.advance(SessionState::Aborted)?;
                outcome.kept_buffer = Some(ctx.buffer_path.clone());
            }
        }
        outcome.state = lifecycle.state();

        info!(
            session_id = %ctx.session_id,
            state = %outcome.state,
            uploaded = outcome.uploaded,
            "Session finished"
        );
        Ok(outcome)
    }

    /// Ask the collector for a session id; fall back to a local one.
    async fn provision_session_id(&self) -> String {
        match self.provisioner.create_session().await {
            Ok(id) if is_safe_session_id(&id) => id,
            Ok(id) => {
                warn!(session_id = %id, "Collector issued an unusable session id, using a local one");
                Uuid::new_v4().to_string()
            }
            Err(e) => {
                warn!(error = %e, "Session provisioning failed, using a local session id");
                Uuid::new_v4().to_string()
            }
        }
    }

    fn tail_worker(&self, ctx: &Arc<RunContext>) -> TailWorker {
        let uploader = BatchUploader::new(
            self.collector.clone(),
            CircuitBreaker::new(),
            ctx.clone(),
            &self.config.upload,
        );
        TailWorker::new(
            OffsetTailer::new(&ctx.buffer_path),
            Batcher::new(uploader, self.config.upload.batch_size),
            TailOptions {
                poll_interval: self.config.tail.poll_interval,
                watch_fs: self.config.tail.watch_fs,
                flush_interval: self.config.upload.flush_interval,
            },
        )
    }

    async fn drain_within_grace(
        &self,
        tail_handle: &mut JoinHandle<TailSummary>,
    ) -> Result<Option<TailSummary>, RunError> {
        let grace = self.config.shutdown.grace_period;
        match tokio::time::timeout(grace, &mut *tail_handle).await {
            Ok(joined) => Ok(Some(joined?)),
            Err(_) => {
                tail_handle.abort();
                warn!(grace_ms = grace.as_millis() as u64, "Drain did not finish within grace period");
                Ok(None)
            }
        }
    }

    async fn discard_session(&self, ctx: &RunContext) {
        remove_buffer(ctx).await;
        if let Err(e) = self.store.delete_session(&ctx.session_id).await {
            warn!(session_id = %ctx.session_id, error = %e, "Failed to remove session record");
        }
    }
}

async fn remove_buffer(ctx: &RunContext) {
    match tokio::fs::remove_file(&ctx.buffer_path).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(buffer = %ctx.buffer_path.display(), error = %e, "Failed to remove buffer"),
    }
}

/// Session ids become file names, so only plain identifier characters pass.
pub fn is_safe_session_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= 128
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_safe_session_ids() {
        assert!(is_safe_session_id("3f2b8c1e-0d4a-4c6e-9a51-2f1e7b9d0c11"));
        assert!(is_safe_session_id("abc_123"));
        assert!(!is_safe_session_id(""));
        assert!(!is_safe_session_id("../etc/passwd"));
        assert!(!is_safe_session_id("a b"));
        assert!(!is_safe_session_id(&"x".repeat(129)));
    }
}
