use super::{CaptureError, CaptureStrategy, CommandSpec, OutputStream, ProcessHandle};
use crate::buffer::BufferWriter;
use crate::pipeline::RunContext;
use crate::record::LogRecord;
use crate::storage::SessionStore;
use std::sync::{Arc, Mutex};
use tokio::io::AsyncWriteExt;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Where captured lines are shown while they are being shipped.
#[derive(Debug, Clone, Default)]
pub enum Echo {
    #[default]
    Stdout,
    Silent,
    /// Keep echoed lines in memory instead of printing them.
    Buffer(Arc<Mutex<Vec<String>>>),
}

impl Echo {
    async fn line(&self, line: &str) {
        match self {
            Echo::Stdout => {
                // One write per line keeps lines from different channels whole.
                let mut bytes = Vec::with_capacity(line.len() + 1);
                bytes.extend_from_slice(line.as_bytes());
                bytes.push(b'\n');
                let mut out = tokio::io::stdout();
                if let Err(e) = out.write_all(&bytes).await {
                    debug!(error = %e, "Echo to stdout failed");
                }
                let _ = out.flush().await;
            }
            Echo::Silent => {}
            Echo::Buffer(lines) => {
                if let Ok(mut lines) = lines.lock() {
                    lines.push(line.to_string());
                }
            }
        }
    }
}

/// Totals reported once all output channels are closed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CaptureSummary {
    pub lines: u64,
    pub bytes: u64,
    pub dropped: u64,
}

impl CaptureSummary {
    fn merge(&mut self, other: CaptureSummary) {
        self.lines += other.lines;
        self.bytes += other.bytes;
        self.dropped += other.dropped;
    }
}

pub struct RunningCapture {
    pub process: Box<dyn ProcessHandle>,
    /// Resolves after the end marker is written; yields the same summary
    /// that was sent on the completion channel.
    pub writer_task: JoinHandle<CaptureSummary>,
}

/// Reads every output channel of the command, echoes each line and appends it
/// to the session buffer.
pub struct CaptureEngine {
    strategy: Arc<dyn CaptureStrategy>,
    writer: Arc<BufferWriter>,
    store: Arc<dyn SessionStore>,
    ctx: Arc<RunContext>,
    echo: Echo,
}

impl CaptureEngine {
    pub fn new(
        strategy: Arc<dyn CaptureStrategy>,
        writer: Arc<BufferWriter>,
        store: Arc<dyn SessionStore>,
        ctx: Arc<RunContext>,
        echo: Echo,
    ) -> Self {
        Self {
            strategy,
            writer,
            store,
            ctx,
            echo,
        }
    }

    /// Spawn the command and start pumping its output.
    ///
    /// `writing_done` fires exactly once, after every channel reached end of
    /// stream and the end marker has been appended.
    pub fn start(
        self,
        command: &CommandSpec,
        writing_done: oneshot::Sender<CaptureSummary>,
    ) -> Result<RunningCapture, CaptureError> {
        let started = self.strategy.start(command)?;
        info!(
            session_id = %self.ctx.session_id,
            strategy = self.strategy.name(),
            pid = ?started.process.id(),
            "Capture started"
        );

        let engine = Arc::new(self);
        let readers: Vec<_> = started
            .streams
            .into_iter()
            .map(|stream| tokio::spawn(Arc::clone(&engine).pump(stream)))
            .collect();

        let writer_task = tokio::spawn(async move {
            let mut summary = CaptureSummary::default();
            for reader in readers {
                match reader.await {
                    Ok(partial) => summary.merge(partial),
                    Err(e) => error!(error = %e, "Output reader task failed"),
                }
            }

            if let Err(e) = engine.writer.finish().await {
                warn!(
                    session_id = %engine.ctx.session_id,
                    error = %e,
                    "Failed to write end marker"
                );
            }

            info!(
                session_id = %engine.ctx.session_id,
                lines = summary.lines,
                bytes = summary.bytes,
                dropped = summary.dropped,
                "Capture complete"
            );
            if writing_done.send(summary).is_err() {
                debug!("Nobody is waiting for capture completion");
            }
            summary
        });

        Ok(RunningCapture {
            process: started.process,
            writer_task,
        })
    }

    async fn pump(self: Arc<Self>, stream: OutputStream) -> CaptureSummary {
        use futures::StreamExt;

        let OutputStream { name, mut lines } = stream;
        let mut summary = CaptureSummary::default();
        // Read errors do not stop the pump; the stream is drained until it
        // ends so the child never blocks on a full pipe.
        while let Some(next) = lines.next().await {
            match next {
                Ok(line) => self.capture_line(line, &mut summary).await,
                Err(e) => warn!(stream = name, error = %e, "Read error on output stream"),
            }
        }
        debug!(stream = name, lines = summary.lines, "Stream reached end");
        summary
    }

    async fn capture_line(&self, line: String, summary: &mut CaptureSummary) {
        self.echo.line(&line).await;

        let record = LogRecord::capture(line);
        let bytes = match self.writer.append(&record).await {
            Ok(bytes) => bytes,
            Err(e) => {
                summary.dropped += 1;
                warn!(session_id = %self.ctx.session_id, error = %e, "Dropping record, append failed");
                return;
            }
        };
        summary.lines += 1;
        summary.bytes += bytes;

        if let Err(e) = self
            .store
            .increment_stats(&self.ctx.session_id, 1, bytes)
            .await
        {
            warn!(session_id = %self.ctx.session_id, error = %e, "Failed to update session counters");
        }
    }
}
