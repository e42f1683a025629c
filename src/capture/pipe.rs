use super::{
    decode_line, CaptureError, CaptureStrategy, CommandExit, CommandSpec, LineStream,
    OutputStream, ProcessHandle, StartedProcess,
};
use async_trait::async_trait;
use futures::StreamExt;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Captures stdout and stderr through two pipes. Stdin stays attached to the
/// operator's terminal.
#[derive(Debug, Default, Clone, Copy)]
pub struct PipeCapture;

impl CaptureStrategy for PipeCapture {
    fn name(&self) -> &'static str {
        "pipe"
    }

    fn start(&self, command: &CommandSpec) -> Result<StartedProcess, CaptureError> {
        let mut child = Command::new(&command.program)
            .args(&command.args)
            .stdin(Stdio::inherit())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| CaptureError::Spawn {
                program: command.program.clone(),
                source,
            })?;

        let stdout = child.stdout.take().ok_or(CaptureError::MissingPipe("stdout"))?;
        let stderr = child.stderr.take().ok_or(CaptureError::MissingPipe("stderr"))?;

        debug!(pid = ?child.id(), command = %command, "Spawned command with pipes");

        Ok(StartedProcess {
            streams: vec![
                OutputStream {
                    name: "stdout",
                    lines: read_lines(stdout),
                },
                OutputStream {
                    name: "stderr",
                    lines: read_lines(stderr),
                },
            ],
            process: Box::new(PipeProcess { child }),
        })
    }
}

/// Line stream over any async reader. A final line without terminator is
/// still yielded.
pub fn read_lines<R>(reader: R) -> LineStream
where
    R: AsyncRead + Send + Unpin + 'static,
{
    futures::stream::unfold(Some(BufReader::new(reader)), |state| async move {
        let mut reader = state?;
        let mut buf = Vec::new();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => None,
            Ok(_) => Some((Ok(decode_line(&buf)), Some(reader))),
            Err(e) => Some((Err(e), None)),
        }
    })
    .boxed()
}

struct PipeProcess {
    child: Child,
}

#[async_trait]
impl ProcessHandle for PipeProcess {
    fn id(&self) -> Option<u32> {
        self.child.id()
    }

    async fn wait(&mut self, cancel: CancellationToken) -> Result<CommandExit, CaptureError> {
        tokio::select! {
            status = self.child.wait() => Ok(status?.into()),
            _ = cancel.cancelled() => {
                debug!(pid = ?self.child.id(), "Intake cancelled, killing command");
                if let Err(e) = self.child.start_kill() {
                    debug!(error = %e, "Kill failed, command already exited");
                }
                Ok(self.child.wait().await?.into())
            }
        }
    }
}
