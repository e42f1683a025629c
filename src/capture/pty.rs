use super::{
    decode_line, CaptureError, CaptureStrategy, CommandExit, CommandSpec, LineStream,
    OutputStream, ProcessHandle, StartedProcess,
};
use async_trait::async_trait;
use futures::StreamExt;
use portable_pty::{Child, ChildKiller, CommandBuilder, MasterPty, NativePtySystem, PtySize, PtySystem};
use std::io::{BufRead, BufReader, ErrorKind, Read};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Linux reports EIO on the master side once every slave handle is closed.
const EIO: i32 = 5;

/// Consecutive read failures after which the pty is given up on.
const MAX_READ_FAILURES: u32 = 8;

/// Runs the command inside a pseudo-terminal so it behaves as if attached to
/// a real terminal. Output arrives as a single combined stream.
#[derive(Debug, Clone, Copy)]
pub struct PtyCapture {
    rows: u16,
    cols: u16,
}

impl PtyCapture {
    pub fn new(rows: u16, cols: u16) -> Self {
        Self { rows, cols }
    }
}

impl CaptureStrategy for PtyCapture {
    fn name(&self) -> &'static str {
        "pty"
    }

    fn start(&self, command: &CommandSpec) -> Result<StartedProcess, CaptureError> {
        let pair = NativePtySystem::default()
            .openpty(PtySize {
                rows: self.rows,
                cols: self.cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| CaptureError::Pty(format!("failed to open pty: {}", e)))?;

        let mut builder = CommandBuilder::new(&command.program);
        builder.args(&command.args);
        if let Ok(cwd) = std::env::current_dir() {
            builder.cwd(cwd);
        }

        let child = pair
            .slave
            .spawn_command(builder)
            .map_err(|e| CaptureError::Spawn {
                program: command.program.clone(),
                source: std::io::Error::new(ErrorKind::Other, e.to_string()),
            })?;
        // Only the child may hold the slave side, otherwise reads never see EOF.
        drop(pair.slave);

        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| CaptureError::Pty(format!("failed to clone pty reader: {}", e)))?;

        debug!(pid = ?child.process_id(), command = %command, rows = self.rows, cols = self.cols, "Spawned command in pty");

        let killer = child.clone_killer();
        Ok(StartedProcess {
            streams: vec![OutputStream {
                name: "pty",
                lines: spawn_reader(reader),
            }],
            process: Box::new(PtyProcess {
                child: Some(child),
                killer,
                _master: pair.master,
            }),
        })
    }
}

/// The pty reader is blocking, so lines are read on a dedicated thread and
/// handed to async land through a channel.
fn spawn_reader(reader: Box<dyn Read + Send>) -> LineStream {
    let (tx, rx) = mpsc::unbounded_channel::<std::io::Result<String>>();

    std::thread::spawn(move || {
        let mut reader = BufReader::new(reader);
        let mut buf = Vec::new();
        let mut failures = 0;
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf) {
                Ok(0) => break,
                Ok(_) => {
                    failures = 0;
                    if tx.send(Ok(decode_line(&buf))).is_err() {
                        break;
                    }
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) if e.raw_os_error() == Some(EIO) => {
                    if !buf.is_empty() {
                        let _ = tx.send(Ok(decode_line(&buf)));
                    }
                    break;
                }
                // Keep reading past isolated failures so the child is not
                // left blocked on a full terminal buffer.
                Err(e) => {
                    failures += 1;
                    warn!(error = %e, failures, "pty read failed");
                    if tx.send(Err(e)).is_err() || failures >= MAX_READ_FAILURES {
                        break;
                    }
                }
            }
        }
    });

    futures::stream::unfold(rx, |mut rx| async move {
        let item = rx.recv().await?;
        Some((item, rx))
    })
    .boxed()
}

struct PtyProcess {
    child: Option<Box<dyn Child + Send + Sync>>,
    killer: Box<dyn ChildKiller + Send + Sync>,
    // Closing the master hangs up the child; keep it until the child is reaped.
    _master: Box<dyn MasterPty + Send>,
}

#[async_trait]
impl ProcessHandle for PtyProcess {
    fn id(&self) -> Option<u32> {
        self.child.as_ref().and_then(|child| child.process_id())
    }

    async fn wait(&mut self, cancel: CancellationToken) -> Result<CommandExit, CaptureError> {
        let mut child = self
            .child
            .take()
            .ok_or_else(|| CaptureError::Pty("command was already reaped".to_string()))?;

        let mut waiter = tokio::task::spawn_blocking(move || child.wait());
        let status = tokio::select! {
            joined = &mut waiter => joined??,
            _ = cancel.cancelled() => {
                debug!("Intake cancelled, killing pty command");
                if let Err(e) = self.killer.kill() {
                    debug!(error = %e, "Kill failed, command already exited");
                }
                waiter.await??
            }
        };

        Ok(pty_exit(&status))
    }
}

/// The pty layer reports a signal death as exit code 1 plus the signal's
/// description, so the number has to be recovered from the text.
fn pty_exit(status: &portable_pty::ExitStatus) -> CommandExit {
    match status.signal() {
        Some(description) => {
            let signal = signal_number(description);
            if signal.is_none() {
                debug!(signal = description, "Unrecognised signal description");
            }
            CommandExit { code: None, signal }
        }
        None => CommandExit {
            code: Some(status.exit_code() as i32),
            signal: None,
        },
    }
}

fn signal_number(description: &str) -> Option<i32> {
    // "Signal 42" for unnamed signals, "Killed: 9" on BSD-flavoured libcs.
    if let Some(n) = description
        .rsplit(|c: char| c == ' ' || c == ':')
        .next()
        .and_then(|last| last.parse().ok())
    {
        return Some(n);
    }

    let signal = match description {
        "Hangup" => 1,
        "Interrupt" => 2,
        "Quit" => 3,
        "Illegal instruction" => 4,
        "Aborted" => 6,
        "Bus error" => 7,
        "Floating point exception" => 8,
        "Killed" => 9,
        "Segmentation fault" => 11,
        "Broken pipe" => 13,
        "Alarm clock" => 14,
        "Terminated" => 15,
        _ => return None,
    };
    Some(signal)
}
