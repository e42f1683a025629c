//! Launching the supervised command and turning its output into records.
//!
//! A [`CaptureStrategy`] decides how the child is attached (plain pipes or a
//! pseudo-terminal); the [`CaptureEngine`] is the same for both.

pub mod engine;
pub mod pipe;
pub mod pty;

use crate::config::types::{CaptureConfig, CaptureMode};
use async_trait::async_trait;
use futures::stream::BoxStream;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

pub use engine::{CaptureEngine, CaptureSummary, Echo, RunningCapture};
pub use pipe::PipeCapture;
pub use pty::PtyCapture;

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("failed to start '{program}': {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },

    #[error("child process has no {0} pipe")]
    MissingPipe(&'static str),

    #[error("pseudo-terminal error: {0}")]
    Pty(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("task join error: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// The command line to supervise.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Split `[program, args...]`. Returns None for an empty list.
    pub fn from_argv(argv: &[String]) -> Option<Self> {
        let (program, args) = argv.split_first()?;
        Some(Self::new(program.clone(), args.iter().cloned()))
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// How the supervised command ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandExit {
    pub code: Option<i32>,
    pub signal: Option<i32>,
}

impl CommandExit {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

impl fmt::Display for CommandExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.code, self.signal) {
            (Some(code), _) => write!(f, "exit code {}", code),
            (None, Some(signal)) => write!(f, "terminated by signal {}", signal),
            (None, None) => f.write_str("unknown exit status"),
        }
    }
}

impl From<std::process::ExitStatus> for CommandExit {
    fn from(status: std::process::ExitStatus) -> Self {
        #[cfg(unix)]
        let signal = {
            use std::os::unix::process::ExitStatusExt;
            status.signal()
        };
        #[cfg(not(unix))]
        let signal = None;

        Self {
            code: status.code(),
            signal,
        }
    }
}

/// Lines of one output channel, without their line terminators.
pub type LineStream = BoxStream<'static, std::io::Result<String>>;

pub struct OutputStream {
    pub name: &'static str,
    pub lines: LineStream,
}

/// The running child, seen from the coordinator.
#[async_trait]
pub trait ProcessHandle: Send {
    fn id(&self) -> Option<u32>;

    /// Wait for the child to exit. When `cancel` fires first the child is
    /// killed and then reaped.
    async fn wait(&mut self, cancel: CancellationToken) -> Result<CommandExit, CaptureError>;
}

pub struct StartedProcess {
    pub streams: Vec<OutputStream>,
    pub process: Box<dyn ProcessHandle>,
}

pub trait CaptureStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    fn start(&self, command: &CommandSpec) -> Result<StartedProcess, CaptureError>;
}

pub fn strategy_for(config: &CaptureConfig) -> Arc<dyn CaptureStrategy> {
    match config.mode {
        CaptureMode::Pipe => Arc::new(PipeCapture),
        CaptureMode::Pty => Arc::new(PtyCapture::new(config.pty_rows, config.pty_cols)),
    }
}

/// Turn raw line bytes into text: drop the terminator, replace invalid UTF-8.
pub(crate) fn decode_line(raw: &[u8]) -> String {
    let line = raw.strip_suffix(b"\n").unwrap_or(raw);
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    String::from_utf8_lossy(line).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_line_strips_terminators() {
        assert_eq!(decode_line(b"hello\n"), "hello");
        assert_eq!(decode_line(b"pty line\r\n"), "pty line");
        assert_eq!(decode_line(b"no newline"), "no newline");
        assert_eq!(decode_line(b"\n"), "");
    }

    #[test]
    fn test_decode_line_is_lossy() {
        assert_eq!(decode_line(b"bad \xff byte\n"), "bad \u{fffd} byte");
    }

    #[test]
    fn test_command_spec_from_argv() {
        let argv = vec!["cargo".to_string(), "test".to_string(), "--all".to_string()];
        let spec = CommandSpec::from_argv(&argv).unwrap();
        assert_eq!(spec.program, "cargo");
        assert_eq!(spec.args, vec!["test", "--all"]);
        assert_eq!(spec.to_string(), "cargo test --all");
        assert!(CommandSpec::from_argv(&[]).is_none());
    }

    #[test]
    fn test_command_exit_display() {
        let ok = CommandExit { code: Some(0), signal: None };
        assert!(ok.success());
        assert_eq!(ok.to_string(), "exit code 0");

        let killed = CommandExit { code: None, signal: Some(9) };
        assert!(!killed.success());
        assert_eq!(killed.to_string(), "terminated by signal 9");
    }

    #[test]
    fn test_strategy_for_mode() {
        let mut config = CaptureConfig::default();
        assert_eq!(strategy_for(&config).name(), "pipe");
        config.mode = CaptureMode::Pty;
        assert_eq!(strategy_for(&config).name(), "pty");
    }
}
