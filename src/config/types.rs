use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_COLLECTOR_URL: &str = "http://127.0.0.1:8000";
pub const DEFAULT_SHARE_URL: &str = "https://logs.uplog.com/session=";

/// Lowest accepted poll interval for the tailer.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub collector: CollectorConfig,
    pub upload: UploadConfig,
    pub tail: TailConfig,
    pub capture: CaptureConfig,
    pub shutdown: ShutdownConfig,
}

impl Config {
    /// Session mode is decided by whether an API key is available.
    pub fn session_mode(&self) -> SessionMode {
        if self.collector.api_key.is_some() {
            SessionMode::Authenticated
        } else {
            SessionMode::Anonymous
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectorConfig {
    pub url: String,
    /// Prefix of the human-facing link printed for a session
    pub share_url: String,
    /// Per-attempt timeout for uploads
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// Timeout for user/session provisioning requests
    #[serde(with = "humantime_serde")]
    pub provision_timeout: Duration,
    pub api_key: Option<String>,
    pub user_id: Option<String>,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_COLLECTOR_URL.to_string(),
            share_url: DEFAULT_SHARE_URL.to_string(),
            timeout: Duration::from_secs(12),
            provision_timeout: Duration::from_secs(3),
            api_key: None,
            user_id: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    pub batch_size: usize,
    pub max_retries: usize,
    #[serde(with = "humantime_serde")]
    pub retry_delay: Duration,
    /// Ship a partially filled batch at this cadence. Disabled when unset.
    #[serde(with = "humantime_serde")]
    pub flush_interval: Option<Duration>,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            batch_size: 200,
            max_retries: 3,
            retry_delay: Duration::from_millis(300),
            flush_interval: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TailConfig {
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
    /// Also poll on filesystem change notifications
    pub watch_fs: bool,
}

impl Default for TailConfig {
    fn default() -> Self {
        Self {
            poll_interval: MIN_POLL_INTERVAL,
            watch_fs: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub mode: CaptureMode,
    pub pty_rows: u16,
    pub pty_cols: u16,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            mode: CaptureMode::Pipe,
            pty_rows: 24,
            pty_cols: 80,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureMode {
    Pipe,
    Pty,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShutdownConfig {
    /// How long an interrupted run may keep draining before it is cut off
    #[serde(with = "humantime_serde")]
    pub grace_period: Duration,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            grace_period: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionMode {
    Anonymous,
    Authenticated,
}

impl SessionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionMode::Anonymous => "anonymous",
            SessionMode::Authenticated => "authenticated",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "anonymous" => Some(SessionMode::Anonymous),
            "authenticated" => Some(SessionMode::Authenticated),
            _ => None,
        }
    }
}
