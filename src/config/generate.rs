pub fn generate_starter_config() -> String {
    r#"# =============================================================================
# UPLOG CONFIGURATION
# =============================================================================
# Every section is optional; omitted keys fall back to the values shown here.
#
# Config file locations (in order of precedence):
#   1. Path specified via --config argument
#   2. ~/.uplog/config/config.yml   ($UPLOG_HOME/config/config.yml)

# =============================================================================
# COLLECTOR
# =============================================================================
collector:
  # Base URL of the remote collector
  url: http://127.0.0.1:8000
  # Prefix of the link printed for each session
  share_url: https://logs.uplog.com/session=
  # Per-attempt timeout for batch uploads
  timeout: 12s
  # Timeout for user/session provisioning at startup
  provision_timeout: 3s
  # Bearer token; falls back to the UPLOG_API_KEY environment variable.
  # Sessions run with a key are recorded as "authenticated".
  # Environment variables can be referenced as $env{...}.
  # api_key: your-api-key

# =============================================================================
# UPLOAD
# =============================================================================
upload:
  # Maximum records per batch
  batch_size: 200
  # Attempts per batch before uploads are disabled for the session
  max_retries: 3
  # Constant delay between attempts
  retry_delay: 300ms
  # Ship a partially filled batch on this cadence (disabled when omitted)
  # flush_interval: 5s

# =============================================================================
# TAIL
# =============================================================================
tail:
  # How often the local buffer is polled (minimum 200ms, overridden by --poll)
  poll_interval: 200ms
  # Also react to filesystem change notifications
  watch_fs: true

# =============================================================================
# CAPTURE
# =============================================================================
capture:
  # 'pipe' captures stdout and stderr; 'pty' runs the command in a
  # pseudo-terminal (overridden by --pty)
  mode: pipe
  pty_rows: 24
  pty_cols: 80

# =============================================================================
# SHUTDOWN
# =============================================================================
shutdown:
  # After Ctrl-C, how long the uploader may keep draining before exit
  grace_period: 5s
"#
    .to_string()
}
