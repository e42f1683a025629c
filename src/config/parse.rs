use super::types::*;
use crate::config::expand_env_vars;
use regex::Regex;
use std::fs::File;
use std::path::Path;
use thiserror::Error;

pub const API_KEY_ENV: &str = "UPLOG_API_KEY";
pub const USER_ID_ENV: &str = "UPLOG_USER_ID";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse YAML: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("validation failed:\n{}", .0.join("\n"))]
    ValidationList(Vec<String>),

    #[error("validation failed: {0}")]
    Validation(String),
}

/// Load the config file if one was found, otherwise start from defaults.
///
/// Credentials from the environment fill in whatever the file leaves unset.
pub fn load_or_default(path: Option<&Path>) -> Result<Config, ConfigError> {
    let mut config = match path {
        Some(path) => load_config(path)?,
        None => Config::default(),
    };
    apply_env_credentials(&mut config);
    validate_config(&config)?;
    Ok(config)
}

pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    use std::io::Read;

    let mut file = File::open(path).map_err(|e| {
        ConfigError::Io(std::io::Error::new(
            e.kind(),
            format!("failed to open config file '{}': {}", path.display(), e),
        ))
    })?;

    let mut yaml_string = String::new();
    file.read_to_string(&mut yaml_string).map_err(|e| {
        ConfigError::Io(std::io::Error::new(
            e.kind(),
            format!("failed to read config file '{}': {}", path.display(), e),
        ))
    })?;

    let config = parse_config_str(&yaml_string).map_err(|e| match e {
        ConfigError::YamlParse(e) => ConfigError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("in file '{}': {}", path.display(), e),
        )),
        other => other,
    })?;

    validate_config(&config)?;

    Ok(config)
}

/// Parse YAML text after `$env{VAR}` expansion. Empty documents yield defaults.
pub fn parse_config_str(yaml: &str) -> Result<Config, ConfigError> {
    let yaml = expand_env_vars(yaml);
    check_unexpanded_vars(&yaml)?;

    if yaml.trim().is_empty() {
        return Ok(Config::default());
    }

    let mut config: Config = serde_yaml::from_str(&yaml)?;
    normalize(&mut config);
    Ok(config)
}

fn apply_env_credentials(config: &mut Config) {
    if config.collector.api_key.is_none() {
        config.collector.api_key = non_empty_env(API_KEY_ENV);
    }
    if config.collector.user_id.is_none() {
        config.collector.user_id = non_empty_env(USER_ID_ENV);
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

// Blank credentials in the file behave like absent ones
fn normalize(config: &mut Config) {
    if config.collector.api_key.as_deref().is_some_and(|k| k.trim().is_empty()) {
        config.collector.api_key = None;
    }
    if config.collector.user_id.as_deref().is_some_and(|k| k.trim().is_empty()) {
        config.collector.user_id = None;
    }
    let trimmed = config.collector.url.trim_end_matches('/').len();
    config.collector.url.truncate(trimmed);
}

fn check_unexpanded_vars(yaml_string: &str) -> Result<(), ConfigError> {
    let re = Regex::new(r"\$env\{([A-Za-z_][A-Za-z0-9_]*)\}")
        .map_err(|e| ConfigError::Validation(e.to_string()))?;
    let mut unexpanded_vars: Vec<String> = re
        .captures_iter(yaml_string)
        .filter_map(|cap| cap.get(1).map(|m| m.as_str().to_string()))
        .collect();

    if unexpanded_vars.is_empty() {
        return Ok(());
    }

    unexpanded_vars.sort();
    unexpanded_vars.dedup();

    Err(ConfigError::Validation(format!(
        "environment variables are not set: {}",
        unexpanded_vars.join(", ")
    )))
}

pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    let mut errors = Vec::new();

    if config.collector.url.trim().is_empty() {
        errors.push("collector.url must not be empty".to_string());
    } else if !config.collector.url.starts_with("http://")
        && !config.collector.url.starts_with("https://")
    {
        errors.push(format!(
            "collector.url must be an http(s) URL, got '{}'",
            config.collector.url
        ));
    }

    if config.upload.batch_size == 0 {
        errors.push("upload.batch_size must be at least 1".to_string());
    }
    if config.upload.max_retries == 0 {
        errors.push("upload.max_retries must be at least 1".to_string());
    }
    if let Some(interval) = config.upload.flush_interval {
        if interval.is_zero() {
            errors.push("upload.flush_interval must be greater than zero".to_string());
        }
    }

    if config.tail.poll_interval < MIN_POLL_INTERVAL {
        errors.push(format!(
            "tail.poll_interval must be at least {}ms, got {}ms",
            MIN_POLL_INTERVAL.as_millis(),
            config.tail.poll_interval.as_millis()
        ));
    }

    if config.capture.pty_rows == 0 || config.capture.pty_cols == 0 {
        errors.push("capture.pty_rows and capture.pty_cols must be non-zero".to_string());
    }

    match errors.len() {
        0 => Ok(()),
        _ => Err(ConfigError::ValidationList(errors)),
    }
}
