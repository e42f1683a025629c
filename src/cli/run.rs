use crate::capture::CommandSpec;
use crate::config::parse::validate_config;
use crate::config::types::MIN_POLL_INTERVAL;
use crate::config::{load_or_default, resolve_config_path, AgentPaths, CaptureMode, Config};
use crate::pipeline::{RunOutcome, SessionRunner};
use crate::upload::CollectorClient;
use console::style;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Command-line overrides for a single run.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Poll interval in milliseconds
    pub poll_ms: Option<u64>,
    pub tag: Option<String>,
    pub batch_size: Option<usize>,
    pub pty: bool,
    pub command: Vec<String>,
}

pub async fn run(config_path: Option<PathBuf>, options: RunOptions) -> Result<(), Box<dyn std::error::Error>> {
    let command = CommandSpec::from_argv(&options.command).ok_or("no command given")?;

    let paths = AgentPaths::discover()?;
    let config_path = resolve_config_path(config_path.as_deref(), &paths);
    let config = apply_overrides(load_or_default(config_path.as_deref())?, &options)?;
    info!(
        collector = %config.collector.url,
        mode = config.session_mode().as_str(),
        "Configuration loaded"
    );

    let store = Arc::new(super::open_store(&paths).await?);
    let client = Arc::new(CollectorClient::new(&config.collector)?);
    let runner = SessionRunner::new(Arc::new(config), paths, store, client.clone(), client);

    let interrupt = async {
        if tokio::signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    };
    let outcome = runner.run(&command, options.tag.clone(), interrupt).await?;
    report(&outcome);
    Ok(())
}

/// Fold command-line flags into the loaded configuration.
pub fn apply_overrides(mut config: Config, options: &RunOptions) -> Result<Config, String> {
    if let Some(poll_ms) = options.poll_ms {
        let poll = Duration::from_millis(poll_ms);
        if poll < MIN_POLL_INTERVAL {
            return Err(format!(
                "--poll must be at least {} ms (got {})",
                MIN_POLL_INTERVAL.as_millis(),
                poll_ms
            ));
        }
        config.tail.poll_interval = poll;
    }
    if let Some(batch_size) = options.batch_size {
        if batch_size == 0 {
            return Err("--batch must be at least 1".to_string());
        }
        config.upload.batch_size = batch_size;
    }
    if options.pty {
        config.capture.mode = CaptureMode::Pty;
    }
    validate_config(&config).map_err(|e| e.to_string())?;
    Ok(config)
}

fn report(outcome: &RunOutcome) {
    println!();
    println!("{} {}", style("Session:").bold(), style(&outcome.share_url).cyan());

    match outcome.exit {
        Some(exit) if exit.success() => println!("{} {}", style("Command:").bold(), style(exit).green()),
        Some(exit) => println!("{} {}", style("Command:").bold(), style(exit).red()),
        None => println!("{} exit status unknown", style("Command:").bold()),
    }
    if outcome.interrupted {
        println!("{} interrupted", style("Run:").bold());
    }

    if let Some(tail) = &outcome.tail {
        if tail.circuit_open {
            println!(
                "{} collector unreachable, {} of {} lines shipped",
                style("Warning:").yellow().bold(),
                tail.delivered,
                tail.records_read
            );
        }
    }
    if let Some(path) = &outcome.kept_buffer {
        println!("{} local copy kept at {}", style("Buffer:").bold(), path.display());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_poll_below_floor_rejected() {
        let options = RunOptions {
            poll_ms: Some(50),
            ..Default::default()
        };
        let err = apply_overrides(Config::default(), &options).unwrap_err();
        assert!(err.contains("at least 200 ms"), "{}", err);
    }

    #[test]
    fn test_overrides_applied() {
        let options = RunOptions {
            poll_ms: Some(750),
            batch_size: Some(2),
            pty: true,
            ..Default::default()
        };
        let config = apply_overrides(Config::default(), &options).unwrap();
        assert_eq!(config.tail.poll_interval, Duration::from_millis(750));
        assert_eq!(config.upload.batch_size, 2);
        assert_eq!(config.capture.mode, CaptureMode::Pty);
    }

    #[test]
    fn test_zero_batch_rejected() {
        let options = RunOptions {
            batch_size: Some(0),
            ..Default::default()
        };
        assert!(apply_overrides(Config::default(), &options).is_err());
    }
}
