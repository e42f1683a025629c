use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uplog::cli::delete::DeleteTarget;
use uplog::cli::run::RunOptions;
use uplog::config::AgentPaths;

#[derive(Parser)]
#[command(name = "uplog", version)]
#[command(about = "Run a command and ship its output to a log collector", long_about = None)]
struct Cli {
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a command, showing its output while shipping it
    Run {
        /// Buffer poll interval in milliseconds (minimum 200)
        #[arg(long, value_name = "MS")]
        poll: Option<u64>,

        /// Label attached to every uploaded batch
        #[arg(long)]
        tag: Option<String>,

        /// Records per upload batch
        #[arg(long, value_name = "N")]
        batch: Option<usize>,

        /// Run the command inside a pseudo-terminal
        #[arg(long)]
        pty: bool,

        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },
    /// List recorded sessions
    List,
    /// Delete a session, or all of them
    Delete {
        #[arg(required_unless_present = "all", conflicts_with = "all")]
        session_id: Option<String>,

        #[arg(long)]
        all: bool,
    },
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Write a starter config file
    Init {
        #[arg(long)]
        stdout: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Logs go to stderr so the supervised command owns stdout
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "uplog=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            poll,
            tag,
            batch,
            pty,
            command,
        } => {
            let options = RunOptions {
                poll_ms: poll,
                tag,
                batch_size: batch,
                pty,
                command,
            };
            uplog::cli::run::run(cli.config, options).await?;
        }
        Commands::List => {
            uplog::cli::list::list(&AgentPaths::discover()?).await?;
        }
        Commands::Delete { session_id, all } => {
            let target = match session_id {
                Some(id) if !all => DeleteTarget::Session(id),
                _ => DeleteTarget::All,
            };
            uplog::cli::delete::delete(&AgentPaths::discover()?, target).await?;
        }
        Commands::Config { action } => match action {
            ConfigAction::Init { stdout } => {
                uplog::cli::config::init(&AgentPaths::discover()?, stdout)?;
            }
        },
    }

    Ok(())
}
