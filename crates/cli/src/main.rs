//! Portal console - command-line client for the portal management API

mod commands;
mod config;
mod logging;

use anyhow::Result;
use clap::{Parser, ValueEnum};
use commands::{Commands, Console};
use config::ConsoleConfig;
use portal_console_http::ClientError;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{Level, error, info};

#[derive(Parser)]
#[command(name = "portal-console")]
#[command(about = "Administer the OpenVPN portal from the command line")]
#[command(version)]
struct Cli {
    /// Set logging level
    #[arg(short = 'l', long, global = true, default_value = "warn")]
    log_level: LogLevel,

    /// Configuration file (TOML)
    #[arg(short = 'c', long, global = true)]
    config: Option<PathBuf>,

    /// State directory for the stored session and logs
    #[arg(short = 'd', long, global = true)]
    state_dir: Option<PathBuf>,

    /// Timeout for the whole command in seconds (0 = no timeout)
    #[arg(short = 't', long, global = true, default_value = "60")]
    timeout: u64,

    /// Disable file logging (only log to stderr)
    #[arg(long, global = true)]
    no_file_log: bool,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = ConsoleConfig::load(cli.config.as_deref())?;
    let state_dir = config.resolve_state_dir(cli.state_dir);
    let log_dir = (!cli.no_file_log).then_some(state_dir.as_path());
    logging::init_logging(cli.log_level.into(), log_dir)?;

    info!(state_dir = %state_dir.display(), "Starting portal console");
    let console = Console::new(&config.api, &state_dir)?;

    let outcome = if cli.timeout == 0 {
        cli.command.execute(&console).await
    } else {
        match tokio::time::timeout(
            Duration::from_secs(cli.timeout),
            cli.command.execute(&console),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => {
                error!("Command timed out after {} seconds", cli.timeout);
                std::process::exit(1);
            }
        }
    };

    if let Err(e) = outcome {
        if e
            .downcast_ref::<ClientError>()
            .is_some_and(ClientError::is_session_expired)
        {
            eprintln!("Session expired. Run `portal-console login` to sign in again.");
        } else {
            error!("Command failed: {e:#}");
        }
        std::process::exit(1);
    }

    info!("Command completed successfully");
    Ok(())
}

#[derive(Clone, Debug, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for Level {
    fn from(log_level: LogLevel) -> Self {
        match log_level {
            LogLevel::Error => Level::ERROR,
            LogLevel::Warn => Level::WARN,
            LogLevel::Info => Level::INFO,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Trace => Level::TRACE,
        }
    }
}
