use anyhow::{Context, Result};
use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;
use tracing::Level;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Log file written inside the state directory
pub const LOG_FILE_NAME: &str = "console.log";

/// Initialize logging for the console.
///
/// `RUST_LOG` takes precedence over `log_level`. Console output goes to stderr
/// so stdout stays clean for command output; with a state directory the same
/// events are also appended to a log file there.
pub fn init_logging(log_level: Level, state_dir: Option<&Path>) -> Result<()> {
    let env_filter = default_filter(log_level);

    match state_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create state directory {}", dir.display()))?;
            let log_file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(dir.join(LOG_FILE_NAME))
                .context("Failed to open log file")?;

            tracing_subscriber::registry()
                .with(env_filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_writer(Mutex::new(log_file))
                        .with_ansi(false),
                )
                .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
                .init();
        }
        None => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }

    Ok(())
}

fn default_filter(level: Level) -> EnvFilter {
    let level_str = level.as_str().to_lowercase();
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!("portal_console={level_str},portal_console_http={level_str}").into()
    })
}
