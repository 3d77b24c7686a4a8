//! Console configuration and state directory resolution

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

/// Environment variable prefix for every configuration key
pub const ENV_PREFIX: &str = "PORTAL_CONSOLE";
/// Name of the configuration file looked up in the platform config directory
pub const CONFIG_FILE_NAME: &str = "portal-console.toml";
/// Environment override for the state directory
pub const STATE_DIR_ENV: &str = "PORTAL_CONSOLE_STATE_DIR";

/// Top-level console configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsoleConfig {
    /// Upstream API settings
    pub api: ApiConfig,
    /// Where tokens and logs are kept; platform data directory when unset
    pub state_dir: Option<PathBuf>,
}

/// How to reach the portal API
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub base_url: String,
    /// Local proxy prefix placed between the base URL and every path
    pub path_prefix: Option<String>,
    pub timeout_secs: u64,
    pub user_agent: Option<String>,
    /// Headers added to every request ahead of per-call headers
    pub default_headers: HashMap<String, String>,
    /// Serialise concurrent token refreshes
    pub single_flight: bool,
}

impl Default for ApiConfig {
    fn default() -> Self {
        let mut default_headers = HashMap::new();
        default_headers.insert("ngrok-skip-browser-warning".to_string(), "1".to_string());

        Self {
            base_url: "http://localhost:8080".to_string(),
            path_prefix: None,
            timeout_secs: 30,
            user_agent: None,
            default_headers,
            single_flight: true,
        }
    }
}

impl ApiConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl ConsoleConfig {
    /// Load configuration: defaults, then the TOML file, then the environment.
    ///
    /// An explicit `path` must exist. Without one, the file in the platform
    /// config directory is read when present.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(path) => Some((path.to_path_buf(), true)),
            None => default_config_path().map(|path| (path, false)),
        };

        let mut builder = config::Config::builder()
            .add_source(config::Config::try_from(&Self::default())?);

        if let Some((file, required)) = file {
            debug!(path = %file.display(), required, "Reading configuration file");
            builder = builder.add_source(
                config::File::from(file.as_path())
                    .format(config::FileFormat::Toml)
                    .required(required),
            );
        }

        let settings = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to load configuration")?;

        settings
            .try_deserialize()
            .context("Invalid configuration")
    }

    /// Pick the state directory: CLI flag, environment, config file, platform default
    pub fn resolve_state_dir(&self, flag: Option<PathBuf>) -> PathBuf {
        flag.or_else(|| std::env::var_os(STATE_DIR_ENV).map(PathBuf::from))
            .or_else(|| self.state_dir.clone())
            .unwrap_or_else(default_state_dir)
    }
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("com", "Portal", "portal-console")
}

fn default_config_path() -> Option<PathBuf> {
    project_dirs().map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
}

fn default_state_dir() -> PathBuf {
    match project_dirs() {
        Some(dirs) => dirs.data_dir().to_path_buf(),
        None => {
            warn!("Failed to determine platform-specific directories, using ./.portal-console");
            PathBuf::from(".portal-console")
        }
    }
}
