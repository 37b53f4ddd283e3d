//! Global webcal configuration.

use std::path::{Path, PathBuf};

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::error::{WebcalError, WebcalResult};

static DEFAULT_DATA_DIR: &str = "~/calendars/webcal";

fn default_data_dir() -> PathBuf {
    PathBuf::from(DEFAULT_DATA_DIR)
}

fn default_user_agent() -> String {
    format!("webcal-sync/{}", env!("CARGO_PKG_VERSION"))
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_max_concurrent_polls() -> usize {
    4
}

/// Global configuration at ~/.config/webcal/config.toml
///
/// Every field can be overridden with a `WEBCAL_` environment variable,
/// e.g. `WEBCAL_ALLOW_LOCAL_REMOTE_SERVERS=true`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct WebcalConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Allow feeds on loopback and private networks.
    #[serde(default)]
    pub allow_local_remote_servers: bool,

    #[serde(default = "default_max_concurrent_polls")]
    pub max_concurrent_polls: usize,
}

impl Default for WebcalConfig {
    fn default() -> Self {
        WebcalConfig {
            data_dir: default_data_dir(),
            user_agent: default_user_agent(),
            request_timeout_secs: default_request_timeout_secs(),
            allow_local_remote_servers: false,
            max_concurrent_polls: default_max_concurrent_polls(),
        }
    }
}

impl WebcalConfig {
    /// Load the global config, creating a commented default file first if
    /// there is none.
    pub fn load() -> WebcalResult<Self> {
        let config_path = Self::config_path()?;

        if !config_path.exists() {
            Self::create_default_config(&config_path)?;
        }

        Self::load_from(&config_path)
    }

    pub fn load_from(path: &Path) -> WebcalResult<Self> {
        Config::builder()
            .add_source(File::from(path).required(false))
            .add_source(Environment::with_prefix("WEBCAL"))
            .build()
            .map_err(|e| WebcalError::Config(e.to_string()))?
            .try_deserialize()
            .map_err(|e| WebcalError::Config(e.to_string()))
    }

    pub fn config_path() -> WebcalResult<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| WebcalError::Config("Could not determine config directory".into()))?
            .join("webcal");

        Ok(config_dir.join("config.toml"))
    }

    /// `data_dir` with `~` expanded.
    pub fn data_path(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.data_dir.to_string_lossy()).into_owned())
    }

    /// Create a default config file with all options commented out.
    pub fn create_default_config(path: &Path) -> WebcalResult<()> {
        let contents = format!(
            "\
# webcal configuration

# Where subscribed calendars are cached:
# data_dir = \"{DEFAULT_DATA_DIR}\"

# User-Agent sent when downloading feeds:
# user_agent = \"{}\"

# Seconds before a feed download is abandoned:
# request_timeout_secs = {}

# Allow subscriptions to feeds on localhost or private networks:
# allow_local_remote_servers = false

# How many subscriptions are polled at the same time:
# max_concurrent_polls = {}
",
            default_user_agent(),
            default_request_timeout_secs(),
            default_max_concurrent_polls(),
        );

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                WebcalError::Config(format!("Could not create config directory: {e}"))
            })?;
        }

        std::fs::write(path, contents)
            .map_err(|e| WebcalError::Config(format!("Could not write config file: {e}")))?;

        Ok(())
    }
}
