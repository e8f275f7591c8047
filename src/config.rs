//! Configuration loader and validator for the partner embed autosync.
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema exactly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub app: App,
    pub discord: Discord,
    pub directory: Directory,
    pub autosync: Autosync,
}

/// App-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub data_dir: String,
}

/// Discord bot settings.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Discord {
    pub bot_token: String,
    #[serde(default = "default_api_base")]
    pub api_base: String,
}

impl std::fmt::Debug for Discord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Discord")
            .field("api_base", &self.api_base)
            .finish_non_exhaustive()
    }
}

/// Membership directory used as the authorization oracle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Directory {
    pub base_url: String,
    pub privileged_role: String,
}

/// Sync behaviour.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Autosync {
    /// Location that is always authorized, regardless of the directory.
    #[serde(default)]
    pub hub_location: Option<String>,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_confirm_timeout_secs")]
    pub confirm_timeout_secs: u64,
}

fn default_api_base() -> String {
    "https://discord.com/api/v10/".to_string()
}

fn default_concurrency() -> usize {
    4
}

fn default_confirm_timeout_secs() -> u64 {
    15 * 60
}

impl App {
    /// `data_dir` with a leading `~/` expanded.
    pub fn resolved_data_dir(&self) -> String {
        match self.data_dir.strip_prefix("~/") {
            Some(rest) => match std::env::var("HOME") {
                Ok(home) => format!("{}/{}", home.trim_end_matches('/'), rest),
                Err(_) => self.data_dir.clone(),
            },
            None => self.data_dir.clone(),
        }
    }
}

impl Autosync {
    pub fn confirm_timeout(&self) -> Duration {
        Duration::from_secs(self.confirm_timeout_secs)
    }
}

impl Config {
    /// Ensure required directories exist (creates `app.data_dir` if missing).
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        if self.app.data_dir.trim().is_empty() {
            return Ok(());
        }
        fs::create_dir_all(self.app.resolved_data_dir())
    }

    /// SQLite URL, overridable through `DATABASE_URL`.
    pub fn database_url(&self) -> String {
        std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| format!("sqlite://{}/autosync.db", self.app.resolved_data_dir()))
    }
}

/// Load configuration from a YAML file and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let cfg: Config = serde_yaml::from_str(&content)?;
    validate(&cfg)?;
    Ok(cfg)
}

/// Validate a configuration instance.
fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.data_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.data_dir must be non-empty"));
    }

    if cfg.discord.bot_token.trim().is_empty() {
        return Err(ConfigError::Invalid("discord.bot_token must be non-empty"));
    }
    if reqwest::Url::parse(&cfg.discord.api_base).is_err() {
        return Err(ConfigError::Invalid("discord.api_base must be a valid URL"));
    }

    if reqwest::Url::parse(&cfg.directory.base_url).is_err() {
        return Err(ConfigError::Invalid("directory.base_url must be a valid URL"));
    }
    if cfg.directory.privileged_role.trim().is_empty() {
        return Err(ConfigError::Invalid(
            "directory.privileged_role must be non-empty",
        ));
    }

    if let Some(hub) = &cfg.autosync.hub_location {
        if hub.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "autosync.hub_location must be non-empty when set",
            ));
        }
    }
    if cfg.autosync.concurrency == 0 {
        return Err(ConfigError::Invalid("autosync.concurrency must be > 0"));
    }
    if cfg.autosync.confirm_timeout_secs == 0 {
        return Err(ConfigError::Invalid(
            "autosync.confirm_timeout_secs must be > 0",
        ));
    }

    Ok(())
}

/// Returns the example YAML configuration.
pub fn example() -> &'static str {
    r#"app:
  data_dir: "./data"

discord:
  bot_token: "YOUR_DISCORD_BOT_TOKEN"
  api_base: "https://discord.com/api/v10/"

directory:
  base_url: "https://api.teyvatcollective.network/"
  privileged_role: "observer"

autosync:
  hub_location: "808085670418710538"
  concurrency: 4
  confirm_timeout_secs: 900
"#
}
