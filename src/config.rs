//! Configuration loader and validator for the help center watch bot.
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::helpcenter::{RetryPolicy, DEFAULT_PER_PAGE, HELP_CENTER_API};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub app: App,
    #[serde(default)]
    pub source: Source,
    pub telegram: Telegram,
}

/// App-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub data_dir: String,
    pub poll_interval_secs: u64,
    /// Cold-start lookback. Defaults to the poll interval.
    #[serde(default)]
    pub recent_window_secs: Option<u64>,
    #[serde(default)]
    pub run_once: bool,
    #[serde(default)]
    pub state_backend: StateBackend,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StateBackend {
    #[default]
    Json,
    Sqlite,
}

/// Remote article listing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Source {
    pub base_url: String,
    pub per_page: u32,
    pub request_timeout_secs: u64,
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
}

impl Source {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            backoff_base: Duration::from_millis(self.backoff_base_ms),
            request_timeout: Duration::from_secs(self.request_timeout_secs),
        }
    }
}

impl Default for Source {
    fn default() -> Self {
        Self {
            base_url: HELP_CENTER_API.to_string(),
            per_page: DEFAULT_PER_PAGE,
            request_timeout_secs: 20,
            max_attempts: 4,
            backoff_base_ms: 1000,
        }
    }
}

/// Telegram bot settings. `chat_id` is where articles are announced.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Telegram {
    pub bot_token: String,
    pub chat_id: i64,
    #[serde(default)]
    pub allowed_users: Vec<i64>,
}

impl Config {
    /// Ensure required directories exist (creates `app.data_dir` if missing).
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        if self.app.data_dir.trim().is_empty() {
            return Ok(());
        }
        fs::create_dir_all(&self.app.data_dir)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.app.poll_interval_secs)
    }

    pub fn recent_window(&self) -> chrono::Duration {
        let secs = self
            .app
            .recent_window_secs
            .unwrap_or(self.app.poll_interval_secs);
        chrono::Duration::seconds(secs.min(u64::from(u32::MAX)) as i64)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.source.retry_policy()
    }

    pub fn default_database_url(&self) -> String {
        format!(
            "sqlite://{}/watchbot.db?mode=rwc",
            self.app.data_dir.trim_end_matches('/')
        )
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
    if cfg.app.poll_interval_secs == 0 {
        return Err(ConfigError::Invalid("app.poll_interval_secs must be > 0"));
    }
    if cfg.app.recent_window_secs == Some(0) {
        return Err(ConfigError::Invalid("app.recent_window_secs must be > 0"));
    }

    if Url::parse(&cfg.source.base_url).is_err() {
        return Err(ConfigError::Invalid("source.base_url must be a valid URL"));
    }
    if !(1..=100).contains(&cfg.source.per_page) {
        return Err(ConfigError::Invalid("source.per_page must be between 1 and 100"));
    }
    if cfg.source.request_timeout_secs == 0 {
        return Err(ConfigError::Invalid("source.request_timeout_secs must be > 0"));
    }
    if cfg.source.max_attempts == 0 {
        return Err(ConfigError::Invalid("source.max_attempts must be >= 1"));
    }
    if cfg.source.backoff_base_ms == 0 {
        return Err(ConfigError::Invalid("source.backoff_base_ms must be > 0"));
    }

    if cfg.telegram.bot_token.trim().is_empty() {
        return Err(ConfigError::Invalid("telegram.bot_token must be non-empty"));
    }
    if cfg.telegram.chat_id == 0 {
        return Err(ConfigError::Invalid("telegram.chat_id must be set"));
    }

    Ok(())
}

/// Example configuration with every key spelled out.
pub fn example() -> &'static str {
    r#"app:
  data_dir: "./data"
  poll_interval_secs: 600
  recent_window_secs: 600
  run_once: false
  state_backend: json

source:
  base_url: "https://support.discord.com/api/v2/help_center/en-us/articles.json"
  per_page: 100
  request_timeout_secs: 20
  max_attempts: 4
  backoff_base_ms: 1000

telegram:
  bot_token: "YOUR_TELEGRAM_BOT_TOKEN"
  chat_id: -1001234567890
  allowed_users:
    - 123456789
"#
}
