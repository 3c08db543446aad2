use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub api: ApiConfig,
  /// Timeout for direct attempts the caller is waiting on.
  #[serde(default = "default_interactive_timeout_secs")]
  pub interactive_timeout_secs: u64,
  /// Timeout for background sync replays.
  #[serde(default = "default_sync_timeout_secs")]
  pub sync_timeout_secs: u64,
  /// Recurring sync pass interval.
  #[serde(default = "default_sync_interval_secs")]
  pub sync_interval_secs: u64,
  /// Permanent (4xx) failures abandon an entry once its retry count
  /// reaches this ceiling.
  #[serde(default = "default_max_permanent_retries")]
  pub max_permanent_retries: u32,
  /// Completed entries older than this are swept by `purge`.
  #[serde(default = "default_retention_hours")]
  pub retention_hours: u64,
  /// Override for where the SQLite files live (default: XDG data dir).
  pub data_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
  pub base_url: String,
  /// Name of the environment variable holding the bearer token.
  #[serde(default = "default_token_env")]
  pub token_env: String,
}

fn default_interactive_timeout_secs() -> u64 {
  10
}

fn default_sync_timeout_secs() -> u64 {
  15
}

fn default_sync_interval_secs() -> u64 {
  60
}

fn default_max_permanent_retries() -> u32 {
  3
}

fn default_retention_hours() -> u64 {
  24
}

fn default_token_env() -> String {
  "FIELDSYNC_API_TOKEN".to_string()
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./fieldsync.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/fieldsync/config.yaml
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Err(eyre!(
        "No configuration file found. Create one at ~/.config/fieldsync/config.yaml"
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("fieldsync.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("fieldsync").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    let config: Config = serde_yaml::from_str(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))?;

    Ok(config)
  }

  pub fn interactive_timeout(&self) -> Duration {
    Duration::from_secs(self.interactive_timeout_secs)
  }

  pub fn sync_timeout(&self) -> Duration {
    Duration::from_secs(self.sync_timeout_secs)
  }

  pub fn sync_interval(&self) -> Duration {
    Duration::from_secs(self.sync_interval_secs)
  }

  pub fn retention(&self) -> chrono::Duration {
    chrono::Duration::hours(self.retention_hours as i64)
  }

  /// Where the queue and cache databases live.
  pub fn data_dir(&self) -> Result<PathBuf> {
    if let Some(dir) = &self.data_dir {
      return Ok(dir.clone());
    }

    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("fieldsync"))
  }
}
