use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub api: ApiConfig,
  #[serde(default)]
  pub cache: CacheConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
  /// API root, e.g. https://school.instructure.com/api/v1
  pub url: String,
  /// User whose to-dos are synced (the server accepts `self`)
  #[serde(default = "default_user_id")]
  pub user_id: String,
  /// Masquerade as another user (sent as `as_user_id`)
  pub act_as_user_id: Option<String>,
  pub per_page: Option<u32>,
  #[serde(default = "default_timeout_secs")]
  pub timeout_secs: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CacheConfig {
  /// SQLite database file (defaults to the user data directory)
  pub path: Option<PathBuf>,
  /// Overrides every feature's TTL
  pub ttl_secs: Option<u64>,
  /// Never touch the network
  #[serde(default)]
  pub offline: bool,
}

fn default_user_id() -> String {
  "self".to_string()
}

fn default_timeout_secs() -> u64 {
  30
}

impl ApiConfig {
  pub fn timeout(&self) -> Duration {
    Duration::from_secs(self.timeout_secs)
  }
}

impl CacheConfig {
  pub fn ttl(&self) -> Option<Duration> {
    self.ttl_secs.map(Duration::from_secs)
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./lms-sync.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/lms-sync/config.yaml
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
        "No configuration file found. Create one at ~/.config/lms-sync/config.yaml\n\
                 See config.example.yaml for the format."
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("lms-sync.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("lms-sync").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents).map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  fn parse(contents: &str) -> Result<Self, serde_yaml::Error> {
    serde_yaml::from_str(contents)
  }

  /// Get the API access token from environment variables.
  ///
  /// Checks LMS_SYNC_TOKEN first, then LMS_API_TOKEN as fallback.
  pub fn get_api_token() -> Result<String> {
    std::env::var("LMS_SYNC_TOKEN")
      .or_else(|_| std::env::var("LMS_API_TOKEN"))
      .map_err(|_| eyre!("API token not found. Set LMS_SYNC_TOKEN or LMS_API_TOKEN environment variable."))
  }
}
