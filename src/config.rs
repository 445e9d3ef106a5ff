use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Default server origin of a local Spiritualgram API.
const DEFAULT_ORIGIN: &str = "http://localhost:5000";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
  #[serde(default)]
  pub server: ServerConfig,
  #[serde(default)]
  pub cache: CacheConfig,
  /// Override for the queue/cache database directory
  /// (defaults to the platform data dir).
  pub data_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
  /// API server origin, e.g. `https://spiritualgram.example.com`.
  #[serde(default = "default_origin")]
  pub origin: String,
}

fn default_origin() -> String {
  DEFAULT_ORIGIN.to_string()
}

impl Default for ServerConfig {
  fn default() -> Self {
    Self {
      origin: default_origin(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
  /// Deployment version tag embedded in every bucket name.
  #[serde(default = "default_version")]
  pub version: String,
  /// Extra same-origin paths cached with the app shell at install time
  /// (fonts, CSS and the like).
  #[serde(default)]
  pub shell_extras: Vec<String>,
}

fn default_version() -> String {
  "v1.0.0".to_string()
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      version: default_version(),
      shell_extras: Vec::new(),
    }
  }
}

impl Config {
  /// Load configuration.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./spiritualgram.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/spiritualgram/config.yaml
  ///
  /// With no file anywhere, built-in defaults apply (local server, v1.0.0).
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
      None => Ok(Self::default()),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("spiritualgram.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("spiritualgram").join("config.yaml");
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

  /// The auth token from the environment, if set. Queued jobs carry it so
  /// replays authenticate without live session state.
  pub fn auth_token() -> Option<String> {
    std::env::var("SPIRITUALGRAM_TOKEN").ok()
  }

  /// Base of every API call: the server origin plus `/api`.
  pub fn api_base(&self) -> String {
    format!("{}/api", self.server.origin())
  }

  fn data_dir(&self) -> Result<PathBuf> {
    if let Some(dir) = &self.data_dir {
      return Ok(dir.clone());
    }
    dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .map(|p| p.join("spiritualgram"))
      .ok_or_else(|| eyre!("Could not determine data directory"))
  }

  pub fn queue_db_path(&self) -> Result<PathBuf> {
    Ok(self.data_dir()?.join("queue.db"))
  }

  pub fn cache_db_path(&self) -> Result<PathBuf> {
    Ok(self.data_dir()?.join("cache.db"))
  }
}

impl ServerConfig {
  /// Origin with trailing slashes stripped, so joins never double up.
  pub fn origin(&self) -> &str {
    self.origin.trim_end_matches('/')
  }
}
