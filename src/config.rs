use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
  pub api: ApiConfig,
  pub app: AppConfig,
  /// Override for the database directory (default: platform data dir).
  pub data_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
  /// Base URL of the content CMS.
  pub url: String,
}

impl Default for ApiConfig {
  fn default() -> Self {
    Self {
      url: "https://strapi.fairuzulum.me".to_string(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
  /// Origin of the storefront itself; requests to other origins are never
  /// intercepted by the cache worker.
  pub origin: String,
}

impl Default for AppConfig {
  fn default() -> Self {
    Self {
      origin: "http://localhost:3000".to_string(),
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./karpet.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/karpet/config.yaml
  ///
  /// With no file found, defaults apply.
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
    let local = PathBuf::from("karpet.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("karpet").join("config.yaml");
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

  /// Path of the snapshot database.
  pub fn snapshot_db_path(&self) -> Result<PathBuf> {
    Ok(self.data_root()?.join("catalog.db"))
  }

  /// Path of the worker's response cache database.
  pub fn response_cache_db_path(&self) -> Result<PathBuf> {
    Ok(self.data_root()?.join("responses.db"))
  }

  fn data_root(&self) -> Result<PathBuf> {
    if let Some(dir) = &self.data_dir {
      return Ok(dir.clone());
    }

    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("karpet"))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn defaults_are_sensible() {
    let config = Config::default();
    assert_eq!(config.api.url, "https://strapi.fairuzulum.me");
    assert_eq!(config.app.origin, "http://localhost:3000");
    assert!(config.data_dir.is_none());
  }

  #[test]
  fn partial_yaml_keeps_other_defaults() {
    let config: Config = serde_yaml::from_str("api:\n  url: https://cms.example.com\n").unwrap();
    assert_eq!(config.api.url, "https://cms.example.com");
    assert_eq!(config.app.origin, "http://localhost:3000");
  }

  #[test]
  fn data_dir_override_controls_db_paths() {
    let config: Config = serde_yaml::from_str("data_dir: /tmp/karpet-test\n").unwrap();
    assert_eq!(
      config.snapshot_db_path().unwrap(),
      PathBuf::from("/tmp/karpet-test/catalog.db")
    );
  }
}
