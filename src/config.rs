use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::cache::{
  CacheManager, KeyValueStorage, NoopStorage, SqliteStorage, DEFAULT_PREFIX, DEFAULT_TTL_MILLIS,
  DEFAULT_VERSION,
};
use crate::sync::{StalePolicy, SyncOptions};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub sync: SyncConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  /// Namespace prefix for every stored key
  pub prefix: String,
  /// Maximum age of a valid entry, in milliseconds
  pub ttl_ms: i64,
  /// Schema version; bump to invalidate every cached entry
  pub version: u32,
  /// Database location (defaults to the user data directory)
  pub path: Option<PathBuf>,
  /// When false, nothing is cached and every read misses
  pub enabled: bool,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      prefix: DEFAULT_PREFIX.to_string(),
      ttl_ms: DEFAULT_TTL_MILLIS,
      version: DEFAULT_VERSION,
      path: None,
      enabled: true,
    }
  }
}

impl CacheConfig {
  /// Open the configured storage and wrap it in a cache manager.
  pub fn open(&self) -> Result<CacheManager> {
    let storage: Arc<dyn KeyValueStorage> = if !self.enabled {
      Arc::new(NoopStorage)
    } else if let Some(path) = &self.path {
      Arc::new(SqliteStorage::open_at(path)?)
    } else {
      Arc::new(SqliteStorage::open()?)
    };

    Ok(
      CacheManager::with_shared_storage(storage)
        .with_prefix(self.prefix.clone())
        .with_ttl_millis(self.ttl_ms)
        .with_version(self.version),
    )
  }
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
  /// Whether expired cache entries may be served while offline
  pub stale_policy: StalePolicy,
}

impl SyncConfig {
  pub fn options(&self) -> SyncOptions {
    SyncOptions {
      stale_policy: self.stale_policy,
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./portal-sync.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/portal-sync/config.yaml
  ///
  /// Defaults are used when no file is found.
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
    let local = PathBuf::from("portal-sync.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("portal-sync").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  fn parse(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents)?;
    if config.cache.ttl_ms < 0 {
      return Err(eyre!("cache.ttl_ms must not be negative"));
    }
    Ok(config)
  }
}
