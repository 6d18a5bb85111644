use chrono::Duration;
use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use url::Url;

use crate::cache::{RefreshPolicy, SqliteStorage};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
  #[serde(default)]
  pub tmdb: TmdbConfig,
  #[serde(default)]
  pub cache: CacheConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TmdbConfig {
  #[serde(default = "default_url")]
  pub url: String,
  /// ISO 639-1 language for titles and overviews (defaults to $LANG)
  pub language: Option<String>,
  /// Per-request timeout
  #[serde(default = "default_timeout_secs")]
  pub timeout_secs: u64,
}

impl Default for TmdbConfig {
  fn default() -> Self {
    Self {
      url: default_url(),
      language: None,
      timeout_secs: default_timeout_secs(),
    }
  }
}

fn default_url() -> String {
  "https://api.themoviedb.org/3/".to_string()
}

fn default_timeout_secs() -> u64 {
  15
}

impl TmdbConfig {
  /// Base url with a trailing slash, so endpoint paths join below it.
  pub fn base_url(&self) -> Result<Url> {
    let mut url = self.url.clone();
    if !url.ends_with('/') {
      url.push('/');
    }
    Url::parse(&url).map_err(|e| eyre!("Invalid TMDB url {}: {}", self.url, e))
  }
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RefreshMode {
  /// Fetch a list only while nothing is cached for it
  #[default]
  Empty,
  /// Also refetch once the cached list is older than `stale_minutes`
  Stale,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
  /// Cache database location (default: $XDG_DATA_HOME/marquee/cache.db)
  pub path: Option<PathBuf>,
  #[serde(default)]
  pub refresh: RefreshMode,
  #[serde(default = "default_stale_minutes")]
  pub stale_minutes: i64,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      path: None,
      refresh: RefreshMode::default(),
      stale_minutes: default_stale_minutes(),
    }
  }
}

fn default_stale_minutes() -> i64 {
  60
}

impl CacheConfig {
  pub fn refresh_policy(&self) -> RefreshPolicy {
    match self.refresh {
      RefreshMode::Empty => RefreshPolicy::WhenEmpty,
      RefreshMode::Stale => RefreshPolicy::WhenStale(Duration::minutes(self.stale_minutes)),
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./marquee.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/marquee/config.yaml
  ///
  /// Falls back to defaults when no file exists.
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
      None => {
        tracing::debug!("No configuration file found, using defaults");
        Ok(Self::default())
      }
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("marquee.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("marquee").join("config.yaml");
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

    tracing::debug!(path = %path.display(), "Loaded configuration");
    Ok(config)
  }

  /// Cache database path, configured or default.
  pub fn cache_path(&self) -> Result<PathBuf> {
    match &self.cache.path {
      Some(path) => Ok(path.clone()),
      None => SqliteStorage::default_path(),
    }
  }

  /// Language sent with every request.
  ///
  /// Uses the configured value, else the language part of $LANG, else "en".
  pub fn language(&self) -> String {
    if let Some(language) = &self.tmdb.language {
      return language.clone();
    }

    std::env::var("LANG")
      .ok()
      .and_then(|lang| language_from_locale(&lang))
      .unwrap_or_else(|| "en".to_string())
  }

  /// Get the TMDB API key from environment variables.
  ///
  /// Checks MARQUEE_TMDB_KEY first, then TMDB_API_KEY as fallback.
  pub fn get_api_key() -> Result<String> {
    std::env::var("MARQUEE_TMDB_KEY")
      .or_else(|_| std::env::var("TMDB_API_KEY"))
      .map_err(|_| {
        eyre!("TMDB API key not found. Set MARQUEE_TMDB_KEY or TMDB_API_KEY environment variable.")
      })
  }
}

/// "tr_TR.UTF-8" → "tr". POSIX "C" locales carry no language.
fn language_from_locale(locale: &str) -> Option<String> {
  let language: String = locale
    .chars()
    .take_while(|c| c.is_ascii_alphabetic())
    .collect();

  if language.len() == 2 {
    Some(language.to_lowercase())
  } else {
    None
  }
}
