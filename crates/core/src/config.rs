//! Configuration system for codehist with per-project overrides.
//!
//! Config priority: project-relative (codehist.toml) > user
//! (~/.config/codehist/config.toml) > built-in defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
  pub pool: PoolConfig,
  pub cache: CacheConfig,
  pub filter: FilterConfig,
  pub output: OutputConfig,
  pub log: LogConfig,
}

/// Worker pool sizing and process lifecycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
  /// Number of worker processes. 0 means one per available CPU.
  pub size: usize,
  /// Per-job timeout in seconds. A job exceeding this fails the pass
  /// (a hung worker must not silently lose a file). 0 disables the timeout.
  pub job_timeout_secs: u64,
  /// Grace period for worker shutdown before a forced kill.
  pub shutdown_grace_secs: u64,
  /// Seconds to wait for a spawned worker to report its endpoint.
  pub startup_timeout_secs: u64,
  /// Explicit path to the worker binary. Defaults to `codehist-worker`
  /// next to the current executable.
  pub worker_bin: Option<PathBuf>,
}

impl Default for PoolConfig {
  fn default() -> Self {
    Self {
      size: 0,
      job_timeout_secs: 120,
      shutdown_grace_secs: 5,
      startup_timeout_secs: 10,
      worker_bin: None,
    }
  }
}

impl PoolConfig {
  /// Effective pool size: configured value, or available parallelism.
  pub fn effective_size(&self) -> usize {
    if self.size > 0 { self.size } else { num_cpus::get().max(1) }
  }
}

/// Persistent blob cache location and hot-layer sizing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  /// Directory for cached analysis results. Defaults to
  /// `<user cache dir>/codehist/blobs`.
  pub dir: Option<PathBuf>,
  /// Max entries held in the in-memory hot layer.
  pub memory_capacity: u64,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      dir: None,
      memory_capacity: 100_000,
    }
  }
}

impl CacheConfig {
  pub fn effective_dir(&self) -> PathBuf {
    self.dir.clone().unwrap_or_else(|| {
      dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from(".cache"))
        .join("codehist")
        .join("blobs")
    })
  }
}

/// Which enumerated paths are analysed. The store applies this filter while
/// listing, so ignored trees never reach the scheduler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
  /// File extensions to analyse (without the dot).
  pub extensions: Vec<String>,
  /// Path substrings to exclude (vendored trees, generated data, ...).
  pub exclude: Vec<String>,
}

impl Default for FilterConfig {
  fn default() -> Self {
    Self {
      extensions: vec!["php".to_string()],
      exclude: Vec::new(),
    }
  }
}

/// Where per-revision artifacts are written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
  pub dir: PathBuf,
}

impl Default for OutputConfig {
  fn default() -> Self {
    Self {
      dir: PathBuf::from("analysis"),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
  /// off | error | warn | info | debug | trace
  pub level: String,
}

impl Default for LogConfig {
  fn default() -> Self {
    Self {
      level: "info".to_string(),
    }
  }
}

impl Config {
  /// Load config for a project directory, falling back to the user config
  /// and then defaults. Unreadable or invalid files are logged and skipped
  /// rather than failing startup.
  pub fn load_for_project(project_dir: &Path) -> Self {
    let project_file = project_dir.join("codehist.toml");
    if let Some(config) = Self::load_file(&project_file) {
      return config;
    }

    if let Some(user_file) = Self::user_config_path()
      && let Some(config) = Self::load_file(&user_file)
    {
      return config;
    }

    Self::default()
  }

  pub fn user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("codehist").join("config.toml"))
  }

  fn load_file(path: &Path) -> Option<Self> {
    if !path.exists() {
      return None;
    }
    let contents = match std::fs::read_to_string(path) {
      Ok(c) => c,
      Err(e) => {
        warn!(path = %path.display(), error = %e, "Failed to read config file");
        return None;
      }
    };
    match toml::from_str(&contents) {
      Ok(config) => Some(config),
      Err(e) => {
        warn!(path = %path.display(), error = %e, "Invalid config file, using defaults");
        None
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use pretty_assertions::assert_eq;

  use super::*;

  #[test]
  fn defaults_are_sensible() {
    let config = Config::default();
    assert_eq!(config.pool.size, 0);
    assert!(config.pool.effective_size() >= 1);
    assert_eq!(config.pool.job_timeout_secs, 120);
    assert_eq!(config.filter.extensions, vec!["php"]);
    assert_eq!(config.output.dir, PathBuf::from("analysis"));
  }

  #[test]
  fn project_config_overrides_defaults() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
      dir.path().join("codehist.toml"),
      r#"
[pool]
size = 3
job_timeout_secs = 30

[filter]
extensions = ["php", "inc"]
exclude = ["lib/vendor"]
"#,
    )
    .unwrap();

    let config = Config::load_for_project(dir.path());
    assert_eq!(config.pool.size, 3);
    assert_eq!(config.pool.effective_size(), 3);
    assert_eq!(config.pool.job_timeout_secs, 30);
    assert_eq!(config.filter.extensions, vec!["php", "inc"]);
    assert_eq!(config.filter.exclude, vec!["lib/vendor"]);
    // Unspecified sections keep their defaults.
    assert_eq!(config.cache.memory_capacity, 100_000);
  }

  #[test]
  fn invalid_config_falls_back_to_defaults() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("codehist.toml"), "not [valid toml").unwrap();
    let config = Config::load_for_project(dir.path());
    assert_eq!(config, Config::default());
  }
}
