//! Configuration shared by the launcher, arranger and snapshot executables.
//!
//! Configuration is loaded from TOML files in the following locations (in order):
//! 1. `%APPDATA%/workspaces/config.toml` (Windows standard)
//! 2. `~/.config/workspaces/config.toml` (Unix-style, for WSL compatibility)
//! 3. `./config.toml` (current directory, for development)

use crate::monitor::RetryPolicy;
use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Launch orchestration.
    pub launch: LaunchConfig,
    /// Monitor enumeration.
    pub monitors: MonitorConfig,
    /// Window creation observer.
    pub observer: ObserverConfig,
    /// General behavior.
    pub behavior: BehaviorConfig,
    /// Workspace storage.
    pub storage: StorageConfig,
}

/// Launch-related configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LaunchConfig {
    /// Deadline for the whole launch, in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// How long applications are held back until the arranger observes new windows.
    #[serde(default = "default_ready_timeout_ms")]
    pub ready_timeout_ms: u64,

    /// How long a channel keeps trying to reach its peer.
    #[serde(default = "default_connect_timeout_ms")]
    pub channel_connect_timeout_ms: u64,

    /// Progress UI executable. Defaults to a sibling of the launcher.
    pub ui_executable: Option<PathBuf>,

    /// Window arranger executable. Defaults to a sibling of the launcher.
    pub arranger_executable: Option<PathBuf>,

    /// Grace period before the UI process is terminated.
    #[serde(default = "default_ui_grace_ms")]
    pub ui_grace_ms: u64,

    /// Grace period before the arranger process is terminated.
    #[serde(default = "default_arranger_grace_ms")]
    pub arranger_grace_ms: u64,
}

impl Default for LaunchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            ready_timeout_ms: default_ready_timeout_ms(),
            channel_connect_timeout_ms: default_connect_timeout_ms(),
            ui_executable: None,
            arranger_executable: None,
            ui_grace_ms: default_ui_grace_ms(),
            arranger_grace_ms: default_arranger_grace_ms(),
        }
    }
}

impl LaunchConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn ready_timeout(&self) -> Duration {
        Duration::from_millis(self.ready_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.channel_connect_timeout_ms)
    }

    pub fn ui_grace(&self) -> Duration {
        Duration::from_millis(self.ui_grace_ms)
    }

    pub fn arranger_grace(&self) -> Duration {
        Duration::from_millis(self.arranger_grace_ms)
    }
}

/// Monitor enumeration retry policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Attempts while the OS reports no monitors.
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,

    /// Delay between attempts in milliseconds.
    #[serde(default = "default_retry_interval_ms")]
    pub retry_interval_ms: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            retry_attempts: default_retry_attempts(),
            retry_interval_ms: default_retry_interval_ms(),
        }
    }
}

impl MonitorConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry_attempts,
            interval: Duration::from_millis(self.retry_interval_ms),
        }
    }
}

/// Window creation observer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObserverConfig {
    /// Bound of the notification queue between the OS hook and the worker.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

impl Default for ObserverConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
        }
    }
}

/// Behavior-related configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BehaviorConfig {
    /// When false the executables refuse to run (disabled by policy).
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for BehaviorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            log_level: default_log_level(),
        }
    }
}

/// Workspace storage configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Workspaces file. Defaults to `workspaces.json` in the data directory.
    pub workspaces_file: Option<PathBuf>,
}

impl StorageConfig {
    /// Resolved path of the workspaces file.
    pub fn workspaces_path(&self) -> PathBuf {
        self.workspaces_file.clone().unwrap_or_else(|| {
            ProjectDirs::from("com", "workspaces", "workspaces")
                .map(|dirs| dirs.data_dir().join("workspaces.json"))
                .unwrap_or_else(|| PathBuf::from("workspaces.json"))
        })
    }
}

// Default value functions for serde
fn default_timeout_secs() -> u64 {
    60
}

fn default_ready_timeout_ms() -> u64 {
    3000
}

fn default_connect_timeout_ms() -> u64 {
    5000
}

fn default_ui_grace_ms() -> u64 {
    1000
}

fn default_arranger_grace_ms() -> u64 {
    6000
}

fn default_retry_attempts() -> u32 {
    100
}

fn default_retry_interval_ms() -> u64 {
    30
}

fn default_queue_capacity() -> usize {
    256
}

fn default_true() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

/// A value that was out of range and has been replaced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigWarning {
    pub field: &'static str,
    pub message: String,
}

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

impl Config {
    /// Load configuration from standard locations.
    ///
    /// Returns default config if no file is found.
    pub fn load() -> Result<Self> {
        let paths = config_paths();

        for path in &paths {
            if path.exists() {
                tracing::info!("Loading config from: {}", path.display());
                return Self::load_from_path(path);
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Load configuration from a specific path.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Clamp out-of-range values, returning one warning per correction.
    pub fn validate(&mut self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();

        if self.launch.timeout_secs == 0 {
            warnings.push(ConfigWarning {
                field: "launch.timeout_secs",
                message: format!("must be at least 1, using {}", default_timeout_secs()),
            });
            self.launch.timeout_secs = default_timeout_secs();
        }
        if self.monitors.retry_attempts == 0 {
            warnings.push(ConfigWarning {
                field: "monitors.retry_attempts",
                message: "must be at least 1, using 1".to_string(),
            });
            self.monitors.retry_attempts = 1;
        }
        if self.observer.queue_capacity == 0 {
            warnings.push(ConfigWarning {
                field: "observer.queue_capacity",
                message: format!("must be at least 1, using {}", default_queue_capacity()),
            });
            self.observer.queue_capacity = default_queue_capacity();
        }
        let level = self.behavior.log_level.to_lowercase();
        if !LOG_LEVELS.contains(&level.as_str()) {
            warnings.push(ConfigWarning {
                field: "behavior.log_level",
                message: format!("unknown level '{}', using info", self.behavior.log_level),
            });
            self.behavior.log_level = default_log_level();
        } else {
            self.behavior.log_level = level;
        }

        warnings
    }
}

/// Get all possible config file paths in priority order.
pub fn config_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    // 1. Windows standard: %APPDATA%/workspaces/config.toml
    if let Some(proj_dirs) = ProjectDirs::from("com", "workspaces", "workspaces") {
        paths.push(proj_dirs.config_dir().join("config.toml"));
    }

    // 2. Unix-style: ~/.config/workspaces/config.toml
    if let Some(home) = dirs_home() {
        paths.push(home.join(".config").join("workspaces").join("config.toml"));
    }

    // 3. Current directory: ./config.toml
    paths.push(PathBuf::from("config.toml"));

    paths
}

/// Get the user's home directory.
fn dirs_home() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.home_dir().to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.launch.timeout_secs, 60);
        assert_eq!(config.launch.ui_grace(), Duration::from_secs(1));
        assert_eq!(config.launch.arranger_grace(), Duration::from_secs(6));
        assert_eq!(config.monitors.retry_policy(), RetryPolicy::default());
        assert_eq!(config.observer.queue_capacity, 256);
        assert!(config.behavior.enabled);
        assert_eq!(config.behavior.log_level, "info");
    }

    #[test]
    fn test_config_serialization_roundtrip() {
        let config = Config::default();
        let toml_str = toml::to_string(&config).expect("serialize");
        let parsed: Config = toml::from_str(&toml_str).expect("parse");
        assert_eq!(parsed.launch.timeout_secs, config.launch.timeout_secs);
        assert_eq!(parsed.monitors.retry_attempts, config.monitors.retry_attempts);
    }

    #[test]
    fn test_config_partial_parse() {
        let toml_str = r#"
            [launch]
            timeout_secs = 15
            arranger_executable = "C:/Tools/arranger.exe"

            [monitors]
            retry_interval_ms = 50
        "#;
        let config: Config = toml::from_str(toml_str).expect("parse");
        assert_eq!(config.launch.timeout_secs, 15);
        assert_eq!(config.launch.ready_timeout_ms, 3000);
        assert_eq!(
            config.launch.arranger_executable,
            Some(PathBuf::from("C:/Tools/arranger.exe"))
        );
        assert_eq!(config.monitors.retry_attempts, 100);
        assert_eq!(config.monitors.retry_interval_ms, 50);
        assert!(config.behavior.enabled);
    }

    #[test]
    fn test_disabled_by_policy_parses() {
        let config: Config = toml::from_str("[behavior]\nenabled = false\n").expect("parse");
        assert!(!config.behavior.enabled);
    }

    #[test]
    fn test_validate_clamps_zero_values() {
        let mut config = Config::default();
        config.launch.timeout_secs = 0;
        config.monitors.retry_attempts = 0;
        config.observer.queue_capacity = 0;
        config.behavior.log_level = "LOUD".to_string();
        let warnings = config.validate();
        assert_eq!(warnings.len(), 4);
        assert_eq!(config.launch.timeout_secs, 60);
        assert_eq!(config.monitors.retry_attempts, 1);
        assert_eq!(config.observer.queue_capacity, 256);
        assert_eq!(config.behavior.log_level, "info");
    }

    #[test]
    fn test_validate_normalizes_level_case() {
        let mut config = Config::default();
        config.behavior.log_level = "DEBUG".to_string();
        assert!(config.validate().is_empty());
        assert_eq!(config.behavior.log_level, "debug");
    }

    #[test]
    fn test_config_paths_not_empty() {
        let paths = config_paths();
        assert!(!paths.is_empty());
        assert_eq!(paths.last(), Some(&PathBuf::from("config.toml")));
    }

    #[test]
    fn test_explicit_workspaces_file_wins() {
        let storage = StorageConfig {
            workspaces_file: Some(PathBuf::from("/tmp/ws.json")),
        };
        assert_eq!(storage.workspaces_path(), PathBuf::from("/tmp/ws.json"));
    }
}
