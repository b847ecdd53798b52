//! Harness configuration
//!
//! Read from `$XDG_CONFIG_HOME/wmprobe/config.toml` (or
//! `/etc/wmprobe/config.toml`). Every field has a default, so a partial file
//! only overrides what it names.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::backend::{Geometry, ReadinessProbe};
use crate::manager::{ManagerOptions, ManagerSpec};
use crate::poll::PollPolicy;
use crate::protocol::DEFAULT_QUERY_PROPERTY;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Harness configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Display server started for each session
    pub server: ServerConfig,

    /// Window manager under test
    pub manager: ManagerConfig,

    /// Polling schedule for readiness and reparenting waits
    pub poll: PollConfig,

    /// Synthetic client windows
    pub window: WindowConfig,

    /// Runner limits
    pub run: RunSettings,
}

/// Display server configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Server binary (Xvfb, Xephyr, ...)
    pub program: String,

    /// Arguments after the display number
    pub args: Vec<String>,

    /// First display number to try
    pub display_base: u32,

    /// How long the server may take to accept connections (ms)
    pub startup_timeout_ms: u64,

    /// Time between SIGTERM and SIGKILL on teardown (ms)
    pub stop_grace_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            program: "Xvfb".to_string(),
            args: ["-screen", "0", "800x480x16", "-nolisten", "tcp", "-ac"]
                .into_iter()
                .map(String::from)
                .collect(),
            display_base: 23,
            startup_timeout_ms: 5_000,
            stop_grace_ms: 1_000,
        }
    }
}

impl ServerConfig {
    pub fn startup_timeout(&self) -> Duration {
        Duration::from_millis(self.startup_timeout_ms)
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_millis(self.stop_grace_ms)
    }
}

/// Window manager configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    pub program: String,

    pub args: Vec<String>,

    /// How readiness is detected
    pub readiness: ReadinessProbe,

    /// How long the manager may take to claim the screen (ms)
    pub startup_timeout_ms: u64,

    /// Time between SIGTERM and SIGKILL on stop (ms)
    pub stop_grace_ms: u64,

    /// Pass the manager's stdout/stderr through instead of discarding it
    pub inherit_output: bool,

    /// Property used for manager queries
    pub query_property: String,

    /// Start a session bus (`dbus-launch`) for the manager
    pub session_bus: bool,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            program: "metacity".to_string(),
            args: Vec::new(),
            readiness: ReadinessProbe::default(),
            startup_timeout_ms: 10_000,
            stop_grace_ms: 2_000,
            inherit_output: false,
            query_property: DEFAULT_QUERY_PROPERTY.to_string(),
            session_bus: false,
        }
    }
}

/// Backoff schedule (ms)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollConfig {
    pub initial_interval_ms: u64,
    pub max_interval_ms: u64,

    /// How long to wait for a window to be reparented
    pub reparent_timeout_ms: u64,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            initial_interval_ms: 10,
            max_interval_ms: 250,
            reparent_timeout_ms: 5_000,
        }
    }
}

impl PollConfig {
    /// Policy with this schedule and the given timeout
    pub fn policy(&self, timeout: Duration) -> PollPolicy {
        PollPolicy::new(timeout).with_intervals(
            Duration::from_millis(self.initial_interval_ms),
            Duration::from_millis(self.max_interval_ms),
        )
    }
}

/// Geometry of synthetic clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub x: i16,
    pub y: i16,
    pub width: u16,
    pub height: u16,
}

impl Default for WindowConfig {
    fn default() -> Self {
        let geometry = Geometry::default();
        Self {
            x: geometry.x,
            y: geometry.y,
            width: geometry.width,
            height: geometry.height,
        }
    }
}

impl WindowConfig {
    pub fn geometry(&self) -> Geometry {
        Geometry {
            x: self.x,
            y: self.y,
            width: self.width,
            height: self.height,
        }
    }
}

/// Runner limits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunSettings {
    /// Budget for a whole test (seconds)
    pub timeout_secs: u64,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self { timeout_secs: 30 }
    }
}

impl Config {
    /// Load configuration from the standard locations, falling back to defaults
    pub fn load() -> Self {
        let config_paths = [
            dirs::config_dir().map(|p| p.join("wmprobe/config.toml")),
            Some(PathBuf::from("/etc/wmprobe/config.toml")),
        ];

        for path in config_paths.into_iter().flatten() {
            if path.exists() {
                match Self::from_path(&path) {
                    Ok(config) => {
                        tracing::info!(?path, server = %config.server.program, manager = %config.manager.program, "loaded configuration");
                        return config;
                    }
                    Err(e) => {
                        tracing::warn!(?path, error = %e, "ignoring configuration");
                    }
                }
            }
        }

        tracing::debug!("using default configuration");
        Self::default()
    }

    /// Load and validate a specific file
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the harness cannot work with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.program.trim().is_empty() {
            return Err(ConfigError::Invalid("server.program is empty".into()));
        }
        if self.manager.program.trim().is_empty() {
            return Err(ConfigError::Invalid("manager.program is empty".into()));
        }
        if self.manager.query_property.is_empty() {
            return Err(ConfigError::Invalid("manager.query_property is empty".into()));
        }
        if self.poll.initial_interval_ms == 0 {
            return Err(ConfigError::Invalid("poll.initial_interval_ms must be positive".into()));
        }
        if self.poll.max_interval_ms < self.poll.initial_interval_ms {
            return Err(ConfigError::Invalid(format!(
                "poll.max_interval_ms ({}) is below poll.initial_interval_ms ({})",
                self.poll.max_interval_ms, self.poll.initial_interval_ms
            )));
        }
        if self.window.width == 0 || self.window.height == 0 {
            return Err(ConfigError::Invalid("window size must be non-zero".into()));
        }
        if self.run.timeout_secs == 0 {
            return Err(ConfigError::Invalid("run.timeout_secs must be positive".into()));
        }
        Ok(())
    }

    pub fn test_timeout(&self) -> Duration {
        Duration::from_secs(self.run.timeout_secs)
    }

    /// Launch spec for the configured manager binary
    pub fn manager_spec(&self) -> ManagerSpec {
        ManagerSpec::Command {
            program: self.manager.program.clone(),
            args: self.manager.args.clone(),
            inherit_output: self.manager.inherit_output,
        }
    }

    pub fn manager_options(&self) -> ManagerOptions {
        ManagerOptions {
            readiness: self.manager.readiness,
            startup: self
                .poll
                .policy(Duration::from_millis(self.manager.startup_timeout_ms)),
            stop_grace: Duration::from_millis(self.manager.stop_grace_ms),
            session_bus: self.manager.session_bus,
        }
    }

    pub fn reparent_policy(&self) -> PollPolicy {
        self.poll
            .policy(Duration::from_millis(self.poll.reparent_timeout_ms))
    }
}

/// Helper for getting XDG directories
mod dirs {
    use std::path::PathBuf;

    pub fn config_dir() -> Option<PathBuf> {
        std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))
    }
}
